//! Stripe payment provider implementation

use std::collections::HashMap;

use async_trait::async_trait;
use axum::http::HeaderMap;
use stripe::{Client, ClientBuilder};
use stripe_checkout::{
    CheckoutSession, CheckoutSessionMode, CheckoutSessionPaymentStatus,
    checkout_session::{
        CreateCheckoutSession, CreateCheckoutSessionCustomerCreation, CreateCheckoutSessionLineItems,
        CreateCheckoutSessionLineItemsPriceData, ProductData,
    },
};
use stripe_types::Currency;
use stripe_webhook::{EventObject, Webhook};

use crate::{
    api::models::users::CurrentUser,
    config::{CreditPlan, StripeConfig},
    db::Store,
    payment_providers::{CheckoutUrls, PaymentError, PaymentProvider, PaymentSession, Result, WebhookEvent, fulfil_payment_session},
};

pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Event types that complete a checkout
const FULFILMENT_EVENTS: [&str; 2] = ["checkout.session.completed", "checkout.session.async_payment_succeeded"];

/// Stripe payment provider
pub struct StripeProvider {
    client: Client,
    config: StripeConfig,
}

impl StripeProvider {
    /// Create a new Stripe provider
    pub fn new(config: StripeConfig) -> anyhow::Result<Self> {
        crate::install_crypto_provider();
        let client = ClientBuilder::new(config.api_key.as_str())
            .url(config.api_base.as_str().trim_end_matches('/'))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build Stripe client: {e}"))?;
        Ok(Self { client, config })
    }

    fn checkout_params(&self, user: &CurrentUser, plan: &CreditPlan, urls: &CheckoutUrls) -> Result<CreateCheckoutSession> {
        let currency: Currency = self
            .config
            .currency
            .to_ascii_lowercase()
            .parse()
            .map_err(|_| PaymentError::InvalidData(format!("Unsupported currency: {}", self.config.currency)))?;

        let mut price_data = CreateCheckoutSessionLineItemsPriceData::new(currency);
        price_data.unit_amount = Some(plan.amount);
        price_data.product_data = Some(ProductData::new(format!(
            "{} AI Credits ({})",
            plan.credits, plan.name
        )));

        let line_items = vec![CreateCheckoutSessionLineItems {
            price_data: Some(price_data),
            quantity: Some(1),
            ..Default::default()
        }];

        let metadata = HashMap::from([
            ("user_id".to_string(), user.id.to_string()),
            ("credits".to_string(), plan.credits.to_string()),
        ]);

        let params = CreateCheckoutSession::new()
            .mode(CheckoutSessionMode::Payment)
            .success_url(urls.success_url.as_str())
            .cancel_url(urls.cancel_url.as_str())
            .client_reference_id(user.id.to_string())
            .line_items(line_items)
            .metadata(metadata);

        // Include existing customer ID if we have one
        let params = if let Some(existing_id) = &user.payment_provider_id {
            tracing::info!("Using existing Stripe customer ID {} for user {}", existing_id, user.id);
            params.customer(existing_id.as_str())
        } else {
            tracing::info!("No customer ID found for user {}, Stripe will create one", user.id);
            params
                .customer_email(user.email.as_str())
                .customer_creation(CreateCheckoutSessionCustomerCreation::Always)
        };
        Ok(params)
    }
}

impl From<CheckoutSession> for PaymentSession {
    fn from(session: CheckoutSession) -> Self {
        let metadata = session.metadata.unwrap_or_default();
        let creditee_id = metadata
            .get("user_id")
            .or(session.client_reference_id.as_ref())
            .and_then(|id| id.parse().ok());
        let credits = metadata
            .get("credits")
            .and_then(|c| c.trim().parse().ok())
            .unwrap_or(0);

        PaymentSession {
            session_id: session.id.to_string(),
            creditee_id,
            credits,
            is_paid: session.payment_status == CheckoutSessionPaymentStatus::Paid,
            payment_provider_id: session.customer.as_ref().map(|customer| customer.id().to_string()),
        }
    }
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    async fn create_checkout_session(&self, _store: &dyn Store, user: &CurrentUser, plan: &CreditPlan, urls: &CheckoutUrls) -> Result<String> {
        let params = self.checkout_params(user, plan, urls)?;

        let checkout_session = params.send(&self.client).await.map_err(|e| {
            tracing::error!("Failed to create Stripe checkout session: {:?}", e);
            PaymentError::ProviderApi(e.to_string())
        })?;

        tracing::info!("Created checkout session {} for user {} ({})", checkout_session.id, user.id, plan.name);

        checkout_session.url.ok_or_else(|| {
            tracing::error!("Checkout session missing URL");
            PaymentError::ProviderApi("Checkout session missing URL".to_string())
        })
    }

    async fn validate_webhook(&self, headers: &HeaderMap, body: &str) -> Result<Option<WebhookEvent>> {
        // Get the Stripe signature from headers
        let signature = headers
            .get(SIGNATURE_HEADER)
            .ok_or_else(|| {
                tracing::error!("Missing stripe-signature header");
                PaymentError::InvalidSignature("Missing stripe-signature header".to_string())
            })?
            .to_str()
            .map_err(|e| {
                tracing::error!("Invalid stripe-signature header: {:?}", e);
                PaymentError::InvalidSignature("Invalid stripe-signature header".to_string())
            })?;

        // Validate the webhook signature and construct the event
        let event = Webhook::construct_event(body, signature, &self.config.webhook_secret).map_err(|e| {
            tracing::error!("Failed to construct webhook event: {:?}", e);
            PaymentError::InvalidSignature(e.to_string())
        })?;

        let event_type = event.type_.to_string();
        tracing::trace!("Validated Stripe webhook event {}: {}", event.id, event_type);

        let session = match event.data.object {
            EventObject::CheckoutSessionCompleted(session)
            | EventObject::CheckoutSessionAsyncPaymentSucceeded(session)
            | EventObject::CheckoutSessionAsyncPaymentFailed(session)
            | EventObject::CheckoutSessionExpired(session) => Some((*session).into()),
            _ => None,
        };

        Ok(Some(WebhookEvent { event_type, session }))
    }

    async fn process_webhook_event(&self, store: &dyn Store, event: &WebhookEvent) -> Result<()> {
        // Only process checkout session completion events
        if !FULFILMENT_EVENTS.contains(&event.event_type.as_str()) {
            tracing::debug!("Ignoring webhook event type: {}", event.event_type);
            return Ok(());
        }

        let session = event.session.as_ref().ok_or_else(|| {
            tracing::error!("Webhook event missing checkout session");
            PaymentError::InvalidData("Missing checkout session in webhook event".to_string())
        })?;

        tracing::trace!("Processing webhook event {} for session: {}", event.event_type, session.session_id);

        fulfil_payment_session(store, session, "Stripe payment").await
    }
}
