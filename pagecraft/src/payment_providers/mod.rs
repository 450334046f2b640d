//! Payment provider abstraction layer
//!
//! This module defines the `PaymentProvider` trait which abstracts checkout and webhook
//! handling across payment providers. Crediting a completed payment is shared by every
//! provider and lives in [`fulfil_payment_session`].

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use url::Url;

use crate::{
    api::models::users::CurrentUser,
    config::{CreditPlan, PaymentConfig},
    db::{
        Store,
        errors::DbError,
        models::credits::{CreditTransactionCreateDBRequest, SOURCE_ID_UNIQUE_CONSTRAINT},
    },
    errors::Error,
    types::UserId,
};

pub mod dummy;
pub mod stripe;

/// Create a payment provider from configuration
///
/// This is the single point where we convert config into provider instances.
pub fn create_provider(config: &PaymentConfig) -> anyhow::Result<Arc<dyn PaymentProvider>> {
    let provider: Arc<dyn PaymentProvider> = match config {
        PaymentConfig::Stripe(stripe_config) => Arc::new(stripe::StripeProvider::new(stripe_config.clone())?),
        PaymentConfig::Dummy(_) => Arc::new(dummy::DummyProvider),
    };
    Ok(provider)
}

/// Result type for payment provider operations
pub type Result<T> = std::result::Result<T, PaymentError>;

/// Errors that can occur during payment processing
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("Payment provider API error: {0}")]
    ProviderApi(String),

    #[error("Webhook signature verification failed: {0}")]
    InvalidSignature(String),

    #[error("Payment not completed yet")]
    PaymentNotCompleted,

    #[error("Invalid payment data: {0}")]
    InvalidData(String),

    #[error("Database error: {0}")]
    Database(#[from] DbError),
}

impl From<PaymentError> for Error {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::ProviderApi(message) => {
                tracing::error!(%message, "Payment provider request failed");
                Error::Upstream {
                    message: "Payment provider request failed".to_string(),
                }
            }
            PaymentError::InvalidSignature(message) => Error::BadRequest {
                message: format!("Webhook Error: {message}"),
            },
            PaymentError::PaymentNotCompleted => Error::BadRequest {
                message: "Payment not completed".to_string(),
            },
            PaymentError::InvalidData(message) => Error::BadRequest { message },
            PaymentError::Database(e) => Error::Database(e),
        }
    }
}

/// A checkout session as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentSession {
    /// Provider session id, used as the ledger idempotency key
    pub session_id: String,
    /// Local user to credit
    pub creditee_id: Option<UserId>,
    /// Credits bought
    pub credits: i64,
    /// Whether the payment has been completed
    pub is_paid: bool,
    /// Customer id at the provider, if one was created
    pub payment_provider_id: Option<String>,
}

/// Represents a webhook event from a payment provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEvent {
    /// Type of event (e.g., "checkout.session.completed")
    pub event_type: String,
    /// Checkout session carried by the event, if applicable
    pub session: Option<PaymentSession>,
}

/// Redirect targets for a hosted checkout page
#[derive(Debug, Clone)]
pub struct CheckoutUrls {
    pub success_url: String,
    pub cancel_url: String,
}

impl CheckoutUrls {
    /// Dashboard pages the provider redirects back to
    pub fn for_dashboard(dashboard_url: &Url) -> anyhow::Result<Self> {
        let dashboard = dashboard_url.join("dashboard")?;
        Ok(Self {
            success_url: format!("{dashboard}?success=true"),
            cancel_url: format!("{dashboard}?canceled=true"),
        })
    }
}

/// Abstract payment provider interface
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Create a new checkout session for `plan`.
    ///
    /// Returns a URL that the user should be redirected to for payment.
    async fn create_checkout_session(&self, store: &dyn Store, user: &CurrentUser, plan: &CreditPlan, urls: &CheckoutUrls) -> Result<String>;

    /// Validate and extract webhook event from raw request data
    ///
    /// Returns None if this provider doesn't support webhooks.
    /// Returns Err if validation fails (invalid signature, malformed data, etc.)
    async fn validate_webhook(&self, headers: &HeaderMap, body: &str) -> Result<Option<WebhookEvent>>;

    /// Process a validated webhook event
    ///
    /// Processing the same event multiple times is safe.
    async fn process_webhook_event(&self, store: &dyn Store, event: &WebhookEvent) -> Result<()>;
}

/// Credit the user for a paid session, exactly once per session id.
pub async fn fulfil_payment_session(store: &dyn Store, session: &PaymentSession, description: &str) -> Result<()> {
    // Fast path: duplicate deliveries. The unique constraint below handles races.
    if store.transaction_exists(&session.session_id).await? {
        tracing::trace!("Transaction for session_id {} already exists, skipping (fast path)", session.session_id);
        return Ok(());
    }

    if !session.is_paid {
        tracing::trace!("Transaction for session_id {} has not been paid, skipping.", session.session_id);
        return Err(PaymentError::PaymentNotCompleted);
    }

    let user_id = session
        .creditee_id
        .ok_or_else(|| PaymentError::InvalidData("Missing user_id in session metadata".to_string()))?;
    if session.credits <= 0 {
        return Err(PaymentError::InvalidData("Missing credits in session metadata".to_string()));
    }

    let request = CreditTransactionCreateDBRequest::purchase(user_id, session.credits, &session.session_id, Some(description.to_string()));

    match store.add_credits(&request).await {
        Ok(transaction) => {
            tracing::info!(
                "Successfully fulfilled checkout session {} for user {}: {} credits, balance {}",
                session.session_id,
                user_id,
                session.credits,
                transaction.balance_after
            );
            metrics::counter!("pagecraft_credits_purchased_total").increment(session.credits as u64);
        }
        Err(e) if e.is_unique_violation_of(SOURCE_ID_UNIQUE_CONSTRAINT) => {
            tracing::trace!(
                "Transaction for session_id {} already processed (caught unique constraint violation), returning success (idempotent)",
                session.session_id
            );
            return Ok(());
        }
        Err(DbError::NotFound) => {
            return Err(PaymentError::InvalidData(format!("Unknown user {user_id}")));
        }
        Err(e) => {
            tracing::error!("Failed to create credit transaction: {:?}", e);
            return Err(PaymentError::Database(e));
        }
    }

    if let Some(customer_id) = &session.payment_provider_id
        && let Err(e) = store.set_payment_provider_id(user_id, customer_id).await
    {
        tracing::warn!("Failed to save payment provider customer ID for user {}: {:?}", user_id, e);
    }

    Ok(())
}
