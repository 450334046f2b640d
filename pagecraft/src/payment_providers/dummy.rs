//! Dummy payment provider implementation
//!
//! This provider credits the chosen plan immediately without taking any payment.
//! Useful for testing and development purposes.

use async_trait::async_trait;
use axum::http::HeaderMap;

use crate::{
    api::models::users::CurrentUser,
    config::CreditPlan,
    db::Store,
    payment_providers::{CheckoutUrls, PaymentProvider, PaymentSession, Result, WebhookEvent, fulfil_payment_session},
};

/// Dummy payment provider that grants credits on checkout
pub struct DummyProvider;

#[async_trait]
impl PaymentProvider for DummyProvider {
    async fn create_checkout_session(&self, store: &dyn Store, user: &CurrentUser, plan: &CreditPlan, urls: &CheckoutUrls) -> Result<String> {
        let session = PaymentSession {
            session_id: format!("dummy_session_{}_{}", user.id, uuid::Uuid::new_v4()),
            creditee_id: Some(user.id),
            credits: plan.credits,
            is_paid: true,
            payment_provider_id: None,
        };

        tracing::info!("Dummy provider created checkout session {} for user {}", session.session_id, user.id);

        // Payment is instantly "complete" for the dummy provider
        fulfil_payment_session(store, &session, "Dummy payment (test)").await?;
        Ok(urls.success_url.clone())
    }

    async fn validate_webhook(&self, _headers: &HeaderMap, _body: &str) -> Result<Option<WebhookEvent>> {
        // Dummy provider doesn't use webhooks
        Ok(None)
    }

    async fn process_webhook_event(&self, _store: &dyn Store, _event: &WebhookEvent) -> Result<()> {
        Ok(())
    }
}
