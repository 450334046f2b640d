//! HTTP handlers for payment processing endpoints.

use axum::{Json, extract::State, http::HeaderMap};

use crate::{
    AppState,
    api::models::{
        payments::{CheckoutRequest, CheckoutResponse, WebhookAck},
        users::CurrentUser,
    },
    config::CreditPlan,
    errors::{Error, Result},
    payment_providers::{CheckoutUrls, PaymentError, PaymentProvider},
};

fn configured_provider(state: &AppState) -> Result<&dyn PaymentProvider> {
    state.payment_provider.as_deref().ok_or_else(|| Error::NotConfigured {
        feature: "Payment provider".to_string(),
    })
}

/// Create a checkout session for a credit pack
#[utoipa::path(
    post,
    path = "/api/checkout",
    tag = "payments",
    summary = "Create checkout session",
    description = "Creates a hosted checkout session for the chosen plan and returns its URL. \
                   When a plan catalogue is configured the request must match one of its plans.",
    request_body = CheckoutRequest,
    responses(
        (status = 200, description = "Checkout session created", body = CheckoutResponse),
        (status = 400, description = "Invalid or unknown plan"),
        (status = 401, description = "Unauthorized"),
        (status = 501, description = "No payment provider configured"),
        (status = 502, description = "Payment provider request failed"),
    ),
    security(
        ("BearerAuth" = []),
        ("CookieAuth" = [])
    )
)]
#[tracing::instrument(skip_all)]
pub async fn create_checkout(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>> {
    let provider = configured_provider(&state).inspect_err(|_| {
        tracing::warn!("Checkout requested but no payment provider is configured");
    })?;

    if request.amount <= 0 || request.credits <= 0 {
        return Err(Error::BadRequest {
            message: "Amount and credits must be positive".to_string(),
        });
    }

    let plan = if state.config.plans.is_empty() {
        CreditPlan {
            name: request.plan_name.clone(),
            amount: request.amount,
            credits: request.credits,
        }
    } else {
        state
            .config
            .find_plan(&request.plan_name, request.amount, request.credits)
            .cloned()
            .ok_or_else(|| Error::BadRequest {
                message: format!("Unknown plan: {}", request.plan_name),
            })?
    };

    let urls = CheckoutUrls::for_dashboard(&state.config.dashboard_url)?;
    let url = provider
        .create_checkout_session(state.store.as_ref(), &current_user, &plan, &urls)
        .await?;

    Ok(Json(CheckoutResponse { url }))
}

/// Receive payment provider webhooks
#[utoipa::path(
    post,
    path = "/webhooks/stripe",
    tag = "payments",
    summary = "Stripe webhook",
    description = "Verifies the `Stripe-Signature` header and credits completed checkout sessions. \
                   Deliveries for an already credited session are acknowledged without crediting again.",
    request_body(content = String, content_type = "application/json"),
    responses(
        (status = 200, description = "Event received", body = WebhookAck),
        (status = 400, description = "Invalid signature or payload"),
        (status = 500, description = "Crediting failed; the provider should retry"),
        (status = 501, description = "No payment provider configured"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn stripe_webhook(State(state): State<AppState>, headers: HeaderMap, body: String) -> Result<Json<WebhookAck>> {
    let provider = configured_provider(&state).inspect_err(|_| {
        tracing::warn!("Webhook called but no payment provider is configured");
    })?;

    let Some(event) = provider.validate_webhook(&headers, &body).await? else {
        return Ok(Json(WebhookAck { received: true }));
    };

    tracing::info!("Received webhook event: {}", event.event_type);

    match provider.process_webhook_event(state.store.as_ref(), &event).await {
        Ok(()) => {}
        // Retrying can fix storage failures, so let the provider redeliver
        Err(PaymentError::Database(e)) => return Err(Error::Database(e)),
        Err(e) => tracing::warn!("Webhook event {} not fulfilled: {}", event.event_type, e),
    }

    Ok(Json(WebhookAck { received: true }))
}
