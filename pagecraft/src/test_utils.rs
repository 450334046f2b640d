//! Test utilities: an in-process server over the in-memory store, with the model provider
//! and Stripe replaced by a `wiremock` server.

use std::sync::Arc;

use axum_test::TestServer;
use serde_json::json;
use uuid::Uuid;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, method, path},
};

use crate::{
    Application,
    auth::session::{SessionClaims, create_session_token},
    config::{Config, DatabaseConfig, StripeConfig},
    db::{
        InMemoryStore, Store,
        models::{
            projects::{ProjectCreateDBRequest, ProjectDBResponse, ProjectSource},
            users::{UserCreateDBRequest, UserDBResponse},
        },
    },
    types::UserId,
};

pub const TEST_WEBHOOK_SECRET: &str = "whsec_test_secret";
pub const TEST_MODEL: &str = "test-model";

pub fn create_test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        database: DatabaseConfig::Memory,
        secret_key: Some("test-secret-key-for-testing-only".to_string()),
        enable_metrics: false,
        generation: crate::config::GenerationConfig {
            model: TEST_MODEL.to_string(),
            request_timeout: std::time::Duration::from_secs(10),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn stripe_config(api_base: &str) -> StripeConfig {
    StripeConfig {
        api_key: "sk_test_123".to_string(),
        webhook_secret: TEST_WEBHOOK_SECRET.to_string(),
        currency: "gbp".to_string(),
        api_base: api_base.parse().expect("mock server URI is a valid URL"),
    }
}

/// A Stripe checkout session object, crediting `credits` to `user_id` through its metadata
pub fn checkout_session_json(session_id: &str, user_id: &str, credits: &str, payment_status: &str) -> serde_json::Value {
    let now = chrono::Utc::now().timestamp();
    json!({
        "id": session_id,
        "object": "checkout.session",
        "adaptive_pricing": null,
        "after_expiration": null,
        "allow_promotion_codes": null,
        "amount_subtotal": 1500,
        "amount_total": 1500,
        "automatic_tax": {"enabled": false, "liability": null, "provider": null, "status": null},
        "billing_address_collection": null,
        "cancel_url": "http://localhost:3000/dashboard?canceled=true",
        "client_reference_id": user_id,
        "client_secret": null,
        "collected_information": null,
        "consent": null,
        "consent_collection": null,
        "created": now,
        "currency": "gbp",
        "currency_conversion": null,
        "custom_fields": [],
        "custom_text": {"after_submit": null, "shipping_address": null, "submit": null, "terms_of_service_acceptance": null},
        "customer": "cus_abc",
        "customer_creation": "always",
        "customer_details": null,
        "customer_email": "buyer@example.com",
        "discounts": [],
        "expires_at": now + 86_400,
        "invoice": null,
        "invoice_creation": null,
        "livemode": false,
        "locale": null,
        "metadata": {"user_id": user_id, "credits": credits},
        "mode": "payment",
        "optional_items": null,
        "payment_intent": null,
        "payment_link": null,
        "payment_method_collection": "if_required",
        "payment_method_configuration_details": null,
        "payment_method_options": null,
        "payment_method_types": ["card"],
        "payment_status": payment_status,
        "permissions": null,
        "phone_number_collection": {"enabled": false},
        "recovered_from": null,
        "saved_payment_method_options": null,
        "setup_intent": null,
        "shipping_address_collection": null,
        "shipping_cost": null,
        "shipping_options": [],
        "status": "complete",
        "submit_type": null,
        "subscription": null,
        "success_url": "http://localhost:3000/dashboard?success=true",
        "total_details": {"amount_discount": 0, "amount_shipping": 0, "amount_tax": 0},
        "ui_mode": "hosted",
        "url": null,
        "wallet_options": null
    })
}

/// A Stripe webhook event body wrapping `object`
pub fn stripe_event(event_type: &str, object: serde_json::Value) -> String {
    json!({
        "id": format!("evt_test_{}", Uuid::new_v4().simple()),
        "object": "event",
        "api_version": null,
        "created": chrono::Utc::now().timestamp(),
        "data": {"object": object},
        "livemode": false,
        "pending_webhooks": 1,
        "request": {"id": null, "idempotency_key": null},
        "type": event_type
    })
    .to_string()
}

/// `Stripe-Signature` header value for `payload`, timestamped now
pub fn sign_stripe_payload(secret: &str, payload: &str) -> String {
    use hmac::{Hmac, Mac};

    let timestamp = chrono::Utc::now().timestamp();
    let mut mac = Hmac::<sha2::Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(format!("{timestamp}.{payload}").as_bytes());
    format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
}

pub struct TestApp {
    pub server: TestServer,
    pub store: InMemoryStore,
    /// Stands in for the model provider and for Stripe
    pub upstream: MockServer,
    pub config: Config,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_, _| {}).await
    }

    pub async fn with_cost(cost_per_generation: i64) -> Self {
        Self::with_config(|config, _| config.credits.cost_per_generation = cost_per_generation).await
    }

    pub async fn with_config(configure: impl FnOnce(&mut Config, &MockServer)) -> Self {
        let upstream = MockServer::start().await;
        let mut config = create_test_config();
        config.generation.base_url = upstream.uri().parse().expect("mock server URI is a valid URL");
        configure(&mut config, &upstream);

        let store = InMemoryStore::new();
        let server = Application::into_test_server(config.clone(), Arc::new(store.clone())).expect("Failed to create test server");

        Self {
            server,
            store,
            upstream,
            config,
        }
    }

    pub async fn create_user(&self, credits: i64) -> UserDBResponse {
        let id = Uuid::new_v4();
        self.store
            .get_or_create_user(&UserCreateDBRequest {
                id,
                email: format!("user-{}@example.com", id.simple()),
                full_name: Some("Test User".to_string()),
                initial_credits: credits,
            })
            .await
            .expect("Failed to create test user")
    }

    pub async fn create_admin(&self, credits: i64) -> UserDBResponse {
        let mut user = self.create_user(credits).await;
        self.store.set_admin(user.id, true).expect("Failed to flag admin");
        user.is_admin = true;
        user
    }

    pub fn token_for(&self, user_id: UserId, email: &str) -> String {
        let claims = SessionClaims::new(user_id, email, None, &self.config);
        create_session_token(&claims, &self.config).expect("Failed to create session token")
    }

    pub fn token(&self, user: &UserDBResponse) -> String {
        let claims = SessionClaims::new(user.id, &user.email, user.full_name.clone(), &self.config);
        create_session_token(&claims, &self.config).expect("Failed to create session token")
    }

    /// `Authorization` header value for `user`
    pub fn bearer(&self, user: &UserDBResponse) -> String {
        format!("Bearer {}", self.token(user))
    }

    pub async fn balance(&self, user_id: UserId) -> i64 {
        self.store
            .get_user(user_id)
            .await
            .expect("store lookup failed")
            .expect("user exists")
            .credits
    }

    fn project_request(user_id: UserId, prompt: &str) -> ProjectCreateDBRequest {
        let code = format!("<!DOCTYPE html>\n<html><body><h1>{prompt}</h1></body></html>");
        ProjectCreateDBRequest::new(user_id, prompt, code, TEST_MODEL, ProjectSource::Prompt)
    }

    /// Seed a project without touching the owner's balance
    pub async fn create_project(&self, user_id: UserId, prompt: &str) -> ProjectDBResponse {
        self.store
            .insert_project(&Self::project_request(user_id, prompt))
            .expect("Failed to create test project")
    }

    /// Save a project the way a generation does, debiting `cost`
    pub async fn create_project_charged(&self, user_id: UserId, prompt: &str, cost: i64) -> ProjectDBResponse {
        self.store
            .complete_generation(&Self::project_request(user_id, prompt), cost)
            .await
            .expect("Failed to complete test generation")
            .project
    }
}

/// One `data:` record of a chat completion stream
pub fn stream_chunk(delta: serde_json::Value, finish_reason: Option<&str>) -> String {
    let chunk = json!({
        "id": "chatcmpl-test",
        "object": "chat.completion.chunk",
        "created": 1_704_067_200,
        "model": TEST_MODEL,
        "choices": [{"index": 0, "delta": delta, "finish_reason": finish_reason}]
    });
    format!("data: {chunk}\n\n")
}

/// One `data:` record of a chat completion stream carrying `content`
pub fn sse_record(content: &str) -> String {
    stream_chunk(json!({"content": content}), None)
}

/// Answer blocking completions with `content`
pub async fn mock_completion(server: &MockServer, content: &str) {
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({"stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-test",
            "object": "chat.completion",
            "created": 1_704_067_200,
            "model": TEST_MODEL,
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": content},
                "finish_reason": "stop"
            }]
        })))
        .mount(server)
        .await;
}

/// Answer streaming completions with the raw event-stream `body`
pub async fn mock_stream(server: &MockServer, body: &str) {
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body.to_string(), "text/event-stream"))
        .mount(server)
        .await;
}
