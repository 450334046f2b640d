//! # pagecraft: credit-metered website generation
//!
//! `pagecraft` turns a text prompt, or a hand-drawn sketch, into a self-contained page section
//! (HTML with Tailwind CSS) by calling an OpenAI-compatible model provider. Every successful
//! generation is saved as a project and paid for with credits; credits are bought through
//! Stripe Checkout or granted by an administrator.
//!
//! ## Request flow
//!
//! 1. The caller authenticates with a session JWT from the identity provider
//!    ([`auth`]). Users are provisioned on first sight.
//! 2. `POST /api/generate` checks the balance, then calls the provider ([`generation`]),
//!    either waiting for the whole completion or relaying server-sent events to the client
//!    while accumulating the text.
//! 3. Only a complete result is persisted. Saving the project and debiting the owner happen in
//!    one store operation ([`db::Store::complete_generation`]), so a failed or abandoned
//!    generation is never charged and a balance never goes negative.
//!
//! Payments ([`payment_providers`]) credit the buyer when the provider's signed webhook
//! arrives. The session id is the ledger's idempotency key, so redelivered webhooks credit
//! once.
//!
//! ## Storage
//!
//! PostgreSQL via `sqlx` in production, or a process-local store for development and tests.
//! Both implement [`db::Store`] with the same atomicity guarantees.
//!
//! ## Configuration
//!
//! See [`config`]: a YAML file with `PAGECRAFT_`-prefixed environment overrides.
#![recursion_limit = "256"]

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod generation;
mod openapi;
pub mod payment_providers;
pub mod telemetry;
pub mod types;

#[cfg(test)]
pub mod test_utils;

use std::sync::Arc;

use axum::{
    Json, Router,
    http::{self, HeaderValue},
    routing::{get, post},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

pub use config::Config;
pub use types::{ProjectId, UserId};

use crate::{
    config::{CorsOrigin, DatabaseConfig},
    db::{InMemoryStore, PostgresStore, Store},
    generation::upstream::UpstreamClient,
    openapi::ApiDoc,
    payment_providers::PaymentProvider,
};

/// Application state shared across all request handlers.
///
/// ```ignore
/// let state = AppState::builder()
///     .store(store)
///     .config(config)
///     .upstream(upstream)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Config,
    /// Client for the model provider
    pub upstream: UpstreamClient,
    /// Checkout and webhooks are disabled when `None`
    pub payment_provider: Option<Arc<dyn PaymentProvider>>,
}

/// Install the process-wide rustls crypto provider. Safe to call more than once.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// Get the pagecraft database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Open the configured store, running migrations for PostgreSQL.
///
/// Returns the pool as well so it can be closed on shutdown.
async fn setup_store(config: &Config) -> anyhow::Result<(Arc<dyn Store>, Option<sqlx::PgPool>)> {
    match &config.database {
        DatabaseConfig::Memory => {
            info!("Using in-memory store; data will be lost on shutdown");
            Ok((Arc::new(InMemoryStore::new()), None))
        }
        DatabaseConfig::External { url, pool } => {
            info!("Using external database");
            let db = PgPoolOptions::new()
                .max_connections(pool.max_connections)
                .min_connections(pool.min_connections)
                .acquire_timeout(pool.acquire_timeout)
                .connect(url)
                .await?;
            migrator().run(&db).await?;
            Ok((Arc::new(PostgresStore::new(db.clone())), Some(db)))
        }
    }
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let mut origins = Vec::new();
    for origin in &config.auth.security.cors.allowed_origins {
        let header_value = match origin {
            CorsOrigin::Wildcard => "*".parse::<HeaderValue>()?,
            CorsOrigin::Url(url) => url.as_str().trim_end_matches('/').parse::<HeaderValue>()?,
        };
        origins.push(header_value);
    }

    let mut cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([http::Method::GET, http::Method::POST, http::Method::DELETE])
        .allow_headers([http::header::AUTHORIZATION, http::header::CONTENT_TYPE])
        .allow_credentials(config.auth.security.cors.allow_credentials);

    if let Some(max_age) = config.auth.security.cors.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router with all endpoints and middleware.
///
/// - `/api/*`: the authenticated JSON API
/// - `/webhooks/stripe`: payment provider callbacks (signature-authenticated)
/// - `/docs` and `/api-docs/openapi.json`: API documentation
/// - `/internal/metrics`: Prometheus metrics, when enabled
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    use api::handlers::{admin, generate, payments, projects, users};

    let api_routes = Router::new()
        .route("/generate", post(generate::generate))
        .route("/checkout", post(payments::create_checkout))
        .route("/me", get(users::get_current_user))
        .route("/credits/transactions", get(users::list_transactions))
        .route("/projects", get(projects::list_projects))
        .route("/projects/{project_id}", get(projects::get_project).delete(projects::delete_project))
        .route("/admin/add-credits", post(admin::add_credits))
        .route("/admin/users", get(admin::list_users))
        .route("/admin/projects", get(admin::list_all_projects))
        .with_state(state.clone());

    let router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .route("/webhooks/stripe", post(payments::stripe_webhook))
        .route("/api-docs/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .with_state(state.clone())
        .nest("/api", api_routes)
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()));

    let mut router = router.layer(create_cors_layer(&state.config)?);

    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    let router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// A fully wired server: store, clients and router.
pub struct Application {
    router: Router,
    config: Config,
    pool: Option<sqlx::PgPool>,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting pagecraft with configuration: {:#?}", config);

        let (store, pool) = setup_store(&config).await?;
        Self::with_store(config, store, pool)
    }

    fn with_store(config: Config, store: Arc<dyn Store>, pool: Option<sqlx::PgPool>) -> anyhow::Result<Self> {
        let upstream = UpstreamClient::new(&config.generation)?;
        let payment_provider = config.payment.as_ref().map(payment_providers::create_provider).transpose()?;
        if payment_provider.is_none() {
            info!("No payment provider configured; checkout is disabled");
        }

        let app_state = AppState::builder()
            .store(store)
            .config(config.clone())
            .upstream(upstream)
            .maybe_payment_provider(payment_provider)
            .build();

        let router = build_router(&app_state)?;

        Ok(Self { router, config, pool })
    }

    /// Convert application into a test server backed by `store`
    #[cfg(test)]
    pub fn into_test_server(config: Config, store: Arc<dyn Store>) -> anyhow::Result<axum_test::TestServer> {
        let app = Self::with_store(config, store, None)?;
        axum_test::TestServer::new(app.router.into_make_service())
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("pagecraft listening on http://{}", bind_addr);

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        if let Some(pool) = self.pool {
            info!("Closing database connections...");
            pool.close().await;
        }

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
