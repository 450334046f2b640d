//! OpenAPI documentation for the HTTP API, served by Scalar at `/docs`.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use crate::api;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "BearerAuth".to_string(),
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .description(Some(
                            "Session token issued by the identity provider:\n\n\
                            ```\nAuthorization: Bearer YOUR_ACCESS_TOKEN\n```",
                        ))
                        .build(),
                ),
            );
            components.security_schemes.insert(
                "CookieAuth".to_string(),
                SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::with_description(
                    "pagecraft_session",
                    "The same session token, carried in a cookie",
                ))),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Pagecraft API",
        description = "Credit-metered generation of website sections from prompts and sketches."
    ),
    modifiers(&SecurityAddon),
    paths(
        api::handlers::generate::generate,
        api::handlers::projects::list_projects,
        api::handlers::projects::get_project,
        api::handlers::projects::delete_project,
        api::handlers::users::get_current_user,
        api::handlers::users::list_transactions,
        api::handlers::payments::create_checkout,
        api::handlers::payments::stripe_webhook,
        api::handlers::admin::add_credits,
        api::handlers::admin::list_users,
        api::handlers::admin::list_all_projects,
    ),
    components(
        schemas(
            api::models::generate::GenerateRequest,
            api::models::generate::GenerateResponse,
            api::models::projects::ProjectResponse,
            api::models::projects::ProjectSummary,
            api::models::users::UserResponse,
            api::models::credits::CreditTransactionResponse,
            api::models::payments::CheckoutRequest,
            api::models::payments::CheckoutResponse,
            api::models::payments::WebhookAck,
            api::models::admin::AddCreditsRequest,
            api::models::admin::AddCreditsResponse,
            crate::db::models::credits::CreditTransactionType,
            crate::db::models::projects::ProjectSource,
        )
    ),
    tags(
        (name = "generation", description = "Generate website code"),
        (name = "projects", description = "Saved generations"),
        (name = "users", description = "The signed-in user"),
        (name = "credits", description = "Credit ledger"),
        (name = "payments", description = "Buying credits"),
        (name = "admin", description = "Administrative operations"),
    )
)]
pub struct ApiDoc;
