//! API models for checkout and payment webhooks.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Credit pack chosen on the pricing page
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    /// Price in the currency's minor unit
    #[schema(example = 1500)]
    pub amount: i64,
    #[schema(example = 2000)]
    pub credits: i64,
    #[schema(example = "Pro")]
    pub plan_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CheckoutResponse {
    /// Hosted checkout page to redirect the user to
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
}
