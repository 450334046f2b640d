//! API models for admin operations.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::types::UserId;

/// Grant credits to a user
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddCreditsRequest {
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    /// Credits to add; must be positive
    pub amount: i64,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddCreditsResponse {
    pub success: bool,
    pub new_balance: i64,
}
