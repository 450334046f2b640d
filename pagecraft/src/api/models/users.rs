//! API request/response models for users.

use crate::db::models::users::UserDBResponse;
use crate::errors::{Error, Result};
use crate::types::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// The authenticated caller, resolved against the store on every request.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentUser {
    pub id: UserId,
    pub email: String,
    pub full_name: Option<String>,
    pub is_admin: bool,
    pub credits: i64,
    /// Customer id at the payment provider, once known
    pub payment_provider_id: Option<String>,
}

impl CurrentUser {
    pub fn require_admin(&self) -> Result<()> {
        if self.is_admin {
            Ok(())
        } else {
            Err(Error::Forbidden {
                action: "admin access required".to_string(),
            })
        }
    }
}

impl From<UserDBResponse> for CurrentUser {
    fn from(user: UserDBResponse) -> Self {
        Self {
            id: user.id,
            email: user.email,
            full_name: user.full_name,
            is_admin: user.is_admin,
            credits: user.credits,
            payment_provider_id: user.payment_provider_id,
        }
    }
}

/// User profile with current balance
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: UserId,
    pub email: String,
    pub full_name: Option<String>,
    pub credits: i64,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

impl From<UserDBResponse> for UserResponse {
    fn from(user: UserDBResponse) -> Self {
        Self {
            id: user.id,
            email: user.email,
            full_name: user.full_name,
            credits: user.credits,
            is_admin: user.is_admin,
            created_at: user.created_at,
        }
    }
}
