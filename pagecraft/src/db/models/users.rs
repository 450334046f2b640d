//! Database models for users.

use crate::types::UserId;
use chrono::{DateTime, Utc};

/// Database request for provisioning a user on first authentication
#[derive(Debug, Clone)]
pub struct UserCreateDBRequest {
    pub id: UserId,
    pub email: String,
    pub full_name: Option<String>,
    pub initial_credits: i64,
}

/// Database response for a user
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct UserDBResponse {
    pub id: UserId,
    pub email: String,
    pub full_name: Option<String>,
    pub credits: i64,
    pub is_admin: bool,
    pub payment_provider_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
