//! Database models for credit transactions.

use crate::types::{TransactionId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Unique constraint on `credit_transactions.source_id`
pub const SOURCE_ID_UNIQUE_CONSTRAINT: &str = "credit_transactions_source_id_unique";

/// Credit transaction type enum stored as TEXT in database
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, ToSchema)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CreditTransactionType {
    Purchase,
    AdminGrant,
    Usage,
}

/// Database request for crediting a user's balance
#[derive(Debug, Clone)]
pub struct CreditTransactionCreateDBRequest {
    pub user_id: UserId,
    pub transaction_type: CreditTransactionType,
    /// Always positive; the transaction type decides the direction
    pub amount: i64,
    /// Idempotency key. A second transaction with the same source is rejected.
    pub source_id: String,
    pub description: Option<String>,
}

impl CreditTransactionCreateDBRequest {
    /// A completed checkout, keyed by the payment provider's session id
    pub fn purchase(user_id: UserId, amount: i64, session_id: &str, description: Option<String>) -> Self {
        Self {
            user_id,
            transaction_type: CreditTransactionType::Purchase,
            amount,
            source_id: session_id.to_string(),
            description,
        }
    }

    /// Create an admin grant request with automatically generated random source_id
    pub fn admin_grant(user_id: UserId, grantor_id: UserId, amount: i64, description: Option<String>) -> Self {
        Self {
            user_id,
            transaction_type: CreditTransactionType::AdminGrant,
            amount,
            source_id: format!("{}_{}", grantor_id, uuid::Uuid::new_v4()),
            description,
        }
    }
}

/// Database response for a credit transaction
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct CreditTransactionDBResponse {
    pub id: TransactionId,
    pub user_id: UserId,
    pub transaction_type: CreditTransactionType,
    pub amount: i64,
    pub balance_after: i64,
    pub source_id: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}
