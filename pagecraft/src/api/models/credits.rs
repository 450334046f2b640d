//! API models for the credit ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::models::credits::{CreditTransactionDBResponse, CreditTransactionType};
use crate::types::{TransactionId, UserId};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreditTransactionResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: TransactionId,
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    pub transaction_type: CreditTransactionType,
    /// Always positive; `usage` rows are debits
    pub amount: i64,
    pub balance_after: i64,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<CreditTransactionDBResponse> for CreditTransactionResponse {
    fn from(tx: CreditTransactionDBResponse) -> Self {
        Self {
            id: tx.id,
            user_id: tx.user_id,
            transaction_type: tx.transaction_type,
            amount: tx.amount,
            balance_after: tx.balance_after,
            description: tx.description,
            created_at: tx.created_at,
        }
    }
}
