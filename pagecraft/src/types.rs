//! Common type definitions.
//!
//! All entity IDs are UUIDs wrapped in type aliases:
//!
//! - [`UserId`]: User account identifier (the identity provider's subject)
//! - [`ProjectId`]: Generated artifact identifier
//! - [`TransactionId`]: Credit ledger entry identifier

use uuid::Uuid;

pub type UserId = Uuid;
pub type ProjectId = Uuid;
pub type TransactionId = Uuid;

/// Abbreviate a UUID to its first 8 characters for more readable logs and traces
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}
