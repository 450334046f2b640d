//! Persistence for users, projects and the credit ledger.
//!
//! All handlers talk to a [`Store`]. Two implementations exist:
//!
//! - [`PostgresStore`]: the production backend, built on `sqlx`
//! - [`InMemoryStore`]: a process-local backend with the same semantics, used for
//!   `database.type: memory` and in tests
//!
//! Every balance mutation goes through a single conditional statement together with its
//! ledger row, so concurrent requests can never overspend or double-credit.

pub mod errors;
pub mod in_memory;
pub mod models;
pub mod postgres;

use async_trait::async_trait;

use crate::types::{ProjectId, UserId};
use errors::Result;
use models::{
    credits::{CreditTransactionCreateDBRequest, CreditTransactionDBResponse},
    projects::{GenerationReceipt, ProjectCreateDBRequest, ProjectDBResponse, ProjectFilter, ProjectWithOwnerDBResponse},
    users::{UserCreateDBRequest, UserDBResponse},
};

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;

#[async_trait]
pub trait Store: Send + Sync {
    /// Get a user by ID
    async fn get_user(&self, id: UserId) -> Result<Option<UserDBResponse>>;

    /// Get a user by email (case-insensitive)
    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserDBResponse>>;

    /// Return the user with `request.id`, creating it with the initial balance if missing.
    async fn get_or_create_user(&self, request: &UserCreateDBRequest) -> Result<UserDBResponse>;

    /// Remember the payment provider's customer id for a user
    async fn set_payment_provider_id(&self, user_id: UserId, payment_provider_id: &str) -> Result<()>;

    /// All users, newest first
    async fn list_users(&self, skip: i64, limit: i64) -> Result<Vec<UserDBResponse>>;

    /// Insert the project and debit `cost` from its owner in one transaction.
    ///
    /// Fails with [`errors::DbError::InsufficientCredits`] and leaves nothing behind when the
    /// balance no longer covers the cost.
    async fn complete_generation(&self, request: &ProjectCreateDBRequest, cost: i64) -> Result<GenerationReceipt>;

    /// Add `request.amount` to the user's balance and record the ledger row.
    ///
    /// A repeated `source_id` fails with a unique violation on
    /// [`models::credits::SOURCE_ID_UNIQUE_CONSTRAINT`] and does not change the balance.
    async fn add_credits(&self, request: &CreditTransactionCreateDBRequest) -> Result<CreditTransactionDBResponse>;

    /// Whether a ledger row with this source already exists
    async fn transaction_exists(&self, source_id: &str) -> Result<bool>;

    /// A user's ledger, newest first
    async fn list_transactions(&self, user_id: UserId, skip: i64, limit: i64) -> Result<Vec<CreditTransactionDBResponse>>;

    /// Get a project by ID
    async fn get_project(&self, id: ProjectId) -> Result<Option<ProjectDBResponse>>;

    /// Projects matching the filter, newest first
    async fn list_projects(&self, filter: &ProjectFilter) -> Result<Vec<ProjectDBResponse>>;

    /// All projects with their owner's email, newest first
    async fn list_projects_with_owner(&self, skip: i64, limit: i64) -> Result<Vec<ProjectWithOwnerDBResponse>>;

    /// Delete a project owned by `user_id`. Returns false if no such project exists.
    async fn delete_project(&self, id: ProjectId, user_id: UserId) -> Result<bool>;
}
