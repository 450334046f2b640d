//! In-memory store implementation.
//!
//! All state lives behind a single lock, so every multi-step operation (insert project and
//! debit, credit and ledger row) is applied atomically, matching the transactional behaviour
//! of the PostgreSQL store. Data is lost on restart.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use super::{
    Store,
    errors::{DbError, Result},
    models::{
        credits::{CreditTransactionCreateDBRequest, CreditTransactionDBResponse, CreditTransactionType, SOURCE_ID_UNIQUE_CONSTRAINT},
        projects::{GenerationReceipt, ProjectCreateDBRequest, ProjectDBResponse, ProjectFilter, ProjectWithOwnerDBResponse},
        users::{UserCreateDBRequest, UserDBResponse},
    },
};
use crate::types::{ProjectId, UserId};

#[derive(Default)]
struct State {
    users: HashMap<UserId, UserDBResponse>,
    projects: HashMap<ProjectId, ProjectDBResponse>,
    transactions: Vec<CreditTransactionDBResponse>,
    /// Strictly increasing timestamps keep newest-first ordering stable within a test
    last_timestamp: Option<DateTime<Utc>>,
}

impl State {
    fn now(&mut self) -> DateTime<Utc> {
        let mut now = Utc::now();
        if let Some(last) = self.last_timestamp
            && now <= last
        {
            now = last + chrono::Duration::microseconds(1);
        }
        self.last_timestamp = Some(now);
        now
    }

    fn push_transaction(&mut self, request: &CreditTransactionCreateDBRequest, balance_after: i64) -> CreditTransactionDBResponse {
        let transaction = CreditTransactionDBResponse {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            transaction_type: request.transaction_type,
            amount: request.amount,
            balance_after,
            source_id: request.source_id.clone(),
            description: request.description.clone(),
            created_at: self.now(),
        };
        self.transactions.push(transaction.clone());
        transaction
    }
}

/// In-memory implementation of the [`Store`] trait.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a user's balance directly. Bypasses the ledger; for seeding.
    pub fn set_credits(&self, user_id: UserId, credits: i64) -> Result<()> {
        let mut state = self.state.write();
        let user = state.users.get_mut(&user_id).ok_or(DbError::NotFound)?;
        user.credits = credits;
        Ok(())
    }

    /// Flag or unflag a user as admin.
    pub fn set_admin(&self, user_id: UserId, is_admin: bool) -> Result<()> {
        let mut state = self.state.write();
        let user = state.users.get_mut(&user_id).ok_or(DbError::NotFound)?;
        user.is_admin = is_admin;
        Ok(())
    }

    /// Save a project without charging its owner. Bypasses the ledger; for seeding.
    pub fn insert_project(&self, request: &ProjectCreateDBRequest) -> Result<ProjectDBResponse> {
        let mut state = self.state.write();
        if !state.users.contains_key(&request.user_id) {
            return Err(DbError::NotFound);
        }
        let project = ProjectDBResponse {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            title: request.title.clone(),
            prompt: request.prompt.clone(),
            code: request.code.clone(),
            framework: request.framework.clone(),
            language: request.language.clone(),
            model: request.model.clone(),
            source: request.source,
            created_at: state.now(),
        };
        state.projects.insert(project.id, project.clone());
        Ok(project)
    }
}

fn newest_first<T>(items: &mut [T], key: impl Fn(&T) -> (DateTime<Utc>, Uuid)) {
    items.sort_by_key(|item| std::cmp::Reverse(key(item)));
}

fn page<T>(items: Vec<T>, skip: i64, limit: i64) -> Vec<T> {
    items
        .into_iter()
        .skip(skip.max(0) as usize)
        .take(limit.max(0) as usize)
        .collect()
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_user(&self, id: UserId) -> Result<Option<UserDBResponse>> {
        Ok(self.state.read().users.get(&id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserDBResponse>> {
        let state = self.state.read();
        Ok(state.users.values().find(|u| u.email.eq_ignore_ascii_case(email)).cloned())
    }

    async fn get_or_create_user(&self, request: &UserCreateDBRequest) -> Result<UserDBResponse> {
        let mut state = self.state.write();
        if let Some(user) = state.users.get(&request.id) {
            return Ok(user.clone());
        }
        if state.users.values().any(|u| u.email.eq_ignore_ascii_case(&request.email)) {
            return Err(DbError::UniqueViolation {
                constraint: Some("users_email_unique".to_string()),
                table: Some("users".to_string()),
                message: format!("email {} already registered", request.email),
            });
        }

        let now = state.now();
        let user = UserDBResponse {
            id: request.id,
            email: request.email.clone(),
            full_name: request.full_name.clone(),
            credits: request.initial_credits,
            is_admin: false,
            payment_provider_id: None,
            created_at: now,
            updated_at: now,
        };
        state.users.insert(user.id, user.clone());
        tracing::info!(email = %user.email, credits = user.credits, "Provisioned new user");
        Ok(user)
    }

    async fn set_payment_provider_id(&self, user_id: UserId, payment_provider_id: &str) -> Result<()> {
        let mut state = self.state.write();
        let now = state.now();
        let user = state.users.get_mut(&user_id).ok_or(DbError::NotFound)?;
        user.payment_provider_id = Some(payment_provider_id.to_string());
        user.updated_at = now;
        Ok(())
    }

    async fn list_users(&self, skip: i64, limit: i64) -> Result<Vec<UserDBResponse>> {
        let mut users: Vec<_> = self.state.read().users.values().cloned().collect();
        newest_first(&mut users, |u| (u.created_at, u.id));
        Ok(page(users, skip, limit))
    }

    async fn complete_generation(&self, request: &ProjectCreateDBRequest, cost: i64) -> Result<GenerationReceipt> {
        let mut state = self.state.write();

        let balance = state.users.get(&request.user_id).ok_or(DbError::ForeignKeyViolation {
            constraint: Some("projects_user_id_fkey".to_string()),
            table: Some("projects".to_string()),
            message: "user does not exist".to_string(),
        })?;
        let balance = balance.credits;
        if balance < cost {
            return Err(DbError::InsufficientCredits { required: cost, balance });
        }

        let created_at = state.now();
        let project = ProjectDBResponse {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            title: request.title.clone(),
            prompt: request.prompt.clone(),
            code: request.code.clone(),
            framework: request.framework.clone(),
            language: request.language.clone(),
            model: request.model.clone(),
            source: request.source,
            created_at,
        };

        let balance_after = balance - cost;
        if let Some(user) = state.users.get_mut(&request.user_id) {
            user.credits = balance_after;
            user.updated_at = created_at;
        }
        state.projects.insert(project.id, project.clone());

        let usage = CreditTransactionCreateDBRequest {
            user_id: request.user_id,
            transaction_type: CreditTransactionType::Usage,
            amount: cost,
            source_id: project.id.to_string(),
            description: Some(format!("Generation: {}", project.title)),
        };
        state.push_transaction(&usage, balance_after);

        Ok(GenerationReceipt { project, balance_after })
    }

    async fn add_credits(&self, request: &CreditTransactionCreateDBRequest) -> Result<CreditTransactionDBResponse> {
        let mut state = self.state.write();

        if state.transactions.iter().any(|t| t.source_id == request.source_id) {
            return Err(DbError::UniqueViolation {
                constraint: Some(SOURCE_ID_UNIQUE_CONSTRAINT.to_string()),
                table: Some("credit_transactions".to_string()),
                message: format!("source_id {} already recorded", request.source_id),
            });
        }

        let now = state.now();
        let user = state.users.get_mut(&request.user_id).ok_or(DbError::NotFound)?;
        let balance = user.credits;
        user.credits = balance.checked_add(request.amount).ok_or_else(|| DbError::CheckViolation {
            constraint: None,
            table: Some("users".to_string()),
            message: format!("balance {balance} cannot be increased by {}", request.amount),
        })?;
        user.updated_at = now;
        let balance_after = user.credits;

        Ok(state.push_transaction(request, balance_after))
    }

    async fn transaction_exists(&self, source_id: &str) -> Result<bool> {
        Ok(self.state.read().transactions.iter().any(|t| t.source_id == source_id))
    }

    async fn list_transactions(&self, user_id: UserId, skip: i64, limit: i64) -> Result<Vec<CreditTransactionDBResponse>> {
        let mut transactions: Vec<_> = self
            .state
            .read()
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        newest_first(&mut transactions, |t| (t.created_at, t.id));
        Ok(page(transactions, skip, limit))
    }

    async fn get_project(&self, id: ProjectId) -> Result<Option<ProjectDBResponse>> {
        Ok(self.state.read().projects.get(&id).cloned())
    }

    async fn list_projects(&self, filter: &ProjectFilter) -> Result<Vec<ProjectDBResponse>> {
        let mut projects: Vec<_> = self
            .state
            .read()
            .projects
            .values()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect();
        newest_first(&mut projects, |p| (p.created_at, p.id));
        Ok(page(projects, filter.skip, filter.limit))
    }

    async fn list_projects_with_owner(&self, skip: i64, limit: i64) -> Result<Vec<ProjectWithOwnerDBResponse>> {
        let state = self.state.read();
        let mut projects: Vec<_> = state
            .projects
            .values()
            .map(|p| ProjectWithOwnerDBResponse {
                project: p.clone(),
                owner_email: state.users.get(&p.user_id).map(|u| u.email.clone()).unwrap_or_default(),
            })
            .collect();
        newest_first(&mut projects, |p| (p.project.created_at, p.project.id));
        Ok(page(projects, skip, limit))
    }

    async fn delete_project(&self, id: ProjectId, user_id: UserId) -> Result<bool> {
        let mut state = self.state.write();
        match state.projects.get(&id) {
            Some(project) if project.user_id == user_id => {
                state.projects.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::projects::ProjectSource;

    async fn seeded_user(store: &InMemoryStore, credits: i64) -> UserDBResponse {
        store
            .get_or_create_user(&UserCreateDBRequest {
                id: Uuid::new_v4(),
                email: format!("{}@example.com", Uuid::new_v4()),
                full_name: None,
                initial_credits: credits,
            })
            .await
            .unwrap()
    }

    fn project_request(user_id: UserId, prompt: &str) -> ProjectCreateDBRequest {
        ProjectCreateDBRequest::new(user_id, prompt, "<!DOCTYPE html>".to_string(), "deepseek-chat", ProjectSource::Prompt)
    }

    #[tokio::test]
    async fn test_add_credits_rejects_balance_overflow() {
        let store = InMemoryStore::new();
        let user = seeded_user(&store, 5).await;
        let admin = seeded_user(&store, 0).await;

        let err = store
            .add_credits(&CreditTransactionCreateDBRequest::admin_grant(user.id, admin.id, i64::MAX, None))
            .await
            .unwrap_err();

        assert!(matches!(err, DbError::CheckViolation { .. }));
        assert_eq!(store.get_user(user.id).await.unwrap().unwrap().credits, 5);
        assert!(store.list_transactions(user.id, 0, 10).await.unwrap().is_empty());

        // The balance still accepts grants that fit
        let ok = store
            .add_credits(&CreditTransactionCreateDBRequest::admin_grant(user.id, admin.id, i64::MAX - 5, None))
            .await
            .unwrap();
        assert_eq!(ok.balance_after, i64::MAX);
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let store = InMemoryStore::new();
        let request = UserCreateDBRequest {
            id: Uuid::new_v4(),
            email: "a@example.com".to_string(),
            full_name: Some("A".to_string()),
            initial_credits: 10,
        };

        let first = store.get_or_create_user(&request).await.unwrap();
        store.set_credits(first.id, 4).unwrap();
        let second = store.get_or_create_user(&request).await.unwrap();

        assert_eq!(second.id, first.id);
        assert_eq!(second.credits, 4);
        assert_eq!(store.list_users(0, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_complete_generation_debits_and_records_usage() {
        let store = InMemoryStore::new();
        let user = seeded_user(&store, 500).await;

        let receipt = store
            .complete_generation(&project_request(user.id, "Build a login form"), 200)
            .await
            .unwrap();

        assert_eq!(receipt.balance_after, 300);
        assert_eq!(store.get_user(user.id).await.unwrap().unwrap().credits, 300);

        let ledger = store.list_transactions(user.id, 0, 10).await.unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].transaction_type, CreditTransactionType::Usage);
        assert_eq!(ledger[0].source_id, receipt.project.id.to_string());
    }

    #[tokio::test]
    async fn test_complete_generation_rejects_insufficient_balance() {
        let store = InMemoryStore::new();
        let user = seeded_user(&store, 2).await;

        let err = store
            .complete_generation(&project_request(user.id, "Landing page"), 3)
            .await
            .unwrap_err();

        assert!(matches!(err, DbError::InsufficientCredits { required: 3, balance: 2 }));
        assert_eq!(store.get_user(user.id).await.unwrap().unwrap().credits, 2);
        assert!(store.list_projects(&ProjectFilter::new(0, 10)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_generations_cannot_overspend() {
        let store = InMemoryStore::new();
        let user = seeded_user(&store, 5).await;

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let store = store.clone();
                let request = project_request(user.id, &format!("page {i}"));
                tokio::spawn(async move { store.complete_generation(&request, 3).await })
            })
            .collect();

        let mut succeeded = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                succeeded += 1;
            }
        }

        assert_eq!(succeeded, 1);
        assert_eq!(store.get_user(user.id).await.unwrap().unwrap().credits, 2);
    }

    #[tokio::test]
    async fn test_add_credits_is_idempotent_per_source() {
        let store = InMemoryStore::new();
        let user = seeded_user(&store, 0).await;
        let request = CreditTransactionCreateDBRequest::purchase(user.id, 500, "cs_test_1", None);

        let first = store.add_credits(&request).await.unwrap();
        assert_eq!(first.balance_after, 500);

        let err = store.add_credits(&request).await.unwrap_err();
        assert!(err.is_unique_violation_of(SOURCE_ID_UNIQUE_CONSTRAINT));
        assert_eq!(store.get_user(user.id).await.unwrap().unwrap().credits, 500);
        assert!(store.transaction_exists("cs_test_1").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_projects_filters_and_orders() {
        let store = InMemoryStore::new();
        let alice = seeded_user(&store, 100).await;
        let bob = seeded_user(&store, 100).await;

        store.complete_generation(&project_request(alice.id, "Login form"), 1).await.unwrap();
        store.complete_generation(&project_request(alice.id, "Pricing table"), 1).await.unwrap();
        store.complete_generation(&project_request(bob.id, "Login page"), 1).await.unwrap();

        let mine = store.list_projects(&ProjectFilter::new(0, 10).owned_by(alice.id)).await.unwrap();
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].prompt, "Pricing table");

        let search = ProjectFilter::new(0, 10).owned_by(alice.id).with_search(Some("LOGIN".to_string()));
        let found = store.list_projects(&search).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].prompt, "Login form");

        let all = store.list_projects_with_owner(0, 10).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].owner_email, bob.email);
    }

    #[tokio::test]
    async fn test_delete_project_requires_owner() {
        let store = InMemoryStore::new();
        let alice = seeded_user(&store, 10).await;
        let bob = seeded_user(&store, 10).await;
        let receipt = store.complete_generation(&project_request(alice.id, "Hero"), 1).await.unwrap();

        assert!(!store.delete_project(receipt.project.id, bob.id).await.unwrap());
        assert!(store.delete_project(receipt.project.id, alice.id).await.unwrap());
        assert!(store.get_project(receipt.project.id).await.unwrap().is_none());
    }
}
