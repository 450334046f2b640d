//! PostgreSQL store.

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use tracing::instrument;
use uuid::Uuid;

use super::{
    Store,
    errors::{DbError, Result},
    models::{
        credits::{CreditTransactionCreateDBRequest, CreditTransactionDBResponse, CreditTransactionType},
        projects::{GenerationReceipt, ProjectCreateDBRequest, ProjectDBResponse, ProjectFilter, ProjectWithOwnerDBResponse},
        users::{UserCreateDBRequest, UserDBResponse},
    },
};
use crate::types::{ProjectId, UserId, abbrev_uuid};

const USER_COLUMNS: &str = "id, email, full_name, credits, is_admin, payment_provider_id, created_at, updated_at";
const PROJECT_COLUMNS: &str = "id, user_id, title, prompt, code, framework, language, model, source, created_at";
const TRANSACTION_COLUMNS: &str = "id, user_id, transaction_type, amount, balance_after, source_id, description, created_at";

#[derive(Clone)]
pub struct PostgresStore {
    db: PgPool,
}

impl PostgresStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub fn pool(&self) -> &PgPool {
        &self.db
    }

    async fn current_balance(conn: &mut PgConnection, user_id: UserId) -> Result<i64> {
        let balance: Option<i64> = sqlx::query_scalar("SELECT credits FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(conn)
            .await?;
        balance.ok_or(DbError::NotFound)
    }

    async fn insert_transaction(
        conn: &mut PgConnection,
        request: &CreditTransactionCreateDBRequest,
        balance_after: i64,
    ) -> Result<CreditTransactionDBResponse> {
        let sql = format!(
            "INSERT INTO credit_transactions (id, user_id, transaction_type, amount, balance_after, source_id, description) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {TRANSACTION_COLUMNS}"
        );
        let transaction = sqlx::query_as::<_, CreditTransactionDBResponse>(&sql)
            .bind(Uuid::new_v4())
            .bind(request.user_id)
            .bind(request.transaction_type)
            .bind(request.amount)
            .bind(balance_after)
            .bind(&request.source_id)
            .bind(&request.description)
            .fetch_one(conn)
            .await?;
        Ok(transaction)
    }
}

/// Escape LIKE wildcards so user input matches literally.
fn like_pattern(needle: &str) -> String {
    let escaped = needle.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
    format!("%{escaped}%")
}

#[async_trait]
impl Store for PostgresStore {
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    async fn get_user(&self, id: UserId) -> Result<Option<UserDBResponse>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let user = sqlx::query_as::<_, UserDBResponse>(&sql).bind(id).fetch_optional(&self.db).await?;
        Ok(user)
    }

    #[instrument(skip(self, email), err)]
    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserDBResponse>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE LOWER(email) = LOWER($1)");
        let user = sqlx::query_as::<_, UserDBResponse>(&sql)
            .bind(email)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    #[instrument(skip(self, request), fields(user_id = %abbrev_uuid(&request.id)), err)]
    async fn get_or_create_user(&self, request: &UserCreateDBRequest) -> Result<UserDBResponse> {
        let insert = format!(
            "INSERT INTO users (id, email, full_name, credits) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (id) DO NOTHING RETURNING {USER_COLUMNS}"
        );
        let created = sqlx::query_as::<_, UserDBResponse>(&insert)
            .bind(request.id)
            .bind(&request.email)
            .bind(&request.full_name)
            .bind(request.initial_credits)
            .fetch_optional(&self.db)
            .await?;

        if let Some(user) = created {
            tracing::info!(email = %user.email, credits = user.credits, "Provisioned new user");
            return Ok(user);
        }

        self.get_user(request.id).await?.ok_or(DbError::NotFound)
    }

    #[instrument(skip(self, payment_provider_id), fields(user_id = %abbrev_uuid(&user_id)), err)]
    async fn set_payment_provider_id(&self, user_id: UserId, payment_provider_id: &str) -> Result<()> {
        let result = sqlx::query("UPDATE users SET payment_provider_id = $1, updated_at = NOW() WHERE id = $2")
            .bind(payment_provider_id)
            .bind(user_id)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn list_users(&self, skip: i64, limit: i64) -> Result<Vec<UserDBResponse>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC, id DESC OFFSET $1 LIMIT $2");
        let users = sqlx::query_as::<_, UserDBResponse>(&sql)
            .bind(skip)
            .bind(limit)
            .fetch_all(&self.db)
            .await?;
        Ok(users)
    }

    #[instrument(skip(self, request), fields(user_id = %abbrev_uuid(&request.user_id)), err)]
    async fn complete_generation(&self, request: &ProjectCreateDBRequest, cost: i64) -> Result<GenerationReceipt> {
        let mut tx = self.db.begin().await?;

        let insert = format!(
            "INSERT INTO projects (id, user_id, title, prompt, code, framework, language, model, source) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING {PROJECT_COLUMNS}"
        );
        let project = sqlx::query_as::<_, ProjectDBResponse>(&insert)
            .bind(Uuid::new_v4())
            .bind(request.user_id)
            .bind(&request.title)
            .bind(&request.prompt)
            .bind(&request.code)
            .bind(&request.framework)
            .bind(&request.language)
            .bind(&request.model)
            .bind(request.source)
            .fetch_one(&mut *tx)
            .await?;

        // Conditional decrement: matches no row if a concurrent request spent the balance first
        let balance_after: Option<i64> = sqlx::query_scalar(
            "UPDATE users SET credits = credits - $2, updated_at = NOW() \
             WHERE id = $1 AND credits >= $2 RETURNING credits",
        )
        .bind(request.user_id)
        .bind(cost)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(balance_after) = balance_after else {
            let balance = Self::current_balance(&mut *tx, request.user_id).await?;
            // dropping the transaction rolls back the project insert
            return Err(DbError::InsufficientCredits { required: cost, balance });
        };

        let usage = CreditTransactionCreateDBRequest {
            user_id: request.user_id,
            transaction_type: CreditTransactionType::Usage,
            amount: cost,
            source_id: project.id.to_string(),
            description: Some(format!("Generation: {}", project.title)),
        };
        Self::insert_transaction(&mut *tx, &usage, balance_after).await?;

        tx.commit().await?;

        Ok(GenerationReceipt { project, balance_after })
    }

    #[instrument(skip(self, request), fields(user_id = %abbrev_uuid(&request.user_id), amount = request.amount), err)]
    async fn add_credits(&self, request: &CreditTransactionCreateDBRequest) -> Result<CreditTransactionDBResponse> {
        let mut tx = self.db.begin().await?;

        let balance_after: Option<i64> =
            sqlx::query_scalar("UPDATE users SET credits = credits + $2, updated_at = NOW() WHERE id = $1 RETURNING credits")
                .bind(request.user_id)
                .bind(request.amount)
                .fetch_optional(&mut *tx)
                .await?;
        let balance_after = balance_after.ok_or(DbError::NotFound)?;

        // A duplicate source_id fails here and the balance update is rolled back with the transaction
        let transaction = Self::insert_transaction(&mut *tx, request, balance_after).await?;

        tx.commit().await?;

        Ok(transaction)
    }

    #[instrument(skip(self), err)]
    async fn transaction_exists(&self, source_id: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM credit_transactions WHERE source_id = $1)")
            .bind(source_id)
            .fetch_one(&self.db)
            .await?;
        Ok(exists)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    async fn list_transactions(&self, user_id: UserId, skip: i64, limit: i64) -> Result<Vec<CreditTransactionDBResponse>> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM credit_transactions WHERE user_id = $1 \
             ORDER BY created_at DESC, id DESC OFFSET $2 LIMIT $3"
        );
        let transactions = sqlx::query_as::<_, CreditTransactionDBResponse>(&sql)
            .bind(user_id)
            .bind(skip)
            .bind(limit)
            .fetch_all(&self.db)
            .await?;
        Ok(transactions)
    }

    #[instrument(skip(self), fields(project_id = %abbrev_uuid(&id)), err)]
    async fn get_project(&self, id: ProjectId) -> Result<Option<ProjectDBResponse>> {
        let sql = format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = $1");
        let project = sqlx::query_as::<_, ProjectDBResponse>(&sql).bind(id).fetch_optional(&self.db).await?;
        Ok(project)
    }

    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    async fn list_projects(&self, filter: &ProjectFilter) -> Result<Vec<ProjectDBResponse>> {
        let sql = format!(
            "SELECT {PROJECT_COLUMNS} FROM projects \
             WHERE ($1::uuid IS NULL OR user_id = $1) \
               AND ($2::text IS NULL OR title ILIKE $2 OR prompt ILIKE $2) \
             ORDER BY created_at DESC, id DESC OFFSET $3 LIMIT $4"
        );
        let projects = sqlx::query_as::<_, ProjectDBResponse>(&sql)
            .bind(filter.user_id)
            .bind(filter.search.as_deref().map(like_pattern))
            .bind(filter.skip)
            .bind(filter.limit)
            .fetch_all(&self.db)
            .await?;
        Ok(projects)
    }

    #[instrument(skip(self), err)]
    async fn list_projects_with_owner(&self, skip: i64, limit: i64) -> Result<Vec<ProjectWithOwnerDBResponse>> {
        let projects = sqlx::query_as::<_, ProjectWithOwnerDBResponse>(
            "SELECT p.id, p.user_id, p.title, p.prompt, p.code, p.framework, p.language, p.model, p.source, p.created_at, \
                    u.email AS owner_email \
             FROM projects p JOIN users u ON u.id = p.user_id \
             ORDER BY p.created_at DESC, p.id DESC OFFSET $1 LIMIT $2",
        )
        .bind(skip)
        .bind(limit)
        .fetch_all(&self.db)
        .await?;
        Ok(projects)
    }

    #[instrument(skip(self), fields(project_id = %abbrev_uuid(&id), user_id = %abbrev_uuid(&user_id)), err)]
    async fn delete_project(&self, id: ProjectId, user_id: UserId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM projects WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::projects::ProjectSource;
    use futures::future::join_all;

    async fn create_user(store: &PostgresStore, credits: i64) -> UserDBResponse {
        let id = Uuid::new_v4();
        store
            .get_or_create_user(&UserCreateDBRequest {
                id,
                email: format!("{id}@example.com"),
                full_name: None,
                initial_credits: credits,
            })
            .await
            .unwrap()
    }

    fn generation(user_id: UserId) -> ProjectCreateDBRequest {
        ProjectCreateDBRequest::new(
            user_id,
            "Build a pricing page",
            "<div></div>".to_string(),
            "deepseek-chat",
            ProjectSource::Prompt,
        )
    }

    async fn project_count(store: &PostgresStore, user_id: UserId) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM projects WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(store.pool())
            .await
            .unwrap()
    }

    #[sqlx::test]
    async fn test_complete_generation_debits_and_records_usage(pool: PgPool) {
        let store = PostgresStore::new(pool);
        let user = create_user(&store, 10).await;

        let receipt = store.complete_generation(&generation(user.id), 3).await.unwrap();

        assert_eq!(receipt.balance_after, 7);
        assert_eq!(store.get_user(user.id).await.unwrap().unwrap().credits, 7);
        let transactions = store.list_transactions(user.id, 0, 10).await.unwrap();
        assert_eq!(transactions.len(), 1);
        assert_eq!(transactions[0].transaction_type, CreditTransactionType::Usage);
        assert_eq!(transactions[0].source_id, receipt.project.id.to_string());
        assert_eq!(transactions[0].balance_after, 7);
    }

    #[sqlx::test]
    async fn test_insufficient_balance_rolls_back_project(pool: PgPool) {
        let store = PostgresStore::new(pool);
        let user = create_user(&store, 2).await;

        let err = store.complete_generation(&generation(user.id), 3).await.unwrap_err();

        assert!(matches!(err, DbError::InsufficientCredits { required: 3, balance: 2 }));
        assert_eq!(project_count(&store, user.id).await, 0);
        assert_eq!(store.get_user(user.id).await.unwrap().unwrap().credits, 2);
        assert!(store.list_transactions(user.id, 0, 10).await.unwrap().is_empty());
    }

    #[sqlx::test]
    async fn test_concurrent_generations_cannot_overspend(pool: PgPool) {
        let store = PostgresStore::new(pool);
        let user = create_user(&store, 5).await;

        let attempts = (0..4).map(|_| {
            let store = store.clone();
            let request = generation(user.id);
            async move { store.complete_generation(&request, 3).await }
        });
        let results = join_all(attempts).await;

        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        let refused = results
            .iter()
            .filter(|r| matches!(r, Err(DbError::InsufficientCredits { .. })))
            .count();
        assert_eq!(succeeded, 1);
        assert_eq!(refused, 3);
        assert_eq!(store.get_user(user.id).await.unwrap().unwrap().credits, 2);
        assert_eq!(project_count(&store, user.id).await, 1);
    }

    #[sqlx::test]
    async fn test_duplicate_source_id_leaves_balance_unchanged(pool: PgPool) {
        let store = PostgresStore::new(pool);
        let user = create_user(&store, 0).await;
        let purchase = CreditTransactionCreateDBRequest::purchase(user.id, 500, "cs_test_123", None);

        let first = store.add_credits(&purchase).await.unwrap();
        assert_eq!(first.balance_after, 500);

        let err = store.add_credits(&purchase).await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));
        assert_eq!(store.get_user(user.id).await.unwrap().unwrap().credits, 500);
        assert_eq!(store.list_transactions(user.id, 0, 10).await.unwrap().len(), 1);
        assert!(store.transaction_exists("cs_test_123").await.unwrap());
    }

    #[sqlx::test]
    async fn test_add_credits_overflow_is_check_violation(pool: PgPool) {
        let store = PostgresStore::new(pool);
        let user = create_user(&store, 5).await;

        let grant = CreditTransactionCreateDBRequest::admin_grant(user.id, Uuid::new_v4(), i64::MAX, None);
        let err = store.add_credits(&grant).await.unwrap_err();

        assert!(matches!(err, DbError::CheckViolation { .. }));
        assert_eq!(store.get_user(user.id).await.unwrap().unwrap().credits, 5);
    }

    #[sqlx::test]
    async fn test_add_credits_unknown_user(pool: PgPool) {
        let store = PostgresStore::new(pool);
        let grant = CreditTransactionCreateDBRequest::admin_grant(Uuid::new_v4(), Uuid::new_v4(), 10, None);

        assert!(matches!(store.add_credits(&grant).await.unwrap_err(), DbError::NotFound));
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("login"), "%login%");
        assert_eq!(like_pattern("100%_done"), "%100\\%\\_done%");
    }
}
