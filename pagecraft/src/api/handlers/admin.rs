//! HTTP handlers for admin operations.

use axum::{
    Json,
    extract::{Query, State},
};

use crate::{
    AppState,
    api::models::{
        admin::{AddCreditsRequest, AddCreditsResponse},
        pagination::Pagination,
        projects::ProjectSummary,
        users::{CurrentUser, UserResponse},
    },
    db::{errors::DbError, models::credits::CreditTransactionCreateDBRequest},
    errors::{Error, Result},
};

/// Grant credits to a user
#[utoipa::path(
    post,
    path = "/api/admin/add-credits",
    tag = "admin",
    summary = "Add credits",
    description = "Adds credits to a user's balance and records an admin grant in their ledger (admin only).",
    request_body = AddCreditsRequest,
    responses(
        (status = 200, description = "Credits added", body = AddCreditsResponse),
        (status = 400, description = "Amount must be positive"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Admin access required"),
        (status = 404, description = "User not found"),
    ),
    security(
        ("BearerAuth" = []),
        ("CookieAuth" = [])
    )
)]
#[tracing::instrument(skip_all)]
pub async fn add_credits(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<AddCreditsRequest>,
) -> Result<Json<AddCreditsResponse>> {
    current_user.require_admin()?;

    if request.amount <= 0 {
        return Err(Error::BadRequest {
            message: "Amount must be positive".to_string(),
        });
    }

    let description = request
        .description
        .unwrap_or_else(|| format!("Granted by {}", current_user.email));
    let db_request = CreditTransactionCreateDBRequest::admin_grant(request.user_id, current_user.id, request.amount, Some(description));

    let transaction = state.store.add_credits(&db_request).await.map_err(|e| match e {
        DbError::NotFound => Error::NotFound {
            resource: "User".to_string(),
            id: request.user_id.to_string(),
        },
        other => Error::Database(other),
    })?;

    tracing::info!(
        "Admin {} granted {} credits to user {}, new balance {}",
        current_user.id,
        request.amount,
        request.user_id,
        transaction.balance_after
    );

    Ok(Json(AddCreditsResponse {
        success: true,
        new_balance: transaction.balance_after,
    }))
}

/// List all users
#[utoipa::path(
    get,
    path = "/api/admin/users",
    tag = "admin",
    summary = "List users",
    params(Pagination),
    responses(
        (status = 200, description = "Users, newest first", body = [UserResponse]),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Admin access required"),
    ),
    security(
        ("BearerAuth" = []),
        ("CookieAuth" = [])
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_users(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Vec<UserResponse>>> {
    current_user.require_admin()?;
    let (skip, limit) = pagination.params();
    let users = state.store.list_users(skip, limit).await?;
    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

/// List all projects with their owners
#[utoipa::path(
    get,
    path = "/api/admin/projects",
    tag = "admin",
    summary = "List all projects",
    params(Pagination),
    responses(
        (status = 200, description = "Projects, newest first", body = [ProjectSummary]),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Admin access required"),
    ),
    security(
        ("BearerAuth" = []),
        ("CookieAuth" = [])
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_all_projects(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Vec<ProjectSummary>>> {
    current_user.require_admin()?;
    let (skip, limit) = pagination.params();
    let projects = state.store.list_projects_with_owner(skip, limit).await?;
    Ok(Json(projects.into_iter().map(ProjectSummary::from).collect()))
}

#[cfg(test)]
mod tests {
    use crate::{
        api::models::{admin::AddCreditsResponse, projects::ProjectSummary, users::UserResponse},
        db::{Store, models::credits::CreditTransactionType},
        test_utils::TestApp,
    };
    use axum::http::StatusCode;
    use serde_json::json;

    #[test_log::test(tokio::test)]
    async fn test_admin_adds_credits() {
        let app = TestApp::new().await;
        let admin = app.create_admin(0).await;
        let user = app.create_user(5).await;

        let response = app
            .server
            .post("/api/admin/add-credits")
            .add_header("authorization", app.bearer(&admin))
            .json(&json!({"userId": user.id, "amount": 100}))
            .await;

        response.assert_status_ok();
        let body: AddCreditsResponse = response.json();
        assert!(body.success);
        assert_eq!(body.new_balance, 105);
        assert_eq!(app.balance(user.id).await, 105);

        let ledger = app.store.list_transactions(user.id, 0, 10).await.unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].transaction_type, CreditTransactionType::AdminGrant);
    }

    #[test_log::test(tokio::test)]
    async fn test_non_admin_cannot_add_credits() {
        let app = TestApp::new().await;
        let user = app.create_user(5).await;

        let response = app
            .server
            .post("/api/admin/add-credits")
            .add_header("authorization", app.bearer(&user))
            .json(&json!({"userId": user.id, "amount": 100}))
            .await;

        response.assert_status(StatusCode::FORBIDDEN);
        assert_eq!(app.balance(user.id).await, 5);
    }

    #[test_log::test(tokio::test)]
    async fn test_add_credits_validation() {
        let app = TestApp::new().await;
        let admin = app.create_admin(0).await;
        let user = app.create_user(5).await;

        app.server
            .post("/api/admin/add-credits")
            .add_header("authorization", app.bearer(&admin))
            .json(&json!({"userId": user.id, "amount": 0}))
            .await
            .assert_status(StatusCode::BAD_REQUEST);

        app.server
            .post("/api/admin/add-credits")
            .add_header("authorization", app.bearer(&admin))
            .json(&json!({"userId": uuid::Uuid::new_v4(), "amount": 10}))
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[test_log::test(tokio::test)]
    async fn test_add_credits_overflow_is_rejected() {
        let app = TestApp::new().await;
        let admin = app.create_admin(0).await;
        let user = app.create_user(5).await;

        let response = app
            .server
            .post("/api/admin/add-credits")
            .add_header("authorization", app.bearer(&admin))
            .json(&json!({"userId": user.id, "amount": i64::MAX}))
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(app.balance(user.id).await, 5);
        assert!(app.store.list_transactions(user.id, 0, 10).await.unwrap().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_admin_listings() {
        let app = TestApp::new().await;
        let admin = app.create_admin(0).await;
        let user = app.create_user(0).await;
        app.create_project(user.id, "Login form").await;

        let response = app.server.get("/api/admin/users").add_header("authorization", app.bearer(&admin)).await;
        response.assert_status_ok();
        let users: Vec<UserResponse> = response.json();
        assert_eq!(users.len(), 2);

        let response = app
            .server
            .get("/api/admin/projects")
            .add_header("authorization", app.bearer(&admin))
            .await;
        response.assert_status_ok();
        let projects: Vec<ProjectSummary> = response.json();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].owner_email.as_deref(), Some(user.email.as_str()));

        app.server
            .get("/api/admin/users")
            .add_header("authorization", app.bearer(&user))
            .await
            .assert_status(StatusCode::FORBIDDEN);
    }
}
