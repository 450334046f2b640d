//! HTTP handlers for the caller's profile and credit ledger.

use axum::{
    Json,
    extract::{Query, State},
};

use crate::{
    AppState,
    api::models::{
        credits::CreditTransactionResponse,
        pagination::Pagination,
        users::{CurrentUser, UserResponse},
    },
    errors::{Error, Result},
};

/// Get the current user's profile and balance
#[utoipa::path(
    get,
    path = "/api/me",
    tag = "users",
    summary = "Get current user",
    responses(
        (status = 200, description = "Current user", body = UserResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(
        ("BearerAuth" = []),
        ("CookieAuth" = [])
    )
)]
#[tracing::instrument(skip_all)]
pub async fn get_current_user(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<UserResponse>> {
    let user = state.store.get_user(current_user.id).await?.ok_or_else(|| Error::NotFound {
        resource: "User".to_string(),
        id: current_user.id.to_string(),
    })?;
    Ok(Json(user.into()))
}

/// List the current user's credit transactions
#[utoipa::path(
    get,
    path = "/api/credits/transactions",
    tag = "credits",
    summary = "List credit transactions",
    description = "Purchases, admin grants and generation charges, newest first.",
    params(Pagination),
    responses(
        (status = 200, description = "Ledger entries", body = [CreditTransactionResponse]),
        (status = 401, description = "Unauthorized"),
    ),
    security(
        ("BearerAuth" = []),
        ("CookieAuth" = [])
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_transactions(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Vec<CreditTransactionResponse>>> {
    let (skip, limit) = pagination.params();
    let transactions = state.store.list_transactions(current_user.id, skip, limit).await?;
    Ok(Json(transactions.into_iter().map(CreditTransactionResponse::from).collect()))
}
