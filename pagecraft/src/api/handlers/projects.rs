//! HTTP handlers for the caller's generated projects.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};

use crate::{
    AppState,
    api::models::{
        projects::{ListProjectsQuery, ProjectResponse, ProjectSummary},
        users::CurrentUser,
    },
    db::models::projects::ProjectFilter,
    errors::{Error, Result},
    types::ProjectId,
};

/// List the caller's projects, newest first
#[utoipa::path(
    get,
    path = "/api/projects",
    tag = "projects",
    summary = "List projects",
    params(ListProjectsQuery),
    responses(
        (status = 200, description = "Projects owned by the caller", body = [ProjectSummary]),
        (status = 401, description = "Unauthorized"),
    ),
    security(
        ("BearerAuth" = []),
        ("CookieAuth" = [])
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_projects(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(query): Query<ListProjectsQuery>,
) -> Result<Json<Vec<ProjectSummary>>> {
    let (skip, limit) = query.pagination().params();
    let filter = ProjectFilter::new(skip, limit)
        .owned_by(current_user.id)
        .with_search(query.search);

    let projects = state.store.list_projects(&filter).await?;
    Ok(Json(projects.into_iter().map(ProjectSummary::from).collect()))
}

/// Get a project with its generated code
#[utoipa::path(
    get,
    path = "/api/projects/{project_id}",
    tag = "projects",
    summary = "Get project",
    description = "Owners can read their own projects; admins can read any project.",
    params(("project_id" = uuid::Uuid, Path, description = "Project ID")),
    responses(
        (status = 200, description = "Project details", body = ProjectResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Project not found"),
    ),
    security(
        ("BearerAuth" = []),
        ("CookieAuth" = [])
    )
)]
#[tracing::instrument(skip_all)]
pub async fn get_project(
    State(state): State<AppState>,
    Path(project_id): Path<ProjectId>,
    current_user: CurrentUser,
) -> Result<Json<ProjectResponse>> {
    let not_found = || Error::NotFound {
        resource: "Project".to_string(),
        id: project_id.to_string(),
    };

    let project = state.store.get_project(project_id).await?.ok_or_else(not_found)?;
    // Other users' projects are reported as missing
    if project.user_id != current_user.id && !current_user.is_admin {
        return Err(not_found());
    }

    Ok(Json(project.into()))
}

/// Delete one of the caller's projects
#[utoipa::path(
    delete,
    path = "/api/projects/{project_id}",
    tag = "projects",
    summary = "Delete project",
    description = "Credits spent on the project are not refunded.",
    params(("project_id" = uuid::Uuid, Path, description = "Project ID")),
    responses(
        (status = 204, description = "Project deleted"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Project not found"),
    ),
    security(
        ("BearerAuth" = []),
        ("CookieAuth" = [])
    )
)]
#[tracing::instrument(skip_all)]
pub async fn delete_project(
    State(state): State<AppState>,
    Path(project_id): Path<ProjectId>,
    current_user: CurrentUser,
) -> Result<StatusCode> {
    if !state.store.delete_project(project_id, current_user.id).await? {
        return Err(Error::NotFound {
            resource: "Project".to_string(),
            id: project_id.to_string(),
        });
    }
    Ok(StatusCode::NO_CONTENT)
}
