//! API request/response models for generated projects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::pagination::Pagination;
use crate::db::models::projects::{ProjectDBResponse, ProjectSource, ProjectWithOwnerDBResponse};
use crate::types::{ProjectId, UserId};

/// Query parameters for listing projects
#[derive(Debug, Default, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListProjectsQuery {
    /// Case-insensitive substring of the title or prompt
    pub search: Option<String>,
    /// Number of items to skip (default: 0)
    #[param(default = 0, minimum = 0)]
    pub skip: Option<i64>,
    /// Maximum number of items to return (default: 20, max: 100)
    #[param(default = 20, minimum = 1, maximum = 100)]
    pub limit: Option<i64>,
}

impl ListProjectsQuery {
    pub fn pagination(&self) -> Pagination {
        Pagination {
            skip: self.skip,
            limit: self.limit,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProjectResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: ProjectId,
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    pub title: String,
    pub prompt: String,
    pub code: String,
    pub framework: String,
    pub language: String,
    pub model: String,
    pub source: ProjectSource,
    pub created_at: DateTime<Utc>,
}

impl From<ProjectDBResponse> for ProjectResponse {
    fn from(project: ProjectDBResponse) -> Self {
        Self {
            id: project.id,
            user_id: project.user_id,
            title: project.title,
            prompt: project.prompt,
            code: project.code,
            framework: project.framework,
            language: project.language,
            model: project.model,
            source: project.source,
            created_at: project.created_at,
        }
    }
}

/// Project summary for history listings (without the generated code)
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSummary {
    #[schema(value_type = String, format = "uuid")]
    pub id: ProjectId,
    pub title: String,
    pub prompt: String,
    pub model: String,
    pub source: ProjectSource,
    pub created_at: DateTime<Utc>,
    /// Only set in admin listings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_email: Option<String>,
}

impl From<ProjectDBResponse> for ProjectSummary {
    fn from(project: ProjectDBResponse) -> Self {
        Self {
            id: project.id,
            title: project.title,
            prompt: project.prompt,
            model: project.model,
            source: project.source,
            created_at: project.created_at,
            owner_email: None,
        }
    }
}

impl From<ProjectWithOwnerDBResponse> for ProjectSummary {
    fn from(row: ProjectWithOwnerDBResponse) -> Self {
        Self {
            owner_email: Some(row.owner_email),
            ..Self::from(row.project)
        }
    }
}
