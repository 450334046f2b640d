//! Database models for generated projects.

use crate::types::{ProjectId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub const DEFAULT_FRAMEWORK: &str = "tailwind";
pub const DEFAULT_LANGUAGE: &str = "html";
const TITLE_MAX_CHARS: usize = 80;

/// What the generation was produced from, stored as TEXT
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, ToSchema)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProjectSource {
    Prompt,
    Sketch,
}

/// Database request for storing a completed generation
#[derive(Debug, Clone)]
pub struct ProjectCreateDBRequest {
    pub user_id: UserId,
    pub title: String,
    pub prompt: String,
    pub code: String,
    pub framework: String,
    pub language: String,
    pub model: String,
    pub source: ProjectSource,
}

impl ProjectCreateDBRequest {
    pub fn new(user_id: UserId, prompt: &str, code: String, model: &str, source: ProjectSource) -> Self {
        Self {
            user_id,
            title: title_from_prompt(prompt),
            prompt: prompt.to_string(),
            code,
            framework: DEFAULT_FRAMEWORK.to_string(),
            language: DEFAULT_LANGUAGE.to_string(),
            model: model.to_string(),
            source,
        }
    }
}

/// First line of the prompt, cut to a displayable length on a char boundary.
pub fn title_from_prompt(prompt: &str) -> String {
    let first_line = prompt.trim().lines().next().unwrap_or_default().trim();
    if first_line.chars().count() <= TITLE_MAX_CHARS {
        return first_line.to_string();
    }
    let mut title: String = first_line.chars().take(TITLE_MAX_CHARS - 3).collect();
    title.truncate(title.trim_end().len());
    title.push_str("...");
    title
}

/// Database response for a project
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ProjectDBResponse {
    pub id: ProjectId,
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

/// Project joined with its owner's email, for the admin listing
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProjectWithOwnerDBResponse {
    #[sqlx(flatten)]
    pub project: ProjectDBResponse,
    pub owner_email: String,
}

/// Filter for listing projects
#[derive(Debug, Clone, Default)]
pub struct ProjectFilter {
    /// Only projects owned by this user
    pub user_id: Option<UserId>,
    /// Case-insensitive substring of title or prompt
    pub search: Option<String>,
    pub skip: i64,
    pub limit: i64,
}

impl ProjectFilter {
    pub fn new(skip: i64, limit: i64) -> Self {
        Self {
            skip,
            limit,
            ..Default::default()
        }
    }

    pub fn owned_by(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_search(mut self, search: Option<String>) -> Self {
        self.search = search.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        self
    }

    pub(crate) fn matches(&self, project: &ProjectDBResponse) -> bool {
        if let Some(user_id) = self.user_id
            && project.user_id != user_id
        {
            return false;
        }
        match &self.search {
            Some(needle) => {
                let needle = needle.to_lowercase();
                project.title.to_lowercase().contains(&needle) || project.prompt.to_lowercase().contains(&needle)
            }
            None => true,
        }
    }
}

/// Result of persisting a generation together with its debit
#[derive(Debug, Clone)]
pub struct GenerationReceipt {
    pub project: ProjectDBResponse,
    pub balance_after: i64,
}
