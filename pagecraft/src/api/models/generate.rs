//! API request/response models for code generation.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::types::ProjectId;

/// Generation request
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    /// What to build
    #[serde(default)]
    #[schema(example = "Build a login form")]
    pub prompt: String,
    /// Optional sketch as a `data:image/...;base64,` URI
    #[serde(default)]
    pub image: Option<String>,
    /// Relay the provider's event stream instead of returning a single JSON body
    #[serde(default)]
    pub stream: bool,
}

/// Result of a blocking generation
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub success: bool,
    /// Generated HTML with any markdown fences removed
    pub code: String,
    /// Same as `code`
    pub text: String,
    /// Balance after this generation
    pub remaining_credits: i64,
    /// Saved project, or null if saving failed (nothing is charged then)
    #[schema(value_type = Option<String>, format = "uuid")]
    pub project_id: Option<ProjectId>,
}
