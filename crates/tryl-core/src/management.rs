//! Project and API key shapes used by management calls.
//!
//! Management calls authenticate with a session token rather than an API
//! key. Secrets (`api_key`, `new_api_key`) are returned exactly once, at
//! creation or rotation time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Deployment environment of a project or key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Production traffic.
    Live,
    /// Test traffic.
    Test,
}

/// A project groups API keys and events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Project identifier (`proj_<ulid>`).
    pub id: String,
    /// Display name.
    pub name: String,
    /// Environment the project belongs to.
    pub environment: Environment,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

/// Request to create a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateProjectRequest {
    /// Display name.
    pub name: String,
    /// Environment for the project.
    pub environment: Environment,
}

/// Created project plus its initial API key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateProjectResponse {
    /// The new project.
    pub project: Project,
    /// Initial API key. Only returned here.
    pub api_key: String,
}

/// All projects visible to the session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectList {
    /// Projects.
    #[serde(default)]
    pub projects: Vec<Project>,
}

/// Metadata about an API key. The secret itself is never included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKey {
    /// Key identifier.
    pub id: String,
    /// Owning project.
    pub project_id: String,
    /// Display name.
    pub name: String,
    /// Environment of the key.
    pub environment: Environment,
    /// Visible prefix, e.g. `actlog_live_abc`.
    pub prefix: String,
    /// Granted scopes.
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last use, if ever used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    /// Expiry, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Revocation time, if revoked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
}

/// Request to create an API key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateApiKeyRequest {
    /// Display name.
    pub name: String,
    /// Environment of the key.
    pub environment: Environment,
    /// Scopes; all scopes when empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
    /// Optional expiry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Created API key with its secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateApiKeyResponse {
    /// Key metadata.
    pub api_key_metadata: ApiKey,
    /// Full key value. Only returned here.
    pub api_key: String,
}

/// Request to rotate an API key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotateApiKeyRequest {
    /// New display name; the old one is kept when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_name: Option<String>,
    /// Expiry for the replacement key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Replacement key issued by a rotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotateApiKeyResponse {
    /// Metadata of the replacement key.
    pub new_api_key_metadata: ApiKey,
    /// Full replacement key value. Only returned here.
    pub new_api_key: String,
    /// When the previous key was revoked.
    pub old_key_revoked_at: DateTime<Utc>,
}

/// API keys of a project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyList {
    /// Keys.
    #[serde(default)]
    pub api_keys: Vec<ApiKey>,
}
