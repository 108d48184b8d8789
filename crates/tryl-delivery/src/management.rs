//! Project and API key management.
//!
//! These calls need a client built with [`Client::management`]; an API key
//! client receives `unauthorized` or `forbidden` API errors.

use reqwest::Method;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tryl_core::{
    management::{
        ApiKeyList, CreateApiKeyRequest, CreateApiKeyResponse, CreateProjectRequest,
        CreateProjectResponse, ProjectList, RotateApiKeyRequest, RotateApiKeyResponse,
    },
    Result, TrylError,
};

use crate::{client::Client, dispatcher::encode_body, transport::TransportRequest};

const PROJECTS_PATH: &str = "/v1/projects";

impl Client {
    /// Lists the projects visible to the session.
    ///
    /// # Errors
    ///
    /// The request's final error after retries.
    pub async fn list_projects(&self, cancel: &CancellationToken) -> Result<ProjectList> {
        let request = TransportRequest::new(Method::GET, PROJECTS_PATH);
        self.dispatcher().call_json(cancel, request).await
    }

    /// Creates a project and its initial API key.
    ///
    /// # Errors
    ///
    /// `TrylError::Validation` for an empty name, otherwise the request's
    /// final error.
    pub async fn create_project(
        &self,
        cancel: &CancellationToken,
        request: &CreateProjectRequest,
    ) -> Result<CreateProjectResponse> {
        require("name", &request.name)?;

        let http_request =
            TransportRequest::new(Method::POST, PROJECTS_PATH).with_body(encode_body(request)?);
        let response: CreateProjectResponse =
            self.dispatcher().call_json(cancel, http_request).await?;

        info!(project_id = %response.project.id, "project created");
        Ok(response)
    }

    /// Deletes a project.
    ///
    /// # Errors
    ///
    /// `TrylError::Validation` for an empty id; a `project_not_found` API
    /// error when it does not exist.
    pub async fn delete_project(&self, cancel: &CancellationToken, project_id: &str) -> Result<()> {
        require("project_id", project_id)?;

        let request = TransportRequest::new(Method::DELETE, format!("{PROJECTS_PATH}/{project_id}"));
        self.dispatcher().call_empty(cancel, request).await?;

        info!(project_id, "project deleted");
        Ok(())
    }

    /// Lists the API keys of a project.
    ///
    /// # Errors
    ///
    /// `TrylError::Validation` for an empty id, otherwise the request's
    /// final error.
    pub async fn list_api_keys(
        &self,
        cancel: &CancellationToken,
        project_id: &str,
    ) -> Result<ApiKeyList> {
        require("project_id", project_id)?;

        let request =
            TransportRequest::new(Method::GET, format!("{PROJECTS_PATH}/{project_id}/keys"));
        self.dispatcher().call_json(cancel, request).await
    }

    /// Creates an API key in a project. The secret is only returned here.
    ///
    /// # Errors
    ///
    /// `TrylError::Validation` for an empty id or name, otherwise the
    /// request's final error.
    pub async fn create_api_key(
        &self,
        cancel: &CancellationToken,
        project_id: &str,
        request: &CreateApiKeyRequest,
    ) -> Result<CreateApiKeyResponse> {
        require("project_id", project_id)?;
        require("name", &request.name)?;

        let http_request =
            TransportRequest::new(Method::POST, format!("{PROJECTS_PATH}/{project_id}/keys"))
                .with_body(encode_body(request)?);
        let response: CreateApiKeyResponse =
            self.dispatcher().call_json(cancel, http_request).await?;

        info!(project_id, key_id = %response.api_key_metadata.id, "api key created");
        Ok(response)
    }

    /// Revokes an API key immediately.
    ///
    /// # Errors
    ///
    /// `TrylError::Validation` for an empty id; a `key_not_found` API error
    /// when it does not exist.
    pub async fn revoke_api_key(&self, cancel: &CancellationToken, key_id: &str) -> Result<()> {
        require("key_id", key_id)?;

        let request = TransportRequest::new(Method::POST, format!("/v1/keys/{key_id}/revoke"));
        self.dispatcher().call_empty(cancel, request).await?;

        info!(key_id, "api key revoked");
        Ok(())
    }

    /// Replaces an API key with a new one and revokes the old key.
    ///
    /// # Errors
    ///
    /// `TrylError::Validation` for an empty id, otherwise the request's
    /// final error.
    pub async fn rotate_api_key(
        &self,
        cancel: &CancellationToken,
        key_id: &str,
        request: &RotateApiKeyRequest,
    ) -> Result<RotateApiKeyResponse> {
        require("key_id", key_id)?;

        let http_request = TransportRequest::new(Method::POST, format!("/v1/keys/{key_id}/rotate"))
            .with_body(encode_body(request)?);
        let response: RotateApiKeyResponse =
            self.dispatcher().call_json(cancel, http_request).await?;

        info!(
            old_key_id = key_id,
            new_key_id = %response.new_api_key_metadata.id,
            "api key rotated"
        );
        Ok(response)
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(TrylError::validation(field, "is required"));
    }
    Ok(())
}
