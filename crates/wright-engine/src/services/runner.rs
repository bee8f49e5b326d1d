use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, info};
use wright_core::errors::ServiceError;
use wright_core::services::{BuildCheck, LintCheck, RunnerClient};

/// Runner used when no runner service is configured. Every call is logged
/// and reports a clean project.
#[derive(Debug, Default, Clone)]
pub struct LoggingRunner;

#[async_trait]
impl RunnerClient for LoggingRunner {
    async fn check_errors(&self, project_id: &str) -> Result<BuildCheck, ServiceError> {
        info!(project_id, "check_errors");
        Ok(BuildCheck::default())
    }

    async fn lint_project(&self, project_id: &str) -> Result<LintCheck, ServiceError> {
        info!(project_id, "lint_project");
        Ok(LintCheck::default())
    }

    async fn add_package(&self, project_id: &str, package_name: &str, restart_server: bool) -> Result<(), ServiceError> {
        info!(project_id, package_name, restart_server, "add_package");
        Ok(())
    }

    async fn restart_project(&self, project_id: &str) -> Result<(), ServiceError> {
        info!(project_id, "restart_project");
        Ok(())
    }
}

/// JSON-over-HTTP client for a runner service.
///
/// Endpoints are `POST {base_url}/projects/{project_id}/{action}`.
pub struct HttpRunnerClient {
    base_url: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpRunnerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRunnerClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpRunnerClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::Http(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn endpoint(&self, project_id: &str, action: &str) -> String {
        format!("{}/projects/{project_id}/{action}", self.base_url)
    }

    async fn post(&self, project_id: &str, action: &str, body: serde_json::Value) -> Result<reqwest::Response, ServiceError> {
        let url = self.endpoint(project_id, action);
        debug!(url = %url, "runner request");
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn post_json<T: DeserializeOwned>(&self, project_id: &str, action: &str) -> Result<T, ServiceError> {
        self.post(project_id, action, json!({}))
            .await?
            .json::<T>()
            .await
            .map_err(|e| ServiceError::Http(e.to_string()))
    }
}

#[async_trait]
impl RunnerClient for HttpRunnerClient {
    async fn check_errors(&self, project_id: &str) -> Result<BuildCheck, ServiceError> {
        self.post_json(project_id, "check-errors").await
    }

    async fn lint_project(&self, project_id: &str) -> Result<LintCheck, ServiceError> {
        self.post_json(project_id, "lint").await
    }

    async fn add_package(&self, project_id: &str, package_name: &str, restart_server: bool) -> Result<(), ServiceError> {
        self.post(
            project_id,
            "packages",
            json!({ "package_name": package_name, "restart_server": restart_server }),
        )
        .await
        .map(|_| ())
    }

    async fn restart_project(&self, project_id: &str) -> Result<(), ServiceError> {
        self.post(project_id, "restart", json!({})).await.map(|_| ())
    }
}
