use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};

use super::ControlPlane;
use super::error::ClusterError;
use super::types::{ConnectorStatus, CreateConnectorRequest};

/// REST client for the connector cluster's control plane.
pub struct ConnectClusterClient {
    http: Client,
    base_url: String,
}

impl ConnectClusterClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url.trim_end_matches('/'))
    }

    /// Maps the cluster's status codes into semantic errors; 409 and 404
    /// are the two the lifecycle effects care about.
    async fn check(response: Response, name: &str) -> Result<Response, ClusterError> {
        let status = response.status();
        if status == StatusCode::CONFLICT {
            return Err(ClusterError::AlreadyExists(name.to_string()));
        }
        if status == StatusCode::NOT_FOUND {
            return Err(ClusterError::NotFound(name.to_string()));
        }
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(ClusterError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl ControlPlane for ConnectClusterClient {
    async fn create_connector(
        &self,
        name: &str,
        config: &serde_json::Value,
    ) -> Result<(), ClusterError> {
        let body = CreateConnectorRequest {
            name: name.to_string(),
            config: config.clone(),
        };
        let response = self
            .http
            .post(self.url("connectors"))
            .json(&body)
            .send()
            .await?;
        Self::check(response, name).await?;
        Ok(())
    }

    async fn pause_connector(&self, name: &str) -> Result<(), ClusterError> {
        let response = self
            .http
            .put(self.url(&format!("connectors/{name}/pause")))
            .send()
            .await?;
        Self::check(response, name).await?;
        Ok(())
    }

    async fn resume_connector(&self, name: &str) -> Result<(), ClusterError> {
        let response = self
            .http
            .put(self.url(&format!("connectors/{name}/resume")))
            .send()
            .await?;
        Self::check(response, name).await?;
        Ok(())
    }

    async fn delete_connector(&self, name: &str) -> Result<(), ClusterError> {
        let response = self
            .http
            .delete(self.url(&format!("connectors/{name}")))
            .send()
            .await?;
        Self::check(response, name).await?;
        Ok(())
    }

    async fn connector_status(&self, name: &str) -> Result<ConnectorStatus, ClusterError> {
        let response = self
            .http
            .get(self.url(&format!("connectors/{name}/status")))
            .send()
            .await?;
        let response = Self::check(response, name).await?;
        Ok(response.json::<ConnectorStatus>().await?)
    }
}
