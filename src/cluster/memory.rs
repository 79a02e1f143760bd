use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::ControlPlane;
use super::error::ClusterError;
use super::types::{ConnectorStatus, RemoteConnectorState};

/// In-process control plane backing the embedded demo and tests.
///
/// Mirrors the REST surface's semantics: creating a connector twice is a
/// conflict, touching a missing one is not-found.
#[derive(Default)]
pub struct MemoryControlPlane {
    connectors: Mutex<HashMap<String, RemoteConnectorState>>,
}

impl MemoryControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seeds a connector, as if something else had already deployed it.
    pub async fn seed(&self, name: &str, state: RemoteConnectorState) {
        self.connectors
            .lock()
            .await
            .insert(name.to_string(), state);
    }

    /// Flips a deployed connector to FAILED, simulating a worker crash.
    pub async fn break_connector(&self, name: &str) {
        if let Some(state) = self.connectors.lock().await.get_mut(name) {
            *state = RemoteConnectorState::Failed;
        }
    }

    pub async fn deployed(&self) -> Vec<String> {
        let mut names: Vec<String> = self.connectors.lock().await.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl ControlPlane for MemoryControlPlane {
    async fn create_connector(
        &self,
        name: &str,
        _config: &serde_json::Value,
    ) -> Result<(), ClusterError> {
        let mut connectors = self.connectors.lock().await;
        if connectors.contains_key(name) {
            return Err(ClusterError::AlreadyExists(name.to_string()));
        }
        connectors.insert(name.to_string(), RemoteConnectorState::Running);
        Ok(())
    }

    async fn pause_connector(&self, name: &str) -> Result<(), ClusterError> {
        let mut connectors = self.connectors.lock().await;
        match connectors.get_mut(name) {
            Some(state) => {
                *state = RemoteConnectorState::Paused;
                Ok(())
            }
            None => Err(ClusterError::NotFound(name.to_string())),
        }
    }

    async fn resume_connector(&self, name: &str) -> Result<(), ClusterError> {
        let mut connectors = self.connectors.lock().await;
        match connectors.get_mut(name) {
            Some(state) => {
                *state = RemoteConnectorState::Running;
                Ok(())
            }
            None => Err(ClusterError::NotFound(name.to_string())),
        }
    }

    async fn delete_connector(&self, name: &str) -> Result<(), ClusterError> {
        match self.connectors.lock().await.remove(name) {
            Some(_) => Ok(()),
            None => Err(ClusterError::NotFound(name.to_string())),
        }
    }

    async fn connector_status(&self, name: &str) -> Result<ConnectorStatus, ClusterError> {
        match self.connectors.lock().await.get(name) {
            Some(state) => Ok(ConnectorStatus {
                name: name.to_string(),
                state: *state,
                trace: None,
            }),
            None => Err(ClusterError::NotFound(name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_status() {
        let plane = MemoryControlPlane::new();
        plane
            .create_connector("orders-cdc", &serde_json::json!({}))
            .await
            .unwrap();

        let status = plane.connector_status("orders-cdc").await.unwrap();
        assert_eq!(status.state, RemoteConnectorState::Running);
    }

    #[tokio::test]
    async fn duplicate_create_is_a_conflict() {
        let plane = MemoryControlPlane::new();
        plane
            .create_connector("orders-cdc", &serde_json::json!({}))
            .await
            .unwrap();

        let err = plane
            .create_connector("orders-cdc", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn missing_connector_is_not_found() {
        let plane = MemoryControlPlane::new();
        assert!(matches!(
            plane.pause_connector("ghost").await.unwrap_err(),
            ClusterError::NotFound(_)
        ));
        assert!(matches!(
            plane.delete_connector("ghost").await.unwrap_err(),
            ClusterError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn break_connector_reports_failed() {
        let plane = MemoryControlPlane::new();
        plane
            .create_connector("orders-cdc", &serde_json::json!({}))
            .await
            .unwrap();
        plane.break_connector("orders-cdc").await;

        let status = plane.connector_status("orders-cdc").await.unwrap();
        assert_eq!(status.state, RemoteConnectorState::Failed);
    }
}
