pub mod client;
pub mod error;
pub mod memory;
pub mod types;

use async_trait::async_trait;

pub use client::ConnectClusterClient;
pub use error::ClusterError;
pub use memory::MemoryControlPlane;
pub use types::{ConnectorStatus, CreateConnectorRequest, RemoteConnectorState};

/// Control-plane surface of the connector cluster, as seen by the
/// lifecycle actions.
///
/// Implementations classify transport responses into [`ClusterError`]
/// variants: "already exists" and "not found" carry semantic meaning the
/// effects turn into conflict-as-success; the engine itself never sees a
/// status code.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn create_connector(
        &self,
        name: &str,
        config: &serde_json::Value,
    ) -> Result<(), ClusterError>;

    async fn pause_connector(&self, name: &str) -> Result<(), ClusterError>;

    async fn resume_connector(&self, name: &str) -> Result<(), ClusterError>;

    async fn delete_connector(&self, name: &str) -> Result<(), ClusterError>;

    async fn connector_status(&self, name: &str) -> Result<ConnectorStatus, ClusterError>;
}
