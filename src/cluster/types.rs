//! Wire types for the connector cluster's REST surface.

use serde::{Deserialize, Serialize};

/// Body of `POST /connectors`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateConnectorRequest {
    pub name: String,
    /// Connector configuration forwarded verbatim to the cluster.
    pub config: serde_json::Value,
}

/// State the cluster reports for a deployed connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RemoteConnectorState {
    Running,
    Paused,
    Failed,
    /// Known to the cluster but not yet scheduled onto a worker.
    Unassigned,
}

/// Response of `GET /connectors/{name}/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorStatus {
    pub name: String,
    pub state: RemoteConnectorState,
    /// Failure trace reported by the worker, when `state` is `FAILED`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_state_uses_uppercase_wire_tokens() {
        assert_eq!(
            serde_json::to_string(&RemoteConnectorState::Running).unwrap(),
            "\"RUNNING\""
        );
        let state: RemoteConnectorState = serde_json::from_str("\"FAILED\"").unwrap();
        assert_eq!(state, RemoteConnectorState::Failed);
    }

    #[test]
    fn status_without_trace_omits_field() {
        let status = ConnectorStatus {
            name: "orders-cdc".into(),
            state: RemoteConnectorState::Running,
            trace: None,
        };
        let json = serde_json::to_string(&status).unwrap();
        assert!(!json.contains("trace"));
    }

    #[test]
    fn status_roundtrip_with_trace() {
        let json = r#"{"name":"orders-cdc","state":"FAILED","trace":"task 0 died"}"#;
        let status: ConnectorStatus = serde_json::from_str(json).unwrap();
        assert_eq!(status.state, RemoteConnectorState::Failed);
        assert_eq!(status.trace.as_deref(), Some("task 0 died"));
    }
}
