//! Floodgate configuration loaded from `floodgate.toml`.
//!
//! [`FloodgateConfig`] holds every tunable plus the set of managed
//! connectors and the review account lists. Fields missing from the file
//! fall back to defaults. The `FLOODGATE_CLUSTER_URL` environment variable
//! takes precedence over the file.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::FloodgateError;

#[derive(Debug, Clone, Deserialize)]
pub struct FloodgateConfig {
    /// Base URL of the connector cluster's REST control plane.
    #[serde(default = "default_cluster_url")]
    pub cluster_url: String,

    /// Path of the JSON file holding persisted connector states.
    #[serde(default = "default_state_path")]
    pub state_path: String,

    /// Path of the JSON file holding persisted approval states.
    #[serde(default = "default_approval_state_path")]
    pub approval_state_path: String,

    /// Seconds between reconciliation passes.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Timeout budget for the async startup-confirmation probe, in ms.
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,

    /// Timeout budget for async notification actions, in ms.
    #[serde(default = "default_notify_timeout_ms")]
    pub notify_timeout_ms: u64,

    /// Upper bound on concurrently executing async actions.
    #[serde(default = "default_max_concurrent_actions")]
    pub max_concurrent_actions: usize,

    /// Whether the reconciler fires restarts for FAILED connectors.
    #[serde(default = "default_restart_failed")]
    pub restart_failed: bool,

    /// Connectors under management.
    #[serde(default)]
    pub connectors: Vec<ConnectorDef>,

    /// Accounts allowed to review connection requisitions.
    #[serde(default)]
    pub approvals: ApprovalAccounts,
}

/// One `[[connectors]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectorDef {
    pub name: String,
    /// Configuration forwarded verbatim to the cluster.
    #[serde(default = "empty_config")]
    pub config: serde_json::Value,
    /// Failure-notification recipient.
    #[serde(default)]
    pub owner: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApprovalAccounts {
    #[serde(default)]
    pub dba: Vec<String>,
    #[serde(default)]
    pub owners: Vec<String>,
}

fn default_cluster_url() -> String {
    "http://localhost:8083".to_string()
}

fn default_state_path() -> String {
    "floodgate-state.json".to_string()
}

fn default_approval_state_path() -> String {
    "floodgate-approvals.json".to_string()
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_startup_timeout_ms() -> u64 {
    10_000
}

fn default_notify_timeout_ms() -> u64 {
    5_000
}

fn default_max_concurrent_actions() -> usize {
    8
}

fn default_restart_failed() -> bool {
    true
}

fn empty_config() -> serde_json::Value {
    serde_json::json!({})
}

impl Default for FloodgateConfig {
    fn default() -> Self {
        Self {
            cluster_url: default_cluster_url(),
            state_path: default_state_path(),
            approval_state_path: default_approval_state_path(),
            poll_interval_secs: default_poll_interval_secs(),
            startup_timeout_ms: default_startup_timeout_ms(),
            notify_timeout_ms: default_notify_timeout_ms(),
            max_concurrent_actions: default_max_concurrent_actions(),
            restart_failed: default_restart_failed(),
            connectors: Vec::new(),
            approvals: ApprovalAccounts::default(),
        }
    }
}

impl FloodgateConfig {
    /// Loads the configuration from `floodgate.toml` in the current
    /// directory, falling back to defaults if the file does not exist.
    pub fn load() -> Result<Self, FloodgateError> {
        let path = Path::new("floodgate.toml");
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<FloodgateConfig>(&contents)?
        } else {
            Self::default()
        };

        // Environment takes precedence over the file for the cluster URL.
        if let Ok(url) = std::env::var("FLOODGATE_CLUSTER_URL")
            && !url.is_empty()
        {
            config.cluster_url = url;
        }

        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_millis(self.notify_timeout_ms)
    }
}
