//! The connector lifecycle machine: provisioning, pause/resume, failure
//! handling, and decommissioning against the cluster control plane.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cluster::{ClusterError, ControlPlane, RemoteConnectorState};
use crate::machine::{
    Action, ActionEffect, EffectError, ExecutionContext, MachineSpec, TableError, TransitionTable,
};
use crate::notify::{Notification, NotificationKind, Notifier};

pub struct ConnectorMachine;

/// Closed state set for a managed connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectorState {
    Creating,
    Running,
    Paused,
    Failed,
    Deleted,
}

impl fmt::Display for ConnectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectorState::Creating => write!(f, "CREATING"),
            ConnectorState::Running => write!(f, "RUNNING"),
            ConnectorState::Paused => write!(f, "PAUSED"),
            ConnectorState::Failed => write!(f, "FAILED"),
            ConnectorState::Deleted => write!(f, "DELETED"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectorEvent {
    CreateRequested,
    PauseRequested,
    ResumeRequested,
    ExternalFailureObserved,
    DeleteRequested,
}

impl fmt::Display for ConnectorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectorEvent::CreateRequested => write!(f, "CREATE_REQUESTED"),
            ConnectorEvent::PauseRequested => write!(f, "PAUSE_REQUESTED"),
            ConnectorEvent::ResumeRequested => write!(f, "RESUME_REQUESTED"),
            ConnectorEvent::ExternalFailureObserved => write!(f, "EXTERNAL_FAILURE_OBSERVED"),
            ConnectorEvent::DeleteRequested => write!(f, "DELETE_REQUESTED"),
        }
    }
}

/// Event payload for connector transitions. The subject id doubles as the
/// connector name on the cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorPayload {
    /// Connector configuration forwarded to the cluster on provisioning.
    pub config: serde_json::Value,
    /// Who to notify when the connector fails.
    #[serde(default)]
    pub owner: Option<String>,
    /// Failure trace carried by `EXTERNAL_FAILURE_OBSERVED`.
    #[serde(default)]
    pub failure_trace: Option<String>,
}

impl MachineSpec for ConnectorMachine {
    type State = ConnectorState;
    type Event = ConnectorEvent;
    type Payload = ConnectorPayload;

    const NAME: &'static str = "connector";

    fn seed() -> ConnectorState {
        ConnectorState::Creating
    }

    fn is_terminal(state: ConnectorState) -> bool {
        state == ConnectorState::Deleted
    }
}

struct ProvisionConnector {
    cluster: Arc<dyn ControlPlane>,
}

#[async_trait]
impl ActionEffect<ConnectorMachine> for ProvisionConnector {
    async fn apply(&self, ctx: &ExecutionContext<ConnectorMachine>) -> Result<(), EffectError> {
        match self
            .cluster
            .create_connector(&ctx.subject_id, &ctx.payload.config)
            .await
        {
            Ok(()) => Ok(()),
            // Duplicate trigger or scheduler retry after a timed-out call
            // that actually landed.
            Err(ClusterError::AlreadyExists(name)) => Err(EffectError::AlreadySatisfied(format!(
                "connector {name} already on cluster"
            ))),
            Err(e) => Err(EffectError::Failed(e.to_string())),
        }
    }
}

struct ConfirmStartup {
    cluster: Arc<dyn ControlPlane>,
}

#[async_trait]
impl ActionEffect<ConnectorMachine> for ConfirmStartup {
    async fn apply(&self, ctx: &ExecutionContext<ConnectorMachine>) -> Result<(), EffectError> {
        let status = self
            .cluster
            .connector_status(&ctx.subject_id)
            .await
            .map_err(|e| EffectError::Failed(e.to_string()))?;
        match status.state {
            RemoteConnectorState::Running => Ok(()),
            other => Err(EffectError::Failed(format!(
                "cluster reports {other:?}{}",
                status
                    .trace
                    .map(|t| format!(": {t}"))
                    .unwrap_or_default()
            ))),
        }
    }
}

struct SuspendConnector {
    cluster: Arc<dyn ControlPlane>,
}

#[async_trait]
impl ActionEffect<ConnectorMachine> for SuspendConnector {
    async fn apply(&self, ctx: &ExecutionContext<ConnectorMachine>) -> Result<(), EffectError> {
        self.cluster
            .pause_connector(&ctx.subject_id)
            .await
            .map_err(|e| EffectError::Failed(e.to_string()))
    }
}

struct ResumeConnector {
    cluster: Arc<dyn ControlPlane>,
}

#[async_trait]
impl ActionEffect<ConnectorMachine> for ResumeConnector {
    async fn apply(&self, ctx: &ExecutionContext<ConnectorMachine>) -> Result<(), EffectError> {
        self.cluster
            .resume_connector(&ctx.subject_id)
            .await
            .map_err(|e| EffectError::Failed(e.to_string()))
    }
}

struct DecommissionConnector {
    cluster: Arc<dyn ControlPlane>,
}

#[async_trait]
impl ActionEffect<ConnectorMachine> for DecommissionConnector {
    async fn apply(&self, ctx: &ExecutionContext<ConnectorMachine>) -> Result<(), EffectError> {
        match self.cluster.delete_connector(&ctx.subject_id).await {
            Ok(()) => Ok(()),
            Err(ClusterError::NotFound(name)) => Err(EffectError::AlreadySatisfied(format!(
                "connector {name} already gone"
            ))),
            Err(e) => Err(EffectError::Failed(e.to_string())),
        }
    }
}

struct NotifyOwnerOfFailure {
    notifier: Arc<dyn Notifier>,
}

#[async_trait]
impl ActionEffect<ConnectorMachine> for NotifyOwnerOfFailure {
    async fn apply(&self, ctx: &ExecutionContext<ConnectorMachine>) -> Result<(), EffectError> {
        let Some(owner) = &ctx.payload.owner else {
            return Ok(());
        };
        let trace = ctx
            .payload
            .failure_trace
            .as_deref()
            .unwrap_or("no trace reported");
        self.notifier
            .send(&Notification {
                kind: NotificationKind::ConnectorFailed,
                subject_id: ctx.subject_id.clone(),
                recipients: vec![owner.clone()],
                body: format!("connector {} failed: {trace}", ctx.subject_id),
            })
            .await
            .map_err(|e| EffectError::Failed(e.to_string()))
    }
}

/// Builds the connector transition table against the given collaborators.
///
/// `startup_timeout` bounds the async status probe after provisioning or
/// restart; `notify_timeout` bounds the best-effort failure notification.
pub fn connector_table(
    cluster: Arc<dyn ControlPlane>,
    notifier: Arc<dyn Notifier>,
    startup_timeout: Duration,
    notify_timeout: Duration,
) -> Result<TransitionTable<ConnectorMachine>, TableError> {
    use ConnectorEvent::*;
    use ConnectorState::*;

    let provision = || {
        Action::sync(
            "provision-connector",
            0,
            Arc::new(ProvisionConnector {
                cluster: cluster.clone(),
            }),
        )
    };
    let confirm = || {
        Action::asynchronous(
            "confirm-startup",
            10,
            startup_timeout,
            Arc::new(ConfirmStartup {
                cluster: cluster.clone(),
            }),
        )
    };
    let decommission = || {
        Action::sync(
            "decommission-connector",
            0,
            Arc::new(DecommissionConnector {
                cluster: cluster.clone(),
            }),
        )
    };
    let notify_failure = || {
        Action::asynchronous(
            "notify-owner",
            0,
            notify_timeout,
            Arc::new(NotifyOwnerOfFailure {
                notifier: notifier.clone(),
            }),
        )
        .best_effort()
    };
    let resume = || {
        Action::sync(
            "resume-connector",
            0,
            Arc::new(ResumeConnector {
                cluster: cluster.clone(),
            }),
        )
    };
    let suspend = || {
        Action::sync(
            "suspend-connector",
            0,
            Arc::new(SuspendConnector {
                cluster: cluster.clone(),
            }),
        )
    };

    TransitionTable::builder()
        .route(Creating, CreateRequested, Running, vec![provision(), confirm()])
        .route(Running, PauseRequested, Paused, vec![suspend()])
        // Self-loop: re-asserting a pause is how the reconciler corrects a
        // connector something resumed behind the platform's back.
        .route(Paused, PauseRequested, Paused, vec![suspend()])
        .route(Paused, ResumeRequested, Running, vec![resume()])
        .route(Running, ExternalFailureObserved, Failed, vec![notify_failure()])
        .route(Paused, ExternalFailureObserved, Failed, vec![notify_failure()])
        .route(Failed, ResumeRequested, Running, vec![resume(), confirm()])
        .route(Creating, DeleteRequested, Deleted, vec![decommission()])
        .route(Running, DeleteRequested, Deleted, vec![decommission()])
        .route(Paused, DeleteRequested, Deleted, vec![decommission()])
        .route(Failed, DeleteRequested, Deleted, vec![decommission()])
        .build()
}
