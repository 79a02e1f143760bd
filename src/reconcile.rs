//! Desired-vs-actual reconciliation for managed connectors.
//!
//! The reconciler is a trigger source, not part of the engine: each pass
//! compares the persisted desired state of every managed connector with
//! what the cluster actually reports, and fires converging events through
//! the ordinary [`TransitionCoordinator`] path. Retries therefore cost
//! nothing extra: duplicate triggers are absorbed by the engine's
//! conflict-as-success handling.

use std::sync::Arc;
use std::time::Duration;

use crate::cluster::{ClusterError, ControlPlane, RemoteConnectorState};
use crate::connector::{ConnectorEvent, ConnectorMachine, ConnectorPayload, ConnectorState};
use crate::machine::{MachineSpec, StateStore, TransitionCoordinator};

/// A connector under management: its subject id plus the payload used when
/// re-firing lifecycle events on its behalf.
#[derive(Debug, Clone)]
pub struct ManagedConnector {
    pub id: String,
    pub payload: ConnectorPayload,
}

pub struct Reconciler {
    cluster: Arc<dyn ControlPlane>,
    coordinator: Arc<TransitionCoordinator<ConnectorMachine>>,
    connectors: Vec<ManagedConnector>,
    /// Automatically fire a restart for connectors in FAILED state.
    restart_failed: bool,
}

impl Reconciler {
    pub fn new(
        cluster: Arc<dyn ControlPlane>,
        coordinator: Arc<TransitionCoordinator<ConnectorMachine>>,
        connectors: Vec<ManagedConnector>,
        restart_failed: bool,
    ) -> Self {
        Self {
            cluster,
            coordinator,
            connectors,
            restart_failed,
        }
    }

    /// One reconciliation pass over every managed connector. Returns how
    /// many events were fired.
    pub async fn pass(&self) -> usize {
        let mut fired = 0;
        for managed in &self.connectors {
            match self.reconcile_one(managed).await {
                Ok(true) => fired += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        connector = %managed.id,
                        error = %e,
                        "reconciliation pass failed for connector"
                    );
                }
            }
        }
        fired
    }

    /// Fires on a tokio interval until the task is dropped or aborted.
    pub async fn run(&self, every: Duration) {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let fired = self.pass().await;
            if fired > 0 {
                tracing::info!(fired, "reconciliation pass converged connectors");
            } else {
                tracing::debug!("reconciliation pass found nothing to do");
            }
        }
    }

    async fn reconcile_one(&self, managed: &ManagedConnector) -> anyhow::Result<bool> {
        let desired = self
            .coordinator
            .store()
            .load(&managed.id)
            .await?
            .unwrap_or_else(ConnectorMachine::seed);

        match desired {
            // Not yet provisioned (or a previous attempt failed part-way):
            // drive creation. A half-applied earlier attempt converges via
            // conflict-as-success.
            ConnectorState::Creating => {
                self.fire(managed, ConnectorEvent::CreateRequested, None).await
            }
            ConnectorState::Running => match self.cluster.connector_status(&managed.id).await {
                Ok(status) if status.state == RemoteConnectorState::Failed => {
                    self.fire(managed, ConnectorEvent::ExternalFailureObserved, status.trace)
                        .await
                }
                Ok(_) => Ok(false),
                Err(ClusterError::NotFound(_)) => {
                    self.fire(
                        managed,
                        ConnectorEvent::ExternalFailureObserved,
                        Some("connector missing from cluster".into()),
                    )
                    .await
                }
                Err(e) => Err(e.into()),
            },
            ConnectorState::Paused => match self.cluster.connector_status(&managed.id).await {
                // Something resumed it behind our back; pause it again.
                Ok(status) if status.state == RemoteConnectorState::Running => {
                    self.fire(managed, ConnectorEvent::PauseRequested, None).await
                }
                Ok(_) => Ok(false),
                Err(e) => Err(e.into()),
            },
            ConnectorState::Failed => {
                if self.restart_failed {
                    self.fire(managed, ConnectorEvent::ResumeRequested, None).await
                } else {
                    Ok(false)
                }
            }
            ConnectorState::Deleted => Ok(false),
        }
    }

    async fn fire(
        &self,
        managed: &ManagedConnector,
        event: ConnectorEvent,
        failure_trace: Option<String>,
    ) -> anyhow::Result<bool> {
        let mut payload = managed.payload.clone();
        payload.failure_trace = failure_trace;
        self.coordinator.fire(&managed.id, event, payload).await?;
        Ok(true)
    }
}
