//! The connection-approval machine: a two-stage human review (DBA, then
//! source owner) driving permission checks, decision recording, and
//! proposer notifications.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::machine::{
    Action, ActionEffect, EffectError, ExecutionContext, MachineSpec, TableError, TransitionTable,
};
use crate::notify::{Notification, NotificationKind, Notifier};

pub struct ApprovalMachine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalState {
    Pending,
    DbaApproved,
    OwnerApproved,
    Rejected,
}

impl fmt::Display for ApprovalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApprovalState::Pending => write!(f, "PENDING"),
            ApprovalState::DbaApproved => write!(f, "DBA_APPROVED"),
            ApprovalState::OwnerApproved => write!(f, "OWNER_APPROVED"),
            ApprovalState::Rejected => write!(f, "REJECTED"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApprovalEvent {
    DbaApprove,
    OwnerApprove,
    Reject,
}

impl fmt::Display for ApprovalEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApprovalEvent::DbaApprove => write!(f, "DBA_APPROVE"),
            ApprovalEvent::OwnerApprove => write!(f, "OWNER_APPROVE"),
            ApprovalEvent::Reject => write!(f, "REJECT"),
        }
    }
}

/// Event payload for approval transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalPayload {
    /// Account performing the review.
    pub operator: String,
    /// Free-text review comment.
    #[serde(default)]
    pub comment: Option<String>,
    /// Who proposed the connection; receives the outcome notifications.
    pub proposer: String,
}

impl MachineSpec for ApprovalMachine {
    type State = ApprovalState;
    type Event = ApprovalEvent;
    type Payload = ApprovalPayload;

    const NAME: &'static str = "approval";

    fn seed() -> ApprovalState {
        ApprovalState::Pending
    }

    // A fully approved requisition is as retired as a rejected one; the
    // connection it unlocked lives its own life in the connector machine.
    fn is_terminal(state: ApprovalState) -> bool {
        matches!(state, ApprovalState::OwnerApproved | ApprovalState::Rejected)
    }
}

/// Which review stage produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStage {
    Dba,
    Owner,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub stage: ReviewStage,
    pub approved: bool,
    pub operator: String,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("{operator} has no {stage:?} review permission")]
    PermissionDenied { operator: String, stage: ReviewStage },

    /// The same decision was already recorded, a duplicate trigger.
    #[error("decision for stage {0:?} already recorded")]
    AlreadyRecorded(ReviewStage),

    #[error("{0}")]
    Backend(String),
}

/// Requisition-side collaborator behind the approval actions: permission
/// checks, durable decision recording, and the hand-off that turns a fully
/// approved requisition into connector provisioning intent.
#[async_trait]
pub trait ApprovalBackend: Send + Sync {
    async fn check_permission(
        &self,
        requisition_id: &str,
        operator: &str,
        stage: ReviewStage,
    ) -> Result<(), ApprovalError>;

    async fn record_decision(
        &self,
        requisition_id: &str,
        decision: &ApprovalDecision,
    ) -> Result<(), ApprovalError>;

    async fn apply_connection(&self, requisition_id: &str) -> Result<(), ApprovalError>;
}

struct CheckPermission {
    backend: Arc<dyn ApprovalBackend>,
    stage: ReviewStage,
}

#[async_trait]
impl ActionEffect<ApprovalMachine> for CheckPermission {
    async fn apply(&self, ctx: &ExecutionContext<ApprovalMachine>) -> Result<(), EffectError> {
        self.backend
            .check_permission(&ctx.subject_id, &ctx.payload.operator, self.stage)
            .await
            .map_err(|e| EffectError::Failed(e.to_string()))
    }
}

struct RecordDecision {
    backend: Arc<dyn ApprovalBackend>,
    stage: ReviewStage,
    approved: bool,
}

#[async_trait]
impl ActionEffect<ApprovalMachine> for RecordDecision {
    async fn apply(&self, ctx: &ExecutionContext<ApprovalMachine>) -> Result<(), EffectError> {
        let decision = ApprovalDecision {
            stage: self.stage,
            approved: self.approved,
            operator: ctx.payload.operator.clone(),
            comment: ctx.payload.comment.clone(),
        };
        match self.backend.record_decision(&ctx.subject_id, &decision).await {
            Ok(()) => Ok(()),
            Err(ApprovalError::AlreadyRecorded(stage)) => Err(EffectError::AlreadySatisfied(
                format!("{stage:?} decision already recorded"),
            )),
            Err(e) => Err(EffectError::Failed(e.to_string())),
        }
    }
}

struct ApplyConnection {
    backend: Arc<dyn ApprovalBackend>,
}

#[async_trait]
impl ActionEffect<ApprovalMachine> for ApplyConnection {
    async fn apply(&self, ctx: &ExecutionContext<ApprovalMachine>) -> Result<(), EffectError> {
        match self.backend.apply_connection(&ctx.subject_id).await {
            Ok(()) => Ok(()),
            Err(ApprovalError::AlreadyRecorded(_)) => Err(EffectError::AlreadySatisfied(
                "connection already applied".into(),
            )),
            Err(e) => Err(EffectError::Failed(e.to_string())),
        }
    }
}

struct NotifyProposer {
    notifier: Arc<dyn Notifier>,
    kind: NotificationKind,
}

#[async_trait]
impl ActionEffect<ApprovalMachine> for NotifyProposer {
    async fn apply(&self, ctx: &ExecutionContext<ApprovalMachine>) -> Result<(), EffectError> {
        let body = match self.kind {
            NotificationKind::DbaApproved => {
                format!("requisition {} passed DBA review", ctx.subject_id)
            }
            NotificationKind::FullyApproved => {
                format!("requisition {} fully approved", ctx.subject_id)
            }
            NotificationKind::Rejected => format!(
                "requisition {} rejected{}",
                ctx.subject_id,
                ctx.payload
                    .comment
                    .as_deref()
                    .map(|c| format!(": {c}"))
                    .unwrap_or_default()
            ),
            NotificationKind::ConnectorFailed => {
                return Err(EffectError::Failed(
                    "connector notifications do not belong to the approval machine".into(),
                ));
            }
        };
        self.notifier
            .send(&Notification {
                kind: self.kind,
                subject_id: ctx.subject_id.clone(),
                recipients: vec![ctx.payload.proposer.clone()],
                body,
            })
            .await
            .map_err(|e| EffectError::Failed(e.to_string()))
    }
}

/// Builds the approval transition table.
///
/// The reviewer a `REJECT` requires depends on the stage the requisition is
/// in: a pending requisition is rejected by a DBA, a DBA-approved one by the
/// source owner.
pub fn approval_table(
    backend: Arc<dyn ApprovalBackend>,
    notifier: Arc<dyn Notifier>,
    notify_timeout: Duration,
) -> Result<TransitionTable<ApprovalMachine>, TableError> {
    use ApprovalEvent::*;
    use ApprovalState::*;

    let check = |stage| {
        Action::sync(
            "check-review-permission",
            0,
            Arc::new(CheckPermission {
                backend: backend.clone(),
                stage,
            }),
        )
    };
    let record = |stage, approved| {
        Action::sync(
            "record-decision",
            10,
            Arc::new(RecordDecision {
                backend: backend.clone(),
                stage,
                approved,
            }),
        )
    };
    let notify = |kind, weight| {
        Action::asynchronous(
            "notify-proposer",
            weight,
            notify_timeout,
            Arc::new(NotifyProposer {
                notifier: notifier.clone(),
                kind,
            }),
        )
        .best_effort()
    };

    TransitionTable::builder()
        .route(
            Pending,
            DbaApprove,
            DbaApproved,
            vec![
                check(ReviewStage::Dba),
                record(ReviewStage::Dba, true),
                notify(NotificationKind::DbaApproved, 20),
            ],
        )
        .route(
            DbaApproved,
            OwnerApprove,
            OwnerApproved,
            vec![
                check(ReviewStage::Owner),
                record(ReviewStage::Owner, true),
                Action::sync(
                    "apply-connection",
                    20,
                    Arc::new(ApplyConnection {
                        backend: backend.clone(),
                    }),
                ),
                notify(NotificationKind::FullyApproved, 30),
            ],
        )
        .route(
            Pending,
            Reject,
            Rejected,
            vec![
                check(ReviewStage::Dba),
                record(ReviewStage::Dba, false),
                notify(NotificationKind::Rejected, 20),
            ],
        )
        .route(
            DbaApproved,
            Reject,
            Rejected,
            vec![
                check(ReviewStage::Owner),
                record(ReviewStage::Owner, false),
                notify(NotificationKind::Rejected, 20),
            ],
        )
        .build()
}

/// Account-list-backed approval backend: review permissions come from the
/// configuration file, decisions are kept in memory for the process
/// lifetime.
pub struct StaticApprovalBackend {
    dba_accounts: Vec<String>,
    owner_accounts: Vec<String>,
    decisions: Mutex<Vec<(String, ApprovalDecision)>>,
    applied: Mutex<Vec<String>>,
}

impl StaticApprovalBackend {
    pub fn new(dba_accounts: Vec<String>, owner_accounts: Vec<String>) -> Self {
        Self {
            dba_accounts,
            owner_accounts,
            decisions: Mutex::new(Vec::new()),
            applied: Mutex::new(Vec::new()),
        }
    }

    pub async fn decisions_for(&self, requisition_id: &str) -> Vec<ApprovalDecision> {
        self.decisions
            .lock()
            .await
            .iter()
            .filter(|(id, _)| id == requisition_id)
            .map(|(_, decision)| decision.clone())
            .collect()
    }

    pub async fn applied(&self) -> Vec<String> {
        self.applied.lock().await.clone()
    }
}

#[async_trait]
impl ApprovalBackend for StaticApprovalBackend {
    async fn check_permission(
        &self,
        _requisition_id: &str,
        operator: &str,
        stage: ReviewStage,
    ) -> Result<(), ApprovalError> {
        let accounts = match stage {
            ReviewStage::Dba => &self.dba_accounts,
            ReviewStage::Owner => &self.owner_accounts,
        };
        if accounts.iter().any(|a| a == operator) {
            Ok(())
        } else {
            Err(ApprovalError::PermissionDenied {
                operator: operator.to_string(),
                stage,
            })
        }
    }

    async fn record_decision(
        &self,
        requisition_id: &str,
        decision: &ApprovalDecision,
    ) -> Result<(), ApprovalError> {
        let mut decisions = self.decisions.lock().await;
        let duplicate = decisions
            .iter()
            .any(|(id, d)| id == requisition_id && d.stage == decision.stage);
        if duplicate {
            return Err(ApprovalError::AlreadyRecorded(decision.stage));
        }
        decisions.push((requisition_id.to_string(), decision.clone()));
        Ok(())
    }

    async fn apply_connection(&self, requisition_id: &str) -> Result<(), ApprovalError> {
        let mut applied = self.applied.lock().await;
        if applied.iter().any(|id| id == requisition_id) {
            return Err(ApprovalError::AlreadyRecorded(ReviewStage::Owner));
        }
        applied.push(requisition_id.to_string());
        Ok(())
    }
}
