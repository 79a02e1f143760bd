use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
}

/// Structured record of one transition attempt, success or failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    /// Machine type name ("connector" or "approval").
    pub machine: String,
    pub subject_id: String,
    pub from: String,
    /// Target state of the resolved transition. `None` when no transition
    /// was resolved (invalid event or retired subject).
    pub to: Option<String>,
    pub event: String,
    pub outcome: AuditOutcome,
    /// Failing action and error, or other context worth keeping.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn success(
        machine: &str,
        subject_id: &str,
        from: String,
        to: String,
        event: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            machine: machine.to_string(),
            subject_id: subject_id.to_string(),
            from,
            to: Some(to),
            event,
            outcome: AuditOutcome::Success,
            detail: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn failure(
        machine: &str,
        subject_id: &str,
        from: String,
        to: Option<String>,
        event: String,
        detail: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            machine: machine.to_string(),
            subject_id: subject_id.to_string(),
            from,
            to,
            event,
            outcome: AuditOutcome::Failure,
            detail: Some(detail),
            recorded_at: Utc::now(),
        }
    }
}

/// Audit sink recording every fired event and its outcome.
///
/// Fire-and-forget: implementations swallow their own failures, and the
/// coordinator never lets an emitter problem abort a transition.
#[async_trait]
pub trait EventEmitter: Send + Sync {
    async fn record(&self, record: AuditRecord);
}

/// Emits audit records to the tracing subscriber.
pub struct LogEmitter;

#[async_trait]
impl EventEmitter for LogEmitter {
    async fn record(&self, record: AuditRecord) {
        match record.outcome {
            AuditOutcome::Success => tracing::info!(
                machine = %record.machine,
                subject = %record.subject_id,
                from = %record.from,
                to = record.to.as_deref().unwrap_or("-"),
                event = %record.event,
                "transition applied"
            ),
            AuditOutcome::Failure => tracing::warn!(
                machine = %record.machine,
                subject = %record.subject_id,
                from = %record.from,
                event = %record.event,
                detail = record.detail.as_deref().unwrap_or("-"),
                "transition failed"
            ),
        }
    }
}

/// Collects audit records in memory; backs the demo output and tests.
#[derive(Default)]
pub struct MemoryEmitter {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl EventEmitter for MemoryEmitter {
    async fn record(&self, record: AuditRecord) {
        self.records.lock().await.push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_record_carries_target_state() {
        let record = AuditRecord::success(
            "connector",
            "orders-cdc",
            "CREATING".into(),
            "RUNNING".into(),
            "CREATE_REQUESTED".into(),
        );
        assert_eq!(record.outcome, AuditOutcome::Success);
        assert_eq!(record.to.as_deref(), Some("RUNNING"));
        assert!(record.detail.is_none());
    }

    #[test]
    fn failure_record_serializes_detail() {
        let record = AuditRecord::failure(
            "approval",
            "req-7",
            "PENDING".into(),
            Some("DBA_APPROVED".into()),
            "DBA_APPROVE".into(),
            "action check-dba-permission failed: permission denied".into(),
        );
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"outcome\":\"failure\""));
        assert!(json.contains("permission denied"));
    }

    #[test]
    fn success_record_omits_detail_field() {
        let record = AuditRecord::success(
            "connector",
            "s",
            "CREATING".into(),
            "RUNNING".into(),
            "CREATE_REQUESTED".into(),
        );
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("detail"));
    }

    #[tokio::test]
    async fn memory_emitter_collects_in_order() {
        let emitter = MemoryEmitter::new();
        emitter
            .record(AuditRecord::success(
                "test",
                "s",
                "DRAFT".into(),
                "LIVE".into(),
                "PUBLISH".into(),
            ))
            .await;
        emitter
            .record(AuditRecord::failure(
                "test",
                "s",
                "LIVE".into(),
                None,
                "PUBLISH".into(),
                "no transition".into(),
            ))
            .await;

        let records = emitter.records().await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].outcome, AuditOutcome::Success);
        assert_eq!(records[1].outcome, AuditOutcome::Failure);
    }
}
