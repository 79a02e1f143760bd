use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use super::MachineSpec;
use super::action::{Criticality, ExecutionContext};
use super::audit::{AuditRecord, EventEmitter};
use super::error::TransitionError;
use super::executor::{ActionExecutor, ActionOutcome};
use super::store::StateStore;
use super::table::TransitionTable;

/// Drives one `fire` call to completion for one subject.
///
/// Per-subject locking is the engine's core ordering guarantee: no two
/// transitions for the same subject ever interleave, and a transition either
/// fully completes (actions plus persistence) or is observed as not having
/// started. Independent subjects run concurrently.
pub struct TransitionCoordinator<M: MachineSpec> {
    table: Arc<TransitionTable<M>>,
    store: Arc<dyn StateStore<M>>,
    emitter: Arc<dyn EventEmitter>,
    executor: ActionExecutor,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<M: MachineSpec> TransitionCoordinator<M> {
    pub fn new(
        table: Arc<TransitionTable<M>>,
        store: Arc<dyn StateStore<M>>,
        emitter: Arc<dyn EventEmitter>,
        executor: ActionExecutor,
    ) -> Self {
        Self {
            table,
            store,
            emitter,
            executor,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn StateStore<M>> {
        &self.store
    }

    /// Resolves and executes the transition for `event` on the subject.
    ///
    /// On success the new state has been persisted when this returns. On any
    /// failure the persisted state is unchanged, except for the distinct
    /// [`TransitionError::Persistence`] case, where actions completed but
    /// the write failed and reconciliation is required.
    pub async fn fire(
        &self,
        subject_id: &str,
        event: M::Event,
        payload: M::Payload,
    ) -> Result<M::State, TransitionError> {
        let lock = self.subject_lock(subject_id).await;
        let _guard = lock.lock().await;

        let from = self
            .store
            .load(subject_id)
            .await?
            .unwrap_or_else(M::seed);

        if M::is_terminal(from) {
            self.emit(AuditRecord::failure(
                M::NAME,
                subject_id,
                from.to_string(),
                None,
                event.to_string(),
                format!("subject retired in terminal state {from}"),
            ))
            .await;
            return Err(TransitionError::SubjectRetired {
                subject_id: subject_id.to_string(),
                state: from.to_string(),
            });
        }

        let Some(transition) = self.table.resolve(from, event) else {
            self.emit(AuditRecord::failure(
                M::NAME,
                subject_id,
                from.to_string(),
                None,
                event.to_string(),
                "no transition registered".into(),
            ))
            .await;
            return Err(TransitionError::InvalidTransition {
                from: from.to_string(),
                event: event.to_string(),
            });
        };

        let to = transition.to();
        let ctx = ExecutionContext::<M> {
            subject_id: subject_id.to_string(),
            from,
            to,
            event,
            payload,
        };

        for action in transition.actions() {
            match self.executor.run(action, &ctx).await {
                ActionOutcome::Success => {}
                ActionOutcome::ConflictAsSuccess { detail } => {
                    tracing::warn!(
                        machine = M::NAME,
                        subject = subject_id,
                        action = action.name(),
                        %detail,
                        "external system already in desired shape, continuing"
                    );
                }
                ActionOutcome::Failure(reason) => {
                    if action.criticality() == Criticality::BestEffort {
                        tracing::warn!(
                            machine = M::NAME,
                            subject = subject_id,
                            action = action.name(),
                            %reason,
                            "best-effort action failed, continuing"
                        );
                        continue;
                    }
                    self.emit(AuditRecord::failure(
                        M::NAME,
                        subject_id,
                        from.to_string(),
                        Some(to.to_string()),
                        event.to_string(),
                        format!("action {} failed: {reason}", action.name()),
                    ))
                    .await;
                    return Err(TransitionError::ActionFailed {
                        action: action.name(),
                        reason,
                    });
                }
            }
        }

        if let Err(source) = self.store.save(subject_id, to).await {
            // External effects have been applied but durable state has not
            // advanced; a blind retry could re-run non-idempotent effects.
            tracing::error!(
                machine = M::NAME,
                subject = subject_id,
                from = %from,
                to = %to,
                error = %source,
                "state write failed after actions completed, reconciliation required"
            );
            self.emit(AuditRecord::failure(
                M::NAME,
                subject_id,
                from.to_string(),
                Some(to.to_string()),
                event.to_string(),
                format!("persistence failed: {source}"),
            ))
            .await;
            return Err(TransitionError::Persistence {
                subject_id: subject_id.to_string(),
                source,
            });
        }

        self.emit(AuditRecord::success(
            M::NAME,
            subject_id,
            from.to_string(),
            to.to_string(),
            event.to_string(),
        ))
        .await;

        Ok(to)
    }

    async fn subject_lock(&self, subject_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(subject_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn emit(&self, record: AuditRecord) {
        self.emitter.record(record).await;
    }
}

/// Per-subject façade over the shared coordinator. Holds only the subject id
/// and an `Arc`; cheap to construct per invocation.
pub struct StateMachine<M: MachineSpec> {
    subject_id: String,
    coordinator: Arc<TransitionCoordinator<M>>,
}

impl<M: MachineSpec> StateMachine<M> {
    pub fn new(subject_id: impl Into<String>, coordinator: Arc<TransitionCoordinator<M>>) -> Self {
        Self {
            subject_id: subject_id.into(),
            coordinator,
        }
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub async fn fire(
        &self,
        event: M::Event,
        payload: M::Payload,
    ) -> Result<M::State, TransitionError> {
        self.coordinator.fire(&self.subject_id, event, payload).await
    }

    /// The subject's persisted state, or the seed state if it has none yet.
    pub async fn current(&self) -> Result<M::State, TransitionError> {
        Ok(self
            .coordinator
            .store()
            .load(&self.subject_id)
            .await?
            .unwrap_or_else(M::seed))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::super::audit::{AuditOutcome, MemoryEmitter};
    use super::super::error::{ActionFailureReason, EffectError};
    use super::super::store::{MemoryStateStore, StoreError};
    use super::super::testkit::{
        EffectLog, ScriptedEffect, TestEvent, TestMachine, TestState, shared_log,
    };
    use super::*;
    use crate::machine::{Action, ActionEffect};

    struct Harness {
        coordinator: Arc<TransitionCoordinator<TestMachine>>,
        store: Arc<MemoryStateStore<TestMachine>>,
        emitter: Arc<MemoryEmitter>,
    }

    fn harness(table: TransitionTable<TestMachine>) -> Harness {
        let store = Arc::new(MemoryStateStore::new());
        let emitter = Arc::new(MemoryEmitter::new());
        let coordinator = Arc::new(TransitionCoordinator::new(
            Arc::new(table),
            store.clone(),
            emitter.clone(),
            ActionExecutor::new(4),
        ));
        Harness {
            coordinator,
            store,
            emitter,
        }
    }

    fn publish_route(actions: Vec<Action<TestMachine>>) -> TransitionTable<TestMachine> {
        TransitionTable::builder()
            .route(TestState::Draft, TestEvent::Publish, TestState::Live, actions)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn unregistered_pair_fails_and_leaves_state_unchanged() {
        let h = harness(publish_route(vec![]));

        let err = h.coordinator.fire("s1", TestEvent::Close, ()).await.unwrap_err();
        assert!(matches!(err, TransitionError::InvalidTransition { .. }));
        assert_eq!(h.store.load("s1").await.unwrap(), None);

        let records = h.emitter.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, AuditOutcome::Failure);
        assert_eq!(records[0].to, None);
    }

    #[tokio::test]
    async fn actions_run_in_ascending_weight_order() {
        let log = shared_log();
        let h = harness(publish_route(vec![
            Action::sync("announce", 20, ScriptedEffect::ok("announce", log.clone())),
            Action::sync("provision", 0, ScriptedEffect::ok("provision", log.clone())),
            Action::sync("verify", 10, ScriptedEffect::ok("verify", log.clone())),
        ]));

        let state = h.coordinator.fire("s1", TestEvent::Publish, ()).await.unwrap();
        assert_eq!(state, TestState::Live);
        assert_eq!(*log.lock().unwrap(), vec!["provision", "verify", "announce"]);
    }

    #[tokio::test]
    async fn conflict_never_aborts_the_transition() {
        let log = shared_log();
        let h = harness(publish_route(vec![
            Action::sync("provision", 0, ScriptedEffect::conflict("provision", log.clone())),
            Action::sync("verify", 10, ScriptedEffect::ok("verify", log.clone())),
        ]));

        let state = h.coordinator.fire("s1", TestEvent::Publish, ()).await.unwrap();
        assert_eq!(state, TestState::Live);
        assert_eq!(h.store.load("s1").await.unwrap(), Some(TestState::Live));
        assert_eq!(*log.lock().unwrap(), vec!["provision", "verify"]);

        let records = h.emitter.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, AuditOutcome::Success);
    }

    #[tokio::test]
    async fn failure_skips_heavier_actions_and_preserves_state() {
        let log = shared_log();
        let h = harness(publish_route(vec![
            Action::sync("provision", 0, ScriptedEffect::ok("provision", log.clone())),
            Action::sync("verify", 10, ScriptedEffect::failing("verify", log.clone())),
            Action::sync("announce", 20, ScriptedEffect::ok("announce", log.clone())),
        ]));

        let err = h.coordinator.fire("s1", TestEvent::Publish, ()).await.unwrap_err();
        match err {
            TransitionError::ActionFailed { action, .. } => assert_eq!(action, "verify"),
            other => panic!("expected ActionFailed, got {other:?}"),
        }
        assert_eq!(*log.lock().unwrap(), vec!["provision", "verify"]);
        assert_eq!(h.store.load("s1").await.unwrap(), None);

        let records = h.emitter.records().await;
        assert_eq!(records[0].outcome, AuditOutcome::Failure);
        assert!(records[0].detail.as_deref().unwrap().contains("verify"));
    }

    #[tokio::test]
    async fn async_timeout_aborts_like_a_sync_failure() {
        let log = shared_log();
        let budget = Duration::from_millis(20);
        let h = harness(publish_route(vec![
            Action::asynchronous(
                "probe",
                0,
                budget,
                ScriptedEffect::slow("probe", log.clone(), Duration::from_secs(10)),
            ),
            Action::sync("announce", 10, ScriptedEffect::ok("announce", log.clone())),
        ]));

        let err = h.coordinator.fire("s1", TestEvent::Publish, ()).await.unwrap_err();
        assert!(matches!(
            err,
            TransitionError::ActionFailed {
                action: "probe",
                reason: ActionFailureReason::Timeout { .. },
            }
        ));
        assert_eq!(h.store.load("s1").await.unwrap(), None);
        // The heavier action never started.
        assert_eq!(*log.lock().unwrap(), vec!["probe"]);
    }

    #[tokio::test]
    async fn best_effort_failure_continues_and_succeeds() {
        let log = shared_log();
        let h = harness(publish_route(vec![
            Action::sync("provision", 0, ScriptedEffect::ok("provision", log.clone())),
            Action::sync("notify", 10, ScriptedEffect::failing("notify", log.clone()))
                .best_effort(),
        ]));

        let state = h.coordinator.fire("s1", TestEvent::Publish, ()).await.unwrap();
        assert_eq!(state, TestState::Live);
        assert_eq!(h.emitter.records().await[0].outcome, AuditOutcome::Success);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn same_subject_fires_are_serialized() {
        let log = shared_log();
        // Self-loop so both concurrent fires resolve a valid transition.
        let table = TransitionTable::builder()
            .route(
                TestState::Draft,
                TestEvent::Publish,
                TestState::Draft,
                vec![
                    Action::sync(
                        "first",
                        0,
                        ScriptedEffect::slow("first", log.clone(), Duration::from_millis(30)),
                    ),
                    Action::sync(
                        "second",
                        10,
                        ScriptedEffect::slow("second", log.clone(), Duration::from_millis(30)),
                    ),
                ],
            )
            .build()
            .unwrap();
        let h = harness(table);

        let a = {
            let c = h.coordinator.clone();
            tokio::spawn(async move { c.fire("s1", TestEvent::Publish, ()).await })
        };
        let b = {
            let c = h.coordinator.clone();
            tokio::spawn(async move { c.fire("s1", TestEvent::Publish, ()).await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        // One full action sequence completes before the other begins.
        assert_eq!(
            *log.lock().unwrap(),
            vec!["first", "second", "first", "second"]
        );
    }

    /// Effect that succeeds on the first call and reports a conflict on
    /// retries, the shape of an external create whose first attempt landed.
    struct CreateOnce {
        calls: AtomicU32,
        log: EffectLog,
    }

    #[async_trait]
    impl ActionEffect<TestMachine> for CreateOnce {
        async fn apply(&self, _ctx: &ExecutionContext<TestMachine>) -> Result<(), EffectError> {
            self.log.lock().unwrap().push("create");
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(())
            } else {
                Err(EffectError::AlreadySatisfied("connector exists".into()))
            }
        }
    }

    /// Effect that fails on the first call and succeeds on retries.
    struct FlakyAnnounce {
        calls: AtomicU32,
        log: EffectLog,
    }

    #[async_trait]
    impl ActionEffect<TestMachine> for FlakyAnnounce {
        async fn apply(&self, _ctx: &ExecutionContext<TestMachine>) -> Result<(), EffectError> {
            self.log.lock().unwrap().push("announce");
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(EffectError::Failed("transient outage".into()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn refire_after_partial_failure_converges() {
        let log = shared_log();
        let h = harness(publish_route(vec![
            Action::sync(
                "create",
                0,
                Arc::new(CreateOnce {
                    calls: AtomicU32::new(0),
                    log: log.clone(),
                }),
            ),
            Action::sync(
                "announce",
                10,
                Arc::new(FlakyAnnounce {
                    calls: AtomicU32::new(0),
                    log: log.clone(),
                }),
            ),
        ]));

        // First fire: create lands externally, announce fails, state stays put.
        let err = h.coordinator.fire("s1", TestEvent::Publish, ()).await.unwrap_err();
        assert!(matches!(err, TransitionError::ActionFailed { action: "announce", .. }));
        assert_eq!(h.store.load("s1").await.unwrap(), None);

        // Retry: create reports conflict (absorbed), announce succeeds.
        let state = h.coordinator.fire("s1", TestEvent::Publish, ()).await.unwrap();
        assert_eq!(state, TestState::Live);
        assert_eq!(h.store.load("s1").await.unwrap(), Some(TestState::Live));
    }

    #[tokio::test]
    async fn terminal_subject_rejects_further_events() {
        let h = harness(publish_route(vec![]));
        h.store.save("s1", TestState::Closed).await.unwrap();

        let err = h.coordinator.fire("s1", TestEvent::Publish, ()).await.unwrap_err();
        assert!(matches!(err, TransitionError::SubjectRetired { .. }));
        assert_eq!(h.store.load("s1").await.unwrap(), Some(TestState::Closed));
        assert_eq!(h.emitter.records().await[0].outcome, AuditOutcome::Failure);
    }

    /// Store whose writes always fail; reads come from the seed path.
    struct ReadOnlyStore;

    #[async_trait]
    impl StateStore<TestMachine> for ReadOnlyStore {
        async fn load(&self, _subject_id: &str) -> Result<Option<TestState>, StoreError> {
            Ok(Some(TestState::Draft))
        }

        async fn save(&self, _subject_id: &str, _state: TestState) -> Result<(), StoreError> {
            Err(StoreError::Backend("disk full".into()))
        }

        async fn subjects(&self) -> Result<Vec<String>, StoreError> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn persistence_failure_is_a_distinct_error() {
        let log = shared_log();
        let table = publish_route(vec![Action::sync(
            "provision",
            0,
            ScriptedEffect::ok("provision", log.clone()),
        )]);
        let emitter = Arc::new(MemoryEmitter::new());
        let coordinator = TransitionCoordinator::new(
            Arc::new(table),
            Arc::new(ReadOnlyStore),
            emitter.clone(),
            ActionExecutor::new(4),
        );

        let err = coordinator.fire("s1", TestEvent::Publish, ()).await.unwrap_err();
        assert!(matches!(err, TransitionError::Persistence { .. }));
        // The action did run before the write failed.
        assert_eq!(*log.lock().unwrap(), vec!["provision"]);
        assert!(
            emitter.records().await[0]
                .detail
                .as_deref()
                .unwrap()
                .contains("persistence failed")
        );
    }

    #[tokio::test]
    async fn facade_fires_and_reads_current_state() {
        let h = harness(publish_route(vec![]));
        let machine = StateMachine::new("s1", h.coordinator.clone());

        assert_eq!(machine.current().await.unwrap(), TestState::Draft);
        let state = machine.fire(TestEvent::Publish, ()).await.unwrap();
        assert_eq!(state, TestState::Live);
        assert_eq!(machine.current().await.unwrap(), TestState::Live);
    }
}
