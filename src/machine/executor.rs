use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::time::timeout;

use super::MachineSpec;
use super::action::{Action, ExecMode, ExecutionContext};
use super::error::{ActionFailureReason, EffectError};

/// What the executor reports back to the coordinator for one action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Success,
    /// The external system was already in the desired shape. Treated as
    /// success so duplicate triggers converge instead of failing.
    ConflictAsSuccess { detail: String },
    Failure(ActionFailureReason),
}

/// Runs one action and classifies its result.
///
/// Asynchronous actions are dispatched as spawned tasks gated by a bounded
/// pool; the executor waits up to the action's timeout budget and then stops
/// waiting. The underlying side effect is left to run to completion, not
/// cancelled. Synchronous actions run inline with no engine-side timeout;
/// their effects are trusted to carry their own transport timeouts.
pub struct ActionExecutor {
    async_pool: Arc<Semaphore>,
}

impl ActionExecutor {
    pub fn new(max_concurrent_async: usize) -> Self {
        Self {
            async_pool: Arc::new(Semaphore::new(max_concurrent_async)),
        }
    }

    pub async fn run<M: MachineSpec>(
        &self,
        action: &Action<M>,
        ctx: &ExecutionContext<M>,
    ) -> ActionOutcome {
        match action.mode() {
            ExecMode::Sync => classify(action.effect().apply(ctx).await),
            ExecMode::Async { timeout: budget } => {
                let permit = match self.async_pool.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return ActionOutcome::Failure(ActionFailureReason::Effect(
                            "async action pool is closed".into(),
                        ));
                    }
                };
                let effect = action.effect();
                let task_ctx = ctx.clone();
                let handle = tokio::spawn(async move {
                    let _permit = permit;
                    effect.apply(&task_ctx).await
                });
                match timeout(budget, handle).await {
                    Err(_) => ActionOutcome::Failure(ActionFailureReason::Timeout { budget }),
                    Ok(Err(join_error)) => ActionOutcome::Failure(ActionFailureReason::Effect(
                        format!("action task failed: {join_error}"),
                    )),
                    Ok(Ok(result)) => classify(result),
                }
            }
        }
    }
}

fn classify(result: Result<(), EffectError>) -> ActionOutcome {
    match result {
        Ok(()) => ActionOutcome::Success,
        Err(EffectError::AlreadySatisfied(detail)) => ActionOutcome::ConflictAsSuccess { detail },
        Err(EffectError::Failed(message)) => {
            ActionOutcome::Failure(ActionFailureReason::Effect(message))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::super::testkit::{ScriptedEffect, TestEvent, TestMachine, TestState, shared_log};
    use super::*;

    fn ctx() -> ExecutionContext<TestMachine> {
        ExecutionContext {
            subject_id: "subject-1".into(),
            from: TestState::Draft,
            to: TestState::Live,
            event: TestEvent::Publish,
            payload: (),
        }
    }

    #[tokio::test]
    async fn sync_success() {
        let executor = ActionExecutor::new(4);
        let action = Action::sync("apply", 0, ScriptedEffect::ok("apply", shared_log()));

        let outcome = executor.run(&action, &ctx()).await;
        assert_eq!(outcome, ActionOutcome::Success);
    }

    #[tokio::test]
    async fn sync_conflict_classified_as_success_variant() {
        let executor = ActionExecutor::new(4);
        let action = Action::sync("apply", 0, ScriptedEffect::conflict("apply", shared_log()));

        let outcome = executor.run(&action, &ctx()).await;
        assert!(matches!(outcome, ActionOutcome::ConflictAsSuccess { .. }));
    }

    #[tokio::test]
    async fn sync_effect_failure() {
        let executor = ActionExecutor::new(4);
        let action = Action::sync("apply", 0, ScriptedEffect::failing("apply", shared_log()));

        let outcome = executor.run(&action, &ctx()).await;
        assert!(matches!(
            outcome,
            ActionOutcome::Failure(ActionFailureReason::Effect(_))
        ));
    }

    #[tokio::test]
    async fn async_completes_within_budget() {
        let executor = ActionExecutor::new(4);
        let action = Action::asynchronous(
            "probe",
            0,
            Duration::from_secs(5),
            ScriptedEffect::slow("probe", shared_log(), Duration::from_millis(10)),
        );

        let outcome = executor.run(&action, &ctx()).await;
        assert_eq!(outcome, ActionOutcome::Success);
    }

    #[tokio::test]
    async fn async_exceeding_budget_is_timeout_failure() {
        let executor = ActionExecutor::new(4);
        let budget = Duration::from_millis(20);
        let action = Action::asynchronous(
            "probe",
            0,
            budget,
            ScriptedEffect::slow("probe", shared_log(), Duration::from_secs(10)),
        );

        let outcome = executor.run(&action, &ctx()).await;
        assert_eq!(
            outcome,
            ActionOutcome::Failure(ActionFailureReason::Timeout { budget })
        );
    }

    #[tokio::test]
    async fn timed_out_effect_still_ran() {
        let executor = ActionExecutor::new(4);
        let log = shared_log();
        let action = Action::asynchronous(
            "probe",
            0,
            Duration::from_millis(20),
            ScriptedEffect::slow("probe", log.clone(), Duration::from_secs(10)),
        );

        let _ = executor.run(&action, &ctx()).await;
        // The effect was invoked before the executor stopped waiting.
        assert_eq!(*log.lock().unwrap(), vec!["probe"]);
    }
}
