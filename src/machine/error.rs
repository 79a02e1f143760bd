use std::time::Duration;

use thiserror::Error;

use super::store::StoreError;

/// How an effect reports its result to the executor.
///
/// Effects translate their adapter's transport errors into one of these two
/// variants at the boundary; the engine never sees status codes or wire
/// errors directly.
#[derive(Debug, Error)]
pub enum EffectError {
    /// The external system is already in the shape this effect would have
    /// produced. A duplicate-trigger symptom, absorbed as success.
    #[error("already satisfied: {0}")]
    AlreadySatisfied(String),

    /// The effect did not complete.
    #[error("{0}")]
    Failed(String),
}

/// Why an action was classified as failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionFailureReason {
    /// An async action exceeded its timeout budget. The underlying side
    /// effect may still complete; only the wait was abandoned.
    #[error("timed out after {budget:?}")]
    Timeout { budget: Duration },

    /// The effect itself reported a failure.
    #[error("{0}")]
    Effect(String),
}

/// Typed failures surfaced by [`TransitionCoordinator::fire`](super::TransitionCoordinator::fire).
///
/// In every variant except `Persistence` the subject's persisted state is
/// unchanged. Retry policy is the caller's responsibility.
#[derive(Debug, Error)]
pub enum TransitionError {
    /// No transition registered for the subject's current state and the
    /// fired event. Callers must re-check current state before retrying;
    /// the same event will keep failing until the state moves.
    #[error("no transition from {from} on {event}")]
    InvalidTransition { from: String, event: String },

    /// The subject reached a terminal state and no longer accepts events.
    #[error("subject {subject_id} is retired in terminal state {state}")]
    SubjectRetired { subject_id: String, state: String },

    /// An action's effect did not complete; remaining actions were skipped.
    #[error("action {action} failed: {reason}")]
    ActionFailed {
        action: &'static str,
        reason: ActionFailureReason,
    },

    /// The final state write failed after every action succeeded. External
    /// effects happened but durable state did not advance. This needs
    /// reconciliation, not a blind retry.
    #[error("state write for {subject_id} failed after actions completed: {source}")]
    Persistence {
        subject_id: String,
        #[source]
        source: StoreError,
    },

    /// The initial state read failed; nothing was executed.
    #[error("state read failed: {0}")]
    Store(#[from] StoreError),
}
