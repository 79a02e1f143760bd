use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::MachineSpec;
use super::error::EffectError;

/// Everything an action may consult while executing. Passed by shared
/// reference; actions read it, never mutate it.
pub struct ExecutionContext<M: MachineSpec> {
    pub subject_id: String,
    pub from: M::State,
    pub to: M::State,
    pub event: M::Event,
    pub payload: M::Payload,
}

impl<M: MachineSpec> Clone for ExecutionContext<M> {
    fn clone(&self) -> Self {
        Self {
            subject_id: self.subject_id.clone(),
            from: self.from,
            to: self.to,
            event: self.event,
            payload: self.payload.clone(),
        }
    }
}

/// The side effect behind an action, injected at table construction.
///
/// Implementations capture their collaborators (cluster client, notifier,
/// approval backend) when built; the context carries only data.
#[async_trait]
pub trait ActionEffect<M: MachineSpec>: Send + Sync {
    async fn apply(&self, ctx: &ExecutionContext<M>) -> Result<(), EffectError>;
}

/// Whether an action runs inline or is dispatched to the async pool with a
/// timeout budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// Runs in the coordinator's task, unbounded from the engine's
    /// perspective. The effect's own transport timeouts apply.
    Sync,
    /// Dispatched as a spawned task; the executor waits up to `timeout`.
    Async { timeout: Duration },
}

/// Whether a failed action aborts the transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criticality {
    /// Failure aborts the remaining actions and fails the transition.
    Fatal,
    /// Failure is logged and the transition continues. Used for
    /// notifications that must not block a lifecycle change.
    BestEffort,
}

/// A named unit of side effect bound to one transition.
pub struct Action<M: MachineSpec> {
    name: &'static str,
    weight: i32,
    mode: ExecMode,
    criticality: Criticality,
    effect: Arc<dyn ActionEffect<M>>,
}

impl<M: MachineSpec> Action<M> {
    /// A synchronous, fatal action.
    pub fn sync(name: &'static str, weight: i32, effect: Arc<dyn ActionEffect<M>>) -> Self {
        Self {
            name,
            weight,
            mode: ExecMode::Sync,
            criticality: Criticality::Fatal,
            effect,
        }
    }

    /// An asynchronous, fatal action with a timeout budget.
    pub fn asynchronous(
        name: &'static str,
        weight: i32,
        timeout: Duration,
        effect: Arc<dyn ActionEffect<M>>,
    ) -> Self {
        Self {
            name,
            weight,
            mode: ExecMode::Async { timeout },
            criticality: Criticality::Fatal,
            effect,
        }
    }

    /// Downgrades the action so its failure no longer fails the transition.
    pub fn best_effort(mut self) -> Self {
        self.criticality = Criticality::BestEffort;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn weight(&self) -> i32 {
        self.weight
    }

    pub fn mode(&self) -> ExecMode {
        self.mode
    }

    pub fn criticality(&self) -> Criticality {
        self.criticality
    }

    pub(crate) fn effect(&self) -> Arc<dyn ActionEffect<M>> {
        Arc::clone(&self.effect)
    }
}

impl<M: MachineSpec> Clone for Action<M> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            weight: self.weight,
            mode: self.mode,
            criticality: self.criticality,
            effect: Arc::clone(&self.effect),
        }
    }
}

impl<M: MachineSpec> fmt::Debug for Action<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("name", &self.name)
            .field("weight", &self.weight)
            .field("mode", &self.mode)
            .field("criticality", &self.criticality)
            .finish_non_exhaustive()
    }
}
