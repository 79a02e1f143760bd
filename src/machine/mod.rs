//! The generic lifecycle orchestration engine.
//!
//! A machine type is described by a [`MachineSpec`]: closed state and event
//! enumerations, a payload DTO, a seed state, and its terminal states. The
//! engine itself is machine-agnostic; the connector and approval machines in
//! this crate are two instantiations of the same [`TransitionTable`] /
//! [`TransitionCoordinator`] / [`ActionExecutor`] stack.

mod action;
mod audit;
mod coordinator;
mod error;
mod executor;
mod store;
mod table;
#[cfg(test)]
pub(crate) mod testkit;

pub use action::{Action, ActionEffect, Criticality, ExecMode, ExecutionContext};
pub use audit::{AuditOutcome, AuditRecord, EventEmitter, LogEmitter, MemoryEmitter};
pub use coordinator::{StateMachine, TransitionCoordinator};
pub use error::{ActionFailureReason, EffectError, TransitionError};
pub use executor::{ActionExecutor, ActionOutcome};
pub use store::{JsonFileStateStore, MemoryStateStore, StateStore, StoreError};
pub use table::{TableError, Transition, TransitionTable, TransitionTableBuilder};

use std::fmt;
use std::hash::Hash;

/// Static description of one machine type: its state and event alphabets,
/// the payload its events carry, and the lifecycle boundaries.
pub trait MachineSpec: Send + Sync + 'static {
    /// Closed state enumeration. Copied freely; displayed in audit records.
    type State: Copy + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync;
    /// Closed event enumeration.
    type Event: Copy + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync;
    /// Subject-specific DTO carried by every fired event.
    type Payload: Clone + Send + Sync;

    /// Machine type name used in audit records and logs.
    const NAME: &'static str;

    /// State assigned implicitly when a subject first enters the machine.
    fn seed() -> Self::State;

    /// Terminal states retire the subject; further events are rejected.
    fn is_terminal(state: Self::State) -> bool;
}
