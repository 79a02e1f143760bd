use std::collections::HashMap;

use thiserror::Error;

use super::MachineSpec;
use super::action::Action;

/// A registered transition: target state plus its ordered action list.
pub struct Transition<M: MachineSpec> {
    to: M::State,
    actions: Vec<Action<M>>,
}

impl<M: MachineSpec> Transition<M> {
    pub fn to(&self) -> M::State {
        self.to
    }

    /// Actions in ascending weight order. Equal weights keep their
    /// declaration order (the sort is stable).
    pub fn actions(&self) -> &[Action<M>] {
        &self.actions
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    /// At most one transition may be registered per `(state, event)` pair.
    #[error("duplicate route from {from} on {event}")]
    DuplicateRoute { from: String, event: String },
}

/// Static `(currentState, event) → (nextState, actions)` mapping for one
/// machine type. Built once at startup, then shared read-only.
pub struct TransitionTable<M: MachineSpec> {
    routes: HashMap<(M::State, M::Event), Transition<M>>,
}

impl<M: MachineSpec> TransitionTable<M> {
    pub fn builder() -> TransitionTableBuilder<M> {
        TransitionTableBuilder { routes: Vec::new() }
    }

    /// Pure lookup, no side effects. A `None` is a hard error for the
    /// caller; the engine never treats an undefined transition as a no-op.
    pub fn resolve(&self, from: M::State, event: M::Event) -> Option<&Transition<M>> {
        self.routes.get(&(from, event))
    }
}

pub struct TransitionTableBuilder<M: MachineSpec> {
    routes: Vec<((M::State, M::Event), Transition<M>)>,
}

impl<M: MachineSpec> TransitionTableBuilder<M> {
    /// Registers a transition. Actions are sorted by ascending weight here,
    /// so the table never re-sorts at fire time.
    pub fn route(
        mut self,
        from: M::State,
        event: M::Event,
        to: M::State,
        mut actions: Vec<Action<M>>,
    ) -> Self {
        actions.sort_by_key(Action::weight);
        self.routes.push(((from, event), Transition { to, actions }));
        self
    }

    pub fn build(self) -> Result<TransitionTable<M>, TableError> {
        let mut routes = HashMap::with_capacity(self.routes.len());
        for ((from, event), transition) in self.routes {
            if routes.insert((from, event), transition).is_some() {
                return Err(TableError::DuplicateRoute {
                    from: from.to_string(),
                    event: event.to_string(),
                });
            }
        }
        Ok(TransitionTable { routes })
    }
}
