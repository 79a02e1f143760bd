//! Minimal machine and scripted effects shared by the engine's test suites.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::MachineSpec;
use super::action::{ActionEffect, ExecutionContext};
use super::error::EffectError;

pub(crate) struct TestMachine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum TestState {
    Draft,
    Live,
    Closed,
}

impl fmt::Display for TestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestState::Draft => write!(f, "DRAFT"),
            TestState::Live => write!(f, "LIVE"),
            TestState::Closed => write!(f, "CLOSED"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum TestEvent {
    Publish,
    Close,
}

impl fmt::Display for TestEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestEvent::Publish => write!(f, "PUBLISH"),
            TestEvent::Close => write!(f, "CLOSE"),
        }
    }
}

impl MachineSpec for TestMachine {
    type State = TestState;
    type Event = TestEvent;
    type Payload = ();

    const NAME: &'static str = "test";

    fn seed() -> TestState {
        TestState::Draft
    }

    fn is_terminal(state: TestState) -> bool {
        state == TestState::Closed
    }
}

/// Invocation log shared between scripted effects; asserting on it verifies
/// execution order across actions and transitions.
pub(crate) type EffectLog = Arc<Mutex<Vec<&'static str>>>;

pub(crate) fn shared_log() -> EffectLog {
    Arc::new(Mutex::new(Vec::new()))
}

enum Script {
    Succeed,
    Conflict,
    Fail,
}

/// An effect that records its invocation, optionally sleeps, then follows
/// its script.
pub(crate) struct ScriptedEffect {
    label: &'static str,
    log: EffectLog,
    delay: Option<Duration>,
    script: Script,
}

impl ScriptedEffect {
    pub(crate) fn ok(label: &'static str, log: EffectLog) -> Arc<Self> {
        Arc::new(Self {
            label,
            log,
            delay: None,
            script: Script::Succeed,
        })
    }

    pub(crate) fn conflict(label: &'static str, log: EffectLog) -> Arc<Self> {
        Arc::new(Self {
            label,
            log,
            delay: None,
            script: Script::Conflict,
        })
    }

    pub(crate) fn failing(label: &'static str, log: EffectLog) -> Arc<Self> {
        Arc::new(Self {
            label,
            log,
            delay: None,
            script: Script::Fail,
        })
    }

    pub(crate) fn slow(label: &'static str, log: EffectLog, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            label,
            log,
            delay: Some(delay),
            script: Script::Succeed,
        })
    }
}

#[async_trait]
impl ActionEffect<TestMachine> for ScriptedEffect {
    async fn apply(&self, _ctx: &ExecutionContext<TestMachine>) -> Result<(), EffectError> {
        self.log.lock().unwrap().push(self.label);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.script {
            Script::Succeed => Ok(()),
            Script::Conflict => Err(EffectError::AlreadySatisfied(format!(
                "{} already applied",
                self.label
            ))),
            Script::Fail => Err(EffectError::Failed(format!("{} refused", self.label))),
        }
    }
}
