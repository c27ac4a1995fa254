//! Lifecycle state and event hooks

use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

/// Manager lifecycle state
///
/// Only ever moves forward: `Running → Quiet → Terminated`, or straight
/// from `Running` to `Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum LifecycleState {
    /// Fetching and processing jobs
    Running = 0,
    /// No new fetches; in-flight jobs finish
    Quiet = 1,
    /// Shutting down or shut down
    Terminated = 2,
}

impl LifecycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Running,
            1 => Self::Quiet,
            _ => Self::Terminated,
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Quiet => write!(f, "quiet"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// Atomically updated lifecycle state shared by every unit
///
/// Writes use `AcqRel`, reads `Acquire`, so a unit that observes a state
/// also observes everything written before the transition.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(LifecycleState::Running as u8))
    }

    pub fn load(&self) -> LifecycleState {
        LifecycleState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move forward to `to`; returns `true` only for the caller that made the transition
    pub fn advance(&self, to: LifecycleState) -> bool {
        let previous = self.0.fetch_max(to as u8, Ordering::AcqRel);
        previous < to as u8
    }

    pub fn is_running(&self) -> bool {
        self.load() == LifecycleState::Running
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle events hooks can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// Fired by `run` before any unit starts
    Startup,
    /// Fired when the manager goes quiet
    Quiet,
    /// Fired when termination begins, before units have drained
    Shutdown,
}

impl LifecycleEvent {
    const ALL: [LifecycleEvent; 3] = [Self::Startup, Self::Quiet, Self::Shutdown];

    fn index(self) -> usize {
        match self {
            Self::Startup => 0,
            Self::Quiet => 1,
            Self::Shutdown => 2,
        }
    }
}

/// Zero-argument lifecycle callback
pub type Hook = Box<dyn Fn() + Send + Sync>;

/// Ordered callbacks per lifecycle event
///
/// Filled in before the manager starts; read-only once it runs.
#[derive(Default)]
pub struct EventHooks {
    hooks: [Vec<Hook>; 3],
}

impl EventHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a callback for `event`
    pub fn on<F>(&mut self, event: LifecycleEvent, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.hooks[event.index()].push(Box::new(hook));
    }

    /// Run every callback for `event`, in registration order
    pub fn fire(&self, event: LifecycleEvent) {
        for hook in &self.hooks[event.index()] {
            hook();
        }
    }

    pub fn count(&self, event: LifecycleEvent) -> usize {
        self.hooks[event.index()].len()
    }
}

impl std::fmt::Debug for EventHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for event in LifecycleEvent::ALL {
            map.entry(&event, &self.count(event));
        }
        map.finish()
    }
}
