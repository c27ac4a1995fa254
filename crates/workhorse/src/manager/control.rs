//! Shared control block and the external handle onto it

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

use super::lifecycle::{LifecycleState, StateCell};
use super::stats::{StatsSnapshot, WorkerStats};
use crate::client::ControlSignal;

/// Lifecycle transition requested of the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleCommand {
    Quiet,
    Terminate,
}

impl From<ControlSignal> for LifecycleCommand {
    fn from(signal: ControlSignal) -> Self {
        match signal {
            ControlSignal::Quiet => Self::Quiet,
            ControlSignal::Terminate => Self::Terminate,
        }
    }
}

/// State shared between the manager, its units, and every handle
#[derive(Debug)]
pub(crate) struct Control {
    pub(crate) state: StateCell,
    /// Raised once, when termination begins
    pub(crate) shutdown: CancellationToken,
    /// Raised once the pool is closed and every unit has exited
    pub(crate) finished: CancellationToken,
    /// Tracks live worker and heartbeat units
    pub(crate) tracker: TaskTracker,
    pub(crate) stats: WorkerStats,
    commands: mpsc::UnboundedSender<LifecycleCommand>,
}

impl Control {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<LifecycleCommand>) {
        let (commands, rx) = mpsc::unbounded_channel();
        let control = Self {
            state: StateCell::new(),
            shutdown: CancellationToken::new(),
            finished: CancellationToken::new(),
            tracker: TaskTracker::new(),
            stats: WorkerStats::default(),
            commands,
        };
        (control, rx)
    }

    /// Queue a transition without waiting for it
    pub(crate) fn send(&self, command: LifecycleCommand) {
        if self.commands.send(command).is_err() {
            debug!(?command, "Lifecycle coordinator gone, ignoring command");
        }
    }
}

/// Cloneable handle for driving a manager from outside its run loop
///
/// Commands sent before the manager starts are queued and applied as soon
/// as it does.
#[derive(Debug, Clone)]
pub struct ManagerHandle {
    pub(crate) control: std::sync::Arc<Control>,
}

impl ManagerHandle {
    /// Ask the manager to stop fetching new jobs
    pub fn quiet(&self) {
        self.control.send(LifecycleCommand::Quiet);
    }

    /// Ask the manager to terminate without waiting for it
    pub fn request_terminate(&self) {
        self.control.send(LifecycleCommand::Terminate);
    }

    /// Terminate and wait until every unit has drained and the pool is closed
    pub async fn terminate(&self) {
        self.request_terminate();
        self.wait_terminated().await;
    }

    pub async fn wait_terminated(&self) {
        self.control.finished.cancelled().await;
    }

    pub fn is_terminated(&self) -> bool {
        self.control.finished.is_cancelled()
    }

    pub fn state(&self) -> LifecycleState {
        self.control.state.load()
    }

    /// Worker and heartbeat units still running
    pub fn active_units(&self) -> usize {
        self.control.tracker.len()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.control.stats.snapshot()
    }
}
