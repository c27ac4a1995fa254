//! Single task that applies lifecycle transitions

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use super::control::{Control, LifecycleCommand};
use super::lifecycle::{EventHooks, LifecycleEvent, LifecycleState};
use crate::client::Closeable;
use crate::pool::Pool;

/// Everything a transition touches
pub(crate) struct Coordinator<C: Closeable> {
    pub(crate) control: Arc<Control>,
    pub(crate) hooks: Arc<EventHooks>,
    pub(crate) pool: Pool<C>,
}

impl<C: Closeable> Coordinator<C> {
    /// Apply commands in arrival order until a terminate completes
    pub(crate) async fn run(self, mut commands: mpsc::UnboundedReceiver<LifecycleCommand>) {
        while let Some(command) = commands.recv().await {
            debug!(?command, "Lifecycle command received");
            match command {
                LifecycleCommand::Quiet => self.quiet(),
                LifecycleCommand::Terminate => {
                    self.terminate().await;
                    break;
                }
            }
        }
    }

    /// Stop new fetches; hooks fire on the first transition only
    pub(crate) fn quiet(&self) {
        if !self.control.state.advance(LifecycleState::Quiet) {
            return;
        }
        info!("Quieting...");
        self.hooks.fire(LifecycleEvent::Quiet);
    }

    /// Raise the shutdown broadcast, drain every unit, close the pool
    ///
    /// `Shutdown` hooks run before the drain, so units may still be
    /// finishing their current job while they execute.
    pub(crate) async fn terminate(&self) {
        if !self.control.state.advance(LifecycleState::Terminated) {
            return;
        }
        info!("Shutting down...");

        self.control.shutdown.cancel();
        self.hooks.fire(LifecycleEvent::Shutdown);

        self.control.tracker.close();
        self.control.tracker.wait().await;

        self.pool.close().await;
        info!(stats = ?self.control.stats.snapshot(), "Goodbye");
        self.control.finished.cancel();
    }
}
