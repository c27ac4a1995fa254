//! Worker-side job manager
//!
//! A [`Manager`] owns the connection pool, the handler registry, and the
//! lifecycle of one worker process. Once started it runs:
//!
//! - `concurrency` worker units, each looping fetch → dispatch → report
//! - one heartbeat unit relaying server-issued control signals
//! - one coordinator applying `Quiet`/`Terminate` in arrival order
//!
//! Every lifecycle trigger (OS signal, heartbeat response, or a
//! [`ManagerHandle`]) goes through the coordinator's channel, so
//! termination runs exactly once no matter how many triggers race.

mod control;
mod coordinator;
mod heartbeat;
mod lifecycle;
mod stats;
mod worker;

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{error, info, instrument};

pub use control::{LifecycleCommand, ManagerHandle};
pub use lifecycle::{EventHooks, LifecycleEvent, LifecycleState};
pub use stats::StatsSnapshot;

use crate::client::Connector;
use crate::config::{ConfigError, ManagerConfig};
use crate::handler::{HandlerRegistry, HandlerResult, JobContext};
use crate::pool::{Pool, PoolError};
use crate::signals::SignalListener;
use control::Control;
use coordinator::Coordinator;
use heartbeat::HeartbeatUnit;
use worker::{WorkerSettings, WorkerUnit};

/// Manager errors
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("failed to install signal handlers: {0}")]
    Signal(#[source] std::io::Error),
}

/// Worker-side job manager
///
/// Configure it, register handlers and hooks, then call [`run`](Self::run)
/// (or [`start`](Self::start) to drive it yourself).
pub struct Manager<K: Connector> {
    config: ManagerConfig,
    connector: Arc<K>,
    pool: Option<Pool<K::Client>>,
    handlers: HandlerRegistry,
    hooks: EventHooks,
    control: Arc<Control>,
    commands: mpsc::UnboundedReceiver<LifecycleCommand>,
}

impl<K: Connector> Manager<K> {
    pub fn new(connector: K, config: ManagerConfig) -> Self {
        let (control, commands) = Control::new();
        Self {
            config,
            connector: Arc::new(connector),
            pool: None,
            handlers: HandlerRegistry::new(),
            hooks: EventHooks::new(),
            control: Arc::new(control),
            commands,
        }
    }

    /// Use a caller-built pool instead of one opened from the connector
    pub fn with_pool(mut self, pool: Pool<K::Client>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Register the handler for `job_type`, replacing any previous one
    pub fn register<F, Fut>(&mut self, job_type: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(JobContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.handlers.register(job_type, handler);
        self
    }

    /// Append a lifecycle hook
    pub fn on<F>(&mut self, event: LifecycleEvent, hook: F) -> &mut Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.hooks.on(event, hook);
        self
    }

    pub fn handle(&self) -> ManagerHandle {
        ManagerHandle {
            control: Arc::clone(&self.control),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    /// Start every unit and return without waiting
    ///
    /// Fires `Startup` hooks, then spawns the heartbeat unit, `concurrency`
    /// worker units and finally the coordinator. Must be called inside a
    /// Tokio runtime.
    #[instrument(skip_all, fields(wid = %self.config.worker_id))]
    pub fn start(self) -> Result<ManagerHandle, ManagerError> {
        self.config.validate()?;

        let Self {
            config,
            connector,
            pool,
            handlers,
            hooks,
            control,
            commands,
        } = self;

        let pool = match pool {
            Some(pool) => pool,
            None => connector_pool(connector, &config)?,
        };

        info!(
            concurrency = config.concurrency,
            queues = ?config.queues,
            pool_capacity = pool.capacity(),
            job_types = ?handlers.job_types(),
            "Starting manager"
        );
        hooks.fire(LifecycleEvent::Startup);

        let hooks = Arc::new(hooks);
        let handlers = Arc::new(handlers);

        control.tracker.spawn(
            HeartbeatUnit {
                pool: pool.clone(),
                control: Arc::clone(&control),
                interval: config.heartbeat_interval,
            }
            .run(),
        );

        let settings = WorkerSettings {
            queues: config.queues.clone().into(),
            fetch_error_delay: config.fetch_error_delay,
            startup_jitter: config.startup_jitter,
        };
        for index in 0..config.concurrency {
            control.tracker.spawn(
                WorkerUnit {
                    index,
                    pool: pool.clone(),
                    handlers: Arc::clone(&handlers),
                    control: Arc::clone(&control),
                    settings: settings.clone(),
                }
                .run(),
            );
        }

        // Every unit is tracked before a queued terminate can start draining
        tokio::spawn(
            Coordinator {
                control: Arc::clone(&control),
                hooks,
                pool,
            }
            .run(commands),
        );

        Ok(ManagerHandle { control })
    }

    /// Start, then translate OS signals into lifecycle transitions until
    /// termination has fully drained
    pub async fn run_until_terminated(self) -> Result<(), ManagerError> {
        let mut signals = SignalListener::new().map_err(ManagerError::Signal)?;
        let handle = self.start()?;

        loop {
            tokio::select! {
                _ = handle.wait_terminated() => break,
                signal = signals.recv() => match signal {
                    Some(signal) => {
                        info!(%signal, "Received signal");
                        handle.control.send(signal.route());
                    }
                    None => {
                        // Signal streams closed; only handles can stop us now
                        handle.wait_terminated().await;
                        break;
                    }
                },
            }
        }
        Ok(())
    }

    /// Run until terminated, then exit the process
    ///
    /// Exits with status 0 after a clean drain and 1 if the manager could
    /// not start. Never returns.
    pub async fn run(self) {
        match self.run_until_terminated().await {
            Ok(()) => std::process::exit(0),
            Err(e) => {
                error!(error = %e, "Manager failed");
                std::process::exit(1);
            }
        }
    }
}

/// Pool that opens one connection per factory call through `connector`
fn connector_pool<K: Connector>(
    connector: Arc<K>,
    config: &ManagerConfig,
) -> Result<Pool<K::Client>, PoolError> {
    let identity = Arc::new(config.identity());
    Pool::from_fn(config.effective_pool_capacity(), move || {
        let connector = Arc::clone(&connector);
        let identity = Arc::clone(&identity);
        async move { connector.open(&identity).await }
    })
}

impl<K: Connector> std::fmt::Debug for Manager<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("config", &self.config)
            .field("handlers", &self.handlers)
            .field("hooks", &self.hooks)
            .field("state", &self.control.state.load())
            .finish_non_exhaustive()
    }
}
