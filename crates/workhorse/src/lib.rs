// Worker-side job manager
//
// Runs a fixed number of concurrent worker units that fetch jobs from a
// queue server, dispatch them to registered handlers, and report the
// outcome, plus one heartbeat unit that keeps the worker registered and
// relays server-issued quiet/terminate signals.
//
// Key design decisions:
// - The queue protocol sits behind the Connector/QueueClient traits
// - Connections are shared through a bounded, closeable Pool
// - Lifecycle transitions are serialized through one coordinator task
// - Shutdown is a CancellationToken; outstanding units are a TaskTracker
// - Handlers are async closures keyed by job type; panics become failures
//
//   OS signals ──┐
//   heartbeat ───┼──> coordinator ──> state / hooks / shutdown token
//   handles ─────┘                          │
//                                           v
//   worker units (xN) ── Pool ── QueueClient (fetch / ack / fail / beat)

// Job payloads and failure reports
pub mod job;

// Queue server seam and the in-memory implementation
pub mod client;

// Bounded connection pool
pub mod pool;

pub mod config;
pub mod handler;
pub mod manager;
pub mod signals;
pub mod telemetry;

pub use client::{
    ClientError, Closeable, Connector, ControlSignal, InMemoryClient, InMemoryQueue, QueueClient,
    WorkerIdentity,
};
pub use config::{ConfigError, ManagerConfig};
pub use handler::{HandlerError, HandlerRegistry, HandlerResult, JobContext, JobHandler};
pub use job::{Job, JobFailure};
pub use manager::{
    LifecycleCommand, LifecycleEvent, LifecycleState, Manager, ManagerError, ManagerHandle,
    StatsSnapshot,
};
pub use pool::{Pool, PoolError, PooledConnection};
pub use signals::{ProcessSignal, SignalListener};
