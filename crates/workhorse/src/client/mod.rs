//! Queue client seam
//!
//! The manager never speaks the queue server's wire protocol itself. It
//! depends on four operations (`fetch`, `ack`, `fail`, `beat`) plus the
//! ability to open and close connections. Any implementation of
//! [`Connector`] / [`QueueClient`] is substitutable; [`InMemoryQueue`] is
//! the one shipped for tests and demos.

mod memory;

use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::job::{Job, JobFailure};

pub use memory::{InMemoryClient, InMemoryQueue};

/// Errors raised by a queue client
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClientError {
    /// Transport-level failure (connect, read, write)
    #[error("connection error: {0}")]
    Connection(String),

    /// The server answered with something the client did not understand
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server rejected the request
    #[error("server error: {0}")]
    Server(String),

    /// The connection was already closed
    #[error("connection closed")]
    Closed,
}

impl ClientError {
    /// Whether the connection that produced this error should be discarded
    /// instead of going back to the pool
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Closed)
    }
}

/// Remote control signal returned by the server on heartbeat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlSignal {
    /// Stop fetching new jobs
    Quiet,
    /// Shut the process down
    Terminate,
}

impl ControlSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quiet => "quiet",
            Self::Terminate => "terminate",
        }
    }
}

impl FromStr for ControlSignal {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "quiet" => Ok(Self::Quiet),
            "terminate" => Ok(Self::Terminate),
            other => Err(ClientError::Protocol(format!(
                "unknown control signal: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for ControlSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity this process presents to the server on every connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerIdentity {
    /// Random per-process worker id; marks every connection as a worker connection
    pub wid: String,

    /// OS process id
    pub pid: u32,

    /// Free-form labels shown by the server
    pub labels: Vec<String>,
}

/// A resource the pool can close when it is retired
#[async_trait]
pub trait Closeable: Send + 'static {
    async fn close(&mut self) -> Result<(), ClientError>;
}

/// One open connection to the queue server
#[async_trait]
pub trait QueueClient: Closeable {
    /// Fetch the next job from the given queues, in priority order
    ///
    /// Implementations are expected to block server-side until a job is
    /// available or a server timeout elapses, returning `Ok(None)` in the
    /// latter case.
    async fn fetch(&mut self, queues: &[String]) -> Result<Option<Job>, ClientError>;

    /// Acknowledge successful processing
    async fn ack(&mut self, jid: &str) -> Result<(), ClientError>;

    /// Report a failed job
    async fn fail(&mut self, jid: &str, failure: &JobFailure) -> Result<(), ClientError>;

    /// Report liveness; the server may answer with a control signal
    async fn beat(&mut self) -> Result<Option<ControlSignal>, ClientError>;
}

/// Opens new client connections; used as the pool's factory
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Client: QueueClient;

    async fn open(&self, identity: &WorkerIdentity) -> Result<Self::Client, ClientError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_signal_parse() {
        assert_eq!("quiet".parse::<ControlSignal>(), Ok(ControlSignal::Quiet));
        assert_eq!(
            "terminate".parse::<ControlSignal>(),
            Ok(ControlSignal::Terminate)
        );
        assert!(matches!(
            "reload".parse::<ControlSignal>(),
            Err(ClientError::Protocol(_))
        ));
    }

    #[test]
    fn test_connection_errors_are_discarded() {
        assert!(ClientError::Connection("reset".into()).is_connection_error());
        assert!(ClientError::Closed.is_connection_error());
        assert!(!ClientError::Server("ERR unknown jid".into()).is_connection_error());
    }
}
