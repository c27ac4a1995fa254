//! Job and failure payloads exchanged with the queue client

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default queue name used when a job does not specify one
pub const DEFAULT_QUEUE: &str = "default";

/// A unit of work fetched from the remote queue
///
/// Jobs are produced by the queue client on fetch and consumed exactly once
/// by a single worker unit. The core only looks at the id, the type name and
/// the argument list; everything else is carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Globally unique job id
    pub jid: String,

    /// Type name used to look up the handler
    #[serde(rename = "jobtype")]
    pub job_type: String,

    /// Positional arguments handed to the handler
    #[serde(default)]
    pub args: Vec<serde_json::Value>,

    /// Queue the job was pushed to
    #[serde(default = "default_queue")]
    pub queue: String,

    /// When the job was created by the producer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

fn default_queue() -> String {
    DEFAULT_QUEUE.to_string()
}

impl Job {
    /// Create a job with a fresh id on the default queue
    pub fn new(job_type: impl Into<String>, args: Vec<serde_json::Value>) -> Self {
        Self {
            jid: Uuid::now_v7().simple().to_string(),
            job_type: job_type.into(),
            args,
            queue: default_queue(),
            created_at: Some(Utc::now()),
        }
    }

    /// Override the generated job id
    pub fn with_jid(mut self, jid: impl Into<String>) -> Self {
        self.jid = jid.into();
        self
    }

    /// Target a specific queue
    pub fn on_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }
}

/// Failure details reported to the server through `fail`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFailure {
    /// Error class, e.g. `HandlerError` or `UnknownJobType`
    #[serde(rename = "errtype")]
    pub error_type: String,

    /// Human readable message
    pub message: String,

    /// Optional backtrace lines
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backtrace: Option<Vec<String>>,
}

impl JobFailure {
    pub const UNKNOWN_JOB_TYPE: &'static str = "UnknownJobType";
    pub const HANDLER_ERROR: &'static str = "HandlerError";
    pub const HANDLER_PANIC: &'static str = "HandlerPanic";

    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
            backtrace: None,
        }
    }

    /// Failure reported when no handler is registered for a job type
    pub fn unknown_job_type(job_type: &str) -> Self {
        Self::new(Self::UNKNOWN_JOB_TYPE, format!("no handler for {job_type}"))
    }

    pub fn with_backtrace(mut self, lines: Vec<String>) -> Self {
        self.backtrace = Some(lines);
        self
    }
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_type, self.message)
    }
}
