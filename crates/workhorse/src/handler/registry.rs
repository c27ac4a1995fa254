//! Handler table keyed by job type

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::JobContext;
use crate::job::JobFailure;

/// Error returned by a handler
///
/// Reported to the server as the job's failure. The core never retries;
/// retry policy belongs to the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HandlerError {
    /// Error message
    pub message: String,

    /// Error class reported to the server
    pub error_type: Option<String>,

    /// Backtrace or cause chain, outermost first
    pub backtrace: Option<Vec<String>>,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            backtrace: None,
        }
    }

    /// Set the error class
    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    pub fn with_backtrace(mut self, lines: Vec<String>) -> Self {
        self.backtrace = Some(lines);
        self
    }

    /// Convert into the failure payload sent with `fail`
    pub fn into_failure(self) -> JobFailure {
        JobFailure {
            error_type: self
                .error_type
                .unwrap_or_else(|| JobFailure::HANDLER_ERROR.to_string()),
            message: self.message,
            backtrace: self.backtrace,
        }
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for HandlerError {}

impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        let causes: Vec<String> = err.chain().skip(1).map(ToString::to_string).collect();
        let error = Self::new(err.to_string());
        if causes.is_empty() {
            error
        } else {
            error.with_backtrace(causes)
        }
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Handler execution result
pub type HandlerResult = Result<(), HandlerError>;

/// Type-erased job handler
pub type JobHandler =
    Arc<dyn Fn(JobContext, Vec<Value>) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Handlers keyed by job type name
///
/// Populated before the manager starts and read-only afterwards.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, JobHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for `job_type`
    pub fn register<F, Fut>(&mut self, job_type: impl Into<String>, handler: F)
    where
        F: Fn(JobContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler: JobHandler = Arc::new(move |ctx, args| Box::pin(handler(ctx, args)));
        self.handlers.insert(job_type.into(), handler);
    }

    pub fn get(&self, job_type: &str) -> Option<JobHandler> {
        self.handlers.get(job_type).cloned()
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered job types, sorted
    pub fn job_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("job_types", &self.job_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use serde_json::json;

    #[tokio::test]
    async fn test_register_and_invoke() {
        let mut registry = HandlerRegistry::new();
        registry.register("echo", |_ctx, args| async move {
            if args.is_empty() {
                return Err(HandlerError::new("missing argument"));
            }
            Ok(())
        });

        let handler = registry.get("echo").unwrap();
        assert!(handler(JobContext::new("j1", "echo"), vec![json!("x")])
            .await
            .is_ok());
        assert_eq!(
            handler(JobContext::new("j2", "echo"), vec![]).await,
            Err(HandlerError::new("missing argument"))
        );
    }

    #[test]
    fn test_register_overwrites() {
        let mut registry = HandlerRegistry::new();
        registry.register("echo", |_ctx, _args| async { Ok(()) });
        registry.register("echo", |_ctx, _args| async {
            Err(HandlerError::new("replaced"))
        });
        registry.register("resize", |_ctx, _args| async { Ok(()) });

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.job_types(), vec!["echo", "resize"]);
        assert!(!registry.contains("unknown"));
    }

    #[test]
    fn test_into_failure_defaults_error_type() {
        let failure = HandlerError::new("boom").into_failure();
        assert_eq!(failure.error_type, JobFailure::HANDLER_ERROR);
        assert_eq!(failure.message, "boom");

        let failure = HandlerError::new("bad input")
            .with_type("ValidationError")
            .into_failure();
        assert_eq!(failure.error_type, "ValidationError");
    }

    #[test]
    fn test_from_anyhow_keeps_cause_chain() {
        let err: anyhow::Error = Err::<(), _>(std::io::Error::other("disk full"))
            .context("writing thumbnail")
            .unwrap_err();

        let handler_error = HandlerError::from(err);
        assert_eq!(handler_error.message, "writing thumbnail");
        assert_eq!(
            handler_error.backtrace,
            Some(vec!["disk full".to_string()])
        );
    }
}
