//! Per-dispatch execution context

use tokio_util::sync::CancellationToken;

use crate::job::Job;

/// Context handed to a handler for one job execution
///
/// A fresh context is built for every dispatch. Its cancellation token is
/// cancelled once the dispatch is over (the handler returned and the result
/// was reported), so work the handler spawned in the background can notice
/// that the job has ended.
///
/// # Example
///
/// ```ignore
/// manager.register("report", |ctx: JobContext, args| async move {
///     tracing::info!(jid = %ctx.jid(), "building report");
///     let token = ctx.cancellation_token();
///     tokio::spawn(async move {
///         token.cancelled().await;
///         // job finished, clean up
///     });
///     Ok(())
/// });
/// ```
#[derive(Debug, Clone)]
pub struct JobContext {
    jid: String,
    job_type: String,
    queue: String,
    token: CancellationToken,
}

impl JobContext {
    /// Create a context detached from any dispatch
    pub fn new(jid: impl Into<String>, job_type: impl Into<String>) -> Self {
        Self {
            jid: jid.into(),
            job_type: job_type.into(),
            queue: crate::job::DEFAULT_QUEUE.to_string(),
            token: CancellationToken::new(),
        }
    }

    pub(crate) fn for_job(job: &Job) -> Self {
        Self {
            jid: job.jid.clone(),
            job_type: job.job_type.clone(),
            queue: job.queue.clone(),
            token: CancellationToken::new(),
        }
    }

    /// Id of the job being executed
    pub fn jid(&self) -> &str {
        &self.jid
    }

    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Token cancelled when this dispatch is over
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the dispatch is over
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    pub(crate) fn finish(&self) {
        self.token.cancel();
    }
}
