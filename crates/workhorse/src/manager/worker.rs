//! Worker unit: fetch, dispatch, report

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use rand::Rng;
use tracing::{debug, info, instrument, warn};

use super::control::Control;
use crate::client::QueueClient;
use crate::handler::{HandlerRegistry, JobContext};
use crate::job::{Job, JobFailure};
use crate::pool::Pool;

/// Settings every worker unit shares
#[derive(Debug, Clone)]
pub(crate) struct WorkerSettings {
    pub(crate) queues: Arc<[String]>,
    pub(crate) fetch_error_delay: Duration,
    pub(crate) startup_jitter: Duration,
}

/// One of the manager's `concurrency` independent fetch loops
pub(crate) struct WorkerUnit<C: QueueClient> {
    pub(crate) index: usize,
    pub(crate) pool: Pool<C>,
    pub(crate) handlers: Arc<HandlerRegistry>,
    pub(crate) control: Arc<Control>,
    pub(crate) settings: WorkerSettings,
}

impl<C: QueueClient> WorkerUnit<C> {
    #[instrument(name = "worker", skip_all, fields(worker = self.index))]
    pub(crate) async fn run(self) {
        if !self.stagger().await {
            debug!("Shutdown during startup delay");
            return;
        }
        debug!("Worker started");

        loop {
            if !self.control.state.is_running() {
                debug!(state = %self.control.state.load(), "Worker stopping");
                break;
            }

            let queues = Arc::clone(&self.settings.queues);
            let fetched = self
                .pool
                .with(move |client| Box::pin(async move { client.fetch(&queues).await }))
                .await;

            match fetched {
                Ok(Some(job)) => self.dispatch(job).await,
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "Failed to fetch job");
                    self.control.stats.record_fetch_error();
                    tokio::select! {
                        _ = tokio::time::sleep(self.settings.fetch_error_delay) => {}
                        _ = self.control.shutdown.cancelled() => {}
                    }
                }
            }

            if self.control.shutdown.is_cancelled() {
                debug!("Shutdown observed");
                break;
            }
        }
    }

    /// Random startup delay so units do not hit the server in lockstep.
    /// Returns `false` if shutdown was raised first.
    async fn stagger(&self) -> bool {
        let max = self.settings.startup_jitter.as_nanos();
        if max == 0 {
            return true;
        }
        let nanos = rand::thread_rng().gen_range(0..max);
        let delay = Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX));

        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = self.control.shutdown.cancelled() => false,
        }
    }

    #[instrument(skip_all, fields(jid = %job.jid, job_type = %job.job_type))]
    async fn dispatch(&self, job: Job) {
        let Some(handler) = self.handlers.get(&job.job_type) else {
            warn!("No handler registered for job type");
            self.report_failure(&job.jid, JobFailure::unknown_job_type(&job.job_type))
                .await;
            return;
        };

        let ctx = JobContext::for_job(&job);
        let handler_ctx = ctx.clone();
        let args = job.args;
        let outcome = AssertUnwindSafe(async move { handler(handler_ctx, args).await })
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => self.report_success(&job.jid).await,
            Ok(Err(e)) => {
                info!(error = %e, "Job failed");
                self.report_failure(&job.jid, e.into_failure()).await;
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!(panic = %message, "Job handler panicked");
                self.report_failure(&job.jid, JobFailure::new(JobFailure::HANDLER_PANIC, message))
                    .await;
            }
        }

        ctx.finish();
    }

    async fn report_success(&self, jid: &str) {
        let jid = jid.to_string();
        let acked = self
            .pool
            .with(move |client| Box::pin(async move { client.ack(&jid).await }))
            .await;

        match acked {
            Ok(()) => {
                debug!("Job acknowledged");
                self.control.stats.record_processed();
            }
            Err(e) => warn!(error = %e, "Failed to acknowledge job"),
        }
    }

    async fn report_failure(&self, jid: &str, failure: JobFailure) {
        let jid = jid.to_string();
        let reported = self
            .pool
            .with(move |client| Box::pin(async move { client.fail(&jid, &failure).await }))
            .await;

        match reported {
            Ok(()) => self.control.stats.record_failed(),
            Err(e) => warn!(error = %e, "Failed to report job failure"),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientError, Connector, InMemoryClient, InMemoryQueue, WorkerIdentity};
    use crate::manager::lifecycle::LifecycleState;
    use crate::handler::HandlerError;
    use serde_json::json;

    fn unit(queue: &InMemoryQueue, handlers: HandlerRegistry) -> WorkerUnit<InMemoryClient> {
        let connector = queue.clone();
        let identity = WorkerIdentity {
            wid: "test-worker".to_string(),
            pid: std::process::id(),
            labels: vec![],
        };
        let pool = Pool::from_fn(2, move || {
            let connector = connector.clone();
            let identity = identity.clone();
            async move { connector.open(&identity).await }
        })
        .unwrap();
        let (control, _rx) = Control::new();

        WorkerUnit {
            index: 0,
            pool,
            handlers: Arc::new(handlers),
            control: Arc::new(control),
            settings: WorkerSettings {
                queues: vec!["default".to_string()].into(),
                fetch_error_delay: Duration::from_secs(1),
                startup_jitter: Duration::ZERO,
            },
        }
    }

    #[tokio::test]
    async fn test_dispatch_acks_success() {
        let queue = InMemoryQueue::new();
        let mut handlers = HandlerRegistry::new();
        handlers.register("echo", |_ctx, _args| async { Ok(()) });
        let unit = unit(&queue, handlers);

        unit.dispatch(Job::new("echo", vec![json!("hi")]).with_jid("j1"))
            .await;

        assert_eq!(queue.acks(), vec!["j1"]);
        assert!(queue.fails().is_empty());
        assert_eq!(unit.control.stats.snapshot().processed, 1);
    }

    #[tokio::test]
    async fn test_dispatch_unknown_type_fails_without_handler() {
        let queue = InMemoryQueue::new();
        let unit = unit(&queue, HandlerRegistry::new());

        unit.dispatch(Job::new("missing", vec![]).with_jid("j2")).await;

        let fails = queue.fails();
        assert_eq!(fails.len(), 1);
        assert_eq!(fails[0].0, "j2");
        assert_eq!(fails[0].1.error_type, JobFailure::UNKNOWN_JOB_TYPE);
        assert!(queue.acks().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_reports_panic_as_failure() {
        let queue = InMemoryQueue::new();
        let mut handlers = HandlerRegistry::new();
        handlers.register("explode", |_ctx, _args| async {
            if true {
                panic!("kaboom");
            }
            Ok(())
        });
        let unit = unit(&queue, handlers);

        unit.dispatch(Job::new("explode", vec![]).with_jid("j3")).await;

        let fails = queue.fails();
        assert_eq!(fails.len(), 1);
        assert_eq!(fails[0].1.error_type, JobFailure::HANDLER_PANIC);
        assert_eq!(fails[0].1.message, "kaboom");
    }

    #[tokio::test]
    async fn test_context_cancelled_after_dispatch() {
        let queue = InMemoryQueue::new();
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let slot = Arc::clone(&seen);
        let mut handlers = HandlerRegistry::new();
        handlers.register("remember", move |ctx: JobContext, _args| {
            let slot = Arc::clone(&slot);
            async move {
                assert!(!ctx.is_cancelled());
                *slot.lock() = Some(ctx);
                Err::<(), _>(HandlerError::new("nope"))
            }
        });
        let unit = unit(&queue, handlers);

        unit.dispatch(Job::new("remember", vec![]).with_jid("j4")).await;

        let ctx = seen.lock().take().unwrap();
        assert!(ctx.is_cancelled());
        assert_eq!(queue.fails()[0].1.error_type, JobFailure::HANDLER_ERROR);
    }

    #[tokio::test]
    async fn test_run_exits_when_not_running() {
        let queue = InMemoryQueue::new();
        let unit = unit(&queue, HandlerRegistry::new());
        unit.control.state.advance(LifecycleState::Quiet);

        unit.run().await;
        assert_eq!(queue.fetch_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_error_backs_off() {
        let queue = InMemoryQueue::new();
        queue.push_fetch_error(ClientError::Server("ERR busy".into()));
        let unit = unit(&queue, HandlerRegistry::new());
        let control = Arc::clone(&unit.control);

        let task = tokio::spawn(unit.run());
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(queue.fetch_calls(), 1);
        assert_eq!(control.stats.snapshot().fetch_errors, 1);

        control.shutdown.cancel();
        control.state.advance(LifecycleState::Terminated);
        task.await.unwrap();
    }
}
