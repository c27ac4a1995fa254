//! In-memory queue for testing and demos

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::{ClientError, Closeable, Connector, ControlSignal, QueueClient, WorkerIdentity};
use crate::job::{Job, JobFailure};

#[derive(Default)]
struct QueueState {
    queues: HashMap<String, VecDeque<Job>>,
    fetch_errors: VecDeque<ClientError>,
    open_errors: VecDeque<ClientError>,
    control_signals: VecDeque<ControlSignal>,
    acks: Vec<String>,
    fails: Vec<(String, JobFailure)>,
    fetch_calls: usize,
    beats: usize,
    opened: usize,
    closed: usize,
    identities: Vec<WorkerIdentity>,
}

impl QueueState {
    fn pop_job(&mut self, queues: &[String]) -> Option<Job> {
        queues
            .iter()
            .find_map(|name| self.queues.get_mut(name).and_then(VecDeque::pop_front))
    }
}

struct Inner {
    state: Mutex<QueueState>,
    pushed: Notify,
    fetch_timeout: Duration,
}

/// In-memory stand-in for a queue server
///
/// Behaves like a server that blocks fetches for up to `fetch_timeout` when
/// no work is available. Every request is recorded so tests can assert on
/// exactly which acks and fails were sent. Failures can be scripted with
/// [`push_fetch_error`](Self::push_fetch_error) and
/// [`push_open_error`](Self::push_open_error).
///
/// # Example
///
/// ```
/// use workhorse::client::InMemoryQueue;
/// use workhorse::Job;
///
/// let queue = InMemoryQueue::new();
/// queue.push(Job::new("echo", vec![serde_json::json!("x")]));
/// assert_eq!(queue.pending(), 1);
/// ```
#[derive(Clone)]
pub struct InMemoryQueue {
    inner: Arc<Inner>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::with_fetch_timeout(Duration::from_millis(100))
    }

    /// Create a queue whose empty fetches block for `timeout`
    pub fn with_fetch_timeout(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState::default()),
                pushed: Notify::new(),
                fetch_timeout: timeout,
            }),
        }
    }

    /// Enqueue a job on its queue
    pub fn push(&self, job: Job) {
        self.inner
            .state
            .lock()
            .queues
            .entry(job.queue.clone())
            .or_default()
            .push_back(job);
        self.inner.pushed.notify_waiters();
    }

    /// Make the next fetch fail with `error`; errors are consumed in order
    /// before any job is handed out
    pub fn push_fetch_error(&self, error: ClientError) {
        self.inner.state.lock().fetch_errors.push_back(error);
    }

    /// Make the next connection attempt fail with `error`
    pub fn push_open_error(&self, error: ClientError) {
        self.inner.state.lock().open_errors.push_back(error);
    }

    /// Answer the next heartbeat with `signal`
    pub fn push_control_signal(&self, signal: ControlSignal) {
        self.inner.state.lock().control_signals.push_back(signal);
    }

    /// Number of jobs not yet fetched
    pub fn pending(&self) -> usize {
        self.inner.state.lock().queues.values().map(VecDeque::len).sum()
    }

    /// Acknowledged job ids, in order
    pub fn acks(&self) -> Vec<String> {
        self.inner.state.lock().acks.clone()
    }

    /// Failed job ids with their failure details, in order
    pub fn fails(&self) -> Vec<(String, JobFailure)> {
        self.inner.state.lock().fails.clone()
    }

    pub fn fetch_calls(&self) -> usize {
        self.inner.state.lock().fetch_calls
    }

    pub fn beats(&self) -> usize {
        self.inner.state.lock().beats
    }

    /// Connections opened so far
    pub fn opened(&self) -> usize {
        self.inner.state.lock().opened
    }

    /// Connections closed so far
    pub fn closed(&self) -> usize {
        self.inner.state.lock().closed
    }

    /// Identities presented by every opened connection
    pub fn identities(&self) -> Vec<WorkerIdentity> {
        self.inner.state.lock().identities.clone()
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for InMemoryQueue {
    type Client = InMemoryClient;

    async fn open(&self, identity: &WorkerIdentity) -> Result<InMemoryClient, ClientError> {
        let mut state = self.inner.state.lock();
        if let Some(err) = state.open_errors.pop_front() {
            return Err(err);
        }
        state.opened += 1;
        state.identities.push(identity.clone());

        Ok(InMemoryClient {
            inner: Arc::clone(&self.inner),
            closed: false,
        })
    }
}

/// A connection to an [`InMemoryQueue`]
pub struct InMemoryClient {
    inner: Arc<Inner>,
    closed: bool,
}

impl InMemoryClient {
    fn ensure_open(&self) -> Result<(), ClientError> {
        if self.closed {
            return Err(ClientError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl Closeable for InMemoryClient {
    async fn close(&mut self) -> Result<(), ClientError> {
        if !self.closed {
            self.closed = true;
            self.inner.state.lock().closed += 1;
        }
        Ok(())
    }
}

#[async_trait]
impl QueueClient for InMemoryClient {
    async fn fetch(&mut self, queues: &[String]) -> Result<Option<Job>, ClientError> {
        self.ensure_open()?;

        // Register interest before the re-check so a push in between is not missed
        let notified = self.inner.pushed.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        {
            let mut state = self.inner.state.lock();
            state.fetch_calls += 1;
            if let Some(err) = state.fetch_errors.pop_front() {
                return Err(err);
            }
            if let Some(job) = state.pop_job(queues) {
                return Ok(Some(job));
            }
        }

        let _ = tokio::time::timeout(self.inner.fetch_timeout, notified).await;
        Ok(self.inner.state.lock().pop_job(queues))
    }

    async fn ack(&mut self, jid: &str) -> Result<(), ClientError> {
        self.ensure_open()?;
        self.inner.state.lock().acks.push(jid.to_string());
        Ok(())
    }

    async fn fail(&mut self, jid: &str, failure: &JobFailure) -> Result<(), ClientError> {
        self.ensure_open()?;
        self.inner
            .state
            .lock()
            .fails
            .push((jid.to_string(), failure.clone()));
        Ok(())
    }

    async fn beat(&mut self) -> Result<Option<ControlSignal>, ClientError> {
        self.ensure_open()?;
        let mut state = self.inner.state.lock();
        state.beats += 1;
        Ok(state.control_signals.pop_front())
    }
}
