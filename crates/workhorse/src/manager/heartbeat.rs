//! Heartbeat unit

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use super::control::{Control, LifecycleCommand};
use crate::client::QueueClient;
use crate::pool::Pool;

/// Periodic liveness report; relays server-issued control signals
pub(crate) struct HeartbeatUnit<C: QueueClient> {
    pub(crate) pool: Pool<C>,
    pub(crate) control: Arc<Control>,
    pub(crate) interval: Duration,
}

impl<C: QueueClient> HeartbeatUnit<C> {
    #[instrument(name = "heartbeat", skip_all)]
    pub(crate) async fn run(self) {
        let mut ticks = interval_at(Instant::now() + self.interval, self.interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(interval_ms = self.interval.as_millis() as u64, "Heartbeat started");

        loop {
            tokio::select! {
                biased;
                _ = self.control.shutdown.cancelled() => {
                    debug!("Heartbeat stopping");
                    break;
                }
                _ = ticks.tick() => self.beat().await,
            }
        }
    }

    async fn beat(&self) {
        match self.pool.with(|client| client.beat()).await {
            Ok(signal) => {
                self.control.stats.record_heartbeat();
                if let Some(signal) = signal {
                    info!(%signal, "Server requested lifecycle change");
                    self.control.send(LifecycleCommand::from(signal));
                }
            }
            // Transport errors heal on the next connection
            Err(e) => warn!(error = %e, "Heartbeat failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientError, Connector, ControlSignal, InMemoryQueue, WorkerIdentity};

    fn heartbeat(
        queue: &InMemoryQueue,
    ) -> (
        HeartbeatUnit<crate::client::InMemoryClient>,
        tokio::sync::mpsc::UnboundedReceiver<LifecycleCommand>,
    ) {
        let connector = queue.clone();
        let pool = Pool::from_fn(1, move || {
            let connector = connector.clone();
            async move {
                let identity = WorkerIdentity {
                    wid: "hb".to_string(),
                    pid: 1,
                    labels: vec![],
                };
                connector.open(&identity).await
            }
        })
        .unwrap();
        let (control, rx) = Control::new();
        let unit = HeartbeatUnit {
            pool,
            control: Arc::new(control),
            interval: Duration::from_secs(5),
        };
        (unit, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_beats_on_interval_and_stops_on_shutdown() {
        let queue = InMemoryQueue::new();
        let (unit, _rx) = heartbeat(&queue);
        let control = Arc::clone(&unit.control);
        let task = tokio::spawn(unit.run());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(queue.beats(), 0);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(queue.beats(), 2);

        control.shutdown.cancel();
        task.await.unwrap();
        assert_eq!(control.stats.snapshot().heartbeats, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_relays_server_signal() {
        let queue = InMemoryQueue::new();
        queue.push_control_signal(ControlSignal::Terminate);
        let (unit, mut rx) = heartbeat(&queue);
        let control = Arc::clone(&unit.control);
        let task = tokio::spawn(unit.run());

        assert_eq!(rx.recv().await, Some(LifecycleCommand::Terminate));

        control.shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_error_is_ignored() {
        let queue = InMemoryQueue::new();
        queue.push_open_error(ClientError::Connection("refused".into()));
        let (unit, _rx) = heartbeat(&queue);
        let control = Arc::clone(&unit.control);
        let task = tokio::spawn(unit.run());

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(queue.beats(), 1);

        control.shutdown.cancel();
        task.await.unwrap();
    }
}
