// Echo worker demo
//
// Runs a manager against the in-memory queue, seeds a few jobs, and quiets
// then terminates itself once they are processed. Send SIGTSTP to quiet or
// SIGINT/SIGTERM to stop it early.
//
// Run with: cargo run -p workhorse --example echo_worker

use std::time::Duration;

use anyhow::Context;
use serde_json::json;
use tracing::info;
use workhorse::telemetry::{init_telemetry, TelemetryConfig};
use workhorse::{HandlerError, InMemoryQueue, Job, LifecycleEvent, Manager, ManagerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_telemetry(TelemetryConfig::from_env());

    let config = ManagerConfig::from_env().context("loading manager configuration")?;
    let queue = InMemoryQueue::new();
    for (i, word) in ["alpha", "beta", "gamma"].iter().enumerate() {
        queue.push(Job::new("echo", vec![json!(word)]).with_jid(format!("echo-{i}")));
    }
    queue.push(Job::new("shout", vec![]).with_jid("shout-0"));
    queue.push(Job::new("unregistered", vec![]).with_jid("nobody-0"));

    let mut manager = Manager::new(queue.clone(), config);
    manager
        .register("echo", |ctx, args| async move {
            info!(jid = %ctx.jid(), ?args, "echo");
            Ok(())
        })
        .register("shout", |_ctx, args| async move {
            let word = args
                .first()
                .and_then(|v| v.as_str())
                .ok_or_else(|| HandlerError::new("shout needs a string argument"))?;
            info!("{}", word.to_uppercase());
            Ok(())
        })
        .on(LifecycleEvent::Startup, || info!("Echo worker starting"))
        .on(LifecycleEvent::Quiet, || info!("Echo worker quiet"))
        .on(LifecycleEvent::Shutdown, || info!("Echo worker shutting down"));

    let handle = manager.handle();
    let monitor = queue.clone();
    tokio::spawn(async move {
        while monitor.pending() > 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        info!(stats = ?handle.stats(), "Queue drained");
        handle.quiet();
        handle.terminate().await;
    });

    manager.run().await;
    Ok(())
}
