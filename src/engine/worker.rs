//! # Queue Worker Loop
//!
//! Consumes entries from the pgmq-backed queue and hands them to the hook
//! dispatcher. Entries handled or dropped are acknowledged; entries that hit
//! an infrastructure fault are left unacknowledged and reappear after the
//! visibility timeout (at-least-once delivery, which every engine callback
//! already tolerates).

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::dispatcher::{DispatchOutcome, HookDispatcher};
use crate::queue::{PgmqQueue, QueueResult};

/// Worker-loop tuning.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Visibility timeout handed to the queue per read.
    pub visibility_timeout_secs: i32,
    /// Entries fetched per read.
    pub batch_size: i32,
    /// Sleep between reads that returned nothing.
    pub idle_sleep: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            visibility_timeout_secs: 60,
            batch_size: 10,
            idle_sleep: Duration::from_secs(2),
        }
    }
}

/// One queue-consuming worker. Run as many of these (across processes) as
/// throughput needs; the engine's conditional writes keep them safe.
pub struct QueueWorker {
    queue: PgmqQueue,
    dispatcher: Arc<HookDispatcher>,
    config: WorkerConfig,
}

impl QueueWorker {
    pub fn new(queue: PgmqQueue, dispatcher: Arc<HookDispatcher>, config: WorkerConfig) -> Self {
        Self {
            queue,
            dispatcher,
            config,
        }
    }

    /// Fetch and dispatch one batch of due entries. Returns how many entries
    /// were dispatched.
    pub async fn run_once(&self) -> QueueResult<usize> {
        let entries = self
            .queue
            .fetch(self.config.visibility_timeout_secs, self.config.batch_size)
            .await?;

        let mut dispatched = 0;
        for (msg_id, entry) in entries {
            match self.dispatcher.dispatch(&entry).await {
                DispatchOutcome::Handled | DispatchOutcome::Skipped => {
                    self.queue.ack(msg_id).await?;
                    dispatched += 1;
                }
                DispatchOutcome::Retry => {
                    warn!(msg_id, hook = %entry.hook, "Leaving entry for redelivery");
                }
            }
        }
        Ok(dispatched)
    }

    /// Consume until the provided shutdown future resolves.
    pub async fn run(&self, shutdown: impl std::future::Future<Output = ()>) {
        info!("🚜 Queue worker started");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("Queue worker shutting down");
                    return;
                }
                result = self.run_once() => match result {
                    Ok(0) => tokio::time::sleep(self.config.idle_sleep).await,
                    Ok(n) => debug!(dispatched = n, "Dispatched queue entries"),
                    Err(e) => {
                        warn!(error = %e, "Queue read failed; backing off");
                        tokio::time::sleep(self.config.idle_sleep).await;
                    }
                },
            }
        }
    }
}
