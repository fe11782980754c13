// src/services/worker.rs
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{error, info};
use tokio::sync::watch;

use crate::errors::AtelierError;

/// One kind of queued work a background loop can drive.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    fn name(&self) -> &str;

    /// Claims and finishes at most one job. `Ok(false)` means the queue was
    /// empty.
    async fn process_next(&self) -> Result<bool, AtelierError>;
}

/// Polling loop around a [`JobProcessor`]. Busy queues are drained
/// back-to-back; an empty queue or an error waits one poll interval.
pub struct BackgroundWorker {
    processor: Arc<dyn JobProcessor>,
    poll_interval: Duration,
}

impl BackgroundWorker {
    pub fn new(processor: Arc<dyn JobProcessor>, poll_interval: Duration) -> Self {
        Self {
            processor,
            poll_interval,
        }
    }

    /// Runs until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let name = self.processor.name().to_string();
        info!("{} worker started (poll every {:?})", name, self.poll_interval);

        loop {
            if *shutdown.borrow() {
                break;
            }

            let idle = match self.processor.process_next().await {
                Ok(processed) => !processed,
                Err(e) => {
                    error!("{} worker iteration failed: {}", name, e);
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = tokio::time::sleep(self.poll_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        info!("{} worker stopped", name);
    }
}
