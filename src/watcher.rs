//! Polling file watcher.
//!
//! The progress file is tiny and rewritten in place, so the watcher compares
//! content against the previous read rather than trusting mtime granularity.
//! Content is delivered over a channel; a closed channel signals shutdown to
//! the consumer.

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const CHANNEL_CAPACITY: usize = 8;

pub struct FileWatcher {
    path: PathBuf,
    poll_interval: Duration,
}

impl FileWatcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            poll_interval: POLL_INTERVAL,
        }
    }

    pub fn poll_every(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Spawn the polling task. The receiver yields the file's content each
    /// time it differs from the previous read (the first successful read
    /// counts as a change). Dropping the receiver stops the task.
    pub fn start(self) -> mpsc::Receiver<Vec<u8>> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let mut last: Option<Vec<u8>> = None;
            let mut ticker = tokio::time::interval(self.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    // Receiver dropped: nobody is listening, stop polling.
                    _ = tx.closed() => return,
                }

                match tokio::fs::read(&self.path).await {
                    Ok(content) => {
                        if last.as_deref() != Some(content.as_slice()) {
                            if tx.send(content.clone()).await.is_err() {
                                return;
                            }
                            last = Some(content);
                        }
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                        // Trainer may not have written its first epoch yet.
                        debug!("Metric file {} not present yet", self.path.display());
                    }
                    Err(err) => {
                        warn!("Error reading {}: {err}", self.path.display());
                    }
                }
            }
        });

        rx
    }
}
