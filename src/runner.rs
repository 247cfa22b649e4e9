//! TaskRunner: the outer loop over the task list.
//!
//! Items are processed strictly one after another with at most one viewer
//! connection open. Each failed attempt tears the connection down, waits the
//! policy's backoff and starts the item over; with the default policy that
//! repeats until the item succeeds or the run is cancelled.

use crate::config::HarvestConfig;
use crate::error::HarvestError;
use crate::item::{ItemOutcome, ItemPipeline};
use crate::progress::ProgressCallback;
use crate::task::ItemKey;
use crate::viewer::ViewerConnector;
use crate::workdir::WorkingDirectory;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// An item the runner gave up on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedItem {
    pub key: ItemKey,
    pub attempts: u32,
    /// Display form of the last error.
    pub error: String,
}

/// What a run did, item by item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Items in the task list.
    pub total: usize,
    /// Captured and packaged during this run.
    pub completed: Vec<ItemKey>,
    /// Packaged from pages already on disk.
    pub resumed: Vec<ItemKey>,
    /// Archive already present.
    pub skipped: Vec<ItemKey>,
    /// Retry budget exhausted.
    pub failed: Vec<FailedItem>,
    /// Item attempts made, across all items.
    pub attempts: u32,
    /// The run stopped early because it was cancelled.
    pub cancelled: bool,
}

impl RunSummary {
    /// Every listed item now has its archive.
    pub fn all_done(&self) -> bool {
        !self.cancelled
            && self.failed.is_empty()
            && self.completed.len() + self.resumed.len() + self.skipped.len() == self.total
    }

    fn record(&mut self, key: &ItemKey, outcome: ItemOutcome) {
        let bucket = match outcome {
            ItemOutcome::Skipped => &mut self.skipped,
            ItemOutcome::Resumed { .. } => &mut self.resumed,
            ItemOutcome::Completed { .. } => &mut self.completed,
        };
        bucket.push(key.clone());
    }
}

/// Runs the item pipeline over a task list with per-item retries.
pub struct TaskRunner {
    config: HarvestConfig,
    connector: Arc<dyn ViewerConnector>,
    cancel: CancellationToken,
    progress: Option<ProgressCallback>,
}

impl TaskRunner {
    pub fn new(config: HarvestConfig, connector: Arc<dyn ViewerConnector>) -> Self {
        Self {
            config,
            connector,
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    /// Use `token` to stop the run; polls and backoff sleeps watch it.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    /// Process `tasks` in order.
    ///
    /// Per-item failures never surface here; they are retried according to
    /// the policy and end up in [`RunSummary::failed`] once it is exhausted.
    /// Cancellation ends the run with [`RunSummary::cancelled`] set.
    ///
    /// # Errors
    /// Only errors for which [`HarvestError::is_fatal_for_run`] holds, other
    /// than cancellation.
    pub async fn run(&self, tasks: &[ItemKey]) -> Result<RunSummary, HarvestError> {
        let mut summary = RunSummary {
            total: tasks.len(),
            ..RunSummary::default()
        };
        info!(items = tasks.len(), "Run started");
        if let Some(cb) = &self.progress {
            cb.on_run_start(tasks.len());
        }

        for key in tasks {
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            if !self.run_item(key, &mut summary).await? {
                summary.cancelled = true;
                break;
            }
        }

        info!(
            completed = summary.completed.len(),
            resumed = summary.resumed.len(),
            skipped = summary.skipped.len(),
            failed = summary.failed.len(),
            attempts = summary.attempts,
            cancelled = summary.cancelled,
            "Run finished"
        );
        if let Some(cb) = &self.progress {
            cb.on_run_complete(&summary);
        }
        Ok(summary)
    }

    /// Retry loop for one item. Returns `Ok(false)` if cancelled.
    async fn run_item(&self, key: &ItemKey, summary: &mut RunSummary) -> Result<bool, HarvestError> {
        let wd = WorkingDirectory::new(&self.config.output_dir, key);
        if wd.has_archive() {
            info!(item = %key, "Archive exists, skipping");
            self.finish(key, ItemOutcome::Skipped, summary);
            return Ok(true);
        }

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            summary.attempts += 1;
            info!(item = %key, attempt, "Attempt started");
            if let Some(cb) = &self.progress {
                cb.on_item_start(key, attempt);
            }

            let mut pipeline = ItemPipeline::new(&self.config, self.connector.as_ref())
                .with_cancel(self.cancel.clone())
                .with_progress(self.progress.clone());
            // the pipeline's own success is not trusted without the archive
            let result = pipeline.run(key).await.and_then(|outcome| {
                if wd.has_archive() {
                    Ok(outcome)
                } else {
                    Err(HarvestError::ArchiveMissing {
                        path: wd.archive_path(),
                    })
                }
            });

            let err = match result {
                Ok(outcome) => {
                    info!(item = %key, attempt, ?outcome, "Item done");
                    self.finish(key, outcome, summary);
                    return Ok(true);
                }
                Err(HarvestError::Cancelled) => {
                    warn!(item = %key, attempt, "Cancelled");
                    return Ok(false);
                }
                Err(e) if e.is_fatal_for_run() => return Err(e),
                Err(e) => e,
            };

            let message = err.to_string();
            warn!(item = %key, attempt, state = %pipeline.state(), "Attempt failed: {message}");
            if let Some(cb) = &self.progress {
                cb.on_attempt_failed(key, attempt, &message);
            }

            if !self.config.retry.allows_another(attempt) {
                error!(item = %key, attempts = attempt, "Giving up: {message}");
                if let Some(cb) = &self.progress {
                    cb.on_item_failed(key, &message);
                }
                summary.failed.push(FailedItem {
                    key: key.clone(),
                    attempts: attempt,
                    error: message,
                });
                return Ok(true);
            }

            let delay = self.config.retry.delay_after(attempt);
            info!(item = %key, attempt, "Retrying in {:?}", delay);
            if !self.backoff(delay).await {
                return Ok(false);
            }
        }
    }

    fn finish(&self, key: &ItemKey, outcome: ItemOutcome, summary: &mut RunSummary) {
        summary.record(key, outcome);
        if let Some(cb) = &self.progress {
            cb.on_item_complete(key, &outcome);
        }
    }

    /// Sleep `delay`; `false` if cancelled meanwhile.
    async fn backoff(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = self.cancel.cancelled() => false,
        }
    }
}
