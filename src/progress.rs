//! Progress-callback trait for run, item and page events.
//!
//! Pass an [`Arc<dyn HarvestProgressCallback>`] to
//! [`crate::runner::TaskRunner::with_progress`] to observe a run as it
//! happens: which item is being attempted, each page as it lands on disk,
//! failed attempts before the backoff, and the final summary.
//!
//! The library never prints; a terminal progress bar, a log forwarder or a
//! status file writer all plug in here.
//!
//! # Example
//!
//! ```rust
//! use scan_harvest::{HarvestProgressCallback, ItemKey};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct PageCounter {
//!     saved: AtomicUsize,
//! }
//!
//! impl HarvestProgressCallback for PageCounter {
//!     fn on_page_saved(&self, key: &ItemKey, page: usize, expected: usize, _left: Option<&str>) {
//!         self.saved.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{key}: {page}/{expected}");
//!     }
//! }
//!
//! let cb: Arc<dyn HarvestProgressCallback> = Arc::new(PageCounter { saved: AtomicUsize::new(0) });
//! cb.on_page_saved(&ItemKey::new("100", "1", "5"), 1, 3, None);
//! ```

use crate::item::ItemOutcome;
use crate::runner::RunSummary;
use crate::task::ItemKey;
use std::sync::Arc;

/// Receives events from the task runner and the item pipeline.
///
/// All methods default to no-ops. Items run one at a time, so calls arrive
/// in order, but the trait is `Send + Sync` so the runner can live on any
/// tokio worker.
pub trait HarvestProgressCallback: Send + Sync {
    /// Called once before the first item.
    ///
    /// # Arguments
    /// * `total_items` — number of items in the task list
    fn on_run_start(&self, total_items: usize) {
        let _ = total_items;
    }

    /// Called at the start of every attempt at an item.
    ///
    /// # Arguments
    /// * `key`     — the item
    /// * `attempt` — 1-based attempt number
    fn on_item_start(&self, key: &ItemKey, attempt: u32) {
        let _ = (key, attempt);
    }

    /// Called once the item's scanned-page counter is known.
    fn on_item_expected(&self, key: &ItemKey, expected: usize) {
        let _ = (key, expected);
    }

    /// Called after each raster page is written.
    ///
    /// # Arguments
    /// * `page`      — 1-based page number
    /// * `expected`  — scanned-page counter for the item
    /// * `time_left` — the viewer's session countdown, when it shows one
    fn on_page_saved(&self, key: &ItemKey, page: usize, expected: usize, time_left: Option<&str>) {
        let _ = (key, page, expected, time_left);
    }

    /// Called when an attempt fails and another one is scheduled.
    fn on_attempt_failed(&self, key: &ItemKey, attempt: u32, error: &str) {
        let _ = (key, attempt, error);
    }

    /// Called when an item reaches a final state.
    fn on_item_complete(&self, key: &ItemKey, outcome: &ItemOutcome) {
        let _ = (key, outcome);
    }

    /// Called when an item is given up on (retry budget exhausted).
    fn on_item_failed(&self, key: &ItemKey, error: &str) {
        let _ = (key, error);
    }

    /// Called once after the last item.
    fn on_run_complete(&self, summary: &RunSummary) {
        let _ = summary;
    }
}

/// Ignores every event.
pub struct NoopProgressCallback;

impl HarvestProgressCallback for NoopProgressCallback {}

/// Shared handle type used across the crate.
pub type ProgressCallback = Arc<dyn HarvestProgressCallback>;
