//! # scan-harvest
//!
//! Resumable acquisition of scanned archive items from a page-at-a-time web
//! viewer, packaged as one PDF and one ZIP per item.
//!
//! ## Why this crate?
//!
//! The viewer shows one scan at a time and never signals "page ready"; the
//! only evidence of progress is a style attribute that changes when the next
//! image is in. Sessions expire, the "next" arrow stays enabled on the last
//! page, and a run over a long task list takes hours. This crate turns that
//! into a pipeline that can be killed at any point and restarted without
//! losing or duplicating work: every stage is gated on what is already on
//! disk, and an item's archive is the single completion marker.
//!
//! ## Pipeline Overview
//!
//! ```text
//! task list
//!  │
//!  └─ TaskRunner          skip items with an archive, retry the rest
//!      └─ ItemPipeline    login → locate → open viewer → capture → verify
//!          ├─ PageCapture       N.png until the scanned-page counter is reached
//!          │   └─ SlideProbe    poll fingerprint / click next / decode data URI
//!          └─ Packaging
//!              ├─ 1. encode     N.png → N.jpg (quality 80)
//!              ├─ 2. document   N.jpg → <key>.pdf (page = image size)
//!              └─ 3. archive    N.jpg → <key>.zip (Deflate 9), delete N.jpg
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use scan_harvest::{load_tasks, ChromeConnector, Credentials, HarvestConfig, TaskRunner};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = HarvestConfig::builder()
//!         .output_dir("scans")
//!         .credentials(Credentials::new("me@example.org", "secret"))
//!         .build()?;
//!     let tasks = load_tasks("tasks.txt".as_ref())?;
//!     let connector = Arc::new(ChromeConnector::new(&config));
//!     let summary = TaskRunner::new(config, connector).run(&tasks).await?;
//!     eprintln!("{} completed, {} skipped", summary.completed.len(), summary.skipped.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature   | Default | Description |
//! |-----------|---------|-------------|
//! | `browser` | on      | [`ChromeConnector`], a headless-Chrome viewer via chromiumoxide |
//! | `cli`     | on      | The `scan-harvest` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Without `browser` the library still builds; supply your own
//! [`ViewerConnector`].

// ── Modules ──────────────────────────────────────────────────────────────

#[cfg(feature = "browser")]
pub mod browser;
pub mod config;
pub mod error;
pub mod item;
pub mod pipeline;
pub mod poll;
pub mod progress;
pub mod runner;
pub mod status;
pub mod task;
pub mod viewer;
pub mod workdir;

// ── Re-exports ───────────────────────────────────────────────────────────

#[cfg(feature = "browser")]
pub use browser::{ChromeConnector, ChromeViewer};
pub use config::{
    BackoffKind, ConfigFile, Credentials, HarvestConfig, HarvestConfigBuilder, RetryPolicy,
};
pub use error::{HarvestError, PageError, ViewerError};
pub use item::{ItemOutcome, ItemPipeline, ItemState};
pub use pipeline::package::{Packaging, PackagingReport, StageOutcome};
pub use poll::PollSettings;
pub use progress::{HarvestProgressCallback, NoopProgressCallback, ProgressCallback};
pub use runner::{FailedItem, RunSummary, TaskRunner};
pub use status::{ItemStatus, StatusReport};
pub use task::{load_tasks, parse_tasks, ItemKey};
pub use viewer::{Viewer, ViewerConnector};
pub use workdir::{PageKind, PageSet, WorkingDirectory};
