//! ItemPipeline: one item from login to archive.
//!
//! ```text
//! NotStarted ─▶ Authenticated ─▶ Located ─▶ ViewerOpen ─▶ Capturing
//!                                                            │
//!        Done ◀── Packaged ◀──────────── Verified ◀──────────┘
//! ```
//!
//! Any step can drop into `Failed`; the caller decides whether to try the
//! item again. Two shortcuts bypass the viewer entirely:
//!
//! * the archive already exists → `Done` with [`ItemOutcome::Skipped`];
//! * a verified capture is still on disk (manifest plus pages, or a paged
//!   document plus re-encoded pages) → straight to packaging with
//!   [`ItemOutcome::Resumed`].
//!
//! A viewer connection is opened only when pages actually have to be
//! captured, and it is always closed before this call returns.

use crate::config::HarvestConfig;
use crate::error::{HarvestError, ViewerError};
use crate::pipeline::capture::PageCapture;
use crate::pipeline::package::Packaging;
use crate::pipeline::probe::{parse_expected_count, SlideProbe};
use crate::progress::ProgressCallback;
use crate::task::ItemKey;
use crate::viewer::{Viewer, ViewerConnector};
use crate::workdir::{PageKind, WorkingDirectory};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where an item is in its acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemState {
    NotStarted,
    Authenticated,
    Located,
    ViewerOpen,
    Capturing,
    Verified,
    Packaged,
    Done,
    Failed,
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How an item reached `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ItemOutcome {
    /// The archive was already there; nothing was touched.
    Skipped,
    /// Packaging finished from pages already on disk, without the viewer.
    Resumed { pages: usize },
    /// Captured and packaged in this call.
    Completed { pages: usize },
}

/// Drives one item through the state machine.
pub struct ItemPipeline<'a> {
    config: &'a HarvestConfig,
    connector: &'a dyn ViewerConnector,
    cancel: Option<CancellationToken>,
    progress: Option<ProgressCallback>,
    state: ItemState,
}

impl<'a> ItemPipeline<'a> {
    pub fn new(config: &'a HarvestConfig, connector: &'a dyn ViewerConnector) -> Self {
        Self {
            config,
            connector,
            cancel: None,
            progress: None,
            state: ItemState::NotStarted,
        }
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_progress(mut self, progress: Option<ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// State reached by the last [`ItemPipeline::run`].
    pub fn state(&self) -> ItemState {
        self.state
    }

    /// Take `key` as far as `Done`.
    ///
    /// # Errors
    /// Any [`HarvestError`]; the state is then `Failed`. Pages already on
    /// disk are left in place so a later call can pick them up.
    pub async fn run(&mut self, key: &ItemKey) -> Result<ItemOutcome, HarvestError> {
        self.state = ItemState::NotStarted;
        let result = self.run_inner(key).await;
        match &result {
            Ok(_) => self.enter(key, ItemState::Done),
            Err(e) => {
                debug!(item = %key, from = %self.state, "Item failed: {e}");
                self.state = ItemState::Failed;
            }
        }
        result
    }

    async fn run_inner(&mut self, key: &ItemKey) -> Result<ItemOutcome, HarvestError> {
        let wd = WorkingDirectory::new(&self.config.output_dir, key);
        if wd.has_archive() {
            info!(item = %key, "Archive exists, skipping");
            return Ok(ItemOutcome::Skipped);
        }

        if let Some(pages) = resumable_pages(&wd)? {
            info!(item = %key, pages, "Verified capture on disk, resuming at packaging");
            self.enter(key, ItemState::Verified);
            self.package(&wd).await?;
            return Ok(ItemOutcome::Resumed { pages });
        }

        wd.ensure()?;
        let mut viewer = self
            .step("connect", self.connector.connect())
            .await?;
        let captured = self.acquire(viewer.as_mut(), &wd).await;
        if let Err(e) = viewer.close().await {
            warn!(item = %key, "Closing viewer failed: {e}");
        }
        let expected = captured?;

        wd.pages(PageKind::Raster)?.verify(expected)?;
        wd.write_manifest(expected)?;
        self.enter(key, ItemState::Verified);

        self.package(&wd).await?;
        Ok(ItemOutcome::Completed { pages: expected })
    }

    /// Login through capture. Returns the expected page count.
    async fn acquire(
        &mut self,
        viewer: &mut dyn Viewer,
        wd: &WorkingDirectory,
    ) -> Result<usize, HarvestError> {
        let key = wd.key();

        self.step("login", viewer.login(&self.config.credentials))
            .await?;
        self.enter(key, ItemState::Authenticated);

        self.step("search", viewer.locate(key)).await?;
        self.enter(key, ItemState::Located);

        let text = self.step("metadata", viewer.metadata_text()).await?;
        let expected = match parse_expected_count(&text) {
            Some(0) => return Err(HarvestError::NoScans { key: key.to_string() }),
            Some(n) => n,
            None => {
                return Err(HarvestError::ExpectedCountMissing {
                    text: text.trim().to_string(),
                })
            }
        };
        info!(item = %key, expected, "Scanned-page counter read");
        if let Some(cb) = &self.progress {
            cb.on_item_expected(key, expected);
        }

        self.step("open viewer", viewer.open_viewer()).await?;
        let mut probe = SlideProbe::new(viewer, self.config.poll, self.cancel.clone());
        probe.capture_current_page(1).await?;
        self.enter(key, ItemState::ViewerOpen);

        self.enter(key, ItemState::Capturing);
        let progress = self.progress.clone();
        PageCapture::new(probe, wd, progress.as_ref())
            .run(expected)
            .await?;
        Ok(expected)
    }

    async fn package(&mut self, wd: &WorkingDirectory) -> Result<(), HarvestError> {
        let packaged = Packaging::new(wd, self.config.jpeg_quality).run().await;
        if let Err(HarvestError::Encode { path, .. }) = &packaged {
            // an undecodable page must not be resumed from disk again
            warn!(item = %wd.key(), "Dropping capture checkpoint and {}", path.display());
            wd.remove_manifest()?;
            if path.is_file() {
                std::fs::remove_file(path).map_err(|e| HarvestError::io(path, e))?;
            }
        }
        packaged?;
        if !wd.has_archive() {
            return Err(HarvestError::ArchiveMissing {
                path: wd.archive_path(),
            });
        }
        wd.remove_manifest()?;
        self.enter(wd.key(), ItemState::Packaged);
        Ok(())
    }

    /// Await one viewer action, giving up early on cancellation.
    async fn step<T>(
        &self,
        stage: &'static str,
        action: impl Future<Output = Result<T, ViewerError>>,
    ) -> Result<T, HarvestError> {
        let result = match &self.cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => return Err(HarvestError::Cancelled),
                r = action => r,
            },
            None => action.await,
        };
        result.map_err(|e| HarvestError::viewer(stage, e))
    }

    fn enter(&mut self, key: &ItemKey, next: ItemState) {
        debug!(item = %key, from = %self.state, to = %next, "State transition");
        self.state = next;
    }
}

/// Page count of a verified capture that can be packaged without the viewer.
///
/// Either the manifest is present and raster ∪ re-encoded pages are exactly
/// `1..=expected`, or the paged document exists alongside re-encoded pages.
pub fn resumable_pages(wd: &WorkingDirectory) -> Result<Option<usize>, HarvestError> {
    if !wd.exists() {
        return Ok(None);
    }
    let encoded = wd.pages(PageKind::Encoded)?;
    if wd.has_document() && !encoded.is_empty() {
        return Ok(Some(encoded.len()));
    }
    let Some(manifest) = wd.read_manifest() else {
        return Ok(None);
    };
    if manifest.key != *wd.key() || manifest.expected_count == 0 {
        return Ok(None);
    }
    let mut numbers: BTreeSet<usize> = encoded.numbers().into_iter().collect();
    numbers.extend(wd.pages(PageKind::Raster)?.numbers());
    let complete = numbers.len() == manifest.expected_count
        && numbers.iter().copied().eq(1..=manifest.expected_count);
    Ok(complete.then_some(manifest.expected_count))
}
