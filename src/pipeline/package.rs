//! Packaging: re-encode → paged document → archive.
//!
//! Every stage checks the disk before doing anything, so calling
//! [`Packaging::run`] again after a crash or a failed stage only performs the
//! stages whose output is still missing.

use crate::error::HarvestError;
use crate::pipeline::{archive, document, encode};
use crate::workdir::{PageKind, WorkingDirectory};
use serde::Serialize;
use tracing::{debug, info};

/// What one stage did on this call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    /// The stage ran and handled this many pages.
    Done(usize),
    /// The stage's artifact was already present, or its input was not.
    Skipped,
}

/// Per-stage outcome of one packaging call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PackagingReport {
    pub reencode: StageOutcome,
    pub document: StageOutcome,
    pub archive: StageOutcome,
}

/// Packaging for one working directory.
pub struct Packaging<'a> {
    workdir: &'a WorkingDirectory,
    jpeg_quality: u8,
}

impl<'a> Packaging<'a> {
    pub fn new(workdir: &'a WorkingDirectory, jpeg_quality: u8) -> Self {
        Self {
            workdir,
            jpeg_quality,
        }
    }

    /// Run the stages whose artifacts are missing.
    ///
    /// The first failing stage stops the call; its error is returned and
    /// nothing downstream of it runs.
    pub async fn run(&self) -> Result<PackagingReport, HarvestError> {
        let wd = self.workdir;

        let reencode = match encode::reencode_pages(wd, self.jpeg_quality).await? {
            0 => StageOutcome::Skipped,
            n => StageOutcome::Done(n),
        };

        let document = if wd.has_document() {
            debug!(item = %wd.key(), "Paged document exists, skipping");
            StageOutcome::Skipped
        } else {
            let pages = wd.pages(PageKind::Encoded)?;
            StageOutcome::Done(document::write_document(wd, pages).await?)
        };

        let archive = if wd.has_archive() {
            debug!(item = %wd.key(), "Archive exists, skipping");
            StageOutcome::Skipped
        } else if !wd.has_document() {
            debug!(item = %wd.key(), "No paged document yet, archive deferred");
            StageOutcome::Skipped
        } else {
            let pages = wd.pages(PageKind::Encoded)?;
            StageOutcome::Done(archive::write_archive(wd, pages).await?)
        };

        let report = PackagingReport {
            reencode,
            document,
            archive,
        };
        info!(item = %wd.key(), ?report, "Packaging finished");
        Ok(report)
    }
}
