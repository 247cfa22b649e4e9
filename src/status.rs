//! Completion report over a task list.
//!
//! The archive is the only externally checkable completion marker, so the
//! report is a pure filesystem scan and never talks to the viewer.

use crate::error::HarvestError;
use crate::task::ItemKey;
use crate::workdir::{PageKind, WorkingDirectory};
use serde::Serialize;
use std::path::Path;

/// Where an item stands on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// The archive exists.
    Complete,
    /// The working directory exists but holds no archive yet.
    Partial,
    /// Nothing on disk.
    Missing,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusEntry {
    pub key: ItemKey,
    pub status: ItemStatus,
    /// Raster and re-encoded pages currently in the working directory.
    pub pages_on_disk: usize,
    pub has_document: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusReport {
    pub entries: Vec<StatusEntry>,
}

impl StatusReport {
    pub fn count(&self, status: ItemStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }

    /// Keys of every item without an archive, in task-list order.
    pub fn incomplete(&self) -> impl Iterator<Item = &ItemKey> {
        self.entries
            .iter()
            .filter(|e| e.status != ItemStatus::Complete)
            .map(|e| &e.key)
    }

    /// Write [`StatusReport::incomplete`] to `path`, one folder name per line.
    pub fn write_missing(&self, path: &Path) -> Result<usize, HarvestError> {
        let lines: Vec<String> = self.incomplete().map(ItemKey::folder_name).collect();
        let mut text = lines.join("\n");
        if !text.is_empty() {
            text.push('\n');
        }
        std::fs::write(path, text).map_err(|e| HarvestError::io(path, e))?;
        Ok(lines.len())
    }
}

/// Classify each of `tasks` against `output_dir`.
pub fn report(tasks: &[ItemKey], output_dir: &Path) -> Result<StatusReport, HarvestError> {
    let mut entries = Vec::with_capacity(tasks.len());
    for key in tasks {
        let wd = WorkingDirectory::new(output_dir, key);
        let status = if wd.has_archive() {
            ItemStatus::Complete
        } else if wd.exists() {
            ItemStatus::Partial
        } else {
            ItemStatus::Missing
        };
        let pages_on_disk = wd.page_count(PageKind::Raster)? + wd.page_count(PageKind::Encoded)?;
        entries.push(StatusEntry {
            key: key.clone(),
            status,
            pages_on_disk,
            has_document: wd.has_document(),
        });
    }
    Ok(StatusReport { entries })
}
