//! On-disk working directory of one item.
//!
//! The directory is the checkpoint store: every decision about what is left
//! to do is made from its contents alone, so a run killed at any point can be
//! picked up by the next one.
//!
//! ```text
//! <output_dir>/<c>-<s>-<i>/
//!   1.png 2.png …          raw rasters (capture)
//!   1.jpg 2.jpg …          re-encoded pages (packaging stage 1)
//!   manifest.json          verified capture checkpoint
//!   <c>-<s>-<i>.pdf        paged document
//!   <c>-<s>-<i>.zip        archive, the completion marker
//! ```

use crate::error::HarvestError;
use crate::task::ItemKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

const MANIFEST_FILE: &str = "manifest.json";

/// The two transient page encodings kept in a working directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageKind {
    /// Raw raster as delivered by the viewer.
    Raster,
    /// Lossy re-encoded page.
    Encoded,
}

impl PageKind {
    pub fn extension(self) -> &'static str {
        match self {
            PageKind::Raster => "png",
            PageKind::Encoded => "jpg",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PageKind::Raster => "raster",
            PageKind::Encoded => "re-encoded",
        }
    }
}

/// One page file, numbered by the integer embedded in its file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFile {
    pub number: usize,
    pub path: PathBuf,
}

/// Pages of one kind, sorted by page number.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageSet {
    pages: Vec<PageFile>,
}

impl PageSet {
    pub fn from_files(mut pages: Vec<PageFile>) -> Self {
        pages.sort_by_key(|p| p.number);
        Self { pages }
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PageFile> {
        self.pages.iter()
    }

    pub fn numbers(&self) -> Vec<usize> {
        self.pages.iter().map(|p| p.number).collect()
    }

    /// First page number in `1..=len` that is absent, if any.
    ///
    /// A set is complete when this is `None`: numbers are exactly `1..=N`.
    pub fn first_gap(&self) -> Option<usize> {
        self.pages
            .iter()
            .enumerate()
            .find(|(i, p)| p.number != i + 1)
            .map(|(i, _)| i + 1)
    }

    /// Check the set is exactly `1..=expected`.
    pub fn verify(&self, expected: usize) -> Result<(), HarvestError> {
        if self.len() != expected {
            return Err(HarvestError::CountMismatch {
                expected,
                captured: self.len(),
            });
        }
        match self.first_gap() {
            Some(missing) => Err(HarvestError::PageGap { missing }),
            None => Ok(()),
        }
    }
}

impl<'a> IntoIterator for &'a PageSet {
    type Item = &'a PageFile;
    type IntoIter = std::slice::Iter<'a, PageFile>;

    fn into_iter(self) -> Self::IntoIter {
        self.pages.iter()
    }
}

/// Checkpoint written once a capture has been verified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureManifest {
    pub key: ItemKey,
    pub expected_count: usize,
    pub captured_at: DateTime<Utc>,
}

/// All artifacts of one item live here.
#[derive(Debug, Clone)]
pub struct WorkingDirectory {
    key: ItemKey,
    root: PathBuf,
}

impl WorkingDirectory {
    /// Path-only handle; nothing is created on disk.
    pub fn new(output_dir: &Path, key: &ItemKey) -> Self {
        Self {
            key: key.clone(),
            root: output_dir.join(key.folder_name()),
        }
    }

    /// Create the directory if needed.
    pub fn ensure(&self) -> Result<(), HarvestError> {
        std::fs::create_dir_all(&self.root).map_err(|e| HarvestError::io(&self.root, e))
    }

    pub fn key(&self) -> &ItemKey {
        &self.key
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn exists(&self) -> bool {
        self.root.is_dir()
    }

    pub fn page_path(&self, kind: PageKind, number: usize) -> PathBuf {
        self.root.join(format!("{number}.{}", kind.extension()))
    }

    pub fn document_path(&self) -> PathBuf {
        self.root.join(format!("{}.pdf", self.key.folder_name()))
    }

    pub fn archive_path(&self) -> PathBuf {
        self.root.join(format!("{}.zip", self.key.folder_name()))
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    pub fn has_document(&self) -> bool {
        self.document_path().is_file()
    }

    pub fn has_archive(&self) -> bool {
        self.archive_path().is_file()
    }

    /// Scan the directory for page files of `kind`.
    ///
    /// Only names of the form `<integer>.<ext>` count; anything else is
    /// ignored. A missing directory yields an empty set.
    pub fn pages(&self, kind: PageKind) -> Result<PageSet, HarvestError> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(PageSet::default()),
            Err(e) => return Err(HarvestError::io(&self.root, e)),
        };
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| HarvestError::io(&self.root, e))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if let Some(number) = page_number(&path, kind) {
                files.push(PageFile { number, path });
            }
        }
        Ok(PageSet::from_files(files))
    }

    pub fn page_count(&self, kind: PageKind) -> Result<usize, HarvestError> {
        Ok(self.pages(kind)?.len())
    }

    /// Delete every page file of `kind`.
    pub fn remove_pages(&self, kind: PageKind) -> Result<usize, HarvestError> {
        let pages = self.pages(kind)?;
        for page in &pages {
            std::fs::remove_file(&page.path).map_err(|e| HarvestError::io(&page.path, e))?;
        }
        Ok(pages.len())
    }

    /// Reset before a fresh capture: drop stale pages of both kinds, any
    /// manifest and any paged document built from an earlier capture.
    pub fn clear_for_capture(&self) -> Result<(), HarvestError> {
        self.ensure()?;
        let rasters = self.remove_pages(PageKind::Raster)?;
        let encoded = self.remove_pages(PageKind::Encoded)?;
        for path in [self.manifest_path(), self.document_path()] {
            remove_if_exists(&path)?;
        }
        if rasters + encoded > 0 {
            debug!(
                item = %self.key,
                rasters, encoded, "Cleared stale pages before capture"
            );
        }
        Ok(())
    }

    /// Persist the verified-capture checkpoint.
    pub fn write_manifest(&self, expected_count: usize) -> Result<CaptureManifest, HarvestError> {
        let manifest = CaptureManifest {
            key: self.key.clone(),
            expected_count,
            captured_at: Utc::now(),
        };
        let path = self.manifest_path();
        let json = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| HarvestError::Internal(format!("manifest serialisation: {e}")))?;
        std::fs::write(&path, json).map_err(|e| HarvestError::io(&path, e))?;
        Ok(manifest)
    }

    /// Read the checkpoint, if present and readable.
    pub fn read_manifest(&self) -> Option<CaptureManifest> {
        let bytes = std::fs::read(self.manifest_path()).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    pub fn remove_manifest(&self) -> Result<(), HarvestError> {
        remove_if_exists(&self.manifest_path())
    }
}

/// Page number embedded in a file name like `12.png`.
pub fn page_number(path: &Path, kind: PageKind) -> Option<usize> {
    let ext = path.extension()?.to_str()?;
    if !ext.eq_ignore_ascii_case(kind.extension()) {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}

fn remove_if_exists(path: &Path) -> Result<(), HarvestError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(HarvestError::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workdir() -> (tempfile::TempDir, WorkingDirectory) {
        let tmp = tempfile::tempdir().unwrap();
        let wd = WorkingDirectory::new(tmp.path(), &ItemKey::new("100", "1", "5"));
        wd.ensure().unwrap();
        (tmp, wd)
    }

    fn touch(path: &Path) {
        std::fs::write(path, b"x").unwrap();
    }

    #[test]
    fn artifact_names_follow_key() {
        let wd = WorkingDirectory::new(Path::new("out"), &ItemKey::new("100", "1", "5"));
        assert_eq!(wd.root(), Path::new("out/100-1-5"));
        assert_eq!(wd.document_path(), Path::new("out/100-1-5/100-1-5.pdf"));
        assert_eq!(wd.archive_path(), Path::new("out/100-1-5/100-1-5.zip"));
        assert_eq!(wd.page_path(PageKind::Encoded, 3), Path::new("out/100-1-5/3.jpg"));
    }

    #[test]
    fn pages_sort_numerically() {
        let (_tmp, wd) = workdir();
        for n in [10, 9, 1, 2, 11] {
            touch(&wd.page_path(PageKind::Raster, n));
        }
        touch(&wd.root().join("notes.png"));
        touch(&wd.root().join("3.txt"));
        let set = wd.pages(PageKind::Raster).unwrap();
        assert_eq!(set.numbers(), vec![1, 2, 9, 10, 11]);
        assert_eq!(set.first_gap(), Some(3));
    }

    #[test]
    fn verify_checks_count_and_gaps() {
        let files = |ns: &[usize]| {
            PageSet::from_files(
                ns.iter()
                    .map(|&n| PageFile {
                        number: n,
                        path: PathBuf::from(format!("{n}.png")),
                    })
                    .collect(),
            )
        };
        assert!(files(&[3, 1, 2]).verify(3).is_ok());
        assert!(matches!(
            files(&[1, 2]).verify(3),
            Err(HarvestError::CountMismatch { expected: 3, captured: 2 })
        ));
        assert!(matches!(
            files(&[1, 2, 4]).verify(3),
            Err(HarvestError::PageGap { missing: 3 })
        ));
    }

    #[test]
    fn missing_directory_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let wd = WorkingDirectory::new(tmp.path(), &ItemKey::new("1", "1", "1"));
        assert!(wd.pages(PageKind::Raster).unwrap().is_empty());
        assert!(!wd.exists());
    }

    #[test]
    fn clear_for_capture_keeps_archive() {
        let (_tmp, wd) = workdir();
        touch(&wd.page_path(PageKind::Raster, 1));
        touch(&wd.page_path(PageKind::Encoded, 2));
        touch(&wd.document_path());
        touch(&wd.archive_path());
        wd.write_manifest(2).unwrap();

        wd.clear_for_capture().unwrap();

        assert!(wd.pages(PageKind::Raster).unwrap().is_empty());
        assert!(wd.pages(PageKind::Encoded).unwrap().is_empty());
        assert!(!wd.has_document());
        assert!(wd.read_manifest().is_none());
        assert!(wd.has_archive());
    }

    #[test]
    fn manifest_round_trip() {
        let (_tmp, wd) = workdir();
        let written = wd.write_manifest(42).unwrap();
        let read = wd.read_manifest().unwrap();
        assert_eq!(read, written);
        assert_eq!(read.key.folder_name(), "100-1-5");
    }
}
