//! Error types for the scan-harvest library.
//!
//! Three error types reflect three distinct failure layers:
//!
//! * [`ViewerError`] — the remote viewer misbehaved: an element was missing,
//!   a wait timed out, a handle went stale. Most of these are transient and
//!   are absorbed by polling; [`ViewerError::is_transient`] tells which.
//!
//! * [`PageError`] — capture of one page failed after its polling budget was
//!   spent. Every variant carries the 1-based page index at which capture
//!   stopped, so callers see exactly how far a partial capture got.
//!
//! * [`HarvestError`] — the current item attempt (or the whole run) cannot
//!   proceed. Returned as `Err(HarvestError)` from the item pipeline and the
//!   task runner.

use std::path::PathBuf;
use thiserror::Error;

/// Failures reported by a [`crate::viewer::Viewer`] implementation.
#[derive(Debug, Clone, Error)]
pub enum ViewerError {
    /// The element or state the caller asked for is not present (yet).
    #[error("viewer element not found: {what}")]
    NotFound { what: String },

    /// A bounded wait expired.
    #[error("timed out after {ms}ms waiting for {what}")]
    Timeout { what: String, ms: u64 },

    /// The element handle was invalidated by a re-render.
    #[error("stale element handle: {what}")]
    StaleHandle { what: String },

    /// Search by key did not resolve to exactly one item.
    #[error("search for {key} returned {found} results, expected exactly 1")]
    NotUnique { key: String, found: usize },

    /// The automation backend itself failed (launch, protocol, navigation).
    #[error("browser error: {0}")]
    Browser(String),

    /// The wait was interrupted by cancellation.
    #[error("cancelled while waiting for {what}")]
    Cancelled { what: String },
}

impl ViewerError {
    /// `true` for failures that mean "not ready yet, keep polling".
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ViewerError::NotFound { .. }
                | ViewerError::Timeout { .. }
                | ViewerError::StaleHandle { .. }
        )
    }

    /// Shorthand for [`ViewerError::NotFound`].
    pub fn not_found(what: impl Into<String>) -> Self {
        ViewerError::NotFound { what: what.into() }
    }
}

/// A capture failure for a single page.
///
/// `page` is the 1-based index of the page that could not be captured.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// The "next" control never became interactable.
    #[error("page {page}: next-page control not available within {ms}ms")]
    AdvanceStalled { page: usize, ms: u64 },

    /// Navigation was triggered but the displayed page never changed.
    #[error("page {page}: viewer state did not change within {ms}ms")]
    ChangeTimeout { page: usize, ms: u64 },

    /// The presentation state held no decodable image payload.
    #[error("page {page}: no image payload in viewer state within {ms}ms")]
    ImageNotFound { page: usize, ms: u64 },

    /// The embedded payload was not valid base64 or not a decodable image.
    #[error("page {page}: image payload could not be decoded: {detail}")]
    Decode { page: usize, detail: String },

    /// The viewer failed in a way polling cannot absorb.
    #[error("page {page}: viewer failed: {detail}")]
    Viewer { page: usize, detail: String },

    /// The raster file could not be written.
    #[error("page {page}: failed to write raster: {detail}")]
    Write { page: usize, detail: String },

    /// Capture was interrupted by cancellation.
    #[error("page {page}: capture cancelled")]
    Cancelled { page: usize },
}

impl PageError {
    /// The 1-based page index at which capture stopped.
    pub fn page(&self) -> usize {
        match self {
            PageError::AdvanceStalled { page, .. }
            | PageError::ChangeTimeout { page, .. }
            | PageError::ImageNotFound { page, .. }
            | PageError::Decode { page, .. }
            | PageError::Viewer { page, .. }
            | PageError::Write { page, .. }
            | PageError::Cancelled { page } => *page,
        }
    }
}

/// All errors that abort an item attempt or the whole run.
#[derive(Debug, Error)]
pub enum HarvestError {
    // ── Startup errors (fatal for the run) ────────────────────────────────
    /// The config file does not exist.
    #[error("config file not found: '{path}'")]
    ConfigNotFound { path: PathBuf },

    /// Builder or config-file validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The task list does not exist or cannot be read.
    #[error("task list not found: '{path}'")]
    TaskListNotFound { path: PathBuf },

    // ── Upstream errors ───────────────────────────────────────────────────
    /// The viewer failed outside page capture (login, search, open).
    #[error("viewer failed during {stage}: {source}")]
    Viewer {
        stage: &'static str,
        #[source]
        source: ViewerError,
    },

    /// Page capture stopped before reaching the expected count.
    #[error("capture stopped at page {}: {source}", .source.page())]
    Capture {
        #[source]
        source: PageError,
    },

    // ── Structural mismatches ─────────────────────────────────────────────
    /// The number of captured pages differs from the upstream count.
    #[error("captured {captured} pages but the viewer reports {expected}")]
    CountMismatch { expected: usize, captured: usize },

    /// The captured pages are not numbered 1..=N without gaps.
    #[error("captured pages are not contiguous: missing page {missing}")]
    PageGap { missing: usize },

    /// The item metadata has no page counter.
    #[error("item metadata has no scanned-page counter: {text:?}")]
    ExpectedCountMissing { text: String },

    /// The item reports zero scanned pages.
    #[error("item {key} has no scanned pages")]
    NoScans { key: String },

    // ── Packaging errors ──────────────────────────────────────────────────
    /// A raster page could not be decoded or re-encoded.
    #[error("re-encode of '{path}' failed: {detail}")]
    Encode { path: PathBuf, detail: String },

    /// The paged document could not be assembled.
    #[error("paged document '{path}' failed: {detail}")]
    Document { path: PathBuf, detail: String },

    /// The archive could not be written.
    #[error("archive '{path}' failed: {detail}")]
    Archive { path: PathBuf, detail: String },

    /// A packaging stage found no input pages.
    #[error("no {kind} pages found in '{dir}'")]
    NoPages { kind: &'static str, dir: PathBuf },

    /// The pipeline reported success but the archive is absent.
    #[error("archive '{path}' is missing after a successful run")]
    ArchiveMissing { path: PathBuf },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Working-directory I/O failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Control ───────────────────────────────────────────────────────────
    /// The run was cancelled.
    #[error("cancelled")]
    Cancelled,

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl HarvestError {
    /// `true` when the error must stop the whole run rather than trigger
    /// another attempt at the current item.
    pub fn is_fatal_for_run(&self) -> bool {
        matches!(
            self,
            HarvestError::ConfigNotFound { .. }
                | HarvestError::InvalidConfig(_)
                | HarvestError::TaskListNotFound { .. }
                | HarvestError::Cancelled
        )
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HarvestError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn viewer(stage: &'static str, source: ViewerError) -> Self {
        match source {
            ViewerError::Cancelled { .. } => HarvestError::Cancelled,
            source => HarvestError::Viewer { stage, source },
        }
    }
}

impl From<PageError> for HarvestError {
    fn from(source: PageError) -> Self {
        match source {
            PageError::Cancelled { .. } => HarvestError::Cancelled,
            source => HarvestError::Capture { source },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_error_reports_page() {
        let e: HarvestError = PageError::AdvanceStalled { page: 7, ms: 5000 }.into();
        let msg = e.to_string();
        assert!(msg.contains("page 7"), "got: {msg}");
        assert!(msg.contains("5000ms"), "got: {msg}");
    }

    #[test]
    fn count_mismatch_display() {
        let e = HarvestError::CountMismatch {
            expected: 12,
            captured: 9,
        };
        let msg = e.to_string();
        assert!(msg.contains("9") && msg.contains("12"), "got: {msg}");
    }

    #[test]
    fn transient_classification() {
        assert!(ViewerError::not_found(".scanImage").is_transient());
        assert!(ViewerError::StaleHandle { what: "x".into() }.is_transient());
        assert!(!ViewerError::NotUnique {
            key: "1-2-3".into(),
            found: 2
        }
        .is_transient());
        assert!(!ViewerError::Browser("crashed".into()).is_transient());
    }

    #[test]
    fn cancellation_collapses_to_cancelled() {
        let e: HarvestError = PageError::Cancelled { page: 2 }.into();
        assert!(matches!(e, HarvestError::Cancelled));
        let e = HarvestError::viewer("login", ViewerError::Cancelled { what: "x".into() });
        assert!(e.is_fatal_for_run());
    }

    #[test]
    fn item_errors_are_retryable() {
        let e = HarvestError::NoScans { key: "1-1-1".into() };
        assert!(!e.is_fatal_for_run());
        assert!(HarvestError::InvalidConfig("x".into()).is_fatal_for_run());
    }
}
