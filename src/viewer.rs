//! The remote viewer, as the pipeline sees it.
//!
//! The viewing service is an opaque, stateful, event-less upstream. These two
//! traits are the only seam between it and the rest of the crate:
//!
//! * [`ViewerConnector`] opens a fresh connection (one per item attempt).
//! * [`Viewer`] is that connection: a handful of coarse actions plus two raw
//!   reads (`presentation_state`, `metadata_text`). Interpreting those
//!   reads (fingerprints, data URIs, page counters) happens in
//!   [`crate::pipeline::probe`].
//!
//! The headless-Chrome implementation is in [`crate::browser`] (feature
//! `browser`); tests drive the pipeline with scripted in-memory viewers.

use crate::config::Credentials;
use crate::error::ViewerError;
use crate::task::ItemKey;
use async_trait::async_trait;

/// One exclusively-owned connection to the remote viewer.
///
/// Every method is a single non-blocking-ish step; waiting and retrying is
/// the caller's job. Element-level absence should be reported as
/// [`ViewerError::NotFound`] so pollers can treat it as "not ready yet".
#[async_trait]
pub trait Viewer: Send {
    /// Submit credentials and wait for the logged-in landing page.
    async fn login(&mut self, credentials: &Credentials) -> Result<(), ViewerError>;

    /// Search by composite key. Succeeds only if exactly one item matches
    /// ([`ViewerError::NotUnique`] otherwise).
    async fn locate(&mut self, key: &ItemKey) -> Result<(), ViewerError>;

    /// Raw text of the located item's metadata block, which carries the
    /// scanned-page counter.
    async fn metadata_text(&mut self) -> Result<String, ViewerError>;

    /// Open the scan-viewer overlay on the first page.
    async fn open_viewer(&mut self) -> Result<(), ViewerError>;

    /// The displayed page's presentation string (the style attribute that
    /// embeds the image as a data URI). Used verbatim as the fingerprint.
    async fn presentation_state(&mut self) -> Result<String, ViewerError>;

    /// Click the "next page" control if it is currently interactable.
    ///
    /// `Ok(false)` means the control exists but is not clickable yet.
    async fn try_advance(&mut self) -> Result<bool, ViewerError>;

    /// Remaining session time as displayed by the viewer, if shown.
    async fn session_time_left(&mut self) -> Option<String> {
        None
    }

    /// Tear the connection down.
    async fn close(self: Box<Self>) -> Result<(), ViewerError>;
}

/// Factory for fresh viewer connections.
#[async_trait]
pub trait ViewerConnector: Send + Sync {
    /// Open a new connection with clean session state.
    async fn connect(&self) -> Result<Box<dyn Viewer>, ViewerError>;
}
