//! SlideProbe: page-boundary detection on an upstream without events.
//!
//! The viewer never says "page ready". All the probe can do is read the
//! displayed page's presentation string over and over and compare it with
//! the last one seen. That string doubles as the fingerprint (compared
//! verbatim, so transient intermediate states count as a change) and as the
//! carrier of the page image, embedded as a base64 data URI.

use crate::error::PageError;
use crate::poll::{PollEnd, PollSettings, Poller};
use crate::viewer::Viewer;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

static DATA_URI: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"data:(image/[A-Za-z0-9.+-]+);base64,([^"')]+)"#).expect("valid regex")
});

static SCANNED_COUNTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:Отсканировано|Scanned)\s*:\s*(\d+)").expect("valid regex")
});

/// One page read from the viewer.
#[derive(Debug, Clone)]
pub struct CapturedPage {
    /// Presentation string the page was read from.
    pub fingerprint: String,
    /// MIME type announced by the data URI.
    pub mime: String,
    /// Decoded image bytes.
    pub bytes: Vec<u8>,
}

/// Base64 payload and MIME type embedded in a presentation string.
pub fn extract_payload(state: &str) -> Option<(&str, String)> {
    let caps = DATA_URI.captures(state)?;
    let mime = caps.get(1)?.as_str();
    let payload: String = caps
        .get(2)?
        .as_str()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if payload.is_empty() {
        return None;
    }
    Some((mime, payload))
}

/// Scanned-page counter from the item metadata text (`Scanned: N`).
pub fn parse_expected_count(text: &str) -> Option<usize> {
    SCANNED_COUNTER
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Polling reader over one viewer connection.
pub struct SlideProbe<'a> {
    viewer: &'a mut dyn Viewer,
    settings: PollSettings,
    cancel: Option<CancellationToken>,
    cancelled: bool,
}

impl<'a> SlideProbe<'a> {
    pub fn new(
        viewer: &'a mut dyn Viewer,
        settings: PollSettings,
        cancel: Option<CancellationToken>,
    ) -> Self {
        Self {
            viewer,
            settings,
            cancel,
            cancelled: false,
        }
    }

    /// `true` once any wait ended because of cancellation.
    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn settings(&self) -> PollSettings {
        self.settings
    }

    fn poller(&self) -> Poller {
        Poller::new(self.settings, self.cancel.clone())
    }

    fn note_end(&mut self, poller: &Poller) {
        if poller.ended() == Some(PollEnd::Cancelled) {
            self.cancelled = true;
        }
    }

    /// Read and decode the currently displayed page.
    ///
    /// Polls until the presentation state carries a data URI; missing
    /// elements and empty states are treated as "not rendered yet".
    /// `page` only labels errors.
    pub async fn capture_current_page(&mut self, page: usize) -> Result<CapturedPage, PageError> {
        let mut poller = self.poller();
        loop {
            match self.viewer.presentation_state().await {
                Ok(state) => {
                    if let Some((mime, payload)) = extract_payload(&state) {
                        let bytes = STANDARD.decode(payload.as_bytes()).map_err(|e| {
                            PageError::Decode {
                                page,
                                detail: e.to_string(),
                            }
                        })?;
                        debug!(page, mime, bytes = bytes.len(), "Decoded page image");
                        let mime = mime.to_string();
                        return Ok(CapturedPage {
                            fingerprint: state,
                            mime,
                            bytes,
                        });
                    }
                    trace!(page, "Presentation state has no image yet");
                }
                Err(e) if e.is_transient() => trace!(page, "Image not ready: {e}"),
                Err(e) => {
                    return Err(PageError::Viewer {
                        page,
                        detail: e.to_string(),
                    })
                }
            }
            if !poller.tick().await {
                self.note_end(&poller);
                return Err(if self.cancelled {
                    PageError::Cancelled { page }
                } else {
                    PageError::ImageNotFound {
                        page,
                        ms: self.settings.ceiling_ms(),
                    }
                });
            }
        }
    }

    /// Current fingerprint, if the viewer can report one right now.
    pub async fn fingerprint(&mut self) -> Option<String> {
        self.viewer.presentation_state().await.ok()
    }

    /// Wait until the fingerprint differs from `previous`.
    ///
    /// Returns `false` on timeout, cancellation or a non-transient viewer
    /// failure.
    pub async fn wait_for_change(&mut self, previous: &str) -> bool {
        let mut poller = self.poller();
        loop {
            match self.viewer.presentation_state().await {
                Ok(state) if state != previous => return true,
                Ok(_) => {}
                Err(e) if e.is_transient() => trace!("Presentation state unavailable: {e}"),
                Err(e) => {
                    warn!("Viewer failed while waiting for page change: {e}");
                    return false;
                }
            }
            if !poller.tick().await {
                self.note_end(&poller);
                return false;
            }
        }
    }

    /// Wait for the "next" control to become interactable, then click it.
    ///
    /// Returns `false` if it never does within the ceiling. That covers both
    /// "no further pages" and "viewer unresponsive"; the two look the same
    /// from here.
    pub async fn advance_page(&mut self) -> bool {
        let mut poller = self.poller();
        loop {
            match self.viewer.try_advance().await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(e) if e.is_transient() => trace!("Next control not ready: {e}"),
                Err(e) => {
                    warn!("Viewer failed while advancing: {e}");
                    return false;
                }
            }
            if !poller.tick().await {
                self.note_end(&poller);
                return false;
            }
        }
    }

    /// Session time left as shown by the viewer, if any.
    pub async fn session_time_left(&mut self) -> Option<String> {
        self.viewer.session_time_left().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_payload_from_style() {
        let style = r#"width: 800px; background-image: url("data:image/png;base64,iVBO Rw0K");"#;
        let (mime, payload) = extract_payload(style).unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(payload, "iVBORw0K");
    }

    #[test]
    fn extracts_payload_with_single_quotes() {
        let style = "background-image: url('data:image/jpeg;base64,/9j/4AAQ')";
        let (mime, payload) = extract_payload(style).unwrap();
        assert_eq!(mime, "image/jpeg");
        assert_eq!(payload, "/9j/4AAQ");
    }

    #[test]
    fn no_payload_in_plain_style() {
        assert!(extract_payload("display: none;").is_none());
        assert!(extract_payload("").is_none());
    }

    #[test]
    fn parses_counter_in_both_languages() {
        assert_eq!(parse_expected_count("Фонд 48\nОтсканировано: 312\nОпись 1"), Some(312));
        assert_eq!(parse_expected_count("Scanned: 3"), Some(3));
        assert_eq!(parse_expected_count("scanned:7 pages"), Some(7));
        assert_eq!(parse_expected_count("Страниц: 12"), None);
    }
}
