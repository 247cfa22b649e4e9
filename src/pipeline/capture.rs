//! PageCapture: pull every page of one item into raw raster files.
//!
//! Termination is driven by the number of raster files on disk reaching the
//! expected count, not by the "next" control disappearing: the viewer does
//! not reliably disable that control on the last page. Failures are not
//! retried here. Partial viewer state cannot be resumed mid-session, so the
//! caller restarts the whole item instead.

use crate::error::{HarvestError, PageError};
use crate::pipeline::probe::{CapturedPage, SlideProbe};
use crate::progress::ProgressCallback;
use crate::workdir::{PageKind, PageSet, WorkingDirectory};
use tracing::{debug, info};

/// Drives a [`SlideProbe`] until `expected` pages are saved.
pub struct PageCapture<'a, 'v> {
    probe: SlideProbe<'v>,
    workdir: &'a WorkingDirectory,
    progress: Option<&'a ProgressCallback>,
}

impl<'a, 'v> PageCapture<'a, 'v> {
    pub fn new(
        probe: SlideProbe<'v>,
        workdir: &'a WorkingDirectory,
        progress: Option<&'a ProgressCallback>,
    ) -> Self {
        Self {
            probe,
            workdir,
            progress,
        }
    }

    /// Capture pages `1..=expected` into the working directory.
    ///
    /// # Errors
    /// - `HarvestError::Capture` carrying the page at which capture stopped,
    ///   including a page whose payload does not decode as an image
    /// - `HarvestError::Io` if the working directory cannot be read or reset
    /// - `HarvestError::Cancelled` if a poll was cancelled
    pub async fn run(mut self, expected: usize) -> Result<PageSet, HarvestError> {
        self.workdir.clear_for_capture()?;
        let ceiling_ms = self.probe.settings().ceiling_ms();

        let mut page = 1;
        let first = self.probe.capture_current_page(page).await?;
        let mut fingerprint = self.save(page, expected, &first).await?;

        while self.workdir.page_count(PageKind::Raster)? < expected {
            if !self.probe.advance_page().await {
                return Err(self.stopped(PageError::AdvanceStalled {
                    page,
                    ms: ceiling_ms,
                }));
            }
            if !self.probe.wait_for_change(&fingerprint).await {
                return Err(self.stopped(PageError::ChangeTimeout {
                    page: page + 1,
                    ms: ceiling_ms,
                }));
            }
            page += 1;
            let captured = self.probe.capture_current_page(page).await?;
            fingerprint = self.save(page, expected, &captured).await?;
        }

        let pages = self.workdir.pages(PageKind::Raster)?;
        debug!(item = %self.workdir.key(), pages = pages.len(), "Capture finished");
        Ok(pages)
    }

    fn stopped(&self, error: PageError) -> HarvestError {
        if self.probe.was_cancelled() {
            HarvestError::Cancelled
        } else {
            error.into()
        }
    }

    async fn save(
        &mut self,
        page: usize,
        expected: usize,
        captured: &CapturedPage,
    ) -> Result<String, HarvestError> {
        image::load_from_memory(&captured.bytes).map_err(|e| PageError::Decode {
            page,
            detail: format!("{} payload is not an image: {e}", captured.mime),
        })?;
        let path = self.workdir.page_path(PageKind::Raster, page);
        tokio::fs::write(&path, &captured.bytes)
            .await
            .map_err(|e| PageError::Write {
                page,
                detail: format!("{}: {e}", path.display()),
            })?;

        let time_left = self.probe.session_time_left().await;
        match &time_left {
            Some(left) => info!(
                "Page {}/{} saved to {} (session time left {})",
                page,
                expected,
                path.display(),
                left
            ),
            None => info!("Page {}/{} saved to {}", page, expected, path.display()),
        }
        if let Some(cb) = self.progress {
            cb.on_page_saved(self.workdir.key(), page, expected, time_left.as_deref());
        }
        Ok(captured.fingerprint.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Credentials;
    use crate::error::ViewerError;
    use crate::poll::PollSettings;
    use crate::task::ItemKey;
    use crate::viewer::Viewer;
    use async_trait::async_trait;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use std::io::Cursor;
    use std::time::Duration;

    /// Serves `styles` in order; a click moves on unless `frozen`.
    struct Scripted {
        styles: Vec<String>,
        current: usize,
        frozen: bool,
    }

    impl Scripted {
        fn new(styles: Vec<String>) -> Self {
            Self {
                styles,
                current: 0,
                frozen: false,
            }
        }
    }

    #[async_trait]
    impl Viewer for Scripted {
        async fn login(&mut self, _: &Credentials) -> Result<(), ViewerError> {
            Ok(())
        }

        async fn locate(&mut self, _: &ItemKey) -> Result<(), ViewerError> {
            Ok(())
        }

        async fn metadata_text(&mut self) -> Result<String, ViewerError> {
            Ok(format!("Scanned: {}", self.styles.len()))
        }

        async fn open_viewer(&mut self) -> Result<(), ViewerError> {
            Ok(())
        }

        async fn presentation_state(&mut self) -> Result<String, ViewerError> {
            Ok(self.styles[self.current].clone())
        }

        async fn try_advance(&mut self) -> Result<bool, ViewerError> {
            if !self.frozen && self.current + 1 < self.styles.len() {
                self.current += 1;
            }
            Ok(true)
        }

        async fn close(self: Box<Self>) -> Result<(), ViewerError> {
            Ok(())
        }
    }

    fn style(bytes: &[u8]) -> String {
        format!(
            r#"background-image: url("data:image/png;base64,{}");"#,
            STANDARD.encode(bytes)
        )
    }

    fn page(width: u32) -> String {
        let mut buf = Vec::new();
        image::RgbaImage::from_pixel(width, 3, image::Rgba([1, 2, 3, 255]))
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        style(&buf)
    }

    fn settings() -> PollSettings {
        PollSettings::new(Duration::from_millis(1), Duration::from_millis(40))
    }

    fn workdir(tmp: &tempfile::TempDir) -> WorkingDirectory {
        WorkingDirectory::new(tmp.path(), &ItemKey::new("7", "1", "2"))
    }

    #[tokio::test]
    async fn captures_every_page_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let wd = workdir(&tmp);
        let mut viewer = Scripted::new(vec![page(5), page(6), page(7)]);

        let probe = SlideProbe::new(&mut viewer, settings(), None);
        let pages = PageCapture::new(probe, &wd, None).run(3).await.unwrap();

        assert_eq!(pages.numbers(), vec![1, 2, 3]);
        let (w, _) = image::image_dimensions(wd.page_path(PageKind::Raster, 3)).unwrap();
        assert_eq!(w, 7);
    }

    #[tokio::test]
    async fn unchanged_view_after_click_stops_at_next_page() {
        let tmp = tempfile::tempdir().unwrap();
        let wd = workdir(&tmp);
        let mut viewer = Scripted::new(vec![page(5), page(6), page(7)]);
        viewer.frozen = true;

        let probe = SlideProbe::new(&mut viewer, settings(), None);
        let err = PageCapture::new(probe, &wd, None).run(3).await.unwrap_err();

        match err {
            HarvestError::Capture {
                source: PageError::ChangeTimeout { page, ms },
            } => {
                assert_eq!(page, 2);
                assert_eq!(ms, 40);
            }
            other => panic!("expected a change timeout, got {other:?}"),
        }
        assert_eq!(wd.pages(PageKind::Raster).unwrap().numbers(), vec![1]);
    }

    #[tokio::test]
    async fn leftovers_from_an_earlier_capture_are_cleared() {
        let tmp = tempfile::tempdir().unwrap();
        let wd = workdir(&tmp);
        wd.ensure().unwrap();
        std::fs::write(wd.page_path(PageKind::Raster, 7), b"old").unwrap();
        std::fs::write(wd.page_path(PageKind::Encoded, 2), b"old").unwrap();
        std::fs::write(wd.document_path(), b"old").unwrap();
        wd.write_manifest(9).unwrap();
        let mut viewer = Scripted::new(vec![page(5), page(6), page(7)]);

        let probe = SlideProbe::new(&mut viewer, settings(), None);
        let pages = PageCapture::new(probe, &wd, None).run(3).await.unwrap();

        assert_eq!(pages.numbers(), vec![1, 2, 3]);
        assert_eq!(wd.page_count(PageKind::Encoded).unwrap(), 0);
        assert!(!wd.has_document());
        assert!(wd.read_manifest().is_none());
    }

    #[tokio::test]
    async fn payload_that_is_not_an_image_fails_that_page() {
        let tmp = tempfile::tempdir().unwrap();
        let wd = workdir(&tmp);
        let mut viewer = Scripted::new(vec![page(5), style(b"not a png"), page(7)]);

        let probe = SlideProbe::new(&mut viewer, settings(), None);
        let err = PageCapture::new(probe, &wd, None).run(3).await.unwrap_err();

        assert!(
            matches!(
                err,
                HarvestError::Capture {
                    source: PageError::Decode { page: 2, .. }
                }
            ),
            "got {err:?}"
        );
        assert_eq!(wd.pages(PageKind::Raster).unwrap().numbers(), vec![1]);
    }
}
