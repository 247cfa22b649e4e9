//! End-to-end pipeline tests against a scripted in-memory viewer.
//!
//! The fake viewer serves PNG pages through a style string exactly like the
//! portal does (`background-image: url("data:image/png;base64,…")`), can lag
//! behind a click for a few reads, and can be told to stall the "next" arrow
//! at a given page. Timing is shrunk to milliseconds through `HarvestConfig`.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{ImageFormat, Rgba, RgbaImage};
use lopdf::Document;
use scan_harvest::{
    Credentials, HarvestConfig, HarvestError, HarvestProgressCallback, ItemKey, ItemPipeline,
    PageKind, PollSettings, RunSummary, TaskRunner, Viewer, ViewerConnector, ViewerError,
    WorkingDirectory,
};
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Fake viewer ──────────────────────────────────────────────────────────────

/// How one connection behaves.
#[derive(Clone, Default)]
struct Behaviour {
    /// The arrow never becomes clickable while this page is displayed.
    stall_at: Option<usize>,
    /// Reads that still return the previous page after a click.
    lag_reads: usize,
    /// Number of search hits; anything but 1 is ambiguous.
    hits: Option<usize>,
    /// Overrides the scanned-page counter text.
    metadata: Option<String>,
}

struct FakeViewer {
    pages: Arc<Vec<String>>,
    behaviour: Behaviour,
    /// 0-based index of the displayed page, `None` until the viewer opens.
    current: Option<usize>,
    lag: usize,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl Viewer for FakeViewer {
    async fn login(&mut self, credentials: &Credentials) -> Result<(), ViewerError> {
        assert_eq!(credentials.email, "me@example.org");
        Ok(())
    }

    async fn locate(&mut self, key: &ItemKey) -> Result<(), ViewerError> {
        match self.behaviour.hits.unwrap_or(1) {
            1 => Ok(()),
            found => Err(ViewerError::NotUnique {
                key: key.to_string(),
                found,
            }),
        }
    }

    async fn metadata_text(&mut self) -> Result<String, ViewerError> {
        Ok(self.behaviour.metadata.clone().unwrap_or_else(|| {
            format!("Фонд 100\nОтсканировано: {}\nГоды: 1890-1891", self.pages.len())
        }))
    }

    async fn open_viewer(&mut self) -> Result<(), ViewerError> {
        self.current = Some(0);
        // first image arrives a couple of reads late
        self.lag = 2;
        Ok(())
    }

    async fn presentation_state(&mut self) -> Result<String, ViewerError> {
        let current = self
            .current
            .ok_or_else(|| ViewerError::not_found(".scanImage"))?;
        if self.lag > 0 {
            self.lag -= 1;
            return match current {
                0 => Ok("width: 800px;".into()),
                n => Ok(self.pages[n - 1].clone()),
            };
        }
        Ok(self.pages[current].clone())
    }

    async fn try_advance(&mut self) -> Result<bool, ViewerError> {
        let current = self.current.ok_or_else(|| ViewerError::NotFound {
            what: "arrow-right.png".into(),
        })?;
        if self.behaviour.stall_at == Some(current + 1) || current + 1 >= self.pages.len() {
            return Ok(false);
        }
        self.current = Some(current + 1);
        self.lag = self.behaviour.lag_reads;
        Ok(true)
    }

    async fn session_time_left(&mut self) -> Option<String> {
        Some("00:59:00".into())
    }

    async fn close(self: Box<Self>) -> Result<(), ViewerError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out fake viewers; connection `n` uses `behaviours[n]` (or the last).
struct FakeConnector {
    pages: Arc<Vec<String>>,
    behaviours: Vec<Behaviour>,
    connects: AtomicUsize,
    closes: Arc<AtomicUsize>,
}

impl FakeConnector {
    fn new(widths: &[u32], behaviours: Vec<Behaviour>) -> Arc<Self> {
        let styles = widths.iter().map(|w| style_for(&png(*w, 8))).collect();
        Self::with_styles(styles, behaviours)
    }

    fn with_styles(styles: Vec<String>, behaviours: Vec<Behaviour>) -> Arc<Self> {
        Arc::new(Self {
            pages: Arc::new(styles),
            behaviours,
            connects: AtomicUsize::new(0),
            closes: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ViewerConnector for FakeConnector {
    async fn connect(&self) -> Result<Box<dyn Viewer>, ViewerError> {
        let n = self.connects.fetch_add(1, Ordering::SeqCst);
        let behaviour = self
            .behaviours
            .get(n)
            .or(self.behaviours.last())
            .cloned()
            .unwrap_or_default();
        Ok(Box::new(FakeViewer {
            pages: self.pages.clone(),
            behaviour,
            current: None,
            lag: 0,
            closes: self.closes.clone(),
        }))
    }
}

// ── Test helpers ─────────────────────────────────────────────────────────────

fn png(width: u32, height: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    RgbaImage::from_pixel(width, height, Rgba([(width % 255) as u8, 40, 90, 255]))
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

fn style_for(bytes: &[u8]) -> String {
    format!(
        r#"width: 800px; background-image: url("data:image/png;base64,{}");"#,
        STANDARD.encode(bytes)
    )
}

fn config(dir: &Path, max_attempts: Option<u32>) -> HarvestConfig {
    HarvestConfig::builder()
        .output_dir(dir)
        .credentials(Credentials::new("me@example.org", "secret"))
        .poll(PollSettings::new(
            Duration::from_millis(1),
            Duration::from_millis(150),
        ))
        .retry_backoff(Duration::from_millis(1))
        .max_attempts(max_attempts)
        .build()
        .unwrap()
}

fn key() -> ItemKey {
    ItemKey::new("100", "1", "5")
}

fn page_widths(pdf: &Path) -> Vec<i64> {
    let doc = Document::load(pdf).unwrap();
    doc.get_pages()
        .into_values()
        .map(|id| {
            let media_box = doc
                .get_object(id)
                .unwrap()
                .as_dict()
                .unwrap()
                .get(b"MediaBox")
                .unwrap()
                .as_array()
                .unwrap()
                .clone();
            media_box[2].as_i64().unwrap()
        })
        .collect()
}

fn entry_names(zip_path: &Path) -> Vec<String> {
    let mut archive = zip::ZipArchive::new(std::fs::File::open(zip_path).unwrap()).unwrap();
    (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect()
}

fn leftover_pages(wd: &WorkingDirectory) -> usize {
    wd.page_count(PageKind::Raster).unwrap() + wd.page_count(PageKind::Encoded).unwrap()
}

#[derive(Default)]
struct Recorder {
    failures: Mutex<Vec<String>>,
    pages: AtomicUsize,
}

impl HarvestProgressCallback for Recorder {
    fn on_page_saved(&self, _key: &ItemKey, _page: usize, _expected: usize, left: Option<&str>) {
        assert_eq!(left, Some("00:59:00"));
        self.pages.fetch_add(1, Ordering::SeqCst);
    }

    fn on_attempt_failed(&self, _key: &ItemKey, _attempt: u32, error: &str) {
        self.failures.lock().unwrap().push(error.to_string());
    }
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn three_page_item_ends_as_document_and_archive() {
    let tmp = tempfile::tempdir().unwrap();
    let connector = FakeConnector::new(&[31, 32, 33], vec![Behaviour::default()]);
    let runner = TaskRunner::new(config(tmp.path(), Some(1)), connector.clone());

    let summary = runner.run(&[key()]).await.unwrap();

    assert_eq!(summary.completed, vec![key()]);
    assert!(summary.all_done());
    let wd = WorkingDirectory::new(tmp.path(), &key());
    assert_eq!(
        wd.document_path().file_name().unwrap().to_str(),
        Some("100-1-5.pdf")
    );
    assert_eq!(page_widths(&wd.document_path()), vec![31, 32, 33]);
    assert_eq!(entry_names(&wd.archive_path()), vec!["1.jpg", "2.jpg", "3.jpg"]);
    assert_eq!(leftover_pages(&wd), 0);
    assert!(wd.read_manifest().is_none());
    assert_eq!(connector.connects(), 1);
    assert_eq!(connector.closes(), 1);
}

#[tokio::test]
async fn pages_sort_numerically_past_nine() {
    let tmp = tempfile::tempdir().unwrap();
    let widths: Vec<u32> = (1..=12).map(|n| 10 + n).collect();
    let behaviour = Behaviour {
        lag_reads: 3,
        ..Behaviour::default()
    };
    let connector = FakeConnector::new(&widths, vec![behaviour]);
    let runner = TaskRunner::new(config(tmp.path(), Some(1)), connector);

    let summary = runner.run(&[key()]).await.unwrap();
    assert_eq!(summary.completed.len(), 1);

    let wd = WorkingDirectory::new(tmp.path(), &key());
    let expected_widths: Vec<i64> = widths.iter().map(|w| *w as i64).collect();
    assert_eq!(page_widths(&wd.document_path()), expected_widths);
    let names = entry_names(&wd.archive_path());
    let expected_names: Vec<String> = (1..=12).map(|n| format!("{n}.jpg")).collect();
    assert_eq!(names, expected_names);
}

#[tokio::test]
async fn stalled_attempt_is_retried_from_scratch() {
    let tmp = tempfile::tempdir().unwrap();
    let stall = Behaviour {
        stall_at: Some(2),
        ..Behaviour::default()
    };
    let connector = FakeConnector::new(&[20, 21, 22], vec![stall, Behaviour::default()]);
    let recorder = Arc::new(Recorder::default());
    let runner = TaskRunner::new(config(tmp.path(), None), connector.clone())
        .with_progress(recorder.clone());

    let summary = runner.run(&[key()]).await.unwrap();

    assert_eq!(summary.completed, vec![key()]);
    assert_eq!(summary.attempts, 2);
    assert_eq!(connector.connects(), 2);
    assert_eq!(connector.closes(), 2);
    let failures = recorder.failures.lock().unwrap().clone();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].contains("page 2"), "got: {}", failures[0]);
    // 2 pages on the stalled attempt, 3 on the retry
    assert_eq!(recorder.pages.load(Ordering::SeqCst), 5);
    let wd = WorkingDirectory::new(tmp.path(), &key());
    assert_eq!(entry_names(&wd.archive_path()).len(), 3);
}

#[tokio::test]
async fn partial_capture_never_produces_artifacts() {
    let tmp = tempfile::tempdir().unwrap();
    let stall = Behaviour {
        stall_at: Some(2),
        ..Behaviour::default()
    };
    let connector = FakeConnector::new(&[20, 21, 22, 23], vec![stall]);
    let runner = TaskRunner::new(config(tmp.path(), Some(2)), connector.clone());

    let summary = runner.run(&[key()]).await.unwrap();

    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].attempts, 2);
    assert!(summary.failed[0].error.contains("page 2"));
    let wd = WorkingDirectory::new(tmp.path(), &key());
    assert!(!wd.has_document());
    assert!(!wd.has_archive());
    assert!(wd.read_manifest().is_none());
    // the stalled capture's rasters stay behind for inspection only
    assert_eq!(wd.page_count(PageKind::Raster).unwrap(), 2);
}

#[tokio::test]
async fn corrupt_page_is_recaptured_on_every_attempt() {
    let tmp = tempfile::tempdir().unwrap();
    let styles = vec![style_for(&png(30, 8)), style_for(b"not a png 2")];
    let connector = FakeConnector::with_styles(styles, vec![Behaviour::default()]);
    let recorder = Arc::new(Recorder::default());
    let runner = TaskRunner::new(config(tmp.path(), Some(3)), connector.clone())
        .with_progress(recorder.clone());

    let summary = runner.run(&[key()]).await.unwrap();

    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.attempts, 3);
    assert_eq!(connector.connects(), 3);
    assert_eq!(connector.closes(), 3);
    let failures = recorder.failures.lock().unwrap();
    assert_eq!(failures.len(), 3);
    assert!(failures.iter().all(|f| f.contains("page 2")), "{failures:?}");
    let wd = WorkingDirectory::new(tmp.path(), &key());
    assert!(wd.read_manifest().is_none());
    assert!(!wd.has_document());
    assert_eq!(wd.pages(PageKind::Raster).unwrap().numbers(), vec![1]);
}

#[tokio::test]
async fn second_run_is_a_no_op() {
    let tmp = tempfile::tempdir().unwrap();
    let connector = FakeConnector::new(&[15, 16], vec![Behaviour::default()]);
    let cfg = config(tmp.path(), Some(1));

    TaskRunner::new(cfg.clone(), connector.clone())
        .run(&[key()])
        .await
        .unwrap();
    let wd = WorkingDirectory::new(tmp.path(), &key());
    let before = std::fs::read(wd.archive_path()).unwrap();
    assert_eq!(connector.connects(), 1);

    let summary = TaskRunner::new(cfg, connector.clone())
        .run(&[key()])
        .await
        .unwrap();

    assert_eq!(summary.skipped, vec![key()]);
    assert_eq!(summary.attempts, 0);
    assert_eq!(connector.connects(), 1);
    assert_eq!(std::fs::read(wd.archive_path()).unwrap(), before);
}

#[tokio::test]
async fn interrupted_packaging_resumes_without_viewer() {
    let tmp = tempfile::tempdir().unwrap();
    let wd = WorkingDirectory::new(tmp.path(), &key());
    wd.ensure().unwrap();
    for (n, w) in [(1, 40u32), (2, 41)] {
        std::fs::write(wd.page_path(PageKind::Raster, n), png(w, 8)).unwrap();
    }
    // re-encode and document done, then the process died
    scan_harvest::pipeline::encode::reencode_pages(&wd, 80)
        .await
        .unwrap();
    scan_harvest::pipeline::document::write_document(&wd, wd.pages(PageKind::Encoded).unwrap())
        .await
        .unwrap();
    assert!(!wd.has_archive());

    let connector = FakeConnector::new(&[1], vec![Behaviour::default()]);
    let summary = TaskRunner::new(config(tmp.path(), Some(1)), connector.clone())
        .run(&[key()])
        .await
        .unwrap();

    assert_eq!(summary.resumed, vec![key()]);
    assert_eq!(connector.connects(), 0);
    assert_eq!(entry_names(&wd.archive_path()), vec!["1.jpg", "2.jpg"]);
    assert_eq!(leftover_pages(&wd), 0);
}

#[tokio::test]
async fn ambiguous_search_fails_the_attempt() {
    let tmp = tempfile::tempdir().unwrap();
    let behaviour = Behaviour {
        hits: Some(2),
        ..Behaviour::default()
    };
    let connector = FakeConnector::new(&[10], vec![behaviour]);
    let cfg = config(tmp.path(), Some(1));

    let err = ItemPipeline::new(&cfg, connector.as_ref())
        .run(&key())
        .await
        .unwrap_err();

    assert!(
        matches!(
            err,
            HarvestError::Viewer {
                source: ViewerError::NotUnique { found: 2, .. },
                ..
            }
        ),
        "got {err:?}"
    );
    assert_eq!(connector.closes(), 1);
}

#[tokio::test]
async fn zero_or_missing_counter_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = config(tmp.path(), Some(1));

    let zero = FakeConnector::new(
        &[10],
        vec![Behaviour {
            metadata: Some("Отсканировано: 0".into()),
            ..Behaviour::default()
        }],
    );
    let err = ItemPipeline::new(&cfg, zero.as_ref())
        .run(&key())
        .await
        .unwrap_err();
    assert!(matches!(err, HarvestError::NoScans { .. }), "got {err:?}");

    let missing = FakeConnector::new(
        &[10],
        vec![Behaviour {
            metadata: Some("Фонд 100, опись 1".into()),
            ..Behaviour::default()
        }],
    );
    let err = ItemPipeline::new(&cfg, missing.as_ref())
        .run(&key())
        .await
        .unwrap_err();
    assert!(
        matches!(err, HarvestError::ExpectedCountMissing { .. }),
        "got {err:?}"
    );

    let wd = WorkingDirectory::new(tmp.path(), &key());
    assert!(!wd.has_archive());
}

#[tokio::test]
async fn summary_serialises_for_reporting() {
    let tmp = tempfile::tempdir().unwrap();
    let connector = FakeConnector::new(&[12], vec![Behaviour::default()]);
    let summary: RunSummary = TaskRunner::new(config(tmp.path(), Some(1)), connector)
        .run(&[key()])
        .await
        .unwrap();

    let json = serde_json::to_value(&summary).unwrap();
    assert_eq!(json["total"], 1);
    assert_eq!(json["completed"][0]["collection"], "100");
    assert_eq!(json["cancelled"], false);
}
