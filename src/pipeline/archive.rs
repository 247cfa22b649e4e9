//! Packaging stage 3: re-encoded pages → one compressed archive.
//!
//! Entries are the JPEG pages themselves, named `N.jpg`, written in numeric
//! page order at maximum Deflate level. Each entry carries its source file's
//! modification time. Once the archive is on disk the JPEGs are deleted and
//! the archive becomes the only durable copy of the pages.

use crate::error::HarvestError;
use crate::pipeline::document::persist_atomically;
use crate::workdir::{PageKind, PageSet, WorkingDirectory};
use chrono::{DateTime, Datelike, Local, Timelike};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tracing::{debug, info, warn};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Deflate level used for every entry.
pub const ARCHIVE_COMPRESSION_LEVEL: i32 = 9;

/// Write the archive from `pages`, then delete them.
pub async fn write_archive(workdir: &WorkingDirectory, pages: PageSet) -> Result<usize, HarvestError> {
    let workdir = workdir.clone();
    tokio::task::spawn_blocking(move || write_archive_blocking(&workdir, &pages))
        .await
        .map_err(|e| HarvestError::Internal(format!("Archive task panicked: {}", e)))?
}

/// Blocking implementation of [`write_archive`]. Returns the entry count.
pub fn write_archive_blocking(workdir: &WorkingDirectory, pages: &PageSet) -> Result<usize, HarvestError> {
    let target = workdir.archive_path();
    if pages.is_empty() {
        return Err(HarvestError::NoPages {
            kind: "re-encoded",
            dir: workdir.root().to_path_buf(),
        });
    }
    let zip_err = |detail: String| HarvestError::Archive {
        path: target.clone(),
        detail,
    };

    persist_atomically(workdir.root(), &target, |file| {
        let mut zip = ZipWriter::new(BufWriter::new(file));
        for page in pages {
            let name = format!("{}.{}", page.number, PageKind::Encoded.extension());
            let options = FileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .compression_level(Some(ARCHIVE_COMPRESSION_LEVEL))
                .last_modified_time(entry_time(&page.path));
            zip.start_file(name.as_str(), options)
                .map_err(|e| zip_err(format!("{name}: {e}")))?;
            let mut source = File::open(&page.path).map_err(|e| HarvestError::io(&page.path, e))?;
            std::io::copy(&mut source, &mut zip).map_err(|e| HarvestError::io(&page.path, e))?;
            debug!("Archived {}", name);
        }
        let mut writer = zip.finish().map_err(|e| zip_err(e.to_string()))?;
        std::io::Write::flush(&mut writer).map_err(|e| HarvestError::io(&target, e))
    })?;
    info!("Archive saved: {} ({} entries)", target.display(), pages.len());

    for page in pages {
        std::fs::remove_file(&page.path).map_err(|e| HarvestError::io(&page.path, e))?;
    }
    Ok(pages.len())
}

/// Entry timestamp from the file's mtime, in local time.
///
/// Zip timestamps cannot represent dates before 1980; those fall back to
/// the format's default.
fn entry_time(path: &Path) -> zip::DateTime {
    let modified = match std::fs::metadata(path).and_then(|m| m.modified()) {
        Ok(t) => DateTime::<Local>::from(t),
        Err(e) => {
            warn!("No mtime for {}: {e}", path.display());
            return zip::DateTime::default();
        }
    };
    to_zip_time(&modified)
}

fn to_zip_time(t: &DateTime<Local>) -> zip::DateTime {
    let year = match u16::try_from(t.year()) {
        Ok(y) => y,
        Err(_) => return zip::DateTime::default(),
    };
    zip::DateTime::from_date_and_time(
        year,
        t.month() as u8,
        t.day() as u8,
        t.hour() as u8,
        t.minute() as u8,
        t.second() as u8,
    )
    .unwrap_or_default()
}
