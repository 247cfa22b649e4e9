//! Packaging stage 1: raster → JPEG.
//!
//! Viewer rasters are large lossless PNGs. Each one is decoded (format
//! sniffed from content, not from the extension), flattened to RGB and written
//! as a JPEG at the configured quality. The source raster is deleted once its
//! JPEG is on disk, so a re-run only touches rasters that are still there.

use crate::error::HarvestError;
use crate::workdir::{PageKind, WorkingDirectory};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageReader};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tracing::debug;

/// Re-encode every raster page in the working directory.
///
/// Returns the number of pages converted by this call (0 if there was
/// nothing left to do). Stops at the first page that fails.
pub async fn reencode_pages(workdir: &WorkingDirectory, quality: u8) -> Result<usize, HarvestError> {
    let workdir = workdir.clone();
    tokio::task::spawn_blocking(move || reencode_pages_blocking(&workdir, quality))
        .await
        .map_err(|e| HarvestError::Internal(format!("Re-encode task panicked: {}", e)))?
}

/// Blocking implementation of [`reencode_pages`].
pub fn reencode_pages_blocking(workdir: &WorkingDirectory, quality: u8) -> Result<usize, HarvestError> {
    let rasters = workdir.pages(PageKind::Raster)?;
    for page in &rasters {
        let target = workdir.page_path(PageKind::Encoded, page.number);
        let img = decode_raster(&page.path)?;
        encode_jpeg(&img, &target, quality)?;
        std::fs::remove_file(&page.path).map_err(|e| HarvestError::io(&page.path, e))?;
        debug!(
            "Re-encoded page {} → {} ({}x{})",
            page.number,
            target.display(),
            img.width(),
            img.height()
        );
    }
    Ok(rasters.len())
}

fn decode_raster(path: &Path) -> Result<DynamicImage, HarvestError> {
    let encode_err = |detail: String| HarvestError::Encode {
        path: path.to_path_buf(),
        detail,
    };
    ImageReader::open(path)
        .map_err(|e| HarvestError::io(path, e))?
        .with_guessed_format()
        .map_err(|e| HarvestError::io(path, e))?
        .decode()
        .map_err(|e| encode_err(e.to_string()))
}

/// Write `img` as an RGB JPEG. A partially written file is removed on error.
pub fn encode_jpeg(img: &DynamicImage, target: &Path, quality: u8) -> Result<(), HarvestError> {
    let result = (|| {
        let file = File::create(target).map_err(|e| HarvestError::io(target, e))?;
        let mut writer = BufWriter::new(file);
        let rgb = img.to_rgb8();
        JpegEncoder::new_with_quality(&mut writer, quality)
            .encode_image(&rgb)
            .map_err(|e| HarvestError::Encode {
                path: target.to_path_buf(),
                detail: e.to_string(),
            })?;
        std::io::Write::flush(&mut writer).map_err(|e| HarvestError::io(target, e))
    })();
    if result.is_err() {
        let _ = std::fs::remove_file(target);
    }
    result
}
