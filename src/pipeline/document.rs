//! Packaging stage 2: re-encoded pages → one paged document (PDF).
//!
//! Each JPEG is embedded as-is (`DCTDecode`, no recompression) on a page whose
//! MediaBox equals the image's pixel dimensions, so the document shows every
//! scan at 1 px = 1 pt with no scaling or cropping. Pages follow numeric page
//! order.

use crate::error::HarvestError;
use crate::workdir::{PageSet, WorkingDirectory};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use std::io::BufWriter;
use std::path::Path;
use tracing::{debug, info};

/// Build the document from `pages` and write it atomically to
/// `workdir.document_path()`.
pub async fn write_document(workdir: &WorkingDirectory, pages: PageSet) -> Result<usize, HarvestError> {
    let workdir = workdir.clone();
    tokio::task::spawn_blocking(move || write_document_blocking(&workdir, &pages))
        .await
        .map_err(|e| HarvestError::Internal(format!("Document task panicked: {}", e)))?
}

/// Blocking implementation of [`write_document`]. Returns the page count.
pub fn write_document_blocking(workdir: &WorkingDirectory, pages: &PageSet) -> Result<usize, HarvestError> {
    let target = workdir.document_path();
    if pages.is_empty() {
        return Err(HarvestError::NoPages {
            kind: "re-encoded",
            dir: workdir.root().to_path_buf(),
        });
    }
    let doc_err = |detail: String| HarvestError::Document {
        path: target.clone(),
        detail,
    };

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());

    for page in pages {
        let (width, height) = image::image_dimensions(&page.path)
            .map_err(|e| doc_err(format!("{}: {e}", page.path.display())))?;
        let jpeg = std::fs::read(&page.path).map_err(|e| HarvestError::io(&page.path, e))?;

        let mut image = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width as i64,
                "Height" => height as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8i64,
                "Filter" => "DCTDecode",
            },
            jpeg,
        );
        image.allows_compression = false;
        let image_id = doc.add_object(image);

        let (w, h) = (Object::Integer(width as i64), Object::Integer(height as i64));
        let zero = || Object::Integer(0);
        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new("cm", vec![w.clone(), zero(), zero(), h.clone(), zero(), zero()]),
                Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };
        let encoded = content
            .encode()
            .map_err(|e| doc_err(format!("content stream: {e}")))?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![zero(), zero(), w, h],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im0" => image_id },
            },
        });
        kids.push(page_id.into());
        debug!("Document page {} ← {} ({}x{})", page.number, page.path.display(), width, height);
    }

    let count = kids.len();
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    persist_atomically(workdir.root(), &target, |file| {
        let mut writer = BufWriter::new(file);
        doc.save_to(&mut writer)
            .map_err(|e| doc_err(format!("write: {e}")))?;
        std::io::Write::flush(&mut writer).map_err(|e| HarvestError::io(&target, e))
    })?;

    info!("Paged document saved: {} ({} pages)", target.display(), count);
    Ok(count)
}

/// Write through a temp file in `dir`, then rename onto `target`.
///
/// `target` only ever appears complete.
pub(crate) fn persist_atomically<F>(dir: &Path, target: &Path, write: F) -> Result<(), HarvestError>
where
    F: FnOnce(&mut std::fs::File) -> Result<(), HarvestError>,
{
    let mut tmp = tempfile::Builder::new()
        .prefix(".partial-")
        .tempfile_in(dir)
        .map_err(|e| HarvestError::io(dir, e))?;
    write(tmp.as_file_mut())?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| HarvestError::io(target, e))?;
    tmp.persist(target)
        .map_err(|e| HarvestError::io(target, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::encode::encode_jpeg;
    use crate::task::ItemKey;
    use crate::workdir::PageKind;
    use image::{DynamicImage, Rgb, RgbImage};

    fn media_box(doc: &Document, page_id: lopdf::ObjectId) -> Vec<i64> {
        doc.get_object(page_id)
            .unwrap()
            .as_dict()
            .unwrap()
            .get(b"MediaBox")
            .unwrap()
            .as_array()
            .unwrap()
            .iter()
            .map(|o| o.as_i64().unwrap())
            .collect()
    }

    #[test]
    fn pages_follow_numeric_order_and_source_size() {
        let tmp = tempfile::tempdir().unwrap();
        let wd = WorkingDirectory::new(tmp.path(), &ItemKey::new("9", "9", "9"));
        wd.ensure().unwrap();
        // page n is n*10 px wide so order is visible in the MediaBox
        for n in [1usize, 2, 9, 10] {
            let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(n as u32 * 10, 15, Rgb([1, 2, 3])));
            encode_jpeg(&img, &wd.page_path(PageKind::Encoded, n), 80).unwrap();
        }

        let pages = wd.pages(PageKind::Encoded).unwrap();
        assert_eq!(write_document_blocking(&wd, &pages).unwrap(), 4);

        let doc = Document::load(wd.document_path()).unwrap();
        let ids: Vec<_> = doc.get_pages().into_values().collect();
        assert_eq!(ids.len(), 4);
        let widths: Vec<i64> = ids.iter().map(|id| media_box(&doc, *id)[2]).collect();
        assert_eq!(widths, vec![10, 20, 90, 100]);
        assert_eq!(media_box(&doc, ids[0]), vec![0, 0, 10, 15]);
    }

    #[test]
    fn empty_set_is_an_error_and_writes_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let wd = WorkingDirectory::new(tmp.path(), &ItemKey::new("9", "9", "9"));
        wd.ensure().unwrap();
        let err = write_document_blocking(&wd, &PageSet::default()).unwrap_err();
        assert!(matches!(err, HarvestError::NoPages { .. }));
        assert!(!wd.has_document());
    }
}
