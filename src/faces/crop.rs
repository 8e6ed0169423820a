//! Square face crops cut from the raw image around the detected face.

use image::{DynamicImage, GenericImageView, RgbImage, imageops};
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::AppConfig;
use crate::images::{self, ImageError};
use crate::record::FaceRect;
use crate::store::ArtworkStore;

/// Half the crop side, as a multiple of the larger face dimension.
const CROP_MARGIN: f64 = 0.666;
/// Vertical anchor of the face center within its box (eyes sit slightly high).
const CENTER_Y: f64 = 0.475;

const FACE_QUALITY: u8 = 90;

/// Largest accepted crop side, as a multiple of the image's longer edge.
const MAX_CROP_SCALE: f64 = 4.0;

/// Crop box in pixels; may extend past the image edges.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropBox {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

/// Square box centered on the face, scaled to an image of the given size.
pub fn crop_box(face: &FaceRect, image_width: u32, image_height: u32) -> CropBox {
    let iw = f64::from(image_width);
    let ih = f64::from(image_height);

    let face_left = face.left * iw;
    let face_top = face.top * ih;
    let face_width = face.width * iw;
    let face_height = face.height * ih;

    let center_x = face_left + 0.5 * face_width;
    let center_y = face_top + CENTER_Y * face_height;
    let half = CROP_MARGIN * face_width.max(face_height);

    CropBox {
        left: center_x - half,
        top: center_y - half,
        right: center_x + half,
        bottom: center_y + half,
    }
}

/// Cut the box out of the image; regions outside the image are black.
/// Returns `None` for a box that is not finite or is far larger than the
/// image.
pub fn crop_face(img: &DynamicImage, face: &FaceRect) -> Option<RgbImage> {
    let (w, h) = img.dimensions();
    let b = crop_box(face, w, h);
    let side = b.right - b.left;
    let max_side = MAX_CROP_SCALE * f64::from(w.max(h));
    if ![b.left, b.top, b.right, b.bottom].iter().all(|v| v.is_finite()) || side > max_side {
        return None;
    }
    let left = b.left.floor() as i64;
    let top = b.top.floor() as i64;
    let cw = ((b.right - b.left).round() as u32).max(1);
    let ch = ((b.bottom - b.top).round() as u32).max(1);

    let mut canvas = RgbImage::new(cw, ch);
    imageops::overlay(&mut canvas, &img.to_rgb8(), -left, -top);
    Some(canvas)
}

pub struct FaceExportResult {
    pub exported: u64,
    pub errors: u64,
}

/// Write raw and web face crops for every record with a face that is still
/// missing either file.
pub fn export_faces(config: &AppConfig, store: &ArtworkStore) -> std::io::Result<FaceExportResult> {
    let layout = config.layout();
    layout.create_dirs()?;

    let pending: Vec<_> = store
        .records()
        .filter_map(|r| r.face_rectangle().map(|rect| (r.slug(), rect)))
        .filter(|(slug, _)| {
            layout.raw(slug).is_file()
                && !(layout.raw_face(slug).is_file() && layout.web_face(slug).is_file())
        })
        .collect();

    let mut result = FaceExportResult { exported: 0, errors: 0 };
    if pending.is_empty() {
        return Ok(result);
    }

    let pb = ProgressBar::new(pending.len() as u64);
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} faces {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );

    for (slug, rect) in pending {
        match export_one(config, slug, rect) {
            Ok(()) => result.exported += 1,
            Err(e) => {
                log::warn!("Face crop failed for {slug}: {e}");
                result.errors += 1;
            }
        }
        pb.inc(1);
    }

    pb.finish_with_message(format!("{} exported, {} errors", result.exported, result.errors));
    Ok(result)
}

fn export_one(config: &AppConfig, slug: &str, rect: &FaceRect) -> Result<(), ImageError> {
    let layout = config.layout();
    let raw_face = layout.raw_face(slug);
    let web_face = layout.web_face(slug);

    let face = if raw_face.is_file() {
        images::open_rgb(&raw_face)?
    } else {
        let raw = images::open_rgb(&layout.raw(slug))?;
        let Some(crop) = crop_face(&raw, rect) else {
            let (width, height) = raw.dimensions();
            return Err(ImageError::CropOutOfRange { width, height });
        };
        let face = DynamicImage::ImageRgb8(crop);
        images::save_jpeg(&face, &raw_face, FACE_QUALITY)?;
        face
    };

    if !web_face.is_file() {
        let sized = images::fit_within(&face, config.sizes.face_web);
        images::save_jpeg(&sized, &web_face, FACE_QUALITY)?;
    }
    log::info!("Exported face crop for {slug}");
    Ok(())
}
