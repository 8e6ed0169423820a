pub mod crop;
pub mod facepp;

use std::collections::BTreeMap;
use std::path::Path;

use thiserror::Error;

use crate::record::{FaceAnalysis, FaceAttributes, FaceRect};

#[derive(Error, Debug)]
pub enum FaceError {
    #[error("image not found: {0}")]
    MissingImage(String),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] ureq::Error),
    #[error("API returned {status}: {payload}")]
    Api { status: u16, payload: String },
    #[error("malformed API response: {0}")]
    Response(#[from] serde_json::Error),
    #[error("face API credentials not configured")]
    MissingCredentials,
}

/// Bounding box in source-image pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

/// One face as reported by the analysis service.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedFace {
    pub rect: PixelRect,
    pub gender: String,
    pub age: u32,
    pub ethnicity: String,
    pub emotions: BTreeMap<String, f64>,
}

/// Detection output, faces in the order the service returned them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FaceDetection {
    pub face_count: u32,
    pub faces: Vec<DetectedFace>,
}

/// A face-analysis service.
pub trait FaceAnalyzer {
    fn detect(&self, image: &Path) -> Result<FaceDetection, FaceError>;
}

/// Convert a pixel box to fractions of the image size.
pub fn normalize_rect(rect: PixelRect, image_width: u32, image_height: u32) -> FaceRect {
    let w = f64::from(image_width);
    let h = f64::from(image_height);
    FaceRect {
        left: rect.left / w,
        top: rect.top / h,
        width: rect.width / w,
        height: rect.height / h,
    }
}

/// Run face analysis on one image.
///
/// Only the first face is kept. Any failure is logged and yields `None`, which
/// leaves the record unanalyzed so the next run retries it.
pub fn enrich(analyzer: &dyn FaceAnalyzer, image: &Path) -> Option<FaceAnalysis> {
    match try_enrich(analyzer, image) {
        Ok(analysis) => Some(analysis),
        Err(e) => {
            log::warn!("Face analysis failed for {}: {e}", image.display());
            None
        }
    }
}

fn try_enrich(analyzer: &dyn FaceAnalyzer, image: &Path) -> Result<FaceAnalysis, FaceError> {
    if !image.is_file() {
        return Err(FaceError::MissingImage(image.display().to_string()));
    }
    let (width, height) = image::image_dimensions(image)?;
    let detection = analyzer.detect(image)?;

    let face = detection.faces.into_iter().next().map(|f| FaceAttributes {
        face_rectangle: normalize_rect(f.rect, width, height),
        gender: f.gender,
        age: f.age,
        ethnicity: f.ethnicity,
        emotions: f.emotions,
    });

    Ok(FaceAnalysis {
        faces: detection.face_count,
        face,
    })
}
