//! Image acquisition and derived variants (raw, HD, web, thumbnail).

pub mod dezoom;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use indicatif::{ProgressBar, ProgressStyle};
use thiserror::Error;

use crate::config::AppConfig;
use crate::dataset::{self, ArtworkRow};
use crate::slug::slug;

/// Hosts served through the deep-zoom downloader instead of plain HTTP.
const DEEP_ZOOM_HOSTS: &[&str] = &["artsandculture.google.com"];

/// Largest accepted direct download.
const MAX_DOWNLOAD_BYTES: u64 = 256 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("HTTP error: {0}")]
    Http(#[from] ureq::Error),
    #[error("deep-zoom download failed: {0}")]
    Dezoom(#[from] dezoom::DezoomError),
    #[error("face crop out of range for {width}x{height} image")]
    CropOutOfRange { width: u32, height: u32 },
}

/// Where every derived file for a slug lives.
#[derive(Debug, Clone)]
pub struct ImageLayout {
    raw_dir: PathBuf,
    hd_dir: PathBuf,
    thumb_dir: PathBuf,
    raw_faces_dir: PathBuf,
    web_images_dir: PathBuf,
    web_faces_dir: PathBuf,
    web_data_dir: PathBuf,
}

impl ImageLayout {
    pub fn new(images_dir: &Path, web_dir: &Path) -> Self {
        Self {
            raw_dir: images_dir.join("00_raw"),
            hd_dir: images_dir.join("01_hd"),
            thumb_dir: images_dir.join("02_thumb"),
            raw_faces_dir: images_dir.join("00_raw_faces"),
            web_images_dir: web_dir.join("imgs").join("obras"),
            web_faces_dir: web_dir.join("imgs").join("faces"),
            web_data_dir: web_dir.join("data"),
        }
    }

    pub fn raw(&self, slug: &str) -> PathBuf {
        self.raw_dir.join(format!("{slug}_raw.jpg"))
    }

    pub fn hd(&self, slug: &str) -> PathBuf {
        self.hd_dir.join(format!("{slug}_hd.jpg"))
    }

    pub fn thumb(&self, slug: &str) -> PathBuf {
        self.thumb_dir.join(format!("{slug}_thumb.jpg"))
    }

    pub fn web(&self, slug: &str) -> PathBuf {
        self.web_images_dir.join(Self::web_file_name(slug))
    }

    pub fn raw_face(&self, slug: &str) -> PathBuf {
        self.raw_faces_dir.join(format!("{slug}_raw.jpg"))
    }

    pub fn web_face(&self, slug: &str) -> PathBuf {
        self.web_faces_dir.join(Self::web_file_name(slug))
    }

    pub fn store_file(&self) -> PathBuf {
        self.web_data_dir.join("obras.json")
    }

    /// File name stored in a record's `img` field.
    pub fn web_file_name(slug: &str) -> String {
        format!("{slug}_web.jpg")
    }

    /// Create every output directory.
    pub fn create_dirs(&self) -> std::io::Result<()> {
        for dir in [
            &self.raw_dir,
            &self.hd_dir,
            &self.thumb_dir,
            &self.raw_faces_dir,
            &self.web_images_dir,
            &self.web_faces_dir,
            &self.web_data_dir,
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// A derived variant: target edge bound and JPEG quality.
#[derive(Debug, Clone, Copy)]
struct Variant {
    label: &'static str,
    max_dim: u32,
    quality: u8,
}

pub struct ImageStageResult {
    pub rows: u64,
    pub acquired: u64,
    pub variants_written: u64,
    pub missing_raw: u64,
    pub errors: u64,
}

/// Ensure raw and derived images exist for every row.
///
/// Each artwork is handled independently; failures are logged and counted and
/// the artwork is picked up again on the next run.
pub fn process_rows(config: &AppConfig, rows: &[ArtworkRow], download: bool) -> std::io::Result<ImageStageResult> {
    let layout = config.layout();
    layout.create_dirs()?;

    let pb = ProgressBar::new(rows.len() as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )
        .unwrap()
        .progress_chars("#>-"),
    );
    pb.set_message("Images...");

    let mut result = ImageStageResult {
        rows: 0,
        acquired: 0,
        variants_written: 0,
        missing_raw: 0,
        errors: 0,
    };

    for row in rows {
        result.rows += 1;
        let slug = slug(row.get(dataset::COL_ARTIST), row.get(dataset::COL_TITLE));
        let raw = layout.raw(&slug);

        if !raw.is_file() && download {
            match acquire(config, row.link(), &raw) {
                Ok(true) => result.acquired += 1,
                Ok(false) => {}
                Err(e) => {
                    log::warn!("Failed to acquire image for {slug}: {e}");
                    // Drop partial output so the next run retries
                    fs::remove_file(&raw).ok();
                    result.errors += 1;
                }
            }
        }

        if !raw.is_file() {
            result.missing_raw += 1;
            pb.inc(1);
            continue;
        }

        match ensure_variants(config, &layout, &slug) {
            Ok(n) => result.variants_written += n,
            Err(e) => {
                log::warn!("Failed to derive images for {slug}: {e}");
                result.errors += 1;
            }
        }
        pb.inc(1);
    }

    pb.finish_with_message(format!(
        "Done: {} acquired, {} variants, {} without image, {} errors",
        result.acquired, result.variants_written, result.missing_raw, result.errors
    ));
    Ok(result)
}

/// Fetch the raw image for one artwork. Returns `Ok(false)` when there is
/// no source URL.
pub fn acquire(config: &AppConfig, url: &str, raw: &Path) -> Result<bool, ImageError> {
    if url.is_empty() {
        return Ok(false);
    }
    if is_deep_zoom(url) {
        log::info!("Deep-zoom download {} from {url}", raw.display());
        dezoom::download(&config.dezoom, url, raw)?;
    } else {
        log::info!("Downloading {} from {url}", raw.display());
        download_file(url, raw, config.http_timeout())?;
    }
    Ok(raw.is_file())
}

pub fn is_deep_zoom(url: &str) -> bool {
    DEEP_ZOOM_HOSTS.iter().any(|host| url.contains(host))
}

/// Plain HTTP GET into `output`. Non-success statuses are errors.
fn download_file(url: &str, output: &Path, timeout: Duration) -> Result<(), ImageError> {
    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into();
    let bytes = agent
        .get(url)
        .call()?
        .body_mut()
        .with_config()
        .limit(MAX_DOWNLOAD_BYTES)
        .read_to_vec()?;
    let mut file = fs::File::create(output)?;
    file.write_all(&bytes)?;
    Ok(())
}

/// Write any missing web/HD/thumbnail variant from the raw image.
/// Returns the number of files written.
pub fn ensure_variants(config: &AppConfig, layout: &ImageLayout, slug: &str) -> Result<u64, ImageError> {
    let variants = [
        (layout.web(slug), Variant { label: "web", max_dim: config.sizes.web, quality: 90 }),
        (layout.hd(slug), Variant { label: "hd", max_dim: config.sizes.hd, quality: 80 }),
        (layout.thumb(slug), Variant { label: "thumbnail", max_dim: config.sizes.thumb, quality: 90 }),
    ];

    let missing: Vec<_> = variants.into_iter().filter(|(path, _)| !path.is_file()).collect();
    if missing.is_empty() {
        return Ok(0);
    }

    let raw = open_rgb(&layout.raw(slug))?;
    for (path, variant) in &missing {
        log::info!("Resize {slug} for {}", variant.label);
        let sized = fit_within(&raw, variant.max_dim);
        save_jpeg(&sized, path, variant.quality)?;
    }
    Ok(missing.len() as u64)
}

/// Decode an image file and convert it to RGB.
pub fn open_rgb(path: &Path) -> Result<DynamicImage, image::ImageError> {
    Ok(DynamicImage::ImageRgb8(image::open(path)?.to_rgb8()))
}

/// Compute the size that fits `(width, height)` inside a `max_dim` square,
/// keeping aspect ratio and never enlarging.
pub fn fit_dimensions(width: u32, height: u32, max_dim: u32) -> (u32, u32) {
    let max_dim = max_dim.max(1);
    if width <= max_dim && height <= max_dim {
        return (width, height);
    }
    if width >= height {
        let h = (f64::from(height) * f64::from(max_dim) / f64::from(width)).round() as u32;
        (max_dim, h.max(1))
    } else {
        let w = (f64::from(width) * f64::from(max_dim) / f64::from(height)).round() as u32;
        (w.max(1), max_dim)
    }
}

/// Downscale an image to fit inside a `max_dim` square.
pub fn fit_within(img: &DynamicImage, max_dim: u32) -> DynamicImage {
    let (w, h) = img.dimensions();
    let (tw, th) = fit_dimensions(w, h, max_dim);
    if (tw, th) == (w, h) {
        img.clone()
    } else {
        img.resize_exact(tw, th, FilterType::Lanczos3)
    }
}

/// Encode as baseline JPEG with the given quality.
pub fn save_jpeg(img: &DynamicImage, path: &Path, quality: u8) -> Result<(), ImageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = fs::File::create(path)?;
    let mut writer = std::io::BufWriter::new(file);
    let mut encoder = JpegEncoder::new_with_quality(&mut writer, quality);
    encoder.encode_image(&img.to_rgb8())?;
    writer.flush()?;
    Ok(())
}
