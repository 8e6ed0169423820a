//! One full pass: dataset → images → merge → face crops → colors → store.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::color::{self, ColorPolicy, ColorResult, KMeans};
use crate::config::AppConfig;
use crate::dataset::{self, ArtworkRow};
use crate::faces::FaceAnalyzer;
use crate::faces::crop::{self, FaceExportResult};
use crate::images::{self, ImageStageResult};
use crate::store::ArtworkStore;
use crate::store::merge::{self, MergeResult};

pub struct RunOptions {
    /// Local CSV to use instead of the configured spreadsheet.
    pub dataset: Option<PathBuf>,
    /// Fetch missing raw images from their source URLs.
    pub download: bool,
    pub color_policy: ColorPolicy,
}

pub struct RunSummary {
    pub images: ImageStageResult,
    pub merge: MergeResult,
    pub faces: FaceExportResult,
    pub colors: ColorResult,
    pub total_records: usize,
}

/// Read dataset rows from a local file or the configured spreadsheet.
pub fn load_rows(config: &AppConfig, dataset: Option<&Path>) -> Result<Vec<ArtworkRow>> {
    if let Some(path) = dataset {
        return dataset::load_file(path)
            .with_context(|| format!("Failed to read dataset {}", path.display()));
    }
    let Some((url, sheet)) = config.dataset.sheet() else {
        bail!("No dataset. Pass --dataset or set SHEET_ID and SHEET_NAME (or [dataset] in config).");
    };
    dataset::fetch(&url, sheet, config.http_timeout()).context("Failed to fetch dataset")
}

/// Run every stage and persist the store once at the end.
pub fn run(
    config: &AppConfig,
    store_path: &Path,
    analyzer: &dyn FaceAnalyzer,
    options: &RunOptions,
) -> Result<RunSummary> {
    let rows = load_rows(config, options.dataset.as_deref())?;
    log::info!("{} dataset rows", rows.len());

    let images = images::process_rows(config, &rows, options.download)
        .context("Failed to prepare image directories")?;

    let mut store = ArtworkStore::load(store_path).context("Failed to load store")?;
    let layout = config.layout();

    let merge = merge::merge_rows(&mut store, &rows, &layout, analyzer);
    let faces = crop::export_faces(config, &store).context("Failed to export faces")?;
    let colors = color::fill_dominant_colors(
        &mut store,
        &layout,
        options.color_policy,
        &KMeans::default(),
    );

    store.save(store_path).context("Failed to write store")?;

    Ok(RunSummary {
        images,
        merge,
        faces,
        colors,
        total_records: store.len(),
    })
}
