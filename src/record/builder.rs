use std::str::FromStr;

use thiserror::Error;

use crate::dataset::{self, ArtworkRow};
use crate::images::ImageLayout;
use crate::record::{
    ARTIST_DEATH_UNKNOWN, ArtworkInfo, Dimension, DimensionUnit, YEAR_SORT_UNKNOWN,
};
use crate::slug::slug;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("invalid number in column {column}: {value:?}")]
    InvalidNumber { column: &'static str, value: String },
    #[error("unreadable image {path}: {source}")]
    Image {
        path: String,
        #[source]
        source: image::ImageError,
    },
}

/// Map a dataset row to record fields.
///
/// Returns `Ok(None)` when the row's HD image is not on disk yet: the row is
/// skipped until the image stage has produced it.
pub fn build(row: &ArtworkRow, layout: &ImageLayout) -> Result<Option<ArtworkInfo>, BuildError> {
    let artist = row.get(dataset::COL_ARTIST).to_string();
    let title = row.get(dataset::COL_TITLE).to_string();
    let slug = slug(&artist, &title);

    let hd_path = layout.hd(&slug);
    if !hd_path.is_file() {
        log::debug!("No HD image for {slug}, skipping");
        return Ok(None);
    }

    let by_woman = flag(row, dataset::COL_BY_WOMAN);
    let by_man = !(by_woman || artist == dataset::ANONYMOUS_ARTIST);

    let mut dimension = Dimension {
        width: length_or_zero(row, dataset::COL_WIDTH_CM)?,
        height: length_or_zero(row, dataset::COL_HEIGHT_CM)?,
        unit: DimensionUnit::Cm,
    };

    if dimension.width == 0.0 && dimension.height == 0.0 {
        let (w, h) = image::image_dimensions(&hd_path).map_err(|source| BuildError::Image {
            path: hd_path.display().to_string(),
            source,
        })?;
        dimension = Dimension {
            width: f64::from(w),
            height: f64::from(h),
            unit: DimensionUnit::Px,
        };
    }

    Ok(Some(ArtworkInfo {
        img: ImageLayout::web_file_name(&slug),
        slug,
        artist,
        title,
        year: row.get(dataset::COL_YEAR).to_string(),
        year_sort: number_or(row, dataset::COL_YEAR_SORT, YEAR_SORT_UNKNOWN)?,
        medium: row.get(dataset::COL_MEDIUM).to_string(),
        collection: row.get(dataset::COL_COLLECTION).to_string(),
        artist_death: number_or(row, dataset::COL_ARTIST_DEATH, ARTIST_DEATH_UNKNOWN)?,
        marcantonio: flag(row, dataset::COL_MARCANTONIO),
        nudes: flag(row, dataset::COL_NUDES),
        by_woman,
        by_man,
        dimension,
    }))
}

/// Only the literal `TRUE` counts as set.
fn flag(row: &ArtworkRow, column: &'static str) -> bool {
    row.get(column) == "TRUE"
}

/// Parse a numeric cell; an empty cell yields `default`.
fn number_or<T: FromStr>(
    row: &ArtworkRow,
    column: &'static str,
    default: T,
) -> Result<T, BuildError> {
    let value = row.get(column).trim();
    if value.is_empty() {
        return Ok(default);
    }
    value.parse().map_err(|_| BuildError::InvalidNumber {
        column,
        value: value.to_string(),
    })
}

/// Parse a length cell; `NaN` and infinities are rejected since JSON cannot
/// hold them.
fn length_or_zero(row: &ArtworkRow, column: &'static str) -> Result<f64, BuildError> {
    let value: f64 = number_or(row, column, 0.0)?;
    if !value.is_finite() {
        return Err(BuildError::InvalidNumber {
            column,
            value: row.get(column).trim().to_string(),
        });
    }
    Ok(value)
}
