//! Dominant color of a thumbnail via k-means clustering over RGB pixels.

use std::path::Path;

use clap::ValueEnum;
use image::ImageReader;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use thiserror::Error;

use crate::images::ImageLayout;
use crate::store::ArtworkStore;

#[derive(Error, Debug)]
pub enum ColorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("image has no pixels")]
    Empty,
}

/// How the representative cluster is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ColorPolicy {
    /// Centroid of the most populated cluster.
    #[default]
    Largest,
    /// Brightest (HSV value) of the three most populated clusters.
    #[value(name = "brightest")]
    #[serde(rename = "brightest")]
    BrightestOfTop3,
}

/// k-means parameters.
#[derive(Debug, Clone)]
pub struct KMeans {
    pub k: usize,
    pub max_iterations: usize,
    /// Stop once no centroid moves farther than this.
    pub epsilon: f32,
    /// Independent random initializations; the most compact wins.
    pub attempts: usize,
    /// Fixed seed for reproducible runs; `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for KMeans {
    fn default() -> Self {
        Self {
            k: 8,
            max_iterations: 100,
            epsilon: 0.2,
            attempts: 10,
            seed: None,
        }
    }
}

/// One cluster of the final partition.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub center: [f32; 3],
    pub count: usize,
}

impl KMeans {
    /// Cluster pixels, returning one entry per centroid.
    pub fn cluster(&self, pixels: &[[f32; 3]]) -> Vec<Cluster> {
        if pixels.is_empty() || self.k == 0 {
            return Vec::new();
        }
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let (lo, hi) = bounds(pixels);

        let mut best: Option<(f64, Vec<[f32; 3]>, Vec<usize>)> = None;
        for _ in 0..self.attempts.max(1) {
            let mut centers: Vec<[f32; 3]> = (0..self.k)
                .map(|_| std::array::from_fn(|c| sample(&mut rng, lo[c], hi[c])))
                .collect();
            let mut labels = vec![0usize; pixels.len()];

            for _ in 0..self.max_iterations {
                assign(pixels, &centers, &mut labels);
                let shift = update(pixels, &labels, &mut centers);
                if shift < self.epsilon {
                    break;
                }
            }
            let compactness = assign(pixels, &centers, &mut labels);

            if best.as_ref().is_none_or(|(c, _, _)| compactness < *c) {
                best = Some((compactness, centers, labels));
            }
        }

        let Some((_, centers, labels)) = best else {
            return Vec::new();
        };
        let mut counts = vec![0usize; centers.len()];
        for &l in &labels {
            counts[l] += 1;
        }
        centers
            .into_iter()
            .zip(counts)
            .map(|(center, count)| Cluster { center, count })
            .collect()
    }
}

fn sample(rng: &mut StdRng, lo: f32, hi: f32) -> f32 {
    if hi > lo { rng.random_range(lo..hi) } else { lo }
}

fn bounds(pixels: &[[f32; 3]]) -> ([f32; 3], [f32; 3]) {
    let mut lo = [f32::MAX; 3];
    let mut hi = [f32::MIN; 3];
    for p in pixels {
        for c in 0..3 {
            lo[c] = lo[c].min(p[c]);
            hi[c] = hi[c].max(p[c]);
        }
    }
    (lo, hi)
}

fn dist2(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    (0..3).map(|c| (a[c] - b[c]) * (a[c] - b[c])).sum()
}

/// Label every pixel with its nearest center; returns the compactness.
fn assign(pixels: &[[f32; 3]], centers: &[[f32; 3]], labels: &mut [usize]) -> f64 {
    let mut total = 0.0f64;
    for (p, label) in pixels.iter().zip(labels.iter_mut()) {
        let (idx, d) = centers
            .iter()
            .enumerate()
            .map(|(i, c)| (i, dist2(p, c)))
            .fold((0, f32::MAX), |acc, x| if x.1 < acc.1 { x } else { acc });
        *label = idx;
        total += f64::from(d);
    }
    total
}

/// Move centers to their members' mean; empty clusters keep their center.
/// Returns the largest distance any center moved.
fn update(pixels: &[[f32; 3]], labels: &[usize], centers: &mut [[f32; 3]]) -> f32 {
    let mut sums = vec![[0.0f64; 3]; centers.len()];
    let mut counts = vec![0usize; centers.len()];
    for (p, &l) in pixels.iter().zip(labels) {
        for c in 0..3 {
            sums[l][c] += f64::from(p[c]);
        }
        counts[l] += 1;
    }

    let mut shift = 0.0f32;
    for (i, center) in centers.iter_mut().enumerate() {
        if counts[i] == 0 {
            continue;
        }
        let n = counts[i] as f64;
        let next: [f32; 3] = std::array::from_fn(|c| (sums[i][c] / n) as f32);
        shift = shift.max(dist2(center, &next).sqrt());
        *center = next;
    }
    shift
}

/// Truncate a centroid to 8-bit RGB.
fn to_rgb(center: &[f32; 3]) -> [u8; 3] {
    center.map(|v| v.clamp(0.0, 255.0) as u8)
}

/// HSV value (brightness) of an RGB color, in [0, 1].
pub fn hsv_value(rgb: [u8; 3]) -> f32 {
    f32::from(rgb[0].max(rgb[1]).max(rgb[2])) / 255.0
}

/// Apply the selection policy to cluster output.
pub fn select(clusters: &[Cluster], policy: ColorPolicy) -> Option<[u8; 3]> {
    let mut ranked: Vec<&Cluster> = clusters.iter().filter(|c| c.count > 0).collect();
    // Stable: equal counts keep centroid order
    ranked.sort_by(|a, b| b.count.cmp(&a.count));

    match policy {
        ColorPolicy::Largest => ranked.first().map(|c| to_rgb(&c.center)),
        ColorPolicy::BrightestOfTop3 => ranked
            .iter()
            .take(3)
            .map(|c| to_rgb(&c.center))
            .fold(None, |best: Option<[u8; 3]>, rgb| match best {
                Some(b) if hsv_value(b) >= hsv_value(rgb) => Some(b),
                _ => Some(rgb),
            }),
    }
}

pub fn to_hex(rgb: [u8; 3]) -> String {
    format!("#{:02X}{:02X}{:02X}", rgb[0], rgb[1], rgb[2])
}

/// Dominant color of an image file as `#RRGGBB`.
pub fn dominant_color(path: &Path, policy: ColorPolicy, kmeans: &KMeans) -> Result<String, ColorError> {
    let img = ImageReader::open(path)?.with_guessed_format()?.decode()?.to_rgb8();
    let pixels: Vec<[f32; 3]> = img
        .pixels()
        .map(|p| [f32::from(p[0]), f32::from(p[1]), f32::from(p[2])])
        .collect();
    let clusters = kmeans.cluster(&pixels);
    select(&clusters, policy).map(to_hex).ok_or(ColorError::Empty)
}

pub struct ColorResult {
    pub computed: u64,
    pub failed: u64,
}

/// Compute a dominant color for every record that has none yet.
/// Missing or unreadable thumbnails are logged and retried next run.
pub fn fill_dominant_colors(
    store: &mut ArtworkStore,
    layout: &ImageLayout,
    policy: ColorPolicy,
    kmeans: &KMeans,
) -> ColorResult {
    let mut result = ColorResult { computed: 0, failed: 0 };

    for record in store.records_mut() {
        if record.dominant_color.is_some() {
            continue;
        }
        let thumb = layout.thumb(record.slug());
        match dominant_color(&thumb, policy, kmeans) {
            Ok(color) => {
                log::info!("{}: {color}", record.slug());
                record.dominant_color = Some(color);
                result.computed += 1;
            }
            Err(e) => {
                log::warn!("No dominant color for {}: {e}", record.slug());
                result.failed += 1;
            }
        }
    }
    result
}
