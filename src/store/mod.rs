pub mod merge;

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use thiserror::Error;

use crate::record::ArtworkRecord;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid store JSON in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// All records, keyed by slug. Keys stay sorted so the written document is
/// stable across runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArtworkStore {
    records: BTreeMap<String, ArtworkRecord>,
}

impl ArtworkStore {
    /// Read the store; a missing file is an empty store.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!("No store at {}, starting empty", path.display());
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let records: BTreeMap<String, ArtworkRecord> =
            serde_json::from_str(&text).map_err(|source| StoreError::Json {
                path: path.display().to_string(),
                source,
            })?;
        log::info!("Loaded {} records from {}", records.len(), path.display());
        Ok(Self { records })
    }

    /// Write the whole store, replacing the file atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let io_err = |source| StoreError::Io {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_vec(&self.records).map_err(|source| StoreError::Json {
            path: path.display().to_string(),
            source,
        })?;

        let tmp = path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp).map_err(io_err)?;
        file.write_all(&json).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        fs::rename(&tmp, path).map_err(io_err)?;

        log::info!("Wrote {} records to {}", self.records.len(), path.display());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, slug: &str) -> Option<&ArtworkRecord> {
        self.records.get(slug)
    }

    pub fn get_mut(&mut self, slug: &str) -> Option<&mut ArtworkRecord> {
        self.records.get_mut(slug)
    }

    /// Insert under the record's slug, replacing any previous record.
    pub fn insert(&mut self, record: ArtworkRecord) -> Option<ArtworkRecord> {
        self.records.insert(record.slug().to_string(), record)
    }

    pub fn records(&self) -> impl Iterator<Item = &ArtworkRecord> {
        self.records.values()
    }

    pub fn records_mut(&mut self) -> impl Iterator<Item = &mut ArtworkRecord> {
        self.records.values_mut()
    }

    pub fn stats(&self) -> StoreStats {
        let mut stats = StoreStats {
            total: self.records.len(),
            ..Default::default()
        };
        for r in self.records.values() {
            if r.is_analyzed() {
                stats.analyzed += 1;
            } else {
                stats.pending += 1;
            }
            if r.face_rectangle().is_some() {
                stats.with_face += 1;
            }
            if r.dominant_color.is_some() {
                stats.with_color += 1;
            }
        }
        stats
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct StoreStats {
    pub total: usize,
    pub analyzed: usize,
    pub pending: usize,
    pub with_face: usize,
    pub with_color: usize,
}
