//! Source dataset: a CSV export of the collection spreadsheet.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;

pub const COL_ARTIST: &str = "ARTISTA";
pub const COL_TITLE: &str = "TÍTULO DA OBRA";
pub const COL_YEAR: &str = "ANO";
pub const COL_YEAR_SORT: &str = "ANO (ordem)";
pub const COL_MEDIUM: &str = "TÉCNICA";
pub const COL_COLLECTION: &str = "ACERVO";
pub const COL_ARTIST_DEATH: &str = "DATA MORTE ARTISTA";
pub const COL_MARCANTONIO: &str = "PROJETO MARCANTONIO SITE";
pub const COL_NUDES: &str = "NUDES";
pub const COL_BY_WOMAN: &str = "PINTADA POR MULHERES";
pub const COL_WIDTH_CM: &str = "LARGURA cm";
pub const COL_HEIGHT_CM: &str = "ALTURA cm";
pub const COL_LINK: &str = "LINK EXTERNO";

/// Artist value used for works of unknown authorship.
pub const ANONYMOUS_ARTIST: &str = "Anônimo";

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] ureq::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// One dataset row: column name → raw cell text.
#[derive(Debug, Clone, Default)]
pub struct ArtworkRow {
    cells: HashMap<String, String>,
}

impl ArtworkRow {
    pub fn new(cells: HashMap<String, String>) -> Self {
        Self { cells }
    }

    /// Cell text for a column; missing columns read as empty.
    pub fn get(&self, column: &str) -> &str {
        self.cells.get(column).map(String::as_str).unwrap_or("")
    }

    /// Source image URL for this artwork.
    pub fn link(&self) -> &str {
        self.get(COL_LINK).trim()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ArtworkRow {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Parse CSV text with a header row into dataset rows.
pub fn parse_rows<R: Read>(reader: R) -> Result<Vec<ArtworkRow>, DatasetError> {
    let mut csv = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);
    let headers = csv.headers()?.clone();

    let mut rows = Vec::new();
    for record in csv.records() {
        let record = record?;
        let row = headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| (h.trim().to_string(), v.to_string()))
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

/// Read rows from a local CSV file.
pub fn load_file(path: &Path) -> Result<Vec<ArtworkRow>, DatasetError> {
    let file = std::fs::File::open(path)?;
    parse_rows(file)
}

/// Fetch one sheet's CSV export. A non-success response is an error.
pub fn fetch(url: &str, sheet: &str, timeout: Duration) -> Result<Vec<ArtworkRow>, DatasetError> {
    log::debug!("Fetching sheet {sheet:?} from {url}");
    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into();
    let body = agent
        .get(url)
        .query("tqx", "out:csv")
        .query("sheet", sheet)
        .call()?
        .body_mut()
        .read_to_string()?;
    let rows = parse_rows(body.as_bytes())?;
    log::info!("Fetched {} dataset rows", rows.len());
    Ok(rows)
}
