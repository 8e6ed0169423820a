use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::Deserialize;

use crate::color::ColorPolicy;
use crate::images::ImageLayout;

/// Application configuration loaded from TOML config file.
/// All fields have sensible defaults; the config file is optional.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Working directory for raw, HD, thumbnail, and raw face images.
    pub images_dir: PathBuf,
    /// Root of the website's public directory (web images, faces, data file).
    pub web_dir: PathBuf,
    /// Custom store path (overrides `<web_dir>/data/obras.json`).
    pub store_path: Option<PathBuf>,
    /// Global timeout for dataset and image downloads.
    pub http_timeout_secs: u64,
    /// Maximum edge lengths for derived images.
    pub sizes: SizeConfig,
    /// Deep-zoom downloader settings.
    pub dezoom: DezoomConfig,
    /// Face analysis API settings.
    pub face_api: FaceApiConfig,
    /// Source spreadsheet settings.
    pub dataset: DatasetConfig,
    /// Dominant color settings.
    pub color: ColorConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            images_dir: PathBuf::from("imgs"),
            web_dir: PathBuf::from("../cordiais-web/public"),
            store_path: None,
            http_timeout_secs: 300,
            sizes: SizeConfig::default(),
            dezoom: DezoomConfig::default(),
            face_api: FaceApiConfig::default(),
            dataset: DatasetConfig::default(),
            color: ColorConfig::default(),
        }
    }
}

/// Maximum edge length, in pixels, of each derived image.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SizeConfig {
    pub hd: u32,
    pub web: u32,
    pub thumb: u32,
    pub face_web: u32,
}

impl Default for SizeConfig {
    fn default() -> Self {
        Self {
            hd: 2160,
            web: 800,
            thumb: 320,
            face_web: 512,
        }
    }
}

/// dezoomify-rs invocation settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DezoomConfig {
    pub command: PathBuf,
    pub compression: u32,
    pub max_dim: u32,
    /// Wall-clock bound for one download, in seconds.
    pub timeout_secs: u64,
}

impl Default for DezoomConfig {
    fn default() -> Self {
        Self {
            command: PathBuf::from("bin/dezoomify-rs"),
            compression: 16,
            max_dim: 1024 * 8,
            timeout_secs: 120,
        }
    }
}

/// Face++ detect API configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct FaceApiConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub attributes: String,
    /// Global timeout for one request, in seconds.
    pub timeout_secs: u64,
}

impl Default for FaceApiConfig {
    fn default() -> Self {
        Self {
            url: "https://api-us.faceplusplus.com/facepp/v3/detect".to_string(),
            api_key: None,
            api_secret: None,
            attributes: "emotion,gender,age,ethnicity".to_string(),
            timeout_secs: 60,
        }
    }
}

/// Google Sheets CSV export coordinates.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct DatasetConfig {
    pub sheet_id: Option<String>,
    pub sheet_name: Option<String>,
}

impl DatasetConfig {
    /// Export endpoint and sheet name, if both coordinates are set. The name
    /// goes into the query string, so it is passed separately for encoding.
    pub fn sheet(&self) -> Option<(String, &str)> {
        match (&self.sheet_id, &self.sheet_name) {
            (Some(id), Some(name)) => Some((
                format!("https://docs.google.com/spreadsheets/d/{id}/gviz/tq"),
                name.as_str(),
            )),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ColorConfig {
    pub policy: ColorPolicy,
}

impl AppConfig {
    /// Load config from `--config` or `~/.config/artpipe/config.toml`, then
    /// apply environment overrides.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load(explicit: Option<&Path>) -> Self {
        let config_path = explicit.map(Path::to_path_buf).or_else(Self::config_path);
        let mut config = match config_path {
            Some(path) if path.exists() => Self::load_file(&path),
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    fn load_file(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<AppConfig>(&contents) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                Self::default()
            }
        }
    }

    /// Credentials and sheet coordinates may come from the environment;
    /// non-empty variables win over the file.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| var(key).filter(|v| !v.is_empty());
        if let Some(v) = get("FACEPP_KEY") {
            self.face_api.api_key = Some(v);
        }
        if let Some(v) = get("FACEPP_SECRET") {
            self.face_api.api_secret = Some(v);
        }
        if let Some(v) = get("SHEET_ID") {
            self.dataset.sheet_id = Some(v);
        }
        if let Some(v) = get("SHEET_NAME") {
            self.dataset.sheet_name = Some(v);
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Directory layout for every derived file.
    pub fn layout(&self) -> ImageLayout {
        ImageLayout::new(&self.images_dir, &self.web_dir)
    }

    /// Resolve the store path: config override or `<web_dir>/data/obras.json`.
    pub fn resolve_store_path(&self) -> PathBuf {
        self.store_path
            .clone()
            .unwrap_or_else(|| self.layout().store_file())
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}
