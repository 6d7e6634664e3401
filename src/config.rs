// Configuration for chonker-harvest
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::types::{HarvestError, Result};

pub const CONFIG_ENV: &str = "CHONKER_HARVEST_CONFIG";
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Process-wide pipeline settings. Read-only once the pipeline is built.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Minimum trimmed transcript length a text strategy must reach
    #[serde(default = "default_quality_bar")]
    pub quality_bar: usize,
    /// Vertical band used to cluster fragments into lines
    #[serde(default = "default_line_tolerance")]
    pub line_tolerance: f64,
    #[serde(default = "default_max_images")]
    pub max_images: usize,
    #[serde(default = "default_min_image_bytes")]
    pub min_image_bytes: usize,
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,
    /// Offset window inside which a regex URL defers to an annotation link
    #[serde(default = "default_dedup_window")]
    pub dedup_window: usize,
    #[serde(default = "default_parse_timeout_ms")]
    pub parse_timeout_ms: u64,
    #[serde(default = "default_ocr_timeout_ms")]
    pub ocr_timeout_ms: u64,
    #[serde(default = "default_ocr_language")]
    pub ocr_language: String,
    /// Concurrent recognition passes allowed across all requests
    #[serde(default = "default_ocr_workers")]
    pub ocr_workers: usize,
    #[serde(default = "default_raster_dpi")]
    pub raster_dpi: u32,
    #[serde(default)]
    pub temp_root: Option<PathBuf>,
    #[serde(default = "default_pdftoppm_bin")]
    pub pdftoppm_bin: String,
    #[serde(default = "default_tesseract_bin")]
    pub tesseract_bin: String,
    /// Run the byte scan even when structured image extraction succeeded
    #[serde(default)]
    pub exhaustive_image_scan: bool,
    #[serde(default = "default_true")]
    pub hyperlinks: bool,
    #[serde(default = "default_true")]
    pub ocr_enabled: bool,
}

fn default_true() -> bool { true }
fn default_quality_bar() -> usize { 50 }
fn default_line_tolerance() -> f64 { 0.5 }
fn default_max_images() -> usize { 6 }
fn default_min_image_bytes() -> usize { 2 * 1024 }
fn default_max_image_bytes() -> usize { 10 * 1024 * 1024 }
fn default_dedup_window() -> usize { 10 }
fn default_parse_timeout_ms() -> u64 { 10_000 }
fn default_ocr_timeout_ms() -> u64 { 120_000 }
fn default_ocr_language() -> String { "eng".to_string() }
fn default_ocr_workers() -> usize { 2 }
fn default_raster_dpi() -> u32 { 200 }
fn default_pdftoppm_bin() -> String { "pdftoppm".to_string() }
fn default_tesseract_bin() -> String { "tesseract".to_string() }

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            quality_bar: default_quality_bar(),
            line_tolerance: default_line_tolerance(),
            max_images: default_max_images(),
            min_image_bytes: default_min_image_bytes(),
            max_image_bytes: default_max_image_bytes(),
            dedup_window: default_dedup_window(),
            parse_timeout_ms: default_parse_timeout_ms(),
            ocr_timeout_ms: default_ocr_timeout_ms(),
            ocr_language: default_ocr_language(),
            ocr_workers: default_ocr_workers(),
            raster_dpi: default_raster_dpi(),
            temp_root: None,
            pdftoppm_bin: default_pdftoppm_bin(),
            tesseract_bin: default_tesseract_bin(),
            exhaustive_image_scan: false,
            hyperlinks: true,
            ocr_enabled: true,
        }
    }
}

impl PipelineConfig {
    /// Load from an explicit path, `$CHONKER_HARVEST_CONFIG`, or the user
    /// config dir, in that order. Falls back to defaults when no file exists.
    /// Environment overrides are applied last.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match Self::locate(explicit) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| HarvestError::Config(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| HarvestError::Config(e.to_string()))
    }

    fn locate(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        if let Ok(path) = env::var(CONFIG_ENV) {
            return Some(PathBuf::from(path));
        }
        dirs::config_dir()
            .map(|dir| dir.join("chonker-harvest").join(CONFIG_FILE_NAME))
            .filter(|path| path.exists())
    }

    /// Environment variables win over file values.
    pub fn apply_env(&mut self) {
        if let Ok(lang) = env::var("CHONKER_OCR_LANG") {
            self.ocr_language = lang;
        }
        if let Ok(dir) = env::var("CHONKER_TEMP_DIR") {
            self.temp_root = Some(PathBuf::from(dir));
        }
        if let Ok(bin) = env::var("CHONKER_PDFTOPPM") {
            self.pdftoppm_bin = bin;
        }
        if let Ok(bin) = env::var("CHONKER_TESSERACT") {
            self.tesseract_bin = bin;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.line_tolerance.is_nan() || self.line_tolerance <= 0.0 {
            return Err(HarvestError::Config("line_tolerance must be positive".into()));
        }
        if self.min_image_bytes >= self.max_image_bytes {
            return Err(HarvestError::Config(
                "min_image_bytes must be below max_image_bytes".into(),
            ));
        }
        if self.ocr_workers == 0 {
            return Err(HarvestError::Config("ocr_workers must be at least 1".into()));
        }
        if self.ocr_language.trim().is_empty() {
            return Err(HarvestError::Config("ocr_language is empty".into()));
        }
        Ok(())
    }

    pub fn parse_timeout(&self) -> Duration {
        Duration::from_millis(self.parse_timeout_ms)
    }

    pub fn ocr_timeout(&self) -> Duration {
        Duration::from_millis(self.ocr_timeout_ms)
    }

    /// Where scratch files (rasterized pages) go.
    pub fn temp_root(&self) -> PathBuf {
        self.temp_root.clone().unwrap_or_else(env::temp_dir)
    }
}
