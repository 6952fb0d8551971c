use coastline::{
    batch::ThresholdOverride, BatchOptions, CoastlineError, PathLayout, ThresholdConfig, TileJob, TileKey,
};

use schemars::JsonSchema;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    SerdeError(#[from] serde_json::Error),
    #[error(transparent)]
    TomlDeError(#[from] toml::de::Error),
    #[error(transparent)]
    TomlSerError(#[from] toml::ser::Error),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error(transparent)]
    Coastline(#[from] CoastlineError),
    #[error("Unsupported file format. Please use .toml or .json files")]
    UnsupportedFileFormat,
    #[error("Invalid run configuration: {0}")]
    Invalid(String),
}

/// Reads any configuration type from a `.toml` or `.json` file.
pub fn load_file<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T, ConfigError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => Ok(toml::from_str(&content)?),
        Some("json") => Ok(serde_json::from_str(&content)?),
        _ => Err(ConfigError::UnsupportedFileFormat),
    }
}

/// Which products a batch run writes besides the coastline GeoJSON
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    pub contours: bool,
    pub mask: bool,
    /// Evaluate tiles that have a reference point file.
    pub evaluate: bool,
    /// Where to write the run summary; defaults to `{root}/summary.json`.
    pub summary: Option<PathBuf>,
    /// Where to write the accuracy table; defaults to `{root}/accuracy.csv`.
    pub accuracy_csv: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            contours: false,
            mask: false,
            evaluate: true,
            summary: None,
            accuracy_csv: None,
        }
    }
}

/// Run configuration for `coastline batch`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct BatchConfig {
    /// Root of the `{country}/{year}/{stage}/{tile}` tree.
    pub root: PathBuf,
    pub countries: Vec<String>,
    pub years: Vec<u16>,
    /// Tile ids to process; empty means every index raster found.
    #[serde(default)]
    pub tiles: Vec<String>,
    pub threads: Option<usize>,
    #[serde(default)]
    pub outputs: OutputConfig,
    #[serde(default)]
    pub defaults: ThresholdConfig,
    /// Applied in order to matching tiles; later entries win.
    #[serde(default)]
    pub overrides: Vec<ThresholdOverride>,
}

impl BatchConfig {
    /// Load BatchConfig configuration from a TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load BatchConfig configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: BatchConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load BatchConfig configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Load BatchConfig configuration from JSON string
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: BatchConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Auto-detect file format and load configuration
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        match path_ref.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_file(path),
            Some("json") => Self::from_json_file(path),
            _ => Err(ConfigError::UnsupportedFileFormat),
        }
    }

    /// Convert BatchConfig to TOML string
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(&self)?)
    }

    /// Convert BatchConfig to JSON string
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(&self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.countries.is_empty() || self.years.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one country and one year are required".to_string(),
            ));
        }
        if self.threads == Some(0) {
            return Err(ConfigError::Invalid("threads must be at least 1".to_string()));
        }
        self.defaults.validate()?;
        Ok(())
    }

    pub fn layout(&self) -> PathLayout {
        PathLayout::new(&self.root)
    }

    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            write_contours: self.outputs.contours,
            write_mask: self.outputs.mask,
            evaluate: self.outputs.evaluate,
            threads: self.threads,
        }
    }

    /// Every tile of every country and year, with overrides resolved.
    pub fn jobs(&self) -> Result<Vec<TileJob>, ConfigError> {
        let layout = self.layout();
        let mut jobs = Vec::new();
        for country in &self.countries {
            for &year in &self.years {
                let keys = if self.tiles.is_empty() {
                    layout.discover(country, year)?
                } else {
                    self.tiles
                        .iter()
                        .map(|tile| TileKey::new(country.as_str(), year, tile.as_str()))
                        .collect()
                };
                jobs.extend(
                    keys.into_iter()
                        .map(|key| TileJob::resolve(key, &self.defaults, &self.overrides)),
                );
            }
        }
        Ok(jobs)
    }

    pub fn summary_path(&self) -> PathBuf {
        self.outputs
            .summary
            .clone()
            .unwrap_or_else(|| self.root.join("summary.json"))
    }

    pub fn accuracy_csv_path(&self) -> PathBuf {
        self.outputs
            .accuracy_csv
            .clone()
            .unwrap_or_else(|| self.root.join("accuracy.csv"))
    }
}
