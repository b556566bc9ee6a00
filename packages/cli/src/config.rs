//! Pipeline configuration, read from a TOML file.
//!
//! Relative paths in the file are resolved against the directory the file
//! lives in, so a config can sit next to its data.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bysykkel_buildings::overpass::{DEFAULT_ENDPOINT, DEFAULT_TIMEOUT};
use bysykkel_buildings::retry::DEFAULT_MAX_ATTEMPTS;
use bysykkel_buildings::{FetchOptions, RetryPolicy};
use bysykkel_loader::districts::DistrictFields;
use bysykkel_loader::trips::TripColumns;
use serde::Deserialize;

/// Errors that can occur while reading the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Failed to read config {path}: {source}")]
    Io {
        /// Path as given.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The file is not valid TOML or does not match the expected shape.
    #[error("Failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// The command needs a section the file does not have.
    #[error("Config has no [{0}] section")]
    MissingSection(&'static str),
}

/// The whole pipeline configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Trip dataset. Only `run` and `profile` read trips.
    pub trips: Option<TripsConfig>,
    /// District polygons and population.
    pub districts: DistrictsConfig,
    /// Building footprint retrieval.
    #[serde(default)]
    pub buildings: BuildingsConfig,
    /// Where results go.
    #[serde(default)]
    pub output: OutputConfig,
}

/// `[trips]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TripsConfig {
    /// Delimited trip export.
    pub path: PathBuf,
    /// Field delimiter; a single ASCII character.
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    /// Column names.
    #[serde(default)]
    pub columns: TripColumns,
}

/// `[districts]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DistrictsConfig {
    /// `GeoJSON` file with district polygons.
    pub path: PathBuf,
    /// Property names for name, id and population.
    #[serde(default)]
    pub fields: DistrictFields,
    /// District names to keep; all districts when empty.
    #[serde(default)]
    pub select: Vec<String>,
}

/// `[buildings]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildingsConfig {
    /// Whether to compute building indicators at all.
    pub enabled: bool,
    /// Overpass API interpreter URL.
    pub endpoint: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Attempts per retrieval, including the first one.
    pub max_attempts: u32,
    /// Margin around the districts' extent, in metres.
    pub margin_m: f64,
    /// Saved Overpass JSON response to read instead of querying the
    /// network.
    pub saved_response: Option<PathBuf>,
}

impl Default for BuildingsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            margin_m: FetchOptions::default().margin_m,
            saved_response: None,
        }
    }
}

impl BuildingsConfig {
    /// Per-request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Retry policy with the configured attempt count.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            ..RetryPolicy::default()
        }
    }

    /// Fetch options whose overall timeout covers every attempt and the
    /// backoff between them.
    #[must_use]
    pub fn fetch_options(&self) -> FetchOptions {
        let retry = self.retry_policy();
        let backoff: Duration = (1..=self.max_attempts)
            .map(|attempt| retry.delay_before(attempt))
            .sum();

        FetchOptions {
            margin_m: self.margin_m,
            timeout: self
                .request_timeout()
                .saturating_mul(self.max_attempts)
                .saturating_add(backoff),
        }
    }
}

/// `[output]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    /// Output directory, created if missing.
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("output"),
        }
    }
}

const fn default_delimiter() -> char {
    ','
}

impl TripsConfig {
    /// The delimiter as a byte.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] unless the delimiter is a single
    /// ASCII character other than a quote or line break.
    pub fn delimiter(&self) -> Result<u8, ConfigError> {
        let c = self.delimiter;
        match u8::try_from(c) {
            Ok(b) if b.is_ascii() && !matches!(b, b'"' | b'\n' | b'\r') => Ok(b),
            _ => Err(ConfigError::Invalid(format!(
                "trips.delimiter {c:?} must be a single ASCII character"
            ))),
        }
    }
}

impl PipelineConfig {
    /// Reads, validates and resolves the config at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, parsed or
    /// validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let mut config = Self::parse(&text)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }

        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parses and validates TOML text. Paths are left as written.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the text is not a valid configuration.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::de::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// The `[trips]` section.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingSection`] if the file has none.
    pub fn trips(&self) -> Result<&TripsConfig, ConfigError> {
        self.trips
            .as_ref()
            .ok_or(ConfigError::MissingSection("trips"))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(trips) = &self.trips {
            trips.delimiter()?;
        }

        let buildings = &self.buildings;
        if buildings.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "buildings.max_attempts must be at least 1".to_string(),
            ));
        }
        if buildings.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "buildings.timeout_secs must be positive".to_string(),
            ));
        }
        if !(buildings.margin_m.is_finite() && buildings.margin_m >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "buildings.margin_m must be a non-negative number, got {}",
                buildings.margin_m
            )));
        }

        if self.districts.select.iter().any(|name| name.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "districts.select contains an empty name".to_string(),
            ));
        }

        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };

        if let Some(trips) = self.trips.as_mut() {
            resolve(&mut trips.path);
        }
        resolve(&mut self.districts.path);
        resolve(&mut self.output.dir);
        if let Some(saved) = self.buildings.saved_response.as_mut() {
            resolve(saved);
        }
    }
}
