//! Job configuration.
//!
//! Every setting has a default, so the job runs without a config file. A
//! TOML file (`--config`) overrides the defaults section by section, and
//! CLI flags override the file. Relative paths are resolved against
//! `data_dir`, which itself is resolved against the config file's
//! directory.

use std::path::{Path, PathBuf};

use chrono::{Days, NaiveDate};
use collision_digest_notify::{DEFAULT_FROM, DEFAULT_SUBJECT_PREFIX, EmailConfig};
use collision_digest_source::FetchOptions;
use collision_digest_source::socrata::{
    NYC_COLLISIONS_DATE_COLUMN, NYC_COLLISIONS_URL, SocrataConfig,
};
use collision_digest_spatial::{BoundaryOptions, INTERNAL_COLUMNS, OverlapPolicy};
use serde::Deserialize;

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("Failed to read config {path}: {source}")]
    Io {
        /// Config file path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The config file is not valid TOML for [`JobConfig`].
    #[error("Failed to parse config {path}: {source}")]
    Parse {
        /// Config file path.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },
}

/// Settings for one run of the job.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobConfig {
    /// Base directory for every relative path below.
    pub data_dir: PathBuf,
    pub source: SourceSettings,
    pub snapshot: SnapshotSettings,
    pub districts: DistrictSettings,
    pub email: EmailSettings,
    pub summary: SummarySettings,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            source: SourceSettings::default(),
            snapshot: SnapshotSettings::default(),
            districts: DistrictSettings::default(),
            email: EmailSettings::default(),
            summary: SummarySettings::default(),
        }
    }
}

/// `[source]`: the Socrata dataset and the fetch window.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceSettings {
    pub api_url: String,
    pub date_column: String,
    /// Fetch collisions dated on or after today minus this many days.
    pub lookback_days: u64,
    /// Maximum records per run.
    pub limit: u64,
    pub page_size: u64,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            api_url: NYC_COLLISIONS_URL.to_string(),
            date_column: NYC_COLLISIONS_DATE_COLUMN.to_string(),
            lookback_days: 7,
            limit: 1000,
            page_size: 1000,
        }
    }
}

/// `[snapshot]`: the CSV written each run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SnapshotSettings {
    pub filename: PathBuf,
    /// Columns never written to the CSV.
    pub drop_columns: Vec<String>,
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            filename: PathBuf::from("latest_collisions.csv"),
            drop_columns: INTERNAL_COLUMNS.iter().map(ToString::to_string).collect(),
        }
    }
}

/// `[districts]`: the boundary file and how to match against it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DistrictSettings {
    pub boundary_file: PathBuf,
    pub geometry_column: Option<String>,
    pub label_column: Option<String>,
    pub overlap_policy: OverlapPolicy,
}

impl Default for DistrictSettings {
    fn default() -> Self {
        Self {
            boundary_file: PathBuf::from("city_council_boundaries.csv"),
            geometry_column: None,
            label_column: None,
            overlap_policy: OverlapPolicy::default(),
        }
    }
}

/// `[email]`: summary email addressing and delivery.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EmailSettings {
    pub from: String,
    pub to: Vec<String>,
    pub subject_prefix: String,
    /// Directory receiving `.eml` files. Messages are only logged when
    /// unset.
    pub outbox_dir: Option<PathBuf>,
}

impl Default for EmailSettings {
    fn default() -> Self {
        Self {
            from: DEFAULT_FROM.to_string(),
            to: Vec::new(),
            subject_prefix: DEFAULT_SUBJECT_PREFIX.to_string(),
            outbox_dir: None,
        }
    }
}

/// `[summary]`: where the per-run summary JSON goes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SummarySettings {
    pub dir: PathBuf,
}

impl Default for SummarySettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
        }
    }
}

impl JobConfig {
    /// Loads a TOML config file. A relative `data_dir` is taken relative to
    /// the file's directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        if config.data_dir.is_relative()
            && let Some(parent) = path.parent()
        {
            config.data_dir = parent.join(&config.data_dir);
        }

        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Loads `path` when given, otherwise the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        path.map_or_else(|| Ok(Self::default()), Self::load)
    }

    /// Resolves `path` against `data_dir` unless it is absolute.
    #[must_use]
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data_dir.join(path)
        }
    }

    #[must_use]
    pub fn snapshot_path(&self) -> PathBuf {
        self.resolve(&self.snapshot.filename)
    }

    #[must_use]
    pub fn boundary_path(&self) -> PathBuf {
        self.resolve(&self.districts.boundary_file)
    }

    #[must_use]
    pub fn summary_dir(&self) -> PathBuf {
        self.resolve(&self.summary.dir)
    }

    #[must_use]
    pub fn outbox_dir(&self) -> Option<PathBuf> {
        self.email.outbox_dir.as_deref().map(|dir| self.resolve(dir))
    }

    #[must_use]
    pub fn socrata(&self) -> SocrataConfig {
        SocrataConfig {
            api_url: self.source.api_url.clone(),
            date_column: self.source.date_column.clone(),
            page_size: self.source.page_size,
            ..SocrataConfig::nyc_collisions()
        }
    }

    /// Fetch window ending `today`.
    #[must_use]
    pub fn fetch_options(&self, today: NaiveDate) -> FetchOptions {
        FetchOptions {
            since: today
                .checked_sub_days(Days::new(self.source.lookback_days))
                .unwrap_or(NaiveDate::MIN),
            limit: Some(self.source.limit),
        }
    }

    #[must_use]
    pub fn boundary_options(&self) -> BoundaryOptions {
        BoundaryOptions {
            geometry_column: self.districts.geometry_column.clone(),
            label_column: self.districts.label_column.clone(),
            ..BoundaryOptions::default()
        }
    }

    #[must_use]
    pub fn email_config(&self) -> EmailConfig {
        EmailConfig {
            from: self.email.from.clone(),
            to: self.email.to.clone(),
            subject_prefix: self.email.subject_prefix.clone(),
        }
    }
}
