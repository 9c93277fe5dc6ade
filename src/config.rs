use anyhow::{Context, Result};
use chrono::{NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Top-level configuration for a takeout merge run.
///
/// Controls sidecar matching, how files are transferred into the export
/// tree, which files are processed, and how the external `exiftool`
/// backend is invoked.
///
/// # Loading
///
/// ```rust,no_run
/// use takeout_merge::config::Config;
///
/// // From a JSON file
/// let config = Config::load(Some("takeout-merge.json".as_ref())).unwrap();
///
/// // Or use defaults and customize
/// let mut config = Config::default();
/// config.workers = 8;
/// config.transfer.move_files = true;
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Sidecar naming conventions and fuzzy matching thresholds.
    pub sidecar: SidecarConfig,
    /// Copy/move behavior.
    pub transfer: TransferConfig,
    /// Which files take part in the run.
    pub filters: FilterConfig,
    /// External metadata tool settings.
    pub exiftool: ExifToolConfig,
    /// Size of the worker pool.
    pub workers: usize,
    /// If `true`, log what would happen without touching the filesystem.
    pub dry_run: bool,
}

/// How a media file is paired with its sidecar JSON.
///
/// Takeout names sidecars `<media name><suffix>`, but truncates the whole
/// sidecar file name to `max_name_len` characters. Every boundary of the
/// fuzzy fallback is configurable because the exact truncation rules have
/// changed between Takeout exports.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SidecarConfig {
    /// Suffix appended to the full media file name, e.g. `.supplemental-metadata.json`.
    pub suffix: String,
    /// Maximum sidecar file name length (in characters, `.json` included).
    pub max_name_len: usize,
    /// Scan sibling `.json` files when no naming convention matches.
    pub fuzzy: bool,
    /// Minimum `json stem / media stem` length ratio for a truncated-stem candidate.
    pub min_truncation_ratio: f64,
    /// Truncated-stem ratio above which the candidate is accepted immediately.
    pub confident_ratio: f64,
    /// Common prefix must be longer than this (in characters) to count.
    pub min_common_prefix: usize,
    /// Best fuzzy candidate must score above this to be accepted.
    pub accept_score: f64,
}

/// Copy/move behavior for the export tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Move files instead of copying them (removes the originals).
    pub move_files: bool,
    /// Skip media whose destination already exists.
    pub skip_existing: bool,
    /// Keep the file times of the copied file across the metadata write.
    /// When `false`, the modification time is set to the capture time.
    pub preserve_mtime: bool,
}

/// Filters applied to discovered media.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Inclusive lower bound on the capture time (epoch seconds).
    pub date_from: Option<i64>,
    /// Inclusive upper bound on the capture time (epoch seconds).
    pub date_to: Option<i64>,
    /// Lowercase extensions without the dot. `None` means every supported type.
    pub file_types: Option<BTreeSet<String>>,
}

/// External `exiftool` backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExifToolConfig {
    /// Program name or path.
    pub program: PathBuf,
    /// Retry through exiftool when a native writer fails.
    pub fallback: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sidecar: SidecarConfig::default(),
            transfer: TransferConfig::default(),
            filters: FilterConfig::default(),
            exiftool: ExifToolConfig::default(),
            workers: 4,
            dry_run: false,
        }
    }
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            suffix: ".supplemental-metadata.json".to_string(),
            max_name_len: 51,
            fuzzy: true,
            min_truncation_ratio: 0.6,
            confident_ratio: 0.85,
            min_common_prefix: 8,
            accept_score: 0.7,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            move_files: false,
            skip_existing: false,
            preserve_mtime: true,
        }
    }
}

impl Default for ExifToolConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("exiftool"),
            fallback: true,
        }
    }
}

impl Config {
    /// Load config from the given path. A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(config_path) = path else {
            return Ok(Self::default());
        };

        if !config_path.exists() {
            log::warn!(
                "Config file not found at {}. Using defaults.",
                config_path.display()
            );
            return Ok(Self::default());
        }

        let contents =
            std::fs::read_to_string(config_path).context("Failed to read config file")?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Save config to the given path as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        log::info!("Config saved to {}", path.display());
        Ok(())
    }

    /// Check the settings that would make the whole run meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            anyhow::bail!("Worker count must be at least 1");
        }
        if !self.sidecar.suffix.starts_with('.') {
            anyhow::bail!(
                "Metadata suffix must start with a dot: {}",
                self.sidecar.suffix
            );
        }
        if let (Some(from), Some(to)) = (self.filters.date_from, self.filters.date_to) {
            if from > to {
                anyhow::bail!("--date-from ({from}) is after --date-to ({to})");
            }
        }
        Ok(())
    }
}

impl FilterConfig {
    /// `true` if the lowercase extension passes the file-type filter.
    pub fn allows_extension(&self, ext: &str) -> bool {
        match &self.file_types {
            Some(types) => types.contains(ext),
            None => true,
        }
    }

    /// `true` if a capture time (epoch seconds) is inside the date range.
    pub fn allows_timestamp(&self, epoch: i64) -> bool {
        self.date_from.is_none_or(|from| epoch >= from)
            && self.date_to.is_none_or(|to| epoch <= to)
    }
}

/// Parse a date filter given as epoch seconds or `YYYY-MM-DD` (start of day, UTC).
pub fn parse_date_filter(value: &str) -> Result<i64> {
    let value = value.trim();
    if let Ok(epoch) = value.parse::<i64>() {
        return Ok(epoch);
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").with_context(|| {
        format!("Invalid date format: {value}. Use ISO format (YYYY-MM-DD) or epoch timestamp.")
    })?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .context("Invalid start of day")?;
    Ok(Utc.from_utc_datetime(&midnight).timestamp())
}

/// Normalize a comma-separated extension list: `" JPG, .png "` → `{"jpg", "png"}`.
pub fn parse_file_types(value: &str) -> BTreeSet<String> {
    value
        .split(',')
        .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect()
}
