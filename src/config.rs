//! Configuration file parsing and data locations

use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use log::warn;
use crate::error::MedMindError;

/// Default upload size limit in megabytes
pub const DEFAULT_MAX_UPLOAD_MB: u64 = 10;

/// Default number of sessions returned by history listings
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

/// Default look-back window for trend analysis
pub const DEFAULT_TREND_MONTHS: u32 = 12;

/// Changes smaller than this percentage are reported as stable
pub const DEFAULT_STABLE_THRESHOLD_PCT: f64 = 5.0;

/// Configuration loaded from config.txt
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// SQLite database location, OS data directory when unset
    pub database_path: Option<String>,
    /// Reference range JSON file, built-in table when unset
    pub ranges_path: Option<String>,
    pub max_upload_mb: u64,
    pub history_limit: usize,
    pub trend_months: u32,
    pub stable_threshold_pct: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            ranges_path: None,
            max_upload_mb: DEFAULT_MAX_UPLOAD_MB,
            history_limit: DEFAULT_HISTORY_LIMIT,
            trend_months: DEFAULT_TREND_MONTHS,
            stable_threshold_pct: DEFAULT_STABLE_THRESHOLD_PCT,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, MedMindError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut lines = Vec::new();
        for line in reader.lines() {
            lines.push(line?);
        }
        Ok(Self::parse(lines.iter().map(String::as_str)))
    }

    /// Build a configuration from `key value # comment` lines.
    /// Unknown keys and unparsable values are ignored with a warning.
    pub fn parse<'a, I>(lines: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut config = Config::default();

        for line in lines {
            // Skip empty lines and comments
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, rest)) = Self::parse_line(line) else {
                continue;
            };
            let value = rest.split('#').next().unwrap_or("").trim();
            if value.is_empty() {
                continue;
            }

            match key {
                "database_path" => config.database_path = Some(value.to_string()),
                "ranges_path" => config.ranges_path = Some(value.to_string()),
                "max_upload_mb" => set_parsed(&mut config.max_upload_mb, key, value),
                "history_limit" => set_parsed(&mut config.history_limit, key, value),
                "trend_months" => set_parsed(&mut config.trend_months, key, value),
                "stable_threshold_pct" => set_parsed(&mut config.stable_threshold_pct, key, value),
                _ => warn!("Ignoring unknown config key: {}", key),
            }
        }

        config
    }

    /// Parse a single config line, returning (key, value)
    fn parse_line(line: &str) -> Option<(&str, &str)> {
        // Find first whitespace to separate key from value
        let mut parts = line.splitn(2, |c: char| c.is_whitespace());
        let key = parts.next()?.trim();
        let value = parts.next()?.trim();

        if key.is_empty() || value.is_empty() {
            return None;
        }

        Some((key, value))
    }

    /// Write a commented default configuration file
    pub fn create_default<P: AsRef<Path>>(path: P) -> Result<(), MedMindError> {
        let mut file = File::create(path)?;
        writeln!(file, "# MedMind configuration")?;
        writeln!(file, "# database_path /path/to/medmind_history.db")?;
        writeln!(file, "# ranges_path /path/to/ranges.json")?;
        writeln!(file, "max_upload_mb {}", DEFAULT_MAX_UPLOAD_MB)?;
        writeln!(file, "history_limit {}", DEFAULT_HISTORY_LIMIT)?;
        writeln!(file, "trend_months {}", DEFAULT_TREND_MONTHS)?;
        writeln!(file, "stable_threshold_pct {}  # smaller changes count as stable", DEFAULT_STABLE_THRESHOLD_PCT)?;
        Ok(())
    }

    /// Upload size limit in bytes
    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_mb * 1024 * 1024
    }

    /// Resolved database location
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(default_database_path)
    }
}

fn set_parsed<T: std::str::FromStr>(slot: &mut T, key: &str, value: &str) {
    match value.parse() {
        Ok(parsed) => *slot = parsed,
        Err(_) => warn!("Invalid value for {}: {}", key, value),
    }
}

/// OS-specific data directory for MedMind
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("medmind")
}

/// Create the data directory if it doesn't exist
pub fn ensure_data_dir() -> std::io::Result<()> {
    fs::create_dir_all(get_data_dir())
}

pub fn default_database_path() -> PathBuf {
    get_data_dir().join("medmind_history.db")
}

pub fn config_file_path() -> PathBuf {
    get_data_dir().join("config.txt")
}
