//! Scan settings loaded from `findex.toml` with environment overrides.
//!
//! File values are optional; anything missing falls back to the defaults
//! below. Environment variables prefixed with `FINDEX_` win over the file,
//! so a one-off run can flip a switch without editing configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Well-known configuration file name, looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "findex.toml";

/// Prefix for environment variable overrides (`FINDEX_SCAN_ARCHIVES`, ...).
pub const ENV_PREFIX: &str = "FINDEX_";

/// Errors that can occur while loading settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("Failed to read {path}: {source}")]
    Read {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },
    /// Configuration file is not valid TOML.
    #[error("Failed to parse {path}: {source}")]
    ParseToml {
        /// Path that failed to parse.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },
}

/// Tunables for a scan run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Descend into ZIP/TAR/RAR containers and index their entries.
    pub scan_archives: bool,
    /// Archives larger than this on disk are skipped without opening.
    pub max_archive_size: u64,
    /// Entries inside an archive larger than this are skipped per entry.
    pub max_archive_file_size: u64,
    /// Load `.ignore` rules from the scan root.
    pub enable_ignore_rules: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            scan_archives: true,
            max_archive_size: 524_288_000,
            max_archive_file_size: 104_857_600,
            enable_ignore_rules: false,
        }
    }
}

impl Settings {
    /// Load settings from `findex.toml` in the working directory, returning
    /// defaults when the file is missing, then apply environment overrides.
    pub fn load_or_default() -> Result<Self, ConfigError> {
        let mut settings = load_from(Path::new(CONFIG_FILE_NAME))?;
        settings.apply_env_overrides(|name| std::env::var(name).ok());
        Ok(settings)
    }

    /// Apply `FINDEX_*` overrides from the given environment lookup.
    ///
    /// Values that fail to parse are logged and skipped rather than failing
    /// the run.
    pub fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(value) = var_bool(&var, "SCAN_ARCHIVES") {
            self.scan_archives = value;
        }
        if let Some(value) = var_u64(&var, "MAX_ARCHIVE_SIZE") {
            self.max_archive_size = value;
        }
        if let Some(value) = var_u64(&var, "MAX_ARCHIVE_FILE_SIZE") {
            self.max_archive_file_size = value;
        }
        if let Some(value) = var_bool(&var, "ENABLE_IGNORE_RULES") {
            self.enable_ignore_rules = value;
        }
    }
}

/// Load settings from a specific TOML file, returning defaults when missing.
pub fn load_from(path: &Path) -> Result<Settings, ConfigError> {
    if !path.exists() {
        return Ok(Settings::default());
    }
    let bytes = std::fs::read(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let text = String::from_utf8_lossy(&bytes);
    toml::from_str(&text).map_err(|source| ConfigError::ParseToml {
        path: path.to_path_buf(),
        source,
    })
}

fn var_bool(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<bool> {
    let raw = var(&format!("{ENV_PREFIX}{key}"))?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        other => {
            warn!("Ignoring {ENV_PREFIX}{key}={other:?}: expected a boolean");
            None
        }
    }
}

fn var_u64(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let raw = var(&format!("{ENV_PREFIX}{key}"))?;
    match raw.trim().parse::<u64>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring {ENV_PREFIX}{key}={raw:?}: expected an unsigned integer");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_match_documented_values() {
        let settings = Settings::default();
        assert!(settings.scan_archives);
        assert_eq!(settings.max_archive_size, 524_288_000);
        assert_eq!(settings.max_archive_file_size, 104_857_600);
        assert!(!settings.enable_ignore_rules);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let settings = load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("findex.toml");
        std::fs::write(&path, "scan_archives = false\n").unwrap();
        let settings = load_from(&path).unwrap();
        assert!(!settings.scan_archives);
        assert_eq!(settings.max_archive_size, 524_288_000);
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("findex.toml");
        std::fs::write(&path, "scan_archives = [broken\n").unwrap();
        let err = load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseToml { .. }));
    }

    #[test]
    fn env_overrides_win_over_file_values() {
        let mut settings = Settings::default();
        settings.apply_env_overrides(|name| match name {
            "FINDEX_SCAN_ARCHIVES" => Some("off".to_string()),
            "FINDEX_MAX_ARCHIVE_SIZE" => Some("1024".to_string()),
            _ => None,
        });
        assert!(!settings.scan_archives);
        assert_eq!(settings.max_archive_size, 1024);
        assert_eq!(settings.max_archive_file_size, 104_857_600);
    }

    #[test]
    fn unparseable_env_values_are_skipped() {
        let mut settings = Settings::default();
        settings.apply_env_overrides(|name| match name {
            "FINDEX_MAX_ARCHIVE_SIZE" => Some("lots".to_string()),
            "FINDEX_ENABLE_IGNORE_RULES" => Some("maybe".to_string()),
            _ => None,
        });
        assert_eq!(settings.max_archive_size, 524_288_000);
        assert!(!settings.enable_ignore_rules);
    }
}
