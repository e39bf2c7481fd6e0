//! Service settings
//!
//! Settings come from a YAML file. Every field has a default, so a partial
//! file (or none at all) is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::DEFAULT_PAGE_SIZE;
use crate::dispatch::{
    DispatchConfig, DEFAULT_BASE_URL, DEFAULT_DELIVERY_TIMEOUT, DEFAULT_HISTORY_LIMIT,
    DEFAULT_MAX_CONCURRENCY,
};
use crate::{PayloadError, Result};

pub const SETTINGS_FILE: &str = "settings.yaml";
pub const DEFAULT_EXPORT_LIMIT: usize = 10_000;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 60;

/// How downloads of `url`-sourced payloads are served
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteDownloads {
    /// Fetch the bytes upstream and hand them over
    #[default]
    Proxy,
    /// Hand the caller the upstream URL instead
    Redirect,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    pub max_concurrency: usize,
    pub delivery_timeout_secs: u64,
    /// Dispatch records kept in memory
    pub history_limit: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            delivery_timeout_secs: DEFAULT_DELIVERY_TIMEOUT.as_secs(),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory scanned for manifests at startup
    pub manifest_dir: PathBuf,
    /// Root of the local artifact store
    pub artifact_dir: PathBuf,
    /// Path prefix, relative to `artifact_dir`, for uploaded artifacts
    pub artifact_prefix: String,
    /// Base URL agents fetch local artifacts from
    pub base_url: String,
    pub default_page_size: usize,
    /// Most entries a filter-based export returns
    pub export_limit: usize,
    pub remote_downloads: RemoteDownloads,
    /// Bound on a single upstream artifact fetch
    pub fetch_timeout_secs: u64,
    pub dispatch: DispatchSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            manifest_dir: PathBuf::from("data/manifest"),
            artifact_dir: PathBuf::from("."),
            artifact_prefix: "data/files".to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            default_page_size: DEFAULT_PAGE_SIZE,
            export_limit: DEFAULT_EXPORT_LIMIT,
            remote_downloads: RemoteDownloads::default(),
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            dispatch: DispatchSettings::default(),
        }
    }
}

impl Settings {
    /// Platform config location, e.g. `~/.config/payloads/settings.yaml` on Linux
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "payloads").map(|dirs| dirs.config_dir().join(SETTINGS_FILE))
    }

    /// Load from `path`, or from the default location when none is given.
    ///
    /// A missing file yields defaults; an explicitly named one must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => match Self::default_path() {
                Some(path) if path.is_file() => Self::load_from_path(&path),
                _ => {
                    debug!("No settings file found, using defaults");
                    Ok(Self::default())
                }
            },
        }
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PayloadError::Config(format!(
                "Failed to read settings file {}: {}",
                path.display(),
                e
            ))
        })?;
        let settings: Settings = if content.trim().is_empty() {
            Settings::default()
        } else {
            serde_yaml_ng::from_str(&content).map_err(|e| {
                PayloadError::Config(format!(
                    "Failed to parse settings file {}: {}",
                    path.display(),
                    e
                ))
            })?
        };
        settings.validate()?;
        debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.dispatch.max_concurrency == 0 {
            return Err(PayloadError::Config(
                "dispatch.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.dispatch.delivery_timeout_secs == 0 {
            return Err(PayloadError::Config(
                "dispatch.delivery_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(PayloadError::Config(
                "fetch_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.default_page_size == 0 || self.export_limit == 0 {
            return Err(PayloadError::Config(
                "default_page_size and export_limit must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            base_url: self.base_url.clone(),
            max_concurrency: self.dispatch.max_concurrency,
            delivery_timeout: Duration::from_secs(self.dispatch.delivery_timeout_secs),
            history_limit: self.dispatch.history_limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(
            &path,
            "base_url: http://c2.local:8888\ndispatch:\n  max_concurrency: 2\n",
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.base_url, "http://c2.local:8888");
        assert_eq!(settings.dispatch.max_concurrency, 2);
        assert_eq!(settings.dispatch.history_limit, DEFAULT_HISTORY_LIMIT);
        assert_eq!(settings.export_limit, DEFAULT_EXPORT_LIMIT);
        assert_eq!(settings.remote_downloads, RemoteDownloads::Proxy);
        assert_eq!(settings.fetch_timeout(), Duration::from_secs(60));

        let dispatch = settings.dispatch_config();
        assert_eq!(dispatch.delivery_timeout, DEFAULT_DELIVERY_TIMEOUT);
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let result = Settings::load(Some(&dir.path().join("nope.yaml")));
        assert!(matches!(result, Err(PayloadError::Config(_))));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(&path, "dispatch:\n  max_concurrency: 0\n").unwrap();
        assert!(Settings::load_from_path(&path).is_err());
    }

    #[test]
    fn test_redirect_mode_and_fetch_timeout() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(&path, "remote_downloads: redirect\nfetch_timeout_secs: 5\n").unwrap();
        let settings = Settings::load_from_path(&path).unwrap();
        assert_eq!(settings.remote_downloads, RemoteDownloads::Redirect);
        assert_eq!(settings.fetch_timeout(), Duration::from_secs(5));

        std::fs::write(&path, "fetch_timeout_secs: 0\n").unwrap();
        assert!(Settings::load_from_path(&path).is_err());
    }

    #[test]
    fn test_empty_file_is_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(&path, "").unwrap();
        assert_eq!(Settings::load_from_path(&path).unwrap(), Settings::default());
    }
}
