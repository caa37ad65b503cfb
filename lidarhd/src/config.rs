use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::collect::global_variables::{
    get_default_folder_path, DEFAULT_MAX_PAGES, DEFAULT_PAGE_SIZE, DEFAULT_TIMEOUT_SECS,
    TILES_FOLDER, URL_LHD,
};
use crate::error::{LidarHdError, Result};

/// What to do when the AOI crop keeps no point at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyCropPolicy {
    /// Report an assembly error and leave no output file.
    #[default]
    Fail,
    /// Write a valid point cloud with a header and no points.
    WriteEmpty,
}

/// What to do when some matched tiles could not be downloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchFailurePolicy {
    /// Stop before assembly; the output would under-cover the AOI.
    #[default]
    Abort,
    /// Assemble whatever tiles are available and log the missing ones.
    BestEffort,
}

/// Runtime configuration of the downloader.
///
/// Every field has a default, so a JSON file only needs the keys it changes:
///
/// ```json
/// { "folder_path": "/data/lidarhd", "empty_crop": "write_empty" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LidarHdConfig {
    /// Root of the local cache (tiling index + downloaded tiles)
    pub folder_path: PathBuf,
    /// Re-download tiles that already exist locally
    pub overwrite: bool,
    /// Fetch the tiling index again even if a cached copy exists
    pub refresh_index: bool,
    /// WFS GetFeature URL of the tiling index
    pub index_url: String,
    /// Features requested per WFS page
    pub page_size: usize,
    /// Upper bound on WFS pages fetched for one refresh
    pub max_pages: usize,
    /// HTTP timeout, in seconds
    pub timeout_secs: u64,
    pub empty_crop: EmptyCropPolicy,
    pub fetch_failure: FetchFailurePolicy,
}

impl Default for LidarHdConfig {
    fn default() -> Self {
        LidarHdConfig {
            folder_path: get_default_folder_path(),
            overwrite: false,
            refresh_index: false,
            index_url: URL_LHD.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            max_pages: DEFAULT_MAX_PAGES,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            empty_crop: EmptyCropPolicy::default(),
            fetch_failure: FetchFailurePolicy::default(),
        }
    }
}

impl LidarHdConfig {
    pub fn new(folder_path: impl Into<PathBuf>, overwrite: bool) -> Self {
        LidarHdConfig {
            folder_path: folder_path.into(),
            overwrite,
            ..Default::default()
        }
    }

    /// Load a JSON configuration file. Missing keys keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let parsed: anyhow::Result<Self> = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))
            .and_then(|text| {
                serde_json::from_str(&text)
                    .with_context(|| format!("Failed to parse config file {}", path.display()))
            });
        let config = parsed.map_err(|e| LidarHdError::Config(format!("{:#}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.index_url.trim().is_empty() {
            return Err(LidarHdError::Config("index_url must not be empty".into()));
        }
        if self.page_size == 0 {
            return Err(LidarHdError::Config("page_size must be at least 1".into()));
        }
        if self.max_pages == 0 {
            return Err(LidarHdError::Config("max_pages must be at least 1".into()));
        }
        Ok(())
    }

    /// Folder where tile files are stored.
    pub fn tile_folder(&self) -> PathBuf {
        self.folder_path.join(TILES_FOLDER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = LidarHdConfig::default();
        assert_eq!(config.folder_path, PathBuf::from("./lidarhd_data/"));
        assert!(!config.overwrite);
        assert_eq!(config.page_size, 5000);
        assert_eq!(config.empty_crop, EmptyCropPolicy::Fail);
        assert_eq!(config.fetch_failure, FetchFailurePolicy::Abort);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "folder_path": "/tmp/lhd", "overwrite": true, "fetch_failure": "best_effort" }}"#
        )
        .unwrap();

        let config = LidarHdConfig::from_file(file.path()).unwrap();
        assert_eq!(config.folder_path, PathBuf::from("/tmp/lhd"));
        assert!(config.overwrite);
        assert_eq!(config.fetch_failure, FetchFailurePolicy::BestEffort);
        assert_eq!(config.max_pages, 100);
        assert_eq!(config.tile_folder(), PathBuf::from("/tmp/lhd/tiles"));
    }

    #[test]
    fn test_from_file_rejects_zero_page_size() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "page_size": 0 }}"#).unwrap();

        let err = LidarHdConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, LidarHdError::Config(_)));
    }

    #[test]
    fn test_from_file_invalid_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let err = LidarHdConfig::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
