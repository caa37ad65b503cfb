use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::collect::fetch::{failed_tasks, DownloadTask, TaskStatus, TileFetcher};
use crate::collect::http::{HttpClient, ReqwestClient};
use crate::collect::ign::tile_index::TileIndexStore;
use crate::config::{FetchFailurePolicy, LidarHdConfig};
use crate::error::{LidarHdError, Result};
use crate::geometric::aoi::AoiGeometry;
use crate::geometric::lidar::{output_is_compressed, PointCloudAssembler};
use crate::geometric::tiles::{match_tiles, TileRecord, TilingIndex};

/// What a [`LidarHd::download`] run did.
#[derive(Debug, Clone)]
pub struct DownloadReport {
    /// One task per matched tile, in index order
    pub tasks: Vec<DownloadTask>,
    pub output: PathBuf,
    pub point_count: u64,
}

impl DownloadReport {
    pub fn downloaded(&self) -> usize {
        self.count(|s| *s == TaskStatus::Downloaded)
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| *s == TaskStatus::Skipped)
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, TaskStatus::Failed(_)))
    }

    fn count(&self, pred: impl Fn(&TaskStatus) -> bool) -> usize {
        self.tasks.iter().filter(|t| pred(&t.status)).count()
    }
}

/// Entry point: AOI in, cropped LAS/LAZ file out.
///
/// The tiling index is loaded on first use and kept for the lifetime of the
/// value, so several AOIs can be processed against one index.
pub struct LidarHd {
    config: LidarHdConfig,
    client: Arc<dyn HttpClient>,
    index: Option<TilingIndex>,
}

impl LidarHd {
    pub fn new(config: LidarHdConfig) -> Result<Self> {
        let client = ReqwestClient::with_timeout(config.timeout_secs)
            .map_err(|e| LidarHdError::Config(format!("{:#}", e)))?;
        Self::with_client(config, Arc::new(client))
    }

    /// Same as [`LidarHd::new`] with a caller-provided HTTP client.
    pub fn with_client(config: LidarHdConfig, client: Arc<dyn HttpClient>) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.folder_path).map_err(|e| {
            LidarHdError::Config(format!(
                "cannot create folder {}: {}",
                config.folder_path.display(),
                e
            ))
        })?;
        tracing::debug!(folder = %config.folder_path.display(), "LiDAR HD downloader ready");

        Ok(LidarHd {
            config,
            client,
            index: None,
        })
    }

    pub fn config(&self) -> &LidarHdConfig {
        &self.config
    }

    fn index_store(&self) -> TileIndexStore {
        TileIndexStore::new(&self.config.folder_path, self.client.clone(), &self.config)
    }

    /// The tiling index, from cache or WFS on first call.
    pub fn index(&mut self) -> Result<&TilingIndex> {
        if self.index.is_none() {
            let index = self.index_store().load(self.config.refresh_index)?;
            self.index = Some(index);
        }
        self.index
            .as_ref()
            .ok_or_else(|| LidarHdError::IndexUnavailable("index not loaded".into()))
    }

    /// Fetch the tiling index from the WFS even if a cached copy exists.
    pub fn refresh_index(&mut self) -> Result<&TilingIndex> {
        let index = self.index_store().load(true)?;
        Ok(self.index.insert(index))
    }

    /// Tiles overlapping `aoi`, without downloading anything.
    pub fn intersecting_tiles<A: AoiGeometry + ?Sized>(&mut self, aoi: &A) -> Result<Vec<TileRecord>> {
        let index = self.index()?;
        match_tiles(index, aoi)
    }

    /// Download the tiles overlapping `aoi` and merge them, cropped to the
    /// AOI, into `output` (`.las` or `.laz`).
    pub fn download<A: AoiGeometry + ?Sized>(
        &mut self,
        aoi: &A,
        output: impl AsRef<Path>,
    ) -> Result<DownloadReport> {
        let output = output.as_ref();
        // Fail before any network access
        output_is_compressed(output)?;

        let tiles = self.intersecting_tiles(aoi)?;
        if tiles.is_empty() {
            return Err(LidarHdError::NoIntersectingTiles);
        }

        let fetcher = TileFetcher::new(self.client.clone(), self.config.tile_folder());
        let tasks = fetcher.ensure_local(&tiles, self.config.overwrite);

        let failed = failed_tasks(&tasks);
        if !failed.is_empty() {
            match self.config.fetch_failure {
                FetchFailurePolicy::Abort => {
                    return Err(LidarHdError::PartialFetchFailure {
                        failed,
                        total: tasks.len(),
                    });
                }
                FetchFailurePolicy::BestEffort => {
                    for tile in &failed {
                        tracing::warn!("Tile missing from the output: {}", tile);
                    }
                    if failed.len() == tasks.len() {
                        return Err(LidarHdError::PartialFetchFailure {
                            failed,
                            total: tasks.len(),
                        });
                    }
                }
            }
        }

        let inputs: Vec<PathBuf> = tasks
            .iter()
            .filter(|t| t.is_available())
            .map(|t| t.target.clone())
            .collect();
        let point_count =
            PointCloudAssembler::new(self.config.empty_crop).assemble(&inputs, aoi, output)?;

        Ok(DownloadReport {
            tasks,
            output: output.to_path_buf(),
            point_count,
        })
    }
}
