use anyhow::{Context, Result as AnyResult};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[cfg(feature = "indicatif")]
use crate::commons::basic_functions::progress_bar;

use crate::collect::http::HttpClient;
use crate::error::FailedTile;
use crate::geometric::tiles::TileRecord;

/// Outcome of bringing one tile into the local folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    /// Fetched during this run
    Downloaded,
    /// A local copy already existed and was kept
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DownloadTask {
    pub record: TileRecord,
    /// Local destination of the tile
    pub target: PathBuf,
    pub status: TaskStatus,
}

impl DownloadTask {
    pub fn new(record: TileRecord, tile_folder: &Path) -> Self {
        let target = record.local_path(tile_folder);
        DownloadTask {
            record,
            target,
            status: TaskStatus::Pending,
        }
    }

    /// True when the target file can be read by the assembler.
    pub fn is_available(&self) -> bool {
        matches!(self.status, TaskStatus::Downloaded | TaskStatus::Skipped)
    }
}

/// Downloads tiles into a folder, one at a time, keeping existing copies
/// unless asked to overwrite them.
pub struct TileFetcher {
    client: Arc<dyn HttpClient>,
    tile_folder: PathBuf,
}

impl TileFetcher {
    pub fn new(client: Arc<dyn HttpClient>, tile_folder: impl Into<PathBuf>) -> Self {
        TileFetcher {
            client,
            tile_folder: tile_folder.into(),
        }
    }

    /// Make every record available locally. Failures are recorded on the
    /// task and do not stop the remaining downloads.
    pub fn ensure_local(&self, records: &[TileRecord], overwrite: bool) -> Vec<DownloadTask> {
        let mut tasks: Vec<DownloadTask> = records
            .iter()
            .cloned()
            .map(|record| DownloadTask::new(record, &self.tile_folder))
            .collect();

        if let Err(e) = std::fs::create_dir_all(&self.tile_folder) {
            let reason = format!("cannot create {}: {}", self.tile_folder.display(), e);
            tracing::error!("{}", reason);
            for task in &mut tasks {
                task.status = TaskStatus::Failed(reason.clone());
            }
            return tasks;
        }

        #[cfg(feature = "indicatif")]
        let pb = progress_bar(tasks.len() as u64, "Downloading tiles");

        for task in &mut tasks {
            task.status = if !overwrite && has_local_copy(&task.target) {
                tracing::debug!("{} already exists, skipping download", task.target.display());
                TaskStatus::Skipped
            } else {
                match self.download(&task.record.remote_url, &task.target) {
                    Ok(bytes) => {
                        tracing::info!("Downloaded {} ({} bytes)", task.record.name, bytes);
                        TaskStatus::Downloaded
                    }
                    Err(e) => {
                        tracing::warn!("Failed to download {}: {:#}", task.record.remote_url, e);
                        TaskStatus::Failed(format!("{:#}", e))
                    }
                }
            };

            #[cfg(feature = "indicatif")]
            pb.inc(1);
        }

        #[cfg(feature = "indicatif")]
        pb.finish_and_clear();

        tracing::info!(
            "{} tile(s) downloaded, {} already present, {} failed",
            tasks.iter().filter(|t| t.status == TaskStatus::Downloaded).count(),
            tasks.iter().filter(|t| t.status == TaskStatus::Skipped).count(),
            tasks.iter().filter(|t| matches!(t.status, TaskStatus::Failed(_))).count(),
        );
        tasks
    }

    /// Stream `url` into a temporary file next to `target`, then move it in
    /// place. An interrupted download never leaves a partial tile behind.
    fn download(&self, url: &str, target: &Path) -> AnyResult<u64> {
        let mut tmp = tempfile::NamedTempFile::new_in(&self.tile_folder)
            .context("Failed to create temporary tile file")?;
        let bytes = self.client.download_to(url, &mut tmp)?;
        tmp.flush().context("Failed to flush tile file")?;
        tmp.persist(target)
            .map_err(|e| e.error)
            .with_context(|| format!("Failed to save tile to {}", target.display()))?;
        Ok(bytes)
    }
}

fn has_local_copy(path: &Path) -> bool {
    std::fs::metadata(path).map_or(false, |m| m.is_file() && m.len() > 0)
}

/// Failed tasks, as reported by `PartialFetchFailure`.
pub fn failed_tasks(tasks: &[DownloadTask]) -> Vec<FailedTile> {
    tasks
        .iter()
        .filter_map(|task| match &task.status {
            TaskStatus::Failed(reason) => Some(FailedTile {
                url: task.record.remote_url.clone(),
                reason: reason.clone(),
            }),
            _ => None,
        })
        .collect()
}
