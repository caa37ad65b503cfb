use std::fmt;

use thiserror::Error;

/// A tile whose download did not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedTile {
    pub url: String,
    pub reason: String,
}

impl fmt::Display for FailedTile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.url, self.reason)
    }
}

/// Errors surfaced by the download pipeline, one variant per stage.
///
/// Internal helpers work with `anyhow` and are converted at the stage
/// boundary; the message keeps the whole context chain.
#[derive(Debug, Error)]
pub enum LidarHdError {
    /// Neither a cached index nor the remote WFS could provide the tiling index.
    #[error("LiDAR HD tiling index unavailable: {0}")]
    IndexUnavailable(String),

    /// The AOI could not be brought into the index reference system.
    #[error("cannot reproject AOI from EPSG:{from} to EPSG:{to}: {reason}")]
    CrsMismatch { from: u32, to: u32, reason: String },

    /// The AOI does not overlap any published tile.
    #[error("no LiDAR HD tile intersects the area of interest")]
    NoIntersectingTiles,

    #[error(
        "{} of {} tile(s) failed to download: {}",
        failed.len(),
        total,
        failed.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(", ")
    )]
    PartialFetchFailure { failed: Vec<FailedTile>, total: usize },

    /// Decode, crop or write failure while building the output point cloud.
    #[error("point cloud assembly failed: {0}")]
    Assembly(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl LidarHdError {
    pub(crate) fn index(err: anyhow::Error) -> Self {
        LidarHdError::IndexUnavailable(format!("{:#}", err))
    }

    pub(crate) fn assembly(err: anyhow::Error) -> Self {
        LidarHdError::Assembly(format!("{:#}", err))
    }
}

pub type Result<T> = std::result::Result<T, LidarHdError>;
