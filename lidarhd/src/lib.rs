//! Download IGN LiDAR HD point-cloud tiles that intersect an area of interest
//! and merge them into a single LAS/LAZ file cropped to that area.
//!
//! ```no_run
//! use lidarhd::{Aoi, LidarHd, LidarHdConfig};
//!
//! # fn main() -> lidarhd::Result<()> {
//! let mut lidar = LidarHd::new(LidarHdConfig::new("./lidarhd_data/", false))?;
//! let aoi = Aoi::from_bbox(651_200.0, 6_862_200.0, 651_600.0, 6_862_500.0, 2154);
//! let report = lidar.download(&aoi, "./output/site.laz")?;
//! println!("{} points written", report.point_count);
//! # Ok(())
//! # }
//! ```

pub mod collect;
pub mod commons;
pub mod config;
pub mod error;
pub mod geo_core;
pub mod geometric;
pub mod lidar_hd;

pub use collect::fetch::{DownloadTask, TaskStatus, TileFetcher};
pub use collect::http::{HttpClient, ReqwestClient};
pub use collect::ign::tile_index::TileIndexStore;
pub use config::{EmptyCropPolicy, FetchFailurePolicy, LidarHdConfig};
pub use error::{FailedTile, LidarHdError, Result};
pub use geometric::aoi::{Aoi, AoiGeometry};
pub use geometric::lidar::PointCloudAssembler;
pub use geometric::tiles::{match_tiles, TileRecord, TilingIndex};
pub use lidar_hd::{DownloadReport, LidarHd};
