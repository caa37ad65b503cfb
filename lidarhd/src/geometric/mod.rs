pub mod aoi;
pub mod lidar;
pub mod tiles;
