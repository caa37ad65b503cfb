use std::path::PathBuf;

/// WFS layer listing every published LiDAR HD tile ("dalle") with its download URL.
pub const URL_LHD: &str = "https://data.geopf.fr/private/wfs/wfs?apikey=interface_catalogue&SERVICE=WFS&REQUEST=GetFeature&VERSION=2.0.0&TYPENAMES=IGNF_LIDAR-HD_TA:nuage-dalle";

/// Lambert-93, the CRS the tiling index is requested and stored in.
pub const REFERENCE_EPSG: u32 = 2154;

pub const DEFAULT_FOLDER_PATH: &str = "./lidarhd_data/";

/// Cached index files are named `<prefix>_<YYYY-MM-DD>.geojson`.
pub const DATABASE_PREFIX: &str = "LidarHD_tiles_database";
pub const DATABASE_EXTENSION: &str = "geojson";

pub const TILES_FOLDER: &str = "tiles";

pub const DEFAULT_PAGE_SIZE: usize = 5000;
pub const DEFAULT_MAX_PAGES: usize = 100;
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

pub fn get_default_folder_path() -> PathBuf {
    PathBuf::from(DEFAULT_FOLDER_PATH)
}
