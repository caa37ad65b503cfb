use anyhow::{Context, Result as AnyResult};
use chrono::Local;
use geo::{Geometry, MultiPolygon};
use geojson::{Feature, FeatureCollection, GeoJson};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[cfg(feature = "indicatif")]
use crate::commons::basic_functions::progress_bar;

use crate::collect::global_variables::{DATABASE_EXTENSION, DATABASE_PREFIX, REFERENCE_EPSG};
use crate::collect::http::HttpClient;
use crate::config::LidarHdConfig;
use crate::error::{LidarHdError, Result};
use crate::geo_core::{epsg_from_geojson_crs, geojson_crs_member};
use crate::geometric::tiles::{TileRecord, TilingIndex};

/// Local copy of the LiDAR HD tiling index ("database"), refreshed from the
/// IGN WFS when missing or on demand.
///
/// The cache is a GeoJSON FeatureCollection named
/// `LidarHD_tiles_database_<YYYY-MM-DD>.geojson` inside the store folder,
/// one feature per tile with `url` and `bloc` properties.
pub struct TileIndexStore {
    folder: PathBuf,
    client: Arc<dyn HttpClient>,
    index_url: String,
    page_size: usize,
    max_pages: usize,
}

/// Tiles parsed out of one GeoJSON document.
struct ParsedFeatures {
    records: Vec<TileRecord>,
    /// Features in the document, usable or not
    feature_count: usize,
    /// `numberMatched` (WFS 2.0) or `totalFeatures` (GeoServer), when the server reports it
    number_matched: Option<usize>,
    epsg: Option<u32>,
}

impl TileIndexStore {
    pub fn new(folder: impl Into<PathBuf>, client: Arc<dyn HttpClient>, config: &LidarHdConfig) -> Self {
        TileIndexStore {
            folder: folder.into(),
            client,
            index_url: config.index_url.clone(),
            page_size: config.page_size,
            max_pages: config.max_pages,
        }
    }

    /// Newest cached index file, if any.
    pub fn cached_database_path(&self) -> Option<PathBuf> {
        self.cached_database_paths().pop()
    }

    /// Load the cached index, or fetch it from the WFS when there is no
    /// usable cache or `force_refresh` is set.
    pub fn load(&self, force_refresh: bool) -> Result<TilingIndex> {
        let cached = self.cached_database_path();
        match (&cached, force_refresh) {
            (Some(path), false) => match read_database(path) {
                Ok(index) => {
                    tracing::info!(
                        "No need to download, using existing database {} ({} tiles)",
                        path.display(),
                        index.len()
                    );
                    return Ok(index);
                }
                Err(e) => {
                    tracing::warn!("Ignoring unreadable database {}: {:#}", path.display(), e);
                    tracing::info!("Downloading new database...");
                }
            },
            (Some(_), true) => tracing::info!("Updating database..."),
            (None, _) => tracing::info!("Downloading new database..."),
        }

        self.download_database().map_err(LidarHdError::index)
    }

    fn download_database(&self) -> AnyResult<TilingIndex> {
        std::fs::create_dir_all(&self.folder)
            .with_context(|| format!("Failed to create folder {}", self.folder.display()))?;

        let records = self.fetch_records()?;
        if records.is_empty() {
            anyhow::bail!("WFS {} returned no tile", self.index_url);
        }

        let path = self.write_database(&records)?;
        tracing::info!("LiDAR HD database saved in {} ({} tiles)", path.display(), records.len());
        self.remove_stale_databases(&path);

        Ok(TilingIndex::new(REFERENCE_EPSG, records))
    }

    /// Page through the WFS until an empty page, until every matched
    /// feature is received, or until `max_pages`.
    ///
    /// STARTINDEX advances by the features actually returned, so a server
    /// that caps COUNT below `page_size` still yields the whole index.
    fn fetch_records(&self) -> AnyResult<Vec<TileRecord>> {
        let mut records = Vec::new();
        let mut received = 0usize;
        let mut number_matched = None;
        let mut exhausted = false;

        #[cfg(feature = "indicatif")]
        let pb = progress_bar(self.max_pages as u64, "Fetching data chunks");

        for page in 0..self.max_pages {
            let url = self.page_url(received)?;
            tracing::debug!(page, start_index = received, %url, "Requesting tiling index page");

            let body = self
                .client
                .get(&url)
                .with_context(|| format!("Failed to fetch tiling index page {}", page))?;
            let parsed = parse_features(&String::from_utf8_lossy(&body))
                .with_context(|| format!("Invalid tiling index page {}", page))?;

            #[cfg(feature = "indicatif")]
            pb.inc(1);

            if parsed.feature_count == 0 {
                exhausted = true;
                break;
            }
            if parsed.feature_count < self.page_size {
                tracing::debug!(
                    "Page {} returned {} of {} requested features",
                    page,
                    parsed.feature_count,
                    self.page_size
                );
            }
            received += parsed.feature_count;
            records.extend(parsed.records);
            number_matched = parsed.number_matched.or(number_matched);

            if number_matched.map_or(false, |matched| received >= matched) {
                exhausted = true;
                break;
            }
        }

        #[cfg(feature = "indicatif")]
        pb.finish_and_clear();

        if !exhausted {
            if let Some(matched) = number_matched {
                anyhow::bail!(
                    "tiling index incomplete after {} pages: {} of {} features received",
                    self.max_pages,
                    received,
                    matched
                );
            }
            tracing::warn!(
                "Stopped after {} pages ({} features), the tiling index may be incomplete",
                self.max_pages,
                received
            );
        }

        Ok(records)
    }

    fn page_url(&self, start_index: usize) -> AnyResult<String> {
        let mut url = url::Url::parse(&self.index_url)
            .with_context(|| format!("Invalid tiling index URL: {}", self.index_url))?;
        url.query_pairs_mut()
            .append_pair("STARTINDEX", &start_index.to_string())
            .append_pair("COUNT", &self.page_size.to_string())
            .append_pair("SRSNAME", &format!("urn:ogc:def:crs:EPSG::{}", REFERENCE_EPSG))
            .append_pair("OUTPUTFORMAT", "application/json");
        Ok(url.to_string())
    }

    fn write_database(&self, records: &[TileRecord]) -> AnyResult<PathBuf> {
        let features: Vec<Feature> = records
            .iter()
            .map(|record| {
                let mut feature = Feature {
                    bbox: None,
                    geometry: Some(geojson::Geometry::new(geojson::Value::from(&record.footprint))),
                    id: None,
                    properties: None,
                    foreign_members: None,
                };
                feature.set_property("url", record.remote_url.clone());
                feature.set_property("bloc", record.name.clone());
                feature
            })
            .collect();
        let collection = FeatureCollection {
            bbox: None,
            features,
            foreign_members: Some(geojson_crs_member(REFERENCE_EPSG)),
        };

        let path = self.folder.join(format!(
            "{}_{}.{}",
            DATABASE_PREFIX,
            Local::now().format("%Y-%m-%d"),
            DATABASE_EXTENSION
        ));

        // Written next to the target and renamed, so a crash never leaves half an index
        let mut tmp = tempfile::NamedTempFile::new_in(&self.folder)
            .context("Failed to create temporary database file")?;
        tmp.write_all(GeoJson::from(collection).to_string().as_bytes())
            .context("Failed to write database")?;
        tmp.persist(&path)
            .map_err(|e| e.error)
            .with_context(|| format!("Failed to save database to {}", path.display()))?;

        Ok(path)
    }

    fn remove_stale_databases(&self, keep: &Path) {
        for path in self.cached_database_paths() {
            if path == keep {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => tracing::debug!("Removed stale database {}", path.display()),
                Err(e) => tracing::warn!("Failed to remove stale database {}: {}", path.display(), e),
            }
        }
    }

    /// Cached index files, oldest first (dates sort lexicographically).
    fn cached_database_paths(&self) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(&self.folder) else {
            return Vec::new();
        };
        let suffix = format!(".{}", DATABASE_EXTENSION);
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .map_or(false, |n| n.starts_with(DATABASE_PREFIX) && n.ends_with(&suffix))
            })
            .collect();
        paths.sort();
        paths
    }
}

fn read_database(path: &Path) -> AnyResult<TilingIndex> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read database {}", path.display()))?;
    let parsed = parse_features(&text)?;
    if parsed.records.is_empty() {
        anyhow::bail!("database {} holds no tile", path.display());
    }
    Ok(TilingIndex::new(parsed.epsg.unwrap_or(REFERENCE_EPSG), parsed.records))
}

/// Extract tile records from a GeoJSON FeatureCollection.
/// Features without a `url` property or without polygonal geometry are skipped.
fn parse_features(text: &str) -> AnyResult<ParsedFeatures> {
    let geojson: GeoJson = text.parse().context("Failed to parse GeoJSON")?;
    let GeoJson::FeatureCollection(collection) = geojson else {
        anyhow::bail!("expected a GeoJSON FeatureCollection");
    };

    let epsg = collection.foreign_members.as_ref().and_then(epsg_from_geojson_crs);
    let number_matched = collection.foreign_members.as_ref().and_then(|members| {
        ["numberMatched", "totalFeatures"]
            .iter()
            .find_map(|key| members.get(*key).and_then(|v| v.as_u64()))
            .map(|n| n as usize)
    });
    let feature_count = collection.features.len();
    let mut records = Vec::with_capacity(feature_count);
    let mut skipped = 0usize;

    for feature in collection.features {
        let url = feature
            .property("url")
            .and_then(|u| u.as_str())
            .map(str::to_string);
        let footprint = feature
            .geometry
            .and_then(|g| Geometry::<f64>::try_from(g).ok())
            .and_then(|g| match g {
                Geometry::Polygon(p) => Some(MultiPolygon::new(vec![p])),
                Geometry::MultiPolygon(mp) => Some(mp),
                _ => None,
            });

        match (url, footprint) {
            (Some(url), Some(footprint)) => records.push(TileRecord::new(url, footprint)),
            _ => skipped += 1,
        }
    }

    if skipped > 0 {
        tracing::warn!("Skipped {} feature(s) without url or polygon footprint", skipped);
    }

    Ok(ParsedFeatures {
        records,
        feature_count,
        number_matched,
        epsg,
    })
}
