use geo::{Area, BoundingRect, MultiPolygon, Relate};
use rstar::{RTree, RTreeObject, AABB};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::commons::basic_functions::{sanitized_file_name, url_to_bloc};
use crate::error::{LidarHdError, Result};
use crate::geo_core::GeoCore;
use crate::geometric::aoi::AoiGeometry;

/// One published LiDAR HD tile ("dalle").
#[derive(Debug, Clone, PartialEq)]
pub struct TileRecord {
    /// Tile identifier derived from the URL ("bloc")
    pub name: String,
    pub remote_url: String,
    /// Footprint in the index CRS
    pub footprint: MultiPolygon<f64>,
}

impl TileRecord {
    pub fn new(remote_url: impl Into<String>, footprint: MultiPolygon<f64>) -> Self {
        let remote_url = remote_url.into();
        let name = url_to_bloc(&remote_url).unwrap_or_else(|| sanitized_file_name(&remote_url));
        TileRecord {
            name,
            remote_url,
            footprint,
        }
    }

    /// File name of the local copy.
    pub fn local_file_name(&self) -> String {
        sanitized_file_name(&self.remote_url)
    }

    pub fn local_path(&self, tile_folder: &Path) -> PathBuf {
        tile_folder.join(self.local_file_name())
    }
}

/// Footprint envelope stored in the R-tree, pointing back at its record.
#[derive(Debug, Clone)]
struct TileEnvelope {
    idx: usize,
    env: AABB<[f64; 2]>,
}

impl RTreeObject for TileEnvelope {
    type Envelope = AABB<[f64; 2]>;

    #[inline]
    fn envelope(&self) -> Self::Envelope {
        self.env
    }
}

/// The tiling index: every published tile in publication order, plus an
/// R-tree over footprint envelopes.
pub struct TilingIndex {
    geo_core: GeoCore,
    records: Vec<TileRecord>,
    tree: RTree<TileEnvelope>,
}

impl TilingIndex {
    pub fn new(epsg: u32, records: Vec<TileRecord>) -> Self {
        let envelopes: Vec<TileEnvelope> = records
            .iter()
            .enumerate()
            .filter_map(|(idx, record)| {
                let rect = record.footprint.bounding_rect()?;
                Some(TileEnvelope {
                    idx,
                    env: AABB::from_corners(
                        [rect.min().x, rect.min().y],
                        [rect.max().x, rect.max().y],
                    ),
                })
            })
            .collect();

        TilingIndex {
            geo_core: GeoCore::new(epsg),
            records,
            tree: RTree::bulk_load(envelopes),
        }
    }

    pub fn epsg(&self) -> u32 {
        self.geo_core.get_epsg()
    }

    pub fn records(&self) -> &[TileRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl fmt::Debug for TilingIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TilingIndex")
            .field("epsg", &self.epsg())
            .field("tiles", &self.records.len())
            .finish()
    }
}

/// Tiles whose footprint overlaps the AOI, in index order.
///
/// Overlap means a non-empty shared area: a footprint that only touches the
/// AOI boundary is not selected. The AOI is reprojected into the index CRS
/// first when needed.
pub fn match_tiles<A: AoiGeometry + ?Sized>(index: &TilingIndex, aoi: &A) -> Result<Vec<TileRecord>> {
    let union = index
        .geo_core
        .reproject(aoi.epsg(), &aoi.union())
        .map_err(|e| LidarHdError::CrsMismatch {
            from: aoi.epsg(),
            to: index.epsg(),
            reason: format!("{:#}", e),
        })?;

    tracing::info!("Input area is {:.3} km²", union.unsigned_area() / 1e6);

    let Some(rect) = union.bounding_rect() else {
        return Ok(Vec::new());
    };
    let query = AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]);

    let mut candidates: Vec<usize> = index
        .tree
        .locate_in_envelope_intersecting(&query)
        .map(|entry| entry.idx)
        .collect();
    candidates.sort_unstable();

    let matched: Vec<TileRecord> = candidates
        .into_iter()
        .map(|idx| &index.records[idx])
        .filter(|record| {
            let matrix = record.footprint.relate(&union);
            matrix.is_intersects() && !matrix.is_touches()
        })
        .cloned()
        .collect();

    tracing::info!(
        "{} cloud(s) intersecting the area of interest out of {} published",
        matched.len(),
        index.len()
    );
    Ok(matched)
}
