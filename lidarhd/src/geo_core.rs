use anyhow::Result;
use geo::MultiPolygon;

#[cfg(feature = "proj")]
use anyhow::Context;
#[cfg(feature = "proj")]
use geo::{Coord, MapCoords};
#[cfg(feature = "proj")]
use proj::Proj;

use crate::collect::global_variables::REFERENCE_EPSG;

/// CRS handling for the pipeline.
/// Holds the EPSG code of a dataset and converts geometries into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeoCore {
    pub epsg: u32,
}

impl Default for GeoCore {
    /// Lambert-93 (EPSG:2154), the CRS of the LiDAR HD tiling index.
    fn default() -> Self {
        GeoCore::new(REFERENCE_EPSG)
    }
}

impl GeoCore {
    pub fn new(epsg: u32) -> Self {
        GeoCore { epsg }
    }

    pub fn get_epsg(&self) -> u32 {
        self.epsg
    }

    /// Transform coordinates from one CRS to another
    #[cfg(feature = "proj")]
    pub fn transform_coords(from_epsg: u32, to_epsg: u32, x: f64, y: f64) -> Result<(f64, f64)> {
        if from_epsg == to_epsg {
            return Ok((x, y));
        }
        let proj = Self::transformer(from_epsg, to_epsg)?;
        proj.convert((x, y))
            .context("Failed to transform coordinates")
    }

    #[cfg(not(feature = "proj"))]
    pub fn transform_coords(from_epsg: u32, to_epsg: u32, x: f64, y: f64) -> Result<(f64, f64)> {
        if from_epsg == to_epsg {
            return Ok((x, y));
        }
        anyhow::bail!("built without the `proj` feature, cannot transform EPSG:{from_epsg} to EPSG:{to_epsg}")
    }

    /// Reproject a multipolygon from `from_epsg` into this CRS.
    #[cfg(feature = "proj")]
    pub fn reproject(&self, from_epsg: u32, geometry: &MultiPolygon<f64>) -> Result<MultiPolygon<f64>> {
        if from_epsg == self.epsg {
            return Ok(geometry.clone());
        }
        let proj = Self::transformer(from_epsg, self.epsg)?;
        let reprojected = geometry.try_map_coords(|c: Coord<f64>| {
            proj.convert((c.x, c.y)).map(|(x, y)| Coord { x, y })
        });
        reprojected.with_context(|| {
            format!("Failed to reproject geometry from EPSG:{} to EPSG:{}", from_epsg, self.epsg)
        })
    }

    #[cfg(not(feature = "proj"))]
    pub fn reproject(&self, from_epsg: u32, geometry: &MultiPolygon<f64>) -> Result<MultiPolygon<f64>> {
        if from_epsg == self.epsg {
            return Ok(geometry.clone());
        }
        anyhow::bail!(
            "built without the `proj` feature, cannot reproject EPSG:{} to EPSG:{}",
            from_epsg,
            self.epsg
        )
    }

    #[cfg(feature = "proj")]
    fn transformer(from_epsg: u32, to_epsg: u32) -> Result<Proj> {
        let from_crs = format!("EPSG:{}", from_epsg);
        let to_crs = format!("EPSG:{}", to_epsg);
        Proj::new_known_crs(&from_crs, &to_crs, None).with_context(|| {
            format!("Failed to create transformation {} -> {}", from_crs, to_crs)
        })
    }
}

/// Parse an EPSG code out of the CRS spellings found in WFS and GeoJSON
/// documents: `EPSG:2154`, `urn:ogc:def:crs:EPSG::2154`,
/// `http://www.opengis.net/def/crs/EPSG/0/2154`.
pub fn parse_epsg(crs: &str) -> Option<u32> {
    let upper = crs.trim().to_ascii_uppercase();
    if !upper.contains("EPSG") {
        return None;
    }
    upper
        .rsplit(|c| c == ':' || c == '/')
        .next()
        .and_then(|code| code.parse().ok())
}

/// EPSG code from a legacy GeoJSON `crs` member
/// (`{"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::2154"}}`).
pub fn epsg_from_geojson_crs(members: &serde_json::Map<String, serde_json::Value>) -> Option<u32> {
    members
        .get("crs")?
        .get("properties")?
        .get("name")?
        .as_str()
        .and_then(parse_epsg)
}

/// Legacy GeoJSON `crs` member naming `epsg`.
pub fn geojson_crs_member(epsg: u32) -> serde_json::Map<String, serde_json::Value> {
    let mut members = serde_json::Map::new();
    members.insert(
        "crs".to_string(),
        serde_json::json!({
            "type": "name",
            "properties": { "name": format!("urn:ogc:def:crs:EPSG::{}", epsg) }
        }),
    );
    members
}
