use anyhow::{Context, Result};
use geo::{
    BooleanOps, BoundingRect, Coord, Geometry, GeometryCollection, MultiPolygon, Polygon, Rect,
};
use geojson::GeoJson;
use std::path::Path;

#[cfg(feature = "geos")]
use geo::LineString;
#[cfg(feature = "geos")]
use geos::{Geom, Geometry as GeosGeometry};

use crate::geo_core::epsg_from_geojson_crs;

/// Segments per quarter circle on the round ends of a corridor.
#[cfg(feature = "geos")]
const CORRIDOR_QUADRANT_SEGMENTS: i32 = 8;

/// CRS assumed for GeoJSON input without a `crs` member (RFC 7946).
const GEOJSON_DEFAULT_EPSG: u32 = 4326;

/// An area of interest: polygonal geometry declared in a known CRS.
///
/// Only the areal part matters to the pipeline. Implementors provide their
/// polygons and CRS; union and bounds come for free.
pub trait AoiGeometry {
    /// EPSG code of the coordinates returned by [`AoiGeometry::polygons`].
    fn epsg(&self) -> u32;

    fn polygons(&self) -> Vec<Polygon<f64>>;

    /// Union of all polygons, overlaps dissolved.
    fn union(&self) -> MultiPolygon<f64> {
        union_polygons(self.polygons())
    }

    fn bounding_rect(&self) -> Option<Rect<f64>> {
        self.union().bounding_rect()
    }
}

/// Dissolve a set of polygons into one multipolygon.
pub fn union_polygons(polygons: Vec<Polygon<f64>>) -> MultiPolygon<f64> {
    polygons
        .into_iter()
        .fold(MultiPolygon::new(vec![]), |acc, polygon| {
            acc.union(&MultiPolygon::new(vec![polygon]))
        })
}

/// Geometry collection + CRS, the AOI type used by the CLI and examples.
#[derive(Debug, Clone, PartialEq)]
pub struct Aoi {
    epsg: u32,
    geometries: GeometryCollection<f64>,
}

impl Aoi {
    pub fn new(geometries: GeometryCollection<f64>, epsg: u32) -> Self {
        Aoi { epsg, geometries }
    }

    pub fn from_bbox(min_x: f64, min_y: f64, max_x: f64, max_y: f64, epsg: u32) -> Self {
        let rect = Rect::new(Coord { x: min_x, y: min_y }, Coord { x: max_x, y: max_y });
        Aoi::new(GeometryCollection(vec![Geometry::Polygon(rect.to_polygon())]), epsg)
    }

    /// Parse a GeoJSON Geometry, Feature or FeatureCollection.
    ///
    /// The CRS is `epsg` when given, otherwise the document's legacy `crs`
    /// member, otherwise WGS84.
    pub fn from_geojson_str(text: &str, epsg: Option<u32>) -> Result<Self> {
        let geojson: GeoJson = text.parse().context("Failed to parse AOI GeoJSON")?;

        let (geometries, declared_epsg) = match geojson {
            GeoJson::FeatureCollection(fc) => {
                let declared = fc.foreign_members.as_ref().and_then(epsg_from_geojson_crs);
                let geometries = fc
                    .features
                    .into_iter()
                    .filter_map(|feature| feature.geometry)
                    .map(Geometry::<f64>::try_from)
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .context("Unsupported geometry in AOI FeatureCollection")?;
                (geometries, declared)
            }
            GeoJson::Feature(feature) => {
                let declared = feature.foreign_members.as_ref().and_then(epsg_from_geojson_crs);
                let geometry = feature
                    .geometry
                    .context("AOI Feature has no geometry")?;
                let geometry =
                    Geometry::<f64>::try_from(geometry).context("Unsupported AOI geometry")?;
                (vec![geometry], declared)
            }
            GeoJson::Geometry(geometry) => {
                let declared = geometry.foreign_members.as_ref().and_then(epsg_from_geojson_crs);
                let geometry =
                    Geometry::<f64>::try_from(geometry).context("Unsupported AOI geometry")?;
                (vec![geometry], declared)
            }
        };

        let epsg = epsg.or(declared_epsg).unwrap_or(GEOJSON_DEFAULT_EPSG);
        Ok(Aoi::new(GeometryCollection(geometries), epsg))
    }

    pub fn from_geojson_file(path: impl AsRef<Path>, epsg: Option<u32>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read AOI file {}", path.display()))?;
        Self::from_geojson_str(&text, epsg)
            .with_context(|| format!("Invalid AOI file {}", path.display()))
    }

    /// Buffer a line string by `half_width` on each side, with round ends.
    /// `half_width` is in CRS units, so use a projected CRS for metric buffers.
    #[cfg(feature = "geos")]
    pub fn corridor(line: &LineString<f64>, half_width: f64, epsg: u32) -> Result<Self> {
        if half_width.is_nan() || half_width <= 0.0 {
            anyhow::bail!("Corridor half width must be positive, got {}", half_width);
        }
        if line.0.len() < 2 {
            anyhow::bail!("Cannot build a corridor from a line with fewer than two points");
        }

        let line_geos: GeosGeometry = line
            .clone()
            .try_into()
            .context("Failed to convert corridor line to GEOS")?;
        let buffered = line_geos
            .buffer(half_width, CORRIDOR_QUADRANT_SEGMENTS)
            .context("Failed to buffer corridor line")?;
        let geometry: Geometry<f64> = buffered
            .try_into()
            .context("Failed to convert corridor buffer from GEOS")?;

        Ok(Aoi::new(GeometryCollection(vec![geometry]), epsg))
    }

    pub fn geometries(&self) -> &GeometryCollection<f64> {
        &self.geometries
    }

    /// True when the AOI has no areal geometry.
    pub fn is_empty(&self) -> bool {
        self.polygons().is_empty()
    }
}

impl AoiGeometry for Aoi {
    fn epsg(&self) -> u32 {
        self.epsg
    }

    fn polygons(&self) -> Vec<Polygon<f64>> {
        let mut polygons = Vec::new();
        collect_polygons(&self.geometries.0, &mut polygons);
        polygons
    }
}

fn collect_polygons(geometries: &[Geometry<f64>], out: &mut Vec<Polygon<f64>>) {
    for geometry in geometries {
        match geometry {
            Geometry::Polygon(p) => out.push(p.clone()),
            Geometry::MultiPolygon(mp) => out.extend(mp.0.iter().cloned()),
            Geometry::Rect(r) => out.push(r.to_polygon()),
            Geometry::Triangle(t) => out.push(t.to_polygon()),
            Geometry::GeometryCollection(gc) => collect_polygons(&gc.0, out),
            // Points and lines have no area
            _ => {}
        }
    }
}
