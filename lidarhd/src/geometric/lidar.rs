use anyhow::{Context, Result as AnyResult};
use geo::{BoundingRect, Intersects, MultiPolygon, Point, Rect};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use crate::config::EmptyCropPolicy;
use crate::error::{LidarHdError, Result};
use crate::geo_core::GeoCore;
use crate::geometric::aoi::AoiGeometry;

type LasFileWriter = las::Writer<BufWriter<File>>;

/// VLRs describing the compression of a source tile. The writer adds its own.
const LAZ_VLR_USER_IDS: [&str; 2] = ["laszip encoded", "copc"];

/// Merges LiDAR HD tiles into one LAS/LAZ file, keeping only the points
/// that fall inside the area of interest.
#[derive(Debug, Clone, Copy, Default)]
pub struct PointCloudAssembler {
    empty_crop: EmptyCropPolicy,
}

impl PointCloudAssembler {
    pub fn new(empty_crop: EmptyCropPolicy) -> Self {
        PointCloudAssembler { empty_crop }
    }

    /// Crop `inputs` to `aoi` and write them to `output`.
    ///
    /// The format follows the output extension: `.laz` is compressed, `.las`
    /// is not. Points on the AOI boundary are kept. The output header starts
    /// from the first input (point format, scales, VLRs) with the offset
    /// moved to the AOI. Nothing is written at `output` unless the whole
    /// merge succeeds. Returns the number of points written.
    pub fn assemble<A: AoiGeometry + ?Sized>(
        &self,
        inputs: &[PathBuf],
        aoi: &A,
        output: impl AsRef<Path>,
    ) -> Result<u64> {
        let output = output.as_ref();
        let compressed = output_is_compressed(output)?;
        if inputs.is_empty() {
            return Err(LidarHdError::Assembly("no tile to assemble".into()));
        }

        // Tiles are always Lambert-93
        let geo_core = GeoCore::default();
        let area = geo_core
            .reproject(aoi.epsg(), &aoi.union())
            .map_err(|e| LidarHdError::CrsMismatch {
                from: aoi.epsg(),
                to: geo_core.get_epsg(),
                reason: format!("{:#}", e),
            })?;

        tracing::info!("Merging {} tile(s) into {}", inputs.len(), output.display());
        let (kept, tmp) = self
            .write_cropped(inputs, &area, output, compressed)
            .map_err(LidarHdError::assembly)?;

        if kept == 0 && self.empty_crop == EmptyCropPolicy::Fail {
            // Dropping `tmp` removes the empty file
            return Err(LidarHdError::Assembly(format!(
                "none of the points of {} tile(s) falls inside the area of interest",
                inputs.len()
            )));
        }

        tmp.persist(output)
            .map_err(|e| e.error)
            .with_context(|| format!("Failed to save point cloud to {}", output.display()))
            .map_err(LidarHdError::assembly)?;

        tracing::info!("{} point(s) written to {}", kept, output.display());
        Ok(kept)
    }

    fn write_cropped(
        &self,
        inputs: &[PathBuf],
        area: &MultiPolygon<f64>,
        output: &Path,
        compressed: bool,
    ) -> AnyResult<(u64, tempfile::NamedTempFile)> {
        let header = {
            let reader = las::Reader::from_path(&inputs[0])
                .with_context(|| format!("Failed to open {}", inputs[0].display()))?;
            output_header(reader.header(), area.bounding_rect(), compressed)?
        };
        let format = *header.point_format();

        let parent = match output.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent)
            .with_context(|| format!("Failed to create folder {}", parent.display()))?;

        // The temporary file keeps the output extension so the writer picks
        // the same encoding as the final file
        let tmp = tempfile::Builder::new()
            .prefix(".lidarhd-")
            .suffix(if compressed { ".laz" } else { ".las" })
            .tempfile_in(&parent)
            .context("Failed to create temporary output file")?;
        let mut writer = las::Writer::from_path(tmp.path(), header)
            .with_context(|| format!("Failed to create writer for {}", output.display()))?;

        let mut kept = 0u64;
        for input in inputs {
            kept += crop_tile(input, area, &format, &mut writer)
                .with_context(|| format!("Failed to crop {}", input.display()))?;
        }
        writer.close().context("Failed to finalize point cloud")?;

        Ok((kept, tmp))
    }
}

/// Whether `path` asks for LAZ output. Only `.las` and `.laz` are accepted.
pub fn output_is_compressed(path: &Path) -> Result<bool> {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("laz") => Ok(true),
        Some("las") => Ok(false),
        _ => Err(LidarHdError::Assembly(format!(
            "output {} must have a .las or .laz extension",
            path.display()
        ))),
    }
}

fn output_header(source: &las::Header, area: Option<Rect<f64>>, compressed: bool) -> AnyResult<las::Header> {
    let mut builder = las::Builder::from((1, 4));
    builder.generating_software = format!("lidarhd {}", env!("CARGO_PKG_VERSION"));

    builder.point_format = *source.point_format();
    builder.point_format.is_compressed = compressed;

    let mut transforms = source.transforms().clone();
    if let Some(rect) = area {
        // Coordinates are stored as i32 steps from the offset
        let center = rect.center();
        transforms.x.offset = center.x.floor();
        transforms.y.offset = center.y.floor();
    }
    builder.transforms = transforms;

    builder.vlrs = source
        .vlrs()
        .iter()
        .filter(|vlr| !LAZ_VLR_USER_IDS.contains(&vlr.user_id.as_str()))
        .cloned()
        .collect();

    builder.into_header().context("Invalid output header")
}

fn crop_tile(
    path: &Path,
    area: &MultiPolygon<f64>,
    format: &las::point::Format,
    writer: &mut LasFileWriter,
) -> AnyResult<u64> {
    let mut reader =
        las::Reader::from_path(path).with_context(|| format!("Failed to open {}", path.display()))?;

    let mut source_format = *reader.header().point_format();
    source_format.is_compressed = format.is_compressed;
    if &source_format != format {
        anyhow::bail!(
            "point format {:?} differs from the output format {:?}",
            source_format,
            format
        );
    }

    let Some(bounds) = area.bounding_rect() else {
        return Ok(0);
    };

    let total = reader.header().number_of_points();
    let mut kept = 0u64;
    for point in reader.points() {
        let point = point.context("Failed to decode point")?;
        let location = Point::new(point.x, point.y);
        if !bounds.intersects(&location) || !area.intersects(&location) {
            continue;
        }
        writer.write_point(point).context("Failed to write point")?;
        kept += 1;
    }

    tracing::debug!("{}: kept {} of {} point(s)", path.display(), kept, total);
    Ok(kept)
}
