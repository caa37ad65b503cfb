//! End-to-end runs of the downloader against an in-memory IGN service.

use geo::{polygon, Geometry, GeometryCollection, Intersects, Point};
use lidarhd::{
    Aoi, AoiGeometry, FetchFailurePolicy, HttpClient, LidarHd, LidarHdConfig, LidarHdError,
};
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Serves a 3x3 grid of 1 km tiles: the index as one WFS page and each
/// tile as a LAZ file with a point every 100 m.
struct MockIgn {
    index_page: String,
    tiles: HashMap<String, Vec<u8>>,
    gets: Mutex<Vec<String>>,
    downloads: Mutex<Vec<String>>,
}

impl MockIgn {
    fn new(fixtures: &Path) -> Self {
        let mut features = Vec::new();
        let mut tiles = HashMap::new();
        for row in 0..3 {
            for col in 0..3 {
                let (x, y) = (col as f64 * 1000.0, row as f64 * 1000.0);
                let url = tile_url(col, row);
                features.push(format!(
                    r#"{{ "type": "Feature", "properties": {{ "url": "{url}" }},
                          "geometry": {{ "type": "Polygon", "coordinates":
                              [[[{x},{y}],[{x2},{y}],[{x2},{y2}],[{x},{y2}],[{x},{y}]]] }} }}"#,
                    url = url,
                    x = x,
                    y = y,
                    x2 = x + 1000.0,
                    y2 = y + 1000.0
                ));
                tiles.insert(url, laz_tile(fixtures, x, y));
            }
        }

        MockIgn {
            index_page: format!(
                r#"{{ "type": "FeatureCollection", "numberMatched": {}, "features": [{}] }}"#,
                features.len(),
                features.join(",")
            ),
            tiles,
            gets: Mutex::new(Vec::new()),
            downloads: Mutex::new(Vec::new()),
        }
    }

    fn without_tile(mut self, url: &str) -> Self {
        self.tiles.remove(url);
        self
    }

    fn get_count(&self) -> usize {
        self.gets.lock().unwrap().len()
    }

    fn downloads(&self) -> Vec<String> {
        self.downloads.lock().unwrap().clone()
    }
}

impl HttpClient for MockIgn {
    fn get(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        self.gets.lock().unwrap().push(url.to_string());
        let start = url::Url::parse(url)?
            .query_pairs()
            .find(|(k, _)| k == "STARTINDEX")
            .map(|(_, v)| v.into_owned())
            .unwrap_or_default();
        if start == "0" {
            Ok(self.index_page.clone().into_bytes())
        } else {
            Ok(br#"{ "type": "FeatureCollection", "features": [] }"#.to_vec())
        }
    }

    fn download_to(&self, url: &str, dest: &mut dyn Write) -> anyhow::Result<u64> {
        self.downloads.lock().unwrap().push(url.to_string());
        let body = self
            .tiles
            .get(url)
            .ok_or_else(|| anyhow::anyhow!("HTTP 503 Service Unavailable from {}", url))?;
        dest.write_all(body)?;
        Ok(body.len() as u64)
    }
}

fn tile_url(col: usize, row: usize) -> String {
    format!("https://example.org/lidar/LHD_{}_{}.copc.laz", col, row)
}

/// LAZ bytes of one tile with points at (x + 50 + 100 i, y + 50 + 100 j).
fn laz_tile(fixtures: &Path, x: f64, y: f64) -> Vec<u8> {
    let path = fixtures.join(format!("fixture_{}_{}.laz", x, y));
    let mut builder = las::Builder::from((1, 4));
    builder.point_format.is_compressed = true;
    let mut writer = las::Writer::from_path(&path, builder.into_header().unwrap()).unwrap();
    for i in 0..10 {
        for j in 0..10 {
            writer
                .write_point(las::Point {
                    x: x + 50.0 + 100.0 * i as f64,
                    y: y + 50.0 + 100.0 * j as f64,
                    z: 100.0,
                    ..Default::default()
                })
                .unwrap();
        }
    }
    writer.close().unwrap();
    drop(writer);
    std::fs::read(&path).unwrap()
}

fn fixture_points() -> Vec<(f64, f64)> {
    let mut points = Vec::new();
    for tile_x in 0..3 {
        for tile_y in 0..3 {
            for i in 0..10 {
                for j in 0..10 {
                    points.push((
                        tile_x as f64 * 1000.0 + 50.0 + 100.0 * i as f64,
                        tile_y as f64 * 1000.0 + 50.0 + 100.0 * j as f64,
                    ));
                }
            }
        }
    }
    points
}

/// 200 m wide diagonal strip from (700, 700) to (1300, 1300), across the
/// corner shared by the four south-west tiles.
fn corridor() -> Aoi {
    let h = 100.0 / std::f64::consts::SQRT_2;
    let strip = polygon![
        (x: 700.0 + h, y: 700.0 - h),
        (x: 1300.0 + h, y: 1300.0 - h),
        (x: 1300.0 - h, y: 1300.0 + h),
        (x: 700.0 - h, y: 700.0 + h),
    ];
    Aoi::new(GeometryCollection(vec![Geometry::Polygon(strip)]), 2154)
}

fn read_xy(path: &Path) -> Vec<(f64, f64)> {
    let mut reader = las::Reader::from_path(path).unwrap();
    reader.points().map(|p| p.unwrap()).map(|p| (p.x, p.y)).collect()
}

fn setup() -> (tempfile::TempDir, tempfile::TempDir) {
    (tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap())
}

#[test]
fn corridor_download_merges_four_tiles() {
    let (data, fixtures) = setup();
    let ign = Arc::new(MockIgn::new(fixtures.path()));
    let mut lidar = LidarHd::with_client(LidarHdConfig::new(data.path(), false), ign.clone()).unwrap();

    let aoi = corridor();
    let output = data.path().join("out").join("corridor.laz");
    let report = lidar.download(&aoi, &output).unwrap();

    let mut downloads = ign.downloads();
    downloads.sort();
    assert_eq!(
        downloads,
        vec![tile_url(0, 0), tile_url(0, 1), tile_url(1, 0), tile_url(1, 1)]
    );
    assert_eq!(report.downloaded(), 4);
    assert_eq!(report.skipped(), 0);
    assert_eq!(ign.get_count(), 1);

    let union = aoi.union();
    let expected = fixture_points()
        .into_iter()
        .filter(|&(x, y)| union.intersects(&Point::new(x, y)))
        .count() as u64;
    assert!(expected > 0);
    assert_eq!(report.point_count, expected);

    let written = read_xy(&output);
    assert_eq!(written.len() as u64, expected);
    assert!(written
        .iter()
        .all(|&(x, y)| union.intersects(&Point::new(x, y))));

    // Tiles and index are cached under the data folder
    assert!(data.path().join("tiles").join("LHD_1_1.copc.laz").exists());
    assert!(std::fs::read_dir(data.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .any(|e| e.file_name().to_string_lossy().starts_with("LidarHD_tiles_database_")));
}

#[test]
fn second_run_uses_local_copies_only() {
    let (data, fixtures) = setup();
    let aoi = corridor();

    let first = {
        let ign = Arc::new(MockIgn::new(fixtures.path()));
        let mut lidar = LidarHd::with_client(LidarHdConfig::new(data.path(), false), ign).unwrap();
        lidar.download(&aoi, data.path().join("first.laz")).unwrap()
    };

    let ign = Arc::new(MockIgn::new(fixtures.path()));
    let mut lidar = LidarHd::with_client(LidarHdConfig::new(data.path(), false), ign.clone()).unwrap();
    let second = lidar.download(&aoi, data.path().join("second.laz")).unwrap();

    assert_eq!(ign.get_count(), 0);
    assert!(ign.downloads().is_empty());
    assert_eq!(second.skipped(), 4);
    assert_eq!(second.point_count, first.point_count);
    assert_eq!(
        read_xy(&data.path().join("first.laz")),
        read_xy(&data.path().join("second.laz"))
    );
}

#[test]
fn overwrite_downloads_tiles_again() {
    let (data, fixtures) = setup();
    let aoi = corridor();
    {
        let ign = Arc::new(MockIgn::new(fixtures.path()));
        let mut lidar = LidarHd::with_client(LidarHdConfig::new(data.path(), false), ign).unwrap();
        lidar.download(&aoi, data.path().join("first.las")).unwrap();
    }

    let ign = Arc::new(MockIgn::new(fixtures.path()));
    let mut lidar = LidarHd::with_client(LidarHdConfig::new(data.path(), true), ign.clone()).unwrap();
    let report = lidar.download(&aoi, data.path().join("second.las")).unwrap();
    assert_eq!(report.downloaded(), 4);
    assert_eq!(ign.downloads().len(), 4);
    // Index stays cached
    assert_eq!(ign.get_count(), 0);
}

#[test]
fn unreachable_tile_aborts_without_output() {
    let (data, fixtures) = setup();
    let ign = Arc::new(MockIgn::new(fixtures.path()).without_tile(&tile_url(1, 0)));
    let mut lidar = LidarHd::with_client(LidarHdConfig::new(data.path(), false), ign.clone()).unwrap();

    let output = data.path().join("corridor.laz");
    let err = lidar.download(&corridor(), &output).unwrap_err();
    match err {
        LidarHdError::PartialFetchFailure { failed, total } => {
            assert_eq!(total, 4);
            assert_eq!(failed.len(), 1);
            assert_eq!(failed[0].url, tile_url(1, 0));
            assert!(failed[0].reason.contains("503"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!output.exists());
    // Other tiles were still fetched and kept
    assert_eq!(ign.downloads().len(), 4);
    assert!(data.path().join("tiles").join("LHD_1_1.copc.laz").exists());
    assert!(!data.path().join("tiles").join("LHD_1_0.copc.laz").exists());
}

#[test]
fn best_effort_assembles_available_tiles() {
    let (data, fixtures) = setup();
    let ign = Arc::new(MockIgn::new(fixtures.path()).without_tile(&tile_url(1, 0)));
    let mut config = LidarHdConfig::new(data.path(), false);
    config.fetch_failure = FetchFailurePolicy::BestEffort;
    let mut lidar = LidarHd::with_client(config, ign).unwrap();

    let output = data.path().join("corridor.las");
    let report = lidar.download(&corridor(), &output).unwrap();
    assert_eq!(report.failed(), 1);
    assert_eq!(report.downloaded(), 3);
    assert!(report.point_count > 0);
    // Nothing from the missing south-east tile
    assert!(read_xy(&output)
        .iter()
        .all(|&(x, y)| !(x > 1000.0 && y < 1000.0)));
}

#[test]
fn aoi_outside_coverage_downloads_nothing() {
    let (data, fixtures) = setup();
    let ign = Arc::new(MockIgn::new(fixtures.path()));
    let mut lidar = LidarHd::with_client(LidarHdConfig::new(data.path(), false), ign.clone()).unwrap();

    let aoi = Aoi::from_bbox(50_000.0, 50_000.0, 51_000.0, 51_000.0, 2154);
    let output = data.path().join("nothing.laz");
    let err = lidar.download(&aoi, &output).unwrap_err();
    assert!(matches!(err, LidarHdError::NoIntersectingTiles));
    assert!(ign.downloads().is_empty());
    assert!(!output.exists());
}

#[test]
fn intersecting_tiles_reuses_loaded_index() {
    let (data, fixtures) = setup();
    let ign = Arc::new(MockIgn::new(fixtures.path()));
    let mut lidar = LidarHd::with_client(LidarHdConfig::new(data.path(), false), ign.clone()).unwrap();

    let tiles = lidar.intersecting_tiles(&corridor()).unwrap();
    let names: Vec<&str> = tiles.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["LHD_0_0", "LHD_1_0", "LHD_0_1", "LHD_1_1"]);

    let centre = Aoi::from_bbox(1200.0, 1200.0, 1800.0, 1800.0, 2154);
    assert_eq!(lidar.intersecting_tiles(&centre).unwrap().len(), 1);
    assert_eq!(ign.get_count(), 1);

    lidar.refresh_index().unwrap();
    assert_eq!(ign.get_count(), 2);
    assert!(ign.downloads().is_empty());
}
