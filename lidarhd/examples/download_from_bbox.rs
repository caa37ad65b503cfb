use anyhow::Result;
use lidarhd::{Aoi, LidarHd, LidarHdConfig};

/// Example: download the LiDAR HD point cloud of a small area of La Rochelle
fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    println!("=== Example: LiDAR HD point cloud from a bounding box ===\n");

    let mut lidar = LidarHd::new(LidarHdConfig::new("./output/lidarhd_data/", false))?;

    // Lambert-93 bounding box, 400 m x 300 m
    let aoi = Aoi::from_bbox(380_200.0, 6_570_300.0, 380_600.0, 6_570_600.0, 2154);

    let tiles = lidar.intersecting_tiles(&aoi)?;
    println!("{} tile(s) intersect the area:", tiles.len());
    for tile in &tiles {
        println!("  - {}", tile.name);
    }

    let report = lidar.download(&aoi, "./output/la_rochelle.laz")?;
    println!("\nPoint cloud written:");
    println!("  - File: {}", report.output.display());
    println!("  - Points: {}", report.point_count);
    println!(
        "  - Tiles downloaded / reused: {} / {}",
        report.downloaded(),
        report.skipped()
    );

    Ok(())
}
