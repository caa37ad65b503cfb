//! `lidarhd` command-line interface.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use lidarhd::{Aoi, EmptyCropPolicy, FetchFailurePolicy, LidarHd, LidarHdConfig};
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "lidarhd", version, about = "Download IGN LiDAR HD point clouds for an area of interest")]
struct Cli {
    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Download the tiles covering an AOI and merge them into one cropped file
    Download {
        #[command(flatten)]
        aoi: AoiArgs,

        /// Output point cloud (.las or .laz)
        #[arg(long)]
        output: PathBuf,

        #[command(flatten)]
        store: StoreArgs,

        /// Download tiles again even if a local copy exists
        #[arg(long)]
        overwrite: bool,

        /// Write an empty point cloud instead of failing when no point falls in the AOI
        #[arg(long)]
        allow_empty: bool,

        /// Merge the tiles that could be downloaded even if some failed
        #[arg(long)]
        best_effort: bool,
    },
    /// List the tiles intersecting an AOI
    Tiles {
        #[command(flatten)]
        aoi: AoiArgs,

        #[command(flatten)]
        store: StoreArgs,
    },
    /// Fetch the tiling index from the WFS, replacing the cached copy
    RefreshIndex {
        #[command(flatten)]
        store: StoreArgs,
    },
}

#[derive(Debug, Args)]
struct AoiArgs {
    /// GeoJSON file with the area of interest
    #[arg(long)]
    aoi: PathBuf,

    /// EPSG code of the AOI coordinates, overriding the GeoJSON `crs` member
    #[arg(long)]
    epsg: Option<u32>,
}

impl AoiArgs {
    fn load(&self) -> Result<Aoi> {
        Aoi::from_geojson_file(&self.aoi, self.epsg)
    }
}

#[derive(Debug, Args)]
struct StoreArgs {
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Cache folder for the tiling index and the tiles
    #[arg(long)]
    folder: Option<PathBuf>,

    /// Fetch the tiling index again even if a cached copy exists
    #[arg(long)]
    refresh_index: bool,
}

impl StoreArgs {
    fn config(&self) -> Result<LidarHdConfig> {
        let mut config = match &self.config {
            Some(path) => LidarHdConfig::from_file(path)?,
            None => LidarHdConfig::default(),
        };
        if let Some(folder) = &self.folder {
            config.folder_path = folder.clone();
        }
        config.refresh_index |= self.refresh_index;
        Ok(config)
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    fmt().with_env_filter(filter).with_target(false).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Download {
            aoi,
            output,
            store,
            overwrite,
            allow_empty,
            best_effort,
        } => {
            let mut config = store.config()?;
            config.overwrite |= overwrite;
            if allow_empty {
                config.empty_crop = EmptyCropPolicy::WriteEmpty;
            }
            if best_effort {
                config.fetch_failure = FetchFailurePolicy::BestEffort;
            }

            let area = aoi.load()?;
            let mut lidar = LidarHd::new(config)?;
            let report = lidar
                .download(&area, &output)
                .with_context(|| format!("Download for {} failed", aoi.aoi.display()))?;

            tracing::info!(
                downloaded = report.downloaded(),
                skipped = report.skipped(),
                failed = report.failed(),
                "{} point(s) written to {}",
                report.point_count,
                report.output.display()
            );
        }
        Command::Tiles { aoi, store } => {
            let area = aoi.load()?;
            let mut lidar = LidarHd::new(store.config()?)?;
            for tile in lidar.intersecting_tiles(&area)? {
                println!("{}\t{}", tile.name, tile.remote_url);
            }
        }
        Command::RefreshIndex { store } => {
            let mut lidar = LidarHd::new(store.config()?)?;
            let index = lidar.refresh_index()?;
            tracing::info!("Tiling index refreshed: {} tiles", index.len());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_download_flags() {
        let cli = Cli::parse_from([
            "lidarhd",
            "-v",
            "download",
            "--aoi",
            "site.geojson",
            "--output",
            "site.laz",
            "--epsg",
            "2154",
            "--folder",
            "/data/lidarhd",
            "--best-effort",
        ]);
        assert!(cli.verbose);
        let Command::Download { aoi, output, store, best_effort, allow_empty, .. } = cli.command else {
            panic!("expected download");
        };
        assert_eq!(aoi.epsg, Some(2154));
        assert_eq!(output, PathBuf::from("site.laz"));
        assert!(best_effort);
        assert!(!allow_empty);

        let config = store.config().unwrap();
        assert_eq!(config.folder_path, PathBuf::from("/data/lidarhd"));
        assert_eq!(config.fetch_failure, FetchFailurePolicy::Abort);
    }

    #[test]
    fn test_refresh_index_flags() {
        let cli = Cli::parse_from(["lidarhd", "refresh-index", "--folder", "cache"]);
        let Command::RefreshIndex { store } = cli.command else {
            panic!("expected refresh-index");
        };
        assert_eq!(store.config().unwrap().folder_path, PathBuf::from("cache"));
    }
}
