#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! District-level bike-share and building indicators.
//!
//! ```text
//! bysykkel [--config bysykkel.toml] run [--output-dir out] [--skip-buildings]
//! bysykkel [--config bysykkel.toml] districts
//! bysykkel [--config bysykkel.toml] profile --from Frogner --to Grünerløkka
//! ```
//!
//! Logging is controlled with `RUST_LOG` (default `info`).

mod config;
mod output;
mod pipeline;

use std::path::PathBuf;

use bysykkel_cli_utils::RowCounter;
use bysykkel_indicators::{area_km2, directional_profile};
use clap::{Parser, Subcommand};

use crate::config::PipelineConfig;

#[derive(Parser)]
#[command(
    name = "bysykkel",
    about = "District-level bike-share and building indicators"
)]
struct Cli {
    /// Pipeline configuration file
    #[arg(long, short, global = true, default_value = "bysykkel.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the whole pipeline and write the output files
    Run {
        /// Write outputs here instead of the configured directory
        #[arg(long)]
        output_dir: Option<PathBuf>,
        /// Skip building retrieval and building indicators
        #[arg(long)]
        skip_buildings: bool,
    },
    /// List the loaded districts with area and population
    ///
    /// Reads only the [districts] section; the config may omit [trips].
    Districts,
    /// Trips from one district to another, by hour of departure
    Profile {
        /// Origin district name
        #[arg(long)]
        from: String,
        /// Destination district name
        #[arg(long)]
        to: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = bysykkel_cli_utils::init_logger();
    let cli = Cli::parse();

    let config = PipelineConfig::load(&cli.config)?;

    match cli.command {
        Commands::Run {
            output_dir,
            skip_buildings,
        } => {
            let with_buildings = config.buildings.enabled && !skip_buildings;
            let (districts, report) = pipeline::run(&config, with_buildings, &multi).await?;

            let dir = output_dir.unwrap_or_else(|| config.output.dir.clone());
            let written = output::write_outputs(&dir, &districts, &report)?;
            println!("Wrote {} files to {}", written.len(), dir.display());

            if let Some(e) = &report.building_error {
                println!("Building indicators were skipped: {e}");
            }
        }
        Commands::Districts => {
            let districts = pipeline::load_districts(&config)?;

            println!("{:>4}  {:<24} {:>12} {:>10}", "ID", "NAME", "POPULATION", "AREA KM²");
            for district in districts.iter() {
                println!(
                    "{:>4}  {:<24} {:>12} {:>10.3}",
                    district.id.0,
                    district.name,
                    district.population,
                    area_km2(district)
                );
            }
        }
        Commands::Profile { from, to } => {
            let districts = pipeline::load_districts(&config)?;
            let origin = pipeline::find_district(&districts, &from)?.id;
            let destination = pipeline::find_district(&districts, &to)?.id;

            let rows = RowCounter::new(&multi, "Reading trips");
            let stage = pipeline::join_trip_file(&config, &districts, &rows)?;
            let histogram = directional_profile(&stage.join.trips, origin, destination);

            let total: u64 = histogram.iter().sum();
            let peak = histogram.iter().copied().max().unwrap_or(0).max(1);
            println!("{from} -> {to}: {total} trips");
            for (hour, count) in histogram.iter().enumerate() {
                let width = usize::try_from(count * 40 / peak).unwrap_or(0);
                println!("{hour:02}:00 {count:>6} {}", "#".repeat(width));
            }
        }
    }

    Ok(())
}
