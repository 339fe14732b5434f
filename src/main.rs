use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use seapark::{
    Clock, GeoPoint, NoResult, ParkingPipeline, PredictionMode, Query, QueryOutcome, QueryResult,
    SystemClock, config::AppConfig,
};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(name = "seapark")]
#[command(about = "Predict street parking availability near a Seattle destination")]
struct Args {
    /// Destination latitude (defaults to the configured destination)
    #[arg(long, allow_hyphen_values = true)]
    lat: Option<f64>,

    /// Destination longitude (defaults to the configured destination)
    #[arg(long, allow_hyphen_values = true)]
    lng: Option<f64>,

    /// Day to predict, YYYY-MM-DD (defaults to today)
    #[arg(long)]
    date: Option<NaiveDate>,

    /// Walking distance in city blocks
    #[arg(long)]
    blocks: Option<u32>,

    /// Output hard labels instead of probabilities
    #[arg(long)]
    labels: bool,

    /// Write the matrix here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,

    /// Also write the column legend (column, station, coordinates, distance)
    #[arg(long)]
    stations_output: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::builder()
        .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
        .parse_lossy("seapark=debug");

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();

    let mut config = AppConfig::load().context("Failed to load configuration")?;
    if args.labels {
        config.prediction.mode = PredictionMode::Labels;
    }

    let pipeline = ParkingPipeline::from_config(&config).context("Failed to set up pipeline")?;

    let destination = GeoPoint::new(
        args.lat.unwrap_or(config.query.default_latitude),
        args.lng.unwrap_or(config.query.default_longitude),
    );
    let date = args.date.unwrap_or_else(|| SystemClock.today());
    let blocks = args.blocks.unwrap_or(config.query.default_blocks);
    let query = Query::from_blocks(destination, date, blocks, config.query.miles_per_block);

    tracing::info!(
        "Predicting availability within {} blocks ({:.2} mi) of ({:.5}, {:.5}) on {}",
        blocks,
        query.radius_miles,
        destination.latitude,
        destination.longitude,
        date
    );

    let outcome = pipeline.run(&query).context("Prediction failed")?;

    match outcome {
        QueryOutcome::Ready(result) => {
            write_to(args.output.as_ref(), |w| write_matrix(&result, w))
                .context("Failed to write prediction matrix")?;

            if let Some(path) = args.stations_output.as_ref() {
                write_to(Some(path), |w| write_stations(&result, w))
                    .context("Failed to write station legend")?;
                tracing::info!("Wrote station legend to {}", path.display());
            }
        }
        QueryOutcome::NoResult(reason) => {
            let hint = match reason {
                NoResult::NoLocationsInRange => "try a larger --blocks value",
                NoResult::NoModelAvailable => "train models for nearby stations first",
            };
            eprintln!("No prediction: {} ({})", reason.description(), hint);
        }
    }

    Ok(())
}

/// Run `body` against a file, or stdout when no path is given.
fn write_to<F>(path: Option<&PathBuf>, body: F) -> Result<()>
where
    F: FnOnce(&mut dyn Write) -> Result<()>,
{
    match path {
        Some(path) => {
            let mut file = File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            body(&mut file)
        }
        None => {
            let stdout = io::stdout();
            let mut lock = stdout.lock();
            body(&mut lock)
        }
    }
}

/// `time,1,2,...,N` header, one row per slot.
fn write_matrix(result: &QueryResult, out: &mut dyn Write) -> Result<()> {
    let matrix = &result.matrix;
    let mut writer = csv::Writer::from_writer(out);

    let mut header = vec!["time".to_string()];
    header.extend(matrix.columns().iter().map(|c| c.to_string()));
    writer.write_record(&header)?;

    for (row, label) in matrix.slot_labels().into_iter().enumerate() {
        let mut record = vec![label];
        for col in matrix.columns() {
            let value = matrix.value(row, col).unwrap_or(f64::NAN);
            record.push(if matrix.is_probability() {
                format!("{:.4}", value)
            } else {
                format!("{}", value as u8)
            });
        }
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

fn write_stations(result: &QueryResult, out: &mut dyn Write) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record([
        "column",
        "station",
        "latitude",
        "longitude",
        "distance_miles",
        "space_count",
    ])?;

    for (column, location) in result.ranked_locations() {
        writer.write_record([
            column.to_string(),
            location.id.to_string(),
            location.latitude.to_string(),
            location.longitude.to_string(),
            format!("{:.4}", location.distance_miles),
            location.space_count.to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}
