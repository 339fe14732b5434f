use std::path::PathBuf;

use anyhow::{Context, Result};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use serde::Deserialize;

use crate::ml::{FailurePolicy, OperatingWindow, PredictionMode, PredictorConfig};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub data: DataConfig,
    pub prediction: PredictionConfig,
    pub query: QueryConfig,
}

/// Locations of the reference tables and model files.
#[derive(Debug, Deserialize, Clone)]
pub struct DataConfig {
    pub station_coords_path: PathBuf,
    pub station_capacity_path: PathBuf,
    /// One NOAA export per year; missing years are skipped
    pub weather_paths: Vec<PathBuf>,
    pub model_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            station_coords_path: PathBuf::from("data/Pay_Stations.csv"),
            station_capacity_path: PathBuf::from("data/pay_station_time_limit_space_count.csv"),
            weather_paths: vec![PathBuf::from("data/seattle_weather.csv.gz")],
            model_dir: PathBuf::from("models"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PredictionConfig {
    pub weather_window_days: u32,
    pub start_hour: u32,
    pub end_hour: u32,
    pub slot_minutes: u32,
    pub mode: PredictionMode,
    pub failure_policy: FailurePolicy,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            weather_window_days: 10,
            start_hour: 8,
            end_hour: 18,
            slot_minutes: 5,
            mode: PredictionMode::Probabilities,
            failure_policy: FailurePolicy::Isolate,
        }
    }
}

impl PredictionConfig {
    /// Batch predictor settings, or an error if the operating window is invalid.
    pub fn predictor_config(&self) -> Result<PredictorConfig> {
        let window = OperatingWindow::new(self.start_hour, self.end_hour, self.slot_minutes)
            .with_context(|| {
                format!(
                    "Invalid operating window {}:00-{}:00 every {} min",
                    self.start_hour, self.end_hour, self.slot_minutes
                )
            })?;

        Ok(PredictorConfig {
            window,
            mode: self.mode,
            failure_policy: self.failure_policy,
            ..Default::default()
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueryConfig {
    pub default_latitude: f64,
    pub default_longitude: f64,
    /// An average city block is about 0.07 mi (5 min walk)
    pub miles_per_block: f64,
    pub default_blocks: u32,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_latitude: 47.6205,
            default_longitude: -122.3493,
            miles_per_block: 0.07,
            default_blocks: 1,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        // Load .env file (silently ignore if not present)
        let _ = dotenvy::dotenv();

        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("seapark");

        let builder = Self::defaults()?
            // 2. Load from local config file (optional, lowest priority)
            .add_source(File::from(PathBuf::from("config.toml")).required(false))

            // 3. Load from user config directory (optional, overrides local)
            .add_source(File::from(config_dir.join("config.toml")).required(false))

            // 4. Load from Environment variables (SEAPARK__PREDICTION__MODE=labels)
            .add_source(Self::environment());

        let s = builder.build().context("Failed to build configuration")?;
        s.try_deserialize().context("Failed to parse configuration")
    }

    /// 1. Built-in default values
    fn defaults() -> Result<ConfigBuilder<DefaultState>> {
        Ok(Config::builder()
            // Data
            .set_default("data.station_coords_path", "data/Pay_Stations.csv")?
            .set_default(
                "data.station_capacity_path",
                "data/pay_station_time_limit_space_count.csv",
            )?
            .set_default("data.weather_paths", vec!["data/seattle_weather.csv.gz"])?
            .set_default("data.model_dir", "models")?
            // Prediction
            .set_default("prediction.weather_window_days", 10)?
            .set_default("prediction.start_hour", 8)?
            .set_default("prediction.end_hour", 18)?
            .set_default("prediction.slot_minutes", 5)?
            .set_default("prediction.mode", "probabilities")?
            .set_default("prediction.failure_policy", "isolate")?
            // Query
            .set_default("query.default_latitude", 47.6205)?
            .set_default("query.default_longitude", -122.3493)?
            .set_default("query.miles_per_block", 0.07)?
            .set_default("query.default_blocks", 1)?)
    }

    /// `SEAPARK__SECTION__KEY` variables. Weather paths are comma separated:
    /// `SEAPARK__DATA__WEATHER_PATHS=w2019.csv.gz,w2020.csv.gz`
    fn environment() -> Environment {
        Environment::with_prefix("SEAPARK")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("data.weather_paths")
    }
}
