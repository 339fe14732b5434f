//! End-to-end query pipeline.
//!
//! Locate nearby stations, resolve their models, impute the weather for the
//! requested date and score every station over the operating window. Outcomes
//! where nothing could be computed come back as [`NoResult`] values, not errors.

use std::path::Path;

use chrono::NaiveDate;

use crate::config::{AppConfig, DataConfig};
use crate::error::{PipelineError, Result};
use crate::geo::{self, GeoPoint, Location};
use crate::ml::{BatchPredictor, ModelRegistry, PredictionMatrix, PredictorConfig};
use crate::weather::{self, WeatherHistory};

/// Miles in an average city block.
pub const MILES_PER_BLOCK: f64 = 0.07;

/// One user request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Query {
    pub destination: GeoPoint,
    pub date: NaiveDate,
    pub radius_miles: f64,
}

impl Query {
    pub fn new(destination: GeoPoint, date: NaiveDate, radius_miles: f64) -> Self {
        Self {
            destination,
            date,
            radius_miles,
        }
    }

    /// Build a query from a walking distance in city blocks.
    pub fn from_blocks(
        destination: GeoPoint,
        date: NaiveDate,
        blocks: u32,
        miles_per_block: f64,
    ) -> Self {
        Self::new(destination, date, blocks as f64 * miles_per_block)
    }
}

/// Why a query produced no matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoResult {
    /// No station lies within the requested radius
    NoLocationsInRange,
    /// Stations were found but none has a usable model
    NoModelAvailable,
}

impl NoResult {
    pub fn description(&self) -> &'static str {
        match self {
            NoResult::NoLocationsInRange => "no parking stations within walking distance",
            NoResult::NoModelAvailable => "no prediction model for nearby stations",
        }
    }
}

/// Matrix plus the stations behind its columns.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub matrix: PredictionMatrix,
    /// Stations in column order (column `i + 1` is `locations[i]`)
    pub locations: Vec<Location>,
}

impl QueryResult {
    /// (column number, station) pairs for labelling markers and legends.
    pub fn ranked_locations(&self) -> impl Iterator<Item = (usize, &Location)> {
        self.locations.iter().enumerate().map(|(i, loc)| (i + 1, loc))
    }
}

#[derive(Debug, Clone)]
pub enum QueryOutcome {
    Ready(QueryResult),
    NoResult(NoResult),
}

impl QueryOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, QueryOutcome::Ready(_))
    }

    pub fn no_result(&self) -> Option<NoResult> {
        match self {
            QueryOutcome::NoResult(reason) => Some(*reason),
            QueryOutcome::Ready(_) => None,
        }
    }

    pub fn into_result(self) -> Option<QueryResult> {
        match self {
            QueryOutcome::Ready(result) => Some(result),
            QueryOutcome::NoResult(_) => None,
        }
    }
}

/// Runs queries against on-disk reference data.
///
/// Holds no per-query state; tables and models are re-read for every query.
#[derive(Debug, Clone)]
pub struct ParkingPipeline {
    data: DataConfig,
    weather_window_days: u32,
    predictor: BatchPredictor,
}

impl ParkingPipeline {
    pub fn new(data: DataConfig, weather_window_days: u32, predictor: PredictorConfig) -> Self {
        Self {
            data,
            weather_window_days,
            predictor: BatchPredictor::new(predictor),
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let predictor = config
            .prediction
            .predictor_config()
            .map_err(|e| PipelineError::InvalidConfig(format!("{:#}", e)))?;
        Ok(Self::new(
            config.data.clone(),
            config.prediction.weather_window_days,
            predictor,
        ))
    }

    /// Stations within the query radius, nearest first.
    ///
    /// Fails with `DataUnavailable` when either reference table is missing or
    /// empty.
    pub fn locate(&self, query: &Query) -> Result<Vec<Location>> {
        let coords = geo::read_station_coords(&self.data.station_coords_path)?;
        let capacity = geo::read_station_capacity(&self.data.station_capacity_path)?;

        if coords.is_empty() || capacity.is_empty() {
            return Err(PipelineError::DataUnavailable(
                "station reference tables are empty".to_string(),
            ));
        }

        geo::find_nearby(query.destination, query.radius_miles, &coords, &capacity)
    }

    /// Run a query, loading models from the configured model directory.
    pub fn run(&self, query: &Query) -> Result<QueryOutcome> {
        let locations = self.locate(query)?;
        if locations.is_empty() {
            return Ok(self.no_result(query, NoResult::NoLocationsInRange));
        }

        let registry = ModelRegistry::load_for(&locations, &self.data.model_dir);
        self.score(query, locations, &registry)
    }

    /// Run a query with caller-supplied models.
    pub fn run_with_registry(
        &self,
        query: &Query,
        registry: &ModelRegistry,
    ) -> Result<QueryOutcome> {
        let locations = self.locate(query)?;
        if locations.is_empty() {
            return Ok(self.no_result(query, NoResult::NoLocationsInRange));
        }

        self.score(query, locations, registry)
    }

    pub fn model_dir(&self) -> &Path {
        &self.data.model_dir
    }

    fn score(
        &self,
        query: &Query,
        locations: Vec<Location>,
        registry: &ModelRegistry,
    ) -> Result<QueryOutcome> {
        let registry = registry.restrict_to(&locations);
        if registry.is_empty() {
            return Ok(self.no_result(query, NoResult::NoModelAvailable));
        }

        let history = WeatherHistory::load_years(&self.data.weather_paths)?;
        let climatology = weather::climatology(query.date, self.weather_window_days, &history)?;

        // Isolated failures can leave every column dropped
        let matrix = match self
            .predictor
            .predict_all(&registry, &locations, query.date, &climatology)?
        {
            Some(matrix) if matrix.n_columns() > 0 => matrix,
            _ => return Ok(self.no_result(query, NoResult::NoModelAvailable)),
        };

        let ranked: Vec<Location> = matrix
            .columns()
            .into_iter()
            .filter_map(|col| {
                let id = matrix.location_id(col)?;
                locations.iter().find(|loc| loc.id == id).cloned()
            })
            .collect();

        tracing::info!(
            "Query for {} within {:.2} mi: {} stations, {} scored",
            query.date,
            query.radius_miles,
            locations.len(),
            ranked.len()
        );

        Ok(QueryOutcome::Ready(QueryResult {
            matrix,
            locations: ranked,
        }))
    }

    fn no_result(&self, query: &Query, reason: NoResult) -> QueryOutcome {
        tracing::info!(
            "No result for ({:.5}, {:.5}) on {}: {}",
            query.destination.latitude,
            query.destination.longitude,
            query.date,
            reason.description()
        );
        QueryOutcome::NoResult(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::SPACE_NEEDLE;

    #[test]
    fn test_query_from_blocks() {
        let date = NaiveDate::from_ymd_opt(2022, 5, 17).unwrap();
        let query = Query::from_blocks(SPACE_NEEDLE, date, 4, MILES_PER_BLOCK);
        assert!((query.radius_miles - 0.28).abs() < 1e-12);
    }

    #[test]
    fn test_outcome_accessors() {
        let outcome = QueryOutcome::NoResult(NoResult::NoModelAvailable);
        assert!(!outcome.is_ready());
        assert_eq!(outcome.no_result(), Some(NoResult::NoModelAvailable));
        assert!(outcome.into_result().is_none());
    }

    #[test]
    fn test_no_result_descriptions_differ() {
        assert_ne!(
            NoResult::NoLocationsInRange.description(),
            NoResult::NoModelAvailable.description()
        );
    }

    #[test]
    fn test_missing_tables_are_data_unavailable() {
        let pipeline = ParkingPipeline::new(
            DataConfig {
                station_coords_path: "/nonexistent/coords.csv".into(),
                station_capacity_path: "/nonexistent/capacity.csv".into(),
                weather_paths: vec![],
                model_dir: "/nonexistent/models".into(),
            },
            10,
            PredictorConfig::default(),
        );
        let date = NaiveDate::from_ymd_opt(2022, 5, 17).unwrap();
        let result = pipeline.run(&Query::new(SPACE_NEEDLE, date, 0.3));

        assert!(matches!(result, Err(PipelineError::DataUnavailable(_))));
    }
}
