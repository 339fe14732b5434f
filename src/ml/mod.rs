//! Batch availability prediction
//!
//! Scores every resolvable station over a full day of 5-minute slots and
//! assembles the results into a slot × station matrix. Each station's feature
//! table is built and scored on its own, so stations are scored in parallel.

pub mod features;
pub mod model;
pub mod persistence;

use std::time::Instant;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::geo::Location;
use crate::traits::{AvailabilityModel, ModelError};
use crate::weather::WeatherClimatology;

pub use features::{EncoderOptions, FeatureTable, HarmonicsPlan};
pub use model::LogisticModel;
pub use persistence::{ModelRegistry, PersistedModel};

/// Feature column holding the station's space count.
pub const SPACE_COUNT_FEATURE: &str = "parkingspacecount";

/// Which of the model's two outputs fills the matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionMode {
    Labels,
    #[default]
    Probabilities,
}

/// What to do when one station's model fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log the failure and drop that station's column
    #[default]
    Isolate,
    /// Fail the whole batch
    Abort,
}

/// Daily time range over which slots are generated (end exclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatingWindow {
    start: NaiveTime,
    end: NaiveTime,
    slot_minutes: u32,
}

impl OperatingWindow {
    pub fn new(start_hour: u32, end_hour: u32, slot_minutes: u32) -> Option<Self> {
        if slot_minutes == 0 || start_hour >= end_hour {
            return None;
        }
        Some(Self {
            start: NaiveTime::from_hms_opt(start_hour, 0, 0)?,
            end: NaiveTime::from_hms_opt(end_hour % 24, 0, 0).filter(|_| end_hour <= 24)?,
            slot_minutes,
        })
    }

    pub fn slot_minutes(&self) -> u32 {
        self.slot_minutes
    }

    /// Number of slots in one day.
    pub fn len(&self) -> usize {
        let minutes = if self.end > self.start {
            (self.end - self.start).num_minutes()
        } else {
            // window ends at midnight
            (Duration::days(1) - (self.start - NaiveTime::MIN)).num_minutes()
        };
        (minutes as usize).div_ceil(self.slot_minutes as usize)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Chronological slot timestamps for `date`.
    pub fn grid(&self, date: NaiveDate) -> Vec<NaiveDateTime> {
        let start = date.and_time(self.start);
        let step = Duration::minutes(self.slot_minutes as i64);
        (0..self.len())
            .map(|i| start + step * i as i32)
            .collect()
    }
}

impl Default for OperatingWindow {
    fn default() -> Self {
        Self {
            start: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or(NaiveTime::MIN),
            end: NaiveTime::from_hms_opt(18, 0, 0).unwrap_or(NaiveTime::MIN),
            slot_minutes: 5,
        }
    }
}

/// Settings for a batch prediction run
#[derive(Debug, Clone, Default)]
pub struct PredictorConfig {
    pub window: OperatingWindow,
    pub mode: PredictionMode,
    pub failure_policy: FailurePolicy,
    pub plan: HarmonicsPlan,
    pub encoder: EncoderOptions,
}

impl PredictorConfig {
    /// Column names of the assembled per-station feature table.
    ///
    /// Models must be fitted on exactly this schema.
    pub fn feature_schema(&self) -> Vec<String> {
        let mut names = features::feature_names(&self.plan, self.encoder);
        names.extend(WeatherClimatology::FIELD_NAMES.iter().map(|s| s.to_string()));
        names.push(SPACE_COUNT_FEATURE.to_string());
        names
    }
}

/// Build one station's feature table: encoded time grid, broadcast
/// climatology, then the station's space count.
pub fn assemble_features(
    grid: &[NaiveDateTime],
    climatology: &WeatherClimatology,
    space_count: u32,
    plan: &HarmonicsPlan,
    options: EncoderOptions,
) -> FeatureTable {
    let mut table = features::encode(grid, plan, options);
    for (name, value) in WeatherClimatology::FIELD_NAMES
        .iter()
        .zip(climatology.to_vec())
    {
        table.push_constant(*name, value);
    }
    table.push_constant(SPACE_COUNT_FEATURE, space_count as f64);
    table
}

/// Matrix cell values.
#[derive(Debug, Clone, PartialEq)]
pub enum Cells {
    Probabilities(Array2<f64>),
    Labels(Array2<bool>),
}

/// Slot × station availability matrix.
///
/// Columns are numbered 1..=N in ascending distance. The station id behind a
/// column is available through [`PredictionMatrix::location_id`] for
/// renderers, but is not part of the column numbering.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionMatrix {
    slots: Vec<NaiveDateTime>,
    cells: Cells,
    location_ids: Vec<i64>,
}

impl PredictionMatrix {
    /// (slots, columns)
    pub fn shape(&self) -> (usize, usize) {
        (self.slots.len(), self.location_ids.len())
    }

    pub fn n_slots(&self) -> usize {
        self.slots.len()
    }

    pub fn n_columns(&self) -> usize {
        self.location_ids.len()
    }

    /// Dense column numbers, 1..=N.
    pub fn columns(&self) -> Vec<usize> {
        (1..=self.n_columns()).collect()
    }

    pub fn slots(&self) -> &[NaiveDateTime] {
        &self.slots
    }

    /// Slot times as `HH:MM`.
    pub fn slot_labels(&self) -> Vec<String> {
        self.slots
            .iter()
            .map(|s| s.format("%H:%M").to_string())
            .collect()
    }

    pub fn cells(&self) -> &Cells {
        &self.cells
    }

    pub fn is_probability(&self) -> bool {
        matches!(self.cells, Cells::Probabilities(_))
    }

    /// Station id behind a 1-based column number.
    pub fn location_id(&self, column: usize) -> Option<i64> {
        column
            .checked_sub(1)
            .and_then(|i| self.location_ids.get(i).copied())
    }

    /// 1-based column number of a station.
    pub fn column_of(&self, location_id: i64) -> Option<usize> {
        self.location_ids
            .iter()
            .position(|&id| id == location_id)
            .map(|i| i + 1)
    }

    /// Cell value as a number (labels become 0.0 / 1.0).
    pub fn value(&self, row: usize, column: usize) -> Option<f64> {
        let col = column.checked_sub(1)?;
        match &self.cells {
            Cells::Probabilities(m) => m.get((row, col)).copied(),
            Cells::Labels(m) => m.get((row, col)).map(|&b| if b { 1.0 } else { 0.0 }),
        }
    }
}

/// One station's scored column.
#[derive(Debug, Clone)]
enum ColumnValues {
    Probabilities(Vec<f64>),
    Labels(Vec<bool>),
}

/// Scores stations and assembles the prediction matrix.
#[derive(Debug, Clone, Default)]
pub struct BatchPredictor {
    config: PredictorConfig,
}

impl BatchPredictor {
    pub fn new(config: PredictorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PredictorConfig {
        &self.config
    }

    /// Score every station in `locations` that has a model in `registry`.
    ///
    /// Returns `Ok(None)` when no station has a model. With
    /// [`FailurePolicy::Isolate`] a failing station is dropped, which can
    /// leave a matrix with zero columns; with [`FailurePolicy::Abort`] the
    /// first failure (in distance order) is returned.
    pub fn predict_all(
        &self,
        registry: &ModelRegistry,
        locations: &[Location],
        target_date: NaiveDate,
        climatology: &WeatherClimatology,
    ) -> Result<Option<PredictionMatrix>> {
        let resolved = registry.resolve(locations);
        if resolved.is_empty() {
            tracing::info!("No models available for {} stations", locations.len());
            return Ok(None);
        }

        let started = Instant::now();
        let grid = self.config.window.grid(target_date);

        // collect() on an indexed parallel iterator keeps input order
        let scored: Vec<(i64, Result<ColumnValues>)> = resolved
            .par_iter()
            .map(|(location, model)| {
                let table = assemble_features(
                    &grid,
                    climatology,
                    location.space_count,
                    &self.config.plan,
                    self.config.encoder,
                );
                (
                    location.id,
                    self.score(location.id, &**model, &table, grid.len()),
                )
            })
            .collect();

        let mut location_ids = Vec::with_capacity(scored.len());
        let mut columns = Vec::with_capacity(scored.len());
        for (location_id, result) in scored {
            match result {
                Ok(values) => {
                    location_ids.push(location_id);
                    columns.push(values);
                }
                Err(e) => match self.config.failure_policy {
                    FailurePolicy::Isolate => {
                        tracing::warn!("Dropping station {} from batch: {}", location_id, e);
                    }
                    FailurePolicy::Abort => return Err(e),
                },
            }
        }

        let cells = build_cells(self.config.mode, &columns, grid.len());

        tracing::info!(
            "Scored {} of {} stations over {} slots in {:?}",
            location_ids.len(),
            resolved.len(),
            grid.len(),
            started.elapsed()
        );

        Ok(Some(PredictionMatrix {
            slots: grid,
            cells,
            location_ids,
        }))
    }

    fn score(
        &self,
        location_id: i64,
        model: &dyn AvailabilityModel,
        table: &FeatureTable,
        expected_rows: usize,
    ) -> Result<ColumnValues> {
        let to_pipeline_error = |e: ModelError| match e {
            ModelError::SchemaMismatch { expected, found } => PipelineError::SchemaMismatch {
                location_id,
                expected,
                found,
            },
            ModelError::Failed(reason) => PipelineError::ModelFailure {
                location_id,
                reason,
            },
        };

        let (values, len) = match self.config.mode {
            PredictionMode::Probabilities => {
                let probs = model
                    .predict_probabilities(table)
                    .map_err(to_pipeline_error)?;
                // clamp() passes NaN through
                if let Some(row) = probs.iter().position(|p| !p.is_finite()) {
                    return Err(PipelineError::ModelFailure {
                        location_id,
                        reason: format!("non-finite probability {} at slot {}", probs[row], row),
                    });
                }
                let probs: Vec<f64> = probs.into_iter().map(|p| p.clamp(0.0, 1.0)).collect();
                let len = probs.len();
                (ColumnValues::Probabilities(probs), len)
            }
            PredictionMode::Labels => {
                let labels = model.predict_labels(table).map_err(to_pipeline_error)?;
                let len = labels.len();
                (ColumnValues::Labels(labels), len)
            }
        };

        if len != expected_rows {
            return Err(PipelineError::ModelFailure {
                location_id,
                reason: format!("returned {} values for {} slots", len, expected_rows),
            });
        }
        Ok(values)
    }
}

fn build_cells(mode: PredictionMode, columns: &[ColumnValues], rows: usize) -> Cells {
    let n = columns.len();
    match mode {
        PredictionMode::Probabilities => Cells::Probabilities(Array2::from_shape_fn(
            (rows, n),
            |(r, c)| match &columns[c] {
                ColumnValues::Probabilities(v) => v[r],
                ColumnValues::Labels(v) => f64::from(u8::from(v[r])),
            },
        )),
        PredictionMode::Labels => {
            Cells::Labels(Array2::from_shape_fn((rows, n), |(r, c)| match &columns[c] {
                ColumnValues::Labels(v) => v[r],
                ColumnValues::Probabilities(v) => v[r] > 0.5,
            }))
        }
    }
}
