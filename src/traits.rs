//! Seams for injected behavior.
//!
//! This module provides traits for:
//! - `AvailabilityModel`: a fitted per-station predictor, plugged in by the caller
//! - `Clock`: abstracting "today" for deterministic testing

use std::sync::{Arc, Mutex};

use chrono::{Local, NaiveDate};
use thiserror::Error;

use crate::ml::features::FeatureTable;

// ==================== Model Trait ====================

/// Errors raised by a model while scoring a feature table.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    /// Feature columns differ from the ones the model was fitted on.
    #[error("expected features {expected:?}, got {found:?}")]
    SchemaMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },
    /// Any other scoring failure.
    #[error("{0}")]
    Failed(String),
}

/// A fitted availability predictor for one parking station.
///
/// Both modes take the full feature table for one station and return one
/// value per row.
pub trait AvailabilityModel: Send + Sync {
    /// Hard "space available" labels.
    fn predict_labels(&self, features: &FeatureTable) -> Result<Vec<bool>, ModelError>;

    /// Probability of the positive ("space available") class.
    fn predict_probabilities(&self, features: &FeatureTable) -> Result<Vec<f64>, ModelError>;
}

impl<M: AvailabilityModel + ?Sized> AvailabilityModel for Arc<M> {
    fn predict_labels(&self, features: &FeatureTable) -> Result<Vec<bool>, ModelError> {
        (**self).predict_labels(features)
    }

    fn predict_probabilities(&self, features: &FeatureTable) -> Result<Vec<f64>, ModelError> {
        (**self).predict_probabilities(features)
    }
}

// ==================== Clock Trait ====================

/// Trait for abstracting time access.
///
/// Used to pick the default query date so that tests are reproducible.
pub trait Clock: Send + Sync {
    /// Today's date in the local timezone.
    fn today(&self) -> NaiveDate;
}

/// System clock implementation using real time.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// Mock clock for testing with a controllable date.
#[derive(Debug, Clone)]
pub struct MockClock {
    date: Arc<Mutex<NaiveDate>>,
}

impl MockClock {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date: Arc::new(Mutex::new(date)),
        }
    }

    pub fn set_date(&self, date: NaiveDate) {
        if let Ok(mut current) = self.date.lock() {
            *current = date;
        }
    }
}

impl Clock for MockClock {
    fn today(&self) -> NaiveDate {
        self.date.lock().map(|d| *d).unwrap_or_default()
    }
}
