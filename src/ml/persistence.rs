//! Model persistence - per-station model files and the in-memory registry

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::model::LogisticModel;
use crate::geo::Location;
use crate::traits::AvailabilityModel;

/// On-disk representation of one station's fitted model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedModel {
    /// Version for backward compatibility
    pub version: u32,
    /// Station this model was fitted for
    pub location_id: i64,
    /// When the model was trained, if recorded
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    pub model: LogisticModel,
}

impl PersistedModel {
    /// Current version number
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new(location_id: i64, model: LogisticModel) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            location_id,
            created_at: Some(Utc::now()),
            model,
        }
    }

    /// Save as pretty-printed JSON, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), PersistenceError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| PersistenceError::Io(e.to_string()))?;
        }

        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|e| PersistenceError::Serialize(e.to_string()))?;

        fs::write(path, bytes).map_err(|e| PersistenceError::Io(e.to_string()))?;

        Ok(())
    }

    /// Load from a file
    pub fn load(path: &Path) -> Result<Self, PersistenceError> {
        if !path.exists() {
            return Err(PersistenceError::FileNotFound(
                path.to_string_lossy().to_string(),
            ));
        }

        let bytes = fs::read(path).map_err(|e| PersistenceError::Io(e.to_string()))?;

        let persisted: Self = serde_json::from_slice(&bytes)
            .map_err(|e| PersistenceError::Deserialize(e.to_string()))?;

        if persisted.version > Self::CURRENT_VERSION {
            return Err(PersistenceError::VersionMismatch {
                expected: Self::CURRENT_VERSION,
                found: persisted.version,
            });
        }

        persisted
            .model
            .validate()
            .map_err(|e| PersistenceError::InvalidModel(e.to_string()))?;

        Ok(persisted)
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "Model v{} for station {}: {}, created {}",
            self.version,
            self.location_id,
            self.model.info(),
            self.created_at
                .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
                .unwrap_or_else(|| "N/A".to_string())
        )
    }
}

/// Errors that can occur during model persistence
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PersistenceError {
    #[error("Model file not found: {0}")]
    FileNotFound(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Serialization error: {0}")]
    Serialize(String),
    #[error("Deserialization error: {0}")]
    Deserialize(String),
    #[error("Model version mismatch: expected v{expected}, found v{found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("Invalid model: {0}")]
    InvalidModel(String),
    #[error("Model file is for station {found}, expected {expected}")]
    WrongLocation { expected: i64, found: i64 },
}

/// Path of the model file for a station
pub fn model_path(model_dir: &Path, location_id: i64) -> PathBuf {
    model_dir.join(format!("{}.json", location_id))
}

/// Fitted models resolvable by station id
#[derive(Clone, Default)]
pub struct ModelRegistry {
    models: BTreeMap<i64, Arc<dyn AvailabilityModel>>,
}

impl fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("ids", &self.models.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load models for the given stations from `model_dir`.
    ///
    /// Stations without a model file are left out. Files that cannot be read,
    /// parsed, or that belong to a different station are skipped with a warning.
    pub fn load_for(locations: &[Location], model_dir: &Path) -> Self {
        let mut registry = Self::new();

        for location in locations {
            let path = model_path(model_dir, location.id);
            if !path.exists() {
                tracing::debug!("No model for station {} at {}", location.id, path.display());
                continue;
            }

            match Self::load_one(&path, location.id) {
                Ok(persisted) => {
                    tracing::debug!("Loaded {}", persisted.summary());
                    registry.insert(location.id, persisted.model);
                }
                Err(e) => {
                    tracing::warn!("Skipping model for station {}: {}", location.id, e);
                }
            }
        }

        tracing::info!(
            "Resolved {} of {} station models from {}",
            registry.len(),
            locations.len(),
            model_dir.display()
        );
        registry
    }

    fn load_one(path: &Path, location_id: i64) -> Result<PersistedModel, PersistenceError> {
        let persisted = PersistedModel::load(path)?;
        if persisted.location_id != location_id {
            return Err(PersistenceError::WrongLocation {
                expected: location_id,
                found: persisted.location_id,
            });
        }
        Ok(persisted)
    }

    /// Register a model for a station, replacing any previous one.
    pub fn insert(&mut self, location_id: i64, model: impl AvailabilityModel + 'static) {
        self.models.insert(location_id, Arc::new(model));
    }

    pub fn insert_shared(&mut self, location_id: i64, model: Arc<dyn AvailabilityModel>) {
        self.models.insert(location_id, model);
    }

    pub fn get(&self, location_id: i64) -> Option<&Arc<dyn AvailabilityModel>> {
        self.models.get(&location_id)
    }

    pub fn contains(&self, location_id: i64) -> bool {
        self.models.contains_key(&location_id)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.models.keys().copied()
    }

    /// Sub-registry holding only the models for `locations`.
    pub fn restrict_to(&self, locations: &[Location]) -> Self {
        let models = locations
            .iter()
            .filter_map(|loc| self.get(loc.id).map(|m| (loc.id, Arc::clone(m))))
            .collect();
        Self { models }
    }

    /// Pair each location with its model, keeping location order and
    /// dropping locations without one.
    pub fn resolve<'a>(
        &self,
        locations: &'a [Location],
    ) -> Vec<(&'a Location, Arc<dyn AvailabilityModel>)> {
        locations
            .iter()
            .filter_map(|loc| self.get(loc.id).map(|m| (loc, Arc::clone(m))))
            .collect()
    }
}
