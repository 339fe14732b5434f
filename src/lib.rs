//! Seattle street parking availability
//!
//! This module exposes the core components of the seapark pipeline
//! for testing and potential reuse.

pub mod config;
pub mod error;
pub mod geo;
pub mod ml;
pub mod pipeline;
pub mod traits;
pub mod weather;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{PipelineError, Result};
pub use geo::{
    GeoPoint,
    Location,
    SPACE_NEEDLE,
    // Station lookup
    find_nearby,
    great_circle_miles,
};
pub use ml::{
    BatchPredictor,
    FailurePolicy,
    // Persistence
    ModelRegistry,
    OperatingWindow,
    PersistedModel,
    PredictionMatrix,
    PredictionMode,
    PredictorConfig,
};
pub use pipeline::{NoResult, ParkingPipeline, Query, QueryOutcome, QueryResult};
pub use traits::{AvailabilityModel, Clock, MockClock, ModelError, SystemClock};
pub use weather::{WeatherClimatology, WeatherHistory, climatology};
