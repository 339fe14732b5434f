//! End-to-end pipeline tests against reference data written to a temp dir

use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use seapark::config::DataConfig;
use seapark::ml::model::LogisticModel;
use seapark::ml::persistence::model_path;
use seapark::{
    FailurePolicy, ModelRegistry, NoResult, ParkingPipeline, PersistedModel, PipelineError,
    PredictionMode, PredictorConfig, Query, QueryOutcome, SPACE_NEEDLE,
};
use tempfile::{TempDir, tempdir};

// ==================== Fixtures ====================

const COORDS_CSV: &str = "\
ELMNTKEY,SHAPE_LAT,SHAPE_LNG
103,47.6175,-122.3493
101,47.6215,-122.3493
102,47.6225,-122.3493
900,47.6705,-122.3493
";

const CAPACITY_CSV: &str = "\
elmntkey,time_limit_min,time_limit_max,space_count
101,0,120,6
102,0,240,4
103,0,120,8
900,0,120,2
";

fn weather_csv() -> String {
    let mut csv = String::from("STATION,DATE,PRCP,SNOW,SNWD,TMAX,TMIN\n");
    for day in 10..=24 {
        csv.push_str(&format!(
            "USW00024233,2021-05-{:02},0.05,0,0,{},{}\n",
            day,
            60 + day % 5,
            45 + day % 3
        ));
    }
    csv
}

fn query_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2022, 5, 17).unwrap()
}

struct Fixture {
    dir: TempDir,
    data: DataConfig,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempdir().unwrap();
        let root = dir.path();

        fs::write(root.join("coords.csv"), COORDS_CSV).unwrap();
        fs::write(root.join("capacity.csv"), CAPACITY_CSV).unwrap();
        fs::write(root.join("weather_2021.csv"), weather_csv()).unwrap();

        let data = DataConfig {
            station_coords_path: root.join("coords.csv"),
            station_capacity_path: root.join("capacity.csv"),
            weather_paths: vec![
                root.join("weather_2021.csv"),
                // Missing years are skipped
                root.join("weather_2022.csv"),
            ],
            model_dir: root.join("models"),
        };

        Self { dir, data }
    }

    fn save_model(&self, location_id: i64, model: LogisticModel) {
        PersistedModel::new(location_id, model)
            .save(&model_path(&self.data.model_dir, location_id))
            .unwrap();
    }

    fn pipeline(&self, config: PredictorConfig) -> ParkingPipeline {
        ParkingPipeline::new(self.data.clone(), 10, config)
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }
}

/// A model over the default feature schema that leans on the hour of day
fn fitted_model(config: &PredictorConfig, intercept: f64) -> LogisticModel {
    let schema = config.feature_schema();
    let coefficients = schema
        .iter()
        .map(|name| match name.as_str() {
            "hr" => -0.15,
            "parkingspacecount" => 0.2,
            "tmax" => 0.01,
            _ => 0.0,
        })
        .collect();
    LogisticModel::new(schema, coefficients, intercept).unwrap()
}

// ==================== Happy Path ====================

#[test]
fn test_three_nearby_stations_with_models() {
    let fixture = Fixture::new();
    let config = PredictorConfig::default();
    for id in [101, 102, 103] {
        fixture.save_model(id, fitted_model(&config, 0.5));
    }
    // Far station has a model but is out of range
    fixture.save_model(900, fitted_model(&config, 0.5));

    let pipeline = fixture.pipeline(config);
    let query = Query::new(SPACE_NEEDLE, query_date(), 0.3);
    let outcome = pipeline.run(&query).unwrap();

    let result = outcome.into_result().expect("expected a matrix");
    let matrix = &result.matrix;

    assert_eq!(matrix.shape(), (120, 3));
    assert_eq!(matrix.columns(), vec![1, 2, 3]);
    assert!(matrix.is_probability());

    // Columns follow ascending distance: 101 (0.07 mi), 102 (0.14 mi), 103 (0.21 mi)
    let ids: Vec<i64> = result.locations.iter().map(|l| l.id).collect();
    assert_eq!(ids, vec![101, 102, 103]);
    assert_eq!(matrix.location_id(1), Some(101));
    assert_eq!(matrix.column_of(103), Some(3));

    let labels = matrix.slot_labels();
    assert_eq!(labels.first().map(String::as_str), Some("08:00"));
    assert_eq!(labels.last().map(String::as_str), Some("17:55"));

    for row in 0..matrix.n_slots() {
        for col in matrix.columns() {
            let p = matrix.value(row, col).unwrap();
            assert!((0.0..=1.0).contains(&p), "p={} at ({}, {})", p, row, col);
        }
    }

    // Larger stations score higher at the same slot
    assert!(matrix.value(0, 3).unwrap() > matrix.value(0, 2).unwrap());
}

#[test]
fn test_ranked_locations_number_columns_from_one() {
    let fixture = Fixture::new();
    let config = PredictorConfig::default();
    fixture.save_model(102, fitted_model(&config, 0.0));

    let outcome = fixture
        .pipeline(config)
        .run(&Query::new(SPACE_NEEDLE, query_date(), 0.3))
        .unwrap();
    let result = outcome.into_result().unwrap();

    let ranked: Vec<(usize, i64)> = result.ranked_locations().map(|(c, l)| (c, l.id)).collect();
    assert_eq!(ranked, vec![(1, 102)]);
    assert_eq!(result.matrix.shape(), (120, 1));
}

#[test]
fn test_label_mode_gives_binary_cells() {
    let fixture = Fixture::new();
    let config = PredictorConfig {
        mode: PredictionMode::Labels,
        ..Default::default()
    };
    fixture.save_model(101, fitted_model(&config, 0.0));

    let outcome = fixture
        .pipeline(config)
        .run(&Query::new(SPACE_NEEDLE, query_date(), 0.3))
        .unwrap();
    let matrix = outcome.into_result().unwrap().matrix;

    assert!(!matrix.is_probability());
    for row in 0..matrix.n_slots() {
        let v = matrix.value(row, 1).unwrap();
        assert!(v == 0.0 || v == 1.0);
    }
}

// ==================== No Result ====================

#[test]
fn test_tiny_radius_has_no_locations() {
    let fixture = Fixture::new();
    let outcome = fixture
        .pipeline(PredictorConfig::default())
        .run(&Query::new(SPACE_NEEDLE, query_date(), 0.01))
        .unwrap();

    assert_eq!(outcome.no_result(), Some(NoResult::NoLocationsInRange));
}

#[test]
fn test_no_models_for_nearby_stations() {
    let fixture = Fixture::new();
    let config = PredictorConfig::default();
    fixture.save_model(900, fitted_model(&config, 0.0));

    let outcome = fixture
        .pipeline(config)
        .run(&Query::new(SPACE_NEEDLE, query_date(), 0.3))
        .unwrap();

    assert_eq!(outcome.no_result(), Some(NoResult::NoModelAvailable));
}

#[test]
fn test_all_models_failing_is_no_model_when_isolated() {
    let fixture = Fixture::new();
    let stale = LogisticModel::new(vec!["hr".into(), "min".into()], vec![0.1, 0.1], 0.0).unwrap();
    let mut registry = ModelRegistry::new();
    registry.insert(101, stale);

    let outcome = fixture
        .pipeline(PredictorConfig::default())
        .run_with_registry(&Query::new(SPACE_NEEDLE, query_date(), 0.3), &registry)
        .unwrap();

    assert!(matches!(
        outcome,
        QueryOutcome::NoResult(NoResult::NoModelAvailable)
    ));
}

// ==================== Errors ====================

#[test]
fn test_schema_mismatch_aborts_under_abort_policy() {
    let fixture = Fixture::new();
    let config = PredictorConfig {
        failure_policy: FailurePolicy::Abort,
        ..Default::default()
    };
    let mut registry = ModelRegistry::new();
    registry.insert(101, fitted_model(&config, 0.0));
    registry.insert(
        102,
        LogisticModel::new(vec!["hr".into()], vec![0.1], 0.0).unwrap(),
    );

    let result = fixture
        .pipeline(config)
        .run_with_registry(&Query::new(SPACE_NEEDLE, query_date(), 0.3), &registry);

    assert!(matches!(
        result,
        Err(PipelineError::SchemaMismatch {
            location_id: 102,
            ..
        })
    ));
}

#[test]
fn test_weather_outside_window_is_data_unavailable() {
    let fixture = Fixture::new();
    let config = PredictorConfig::default();
    fixture.save_model(101, fitted_model(&config, 0.0));

    // History only covers mid-May
    let december = NaiveDate::from_ymd_opt(2022, 12, 1).unwrap();
    let result = fixture
        .pipeline(config)
        .run(&Query::new(SPACE_NEEDLE, december, 0.3));

    assert!(matches!(result, Err(PipelineError::DataUnavailable(_))));
}

#[test]
fn test_empty_reference_table_is_data_unavailable() {
    let fixture = Fixture::new();
    let header_only = "elmntkey,time_limit_min,time_limit_max,space_count\n";
    fs::write(fixture.root().join("capacity.csv"), header_only).unwrap();

    let result = fixture
        .pipeline(PredictorConfig::default())
        .run(&Query::new(SPACE_NEEDLE, query_date(), 0.3));

    assert!(matches!(result, Err(PipelineError::DataUnavailable(_))));
}

#[test]
fn test_corrupt_model_file_is_skipped() {
    let fixture = Fixture::new();
    let config = PredictorConfig::default();
    fixture.save_model(102, fitted_model(&config, 0.0));
    fs::write(model_path(&fixture.data.model_dir, 101), b"{ broken").unwrap();

    let outcome = fixture
        .pipeline(config)
        .run(&Query::new(SPACE_NEEDLE, query_date(), 0.3))
        .unwrap();
    let result = outcome.into_result().unwrap();

    assert_eq!(result.matrix.location_id(1), Some(102));
    assert_eq!(result.matrix.n_columns(), 1);
}

#[test]
fn test_negative_radius_is_invalid_query() {
    let fixture = Fixture::new();
    let result = fixture
        .pipeline(PredictorConfig::default())
        .run(&Query::new(SPACE_NEEDLE, query_date(), -1.0));

    assert!(matches!(result, Err(PipelineError::InvalidQuery(_))));
}
