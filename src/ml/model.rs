//! Logistic-regression availability model

use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

use super::features::FeatureTable;
use crate::traits::{AvailabilityModel, ModelError};

fn default_threshold() -> f64 {
    0.5
}

/// A fitted binary classifier over a named feature schema.
///
/// The schema must match the scored table exactly, names and order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    /// Feature names in the order the coefficients apply to
    pub features: Vec<String>,
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    /// Probability above which a slot is labelled available
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

impl LogisticModel {
    /// Create a model, checking that every feature has a coefficient.
    pub fn new(
        features: Vec<String>,
        coefficients: Vec<f64>,
        intercept: f64,
    ) -> Result<Self, ModelError> {
        let model = Self {
            features,
            coefficients,
            intercept,
            threshold: default_threshold(),
        };
        model.validate()?;
        Ok(model)
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Check internal consistency (used after deserializing).
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.features.len() != self.coefficients.len() {
            return Err(ModelError::Failed(format!(
                "{} features but {} coefficients",
                self.features.len(),
                self.coefficients.len()
            )));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(ModelError::Failed(format!(
                "threshold {} outside [0, 1]",
                self.threshold
            )));
        }
        Ok(())
    }

    /// Get model information as a string
    pub fn info(&self) -> String {
        format!(
            "LogisticModel(features={}, intercept={:.3}, threshold={:.2})",
            self.features.len(),
            self.intercept,
            self.threshold
        )
    }

    fn check_schema(&self, table: &FeatureTable) -> Result<(), ModelError> {
        if table.columns() != self.features.as_slice() {
            return Err(ModelError::SchemaMismatch {
                expected: self.features.clone(),
                found: table.columns().to_vec(),
            });
        }
        Ok(())
    }

    /// Linear decision values `X·w + b`.
    fn decision(&self, table: &FeatureTable) -> Result<Array1<f64>, ModelError> {
        self.check_schema(table)?;
        let weights = ArrayView1::from(self.coefficients.as_slice());
        Ok(table.values().dot(&weights) + self.intercept)
    }
}

impl AvailabilityModel for LogisticModel {
    fn predict_labels(&self, features: &FeatureTable) -> Result<Vec<bool>, ModelError> {
        Ok(self
            .predict_probabilities(features)?
            .into_iter()
            .map(|p| p > self.threshold)
            .collect())
    }

    fn predict_probabilities(&self, features: &FeatureTable) -> Result<Vec<f64>, ModelError> {
        let scores = self.decision(features)?;
        if scores.iter().any(|s| !s.is_finite()) {
            return Err(ModelError::Failed("non-finite decision value".to_string()));
        }
        Ok(scores.iter().map(|&z| sigmoid(z)).collect())
    }
}

/// Logistic function, stable for large |z|
fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn table(columns: &[&str], values: ndarray::Array2<f64>) -> FeatureTable {
        FeatureTable::new(columns.iter().map(|c| c.to_string()).collect(), values).unwrap()
    }

    fn two_feature_model() -> LogisticModel {
        LogisticModel::new(vec!["a".into(), "b".into()], vec![1.0, -2.0], 0.5).unwrap()
    }

    #[test]
    fn test_new_rejects_length_mismatch() {
        let result = LogisticModel::new(vec!["a".into()], vec![1.0, 2.0], 0.0);
        assert!(matches!(result, Err(ModelError::Failed(_))));
    }

    #[test]
    fn test_sigmoid_values() {
        assert_relative_eq!(sigmoid(0.0), 0.5, epsilon = 1e-12);
        assert!(sigmoid(800.0) <= 1.0);
        assert!(sigmoid(-800.0) >= 0.0);
        assert_relative_eq!(sigmoid(2.0) + sigmoid(-2.0), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_predict_probabilities() {
        let model = two_feature_model();
        let t = table(&["a", "b"], array![[0.0, 0.0], [1.5, 1.0], [-0.5, 0.0]]);

        let probs = model.predict_probabilities(&t).unwrap();
        assert_eq!(probs.len(), 3);
        assert_relative_eq!(probs[0], sigmoid(0.5), epsilon = 1e-12);
        assert_relative_eq!(probs[1], 0.5, epsilon = 1e-12);
        assert_relative_eq!(probs[2], 0.5, epsilon = 1e-12);
        assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn test_predict_labels_uses_threshold() {
        let model = two_feature_model().with_threshold(0.6);
        let t = table(&["a", "b"], array![[0.0, 0.0], [5.0, 0.0]]);

        // sigmoid(0.5) ~ 0.62, sigmoid(5.5) ~ 0.996
        assert_eq!(model.predict_labels(&t).unwrap(), vec![true, true]);

        let strict = two_feature_model().with_threshold(0.9);
        assert_eq!(strict.predict_labels(&t).unwrap(), vec![false, true]);
    }

    #[test]
    fn test_schema_mismatch_on_order() {
        let model = two_feature_model();
        let t = table(&["b", "a"], array![[0.0, 0.0]]);

        let result = model.predict_probabilities(&t);
        assert!(matches!(result, Err(ModelError::SchemaMismatch { .. })));
    }

    #[test]
    fn test_schema_mismatch_on_missing_column() {
        let model = two_feature_model();
        let t = table(&["a"], array![[0.0]]);

        assert!(matches!(
            model.predict_labels(&t),
            Err(ModelError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_non_finite_input_fails() {
        let model = two_feature_model();
        let t = table(&["a", "b"], array![[f64::NAN, 0.0]]);

        assert!(matches!(
            model.predict_probabilities(&t),
            Err(ModelError::Failed(_))
        ));
    }

    #[test]
    fn test_threshold_defaults_when_absent_from_json() {
        let json = r#"{"features":["a"],"coefficients":[1.0],"intercept":0.0}"#;
        let model: LogisticModel = serde_json::from_str(json).unwrap();
        assert_eq!(model.threshold, 0.5);
        assert!(model.validate().is_ok());
    }

    #[test]
    fn test_model_info() {
        let info = two_feature_model().info();
        assert!(info.contains("features=2"));
        assert!(info.contains("threshold=0.50"));
    }
}
