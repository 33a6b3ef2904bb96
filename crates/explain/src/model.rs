//! Capability-checked model interface
//!
//! The audited model is an external collaborator; this crate only needs a
//! scoring surface. Capability (probability vs. hard-label output) is
//! resolved once per operation through [`Scorer`], never re-checked inside
//! the candidate loop of the recourse search.

use crate::canon;
use crate::errors::{ExplainError, Result};
use serde::{Deserialize, Serialize};

/// Scoring surface a trained tabular classifier must expose.
pub trait TabularModel {
    /// Number of encoded input features the model was trained on.
    fn n_features(&self) -> usize;

    /// Whether [`TabularModel::predict_proba`] is available.
    fn supports_probability(&self) -> bool;

    /// Hard label for one instance, as 0.0 or 1.0 (approve is positive).
    fn predict(&self, values: &[f64]) -> Result<f64>;

    /// Probability of the positive (approved) class for one instance.
    fn predict_proba(&self, values: &[f64]) -> Result<f64>;
}

/// Which output the resolved scorer uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreKind {
    Probability,
    Label,
}

/// A model with its output capability resolved up front.
pub struct Scorer<'a> {
    model: &'a dyn TabularModel,
    kind: ScoreKind,
}

impl<'a> Scorer<'a> {
    /// Resolve capability once: prefer probability output, fall back to
    /// hard labels (scored as 0.0/1.0) when the model lacks it.
    pub fn resolve(model: &'a dyn TabularModel) -> Self {
        let kind = if model.supports_probability() {
            ScoreKind::Probability
        } else {
            ScoreKind::Label
        };
        Self { model, kind }
    }

    pub fn kind(&self) -> ScoreKind {
        self.kind
    }

    pub fn score(&self, values: &[f64]) -> Result<f64> {
        match self.kind {
            ScoreKind::Probability => self.model.predict_proba(values),
            ScoreKind::Label => self.model.predict(values),
        }
    }
}

/// Logistic-regression classifier over numerically encoded features.
///
/// Doubles as the linear-coefficient attribution supplier: for linear
/// models, per-feature contributions are the coefficient times the distance
/// from a baseline row, so no external SHAP backend is needed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticModel {
    pub feature_names: Vec<String>,
    pub weights: Vec<f64>,
    pub intercept: f64,
}

impl LogisticModel {
    pub fn new(feature_names: Vec<String>, weights: Vec<f64>, intercept: f64) -> Result<Self> {
        if feature_names.len() != weights.len() {
            return Err(ExplainError::ShapeMismatch {
                expected: feature_names.len(),
                actual: weights.len(),
                detail: " (feature names vs. coefficient count)".to_string(),
            });
        }
        Ok(Self {
            feature_names,
            weights,
            intercept,
        })
    }

    fn check_width(&self, values: &[f64]) -> Result<()> {
        if values.len() != self.weights.len() {
            return Err(ExplainError::ShapeMismatch {
                expected: self.weights.len(),
                actual: values.len(),
                detail: " (model input width)".to_string(),
            });
        }
        Ok(())
    }

    fn linear_score(&self, values: &[f64]) -> f64 {
        self.weights
            .iter()
            .zip(values)
            .fold(self.intercept, |acc, (w, x)| acc + w * x)
    }

    /// Per-feature contributions toward the positive class relative to a
    /// baseline row: `w[i] * (x[i] - baseline[i])`.
    pub fn coefficient_attributions(&self, values: &[f64], baseline: &[f64]) -> Result<Vec<f64>> {
        self.check_width(values)?;
        self.check_width(baseline)?;
        Ok(self
            .weights
            .iter()
            .zip(values.iter().zip(baseline))
            .map(|(w, (x, b))| w * (x - b))
            .collect())
    }

    /// Canonical BLAKE3 fingerprint of the model parameters.
    pub fn hash_hex(&self) -> Result<String> {
        canon::canonical_digest_hex(self)
    }
}

impl TabularModel for LogisticModel {
    fn n_features(&self) -> usize {
        self.weights.len()
    }

    fn supports_probability(&self) -> bool {
        true
    }

    fn predict(&self, values: &[f64]) -> Result<f64> {
        let proba = self.predict_proba(values)?;
        Ok(if proba >= 0.5 { 1.0 } else { 0.0 })
    }

    fn predict_proba(&self, values: &[f64]) -> Result<f64> {
        self.check_width(values)?;
        let z = self.linear_score(values);
        Ok(1.0 / (1.0 + (-z).exp()))
    }
}
