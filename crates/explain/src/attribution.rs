//! Attribution adapter
//!
//! Attribution backends hand back different shapes: a single 1D vector
//! (linear coefficients), a per-class list (KernelSHAP on binary models), or
//! a 2D per-instance matrix (TreeSHAP batch output). This module inspects
//! the shape explicitly and normalizes to one canonical form so downstream
//! ranking logic never sees raw backend output. Protected attributes are
//! removed from the ranking here, once, and recorded for audit.

use crate::errors::{ExplainError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Raw attribution output, tagged by shape.
#[derive(Debug, Clone, PartialEq)]
pub enum RawAttribution {
    /// 1D vector, one contribution per feature.
    Single(Vec<f64>),
    /// One array per class; the positive class (index 1) is selected.
    PerClass(Vec<Vec<f64>>),
    /// One row per instance; row 0 is selected (this adapter is always
    /// called for a single instance).
    PerInstance(Vec<Vec<f64>>),
}

/// One feature's contribution, aligned to the instance value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionEntry {
    pub feature: String,
    pub contribution: f64,
    pub value: f64,
}

/// Canonical single-instance attribution toward the positive class.
///
/// Entries keep the original feature order with protected attributes
/// removed; `excluded_features` records what was removed and why reports
/// never cite them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalAttribution {
    pub entries: Vec<AttributionEntry>,
    pub excluded_features: BTreeSet<String>,
}

fn flatten(raw: &RawAttribution) -> Result<&[f64]> {
    match raw {
        RawAttribution::Single(vector) => Ok(vector),
        RawAttribution::PerClass(arrays) => arrays.get(1).map(Vec::as_slice).ok_or_else(|| {
            ExplainError::ShapeMismatch {
                expected: 2,
                actual: arrays.len(),
                detail: " (per-class attribution needs an array for the positive class at index 1)"
                    .to_string(),
            }
        }),
        RawAttribution::PerInstance(rows) => rows.first().map(Vec::as_slice).ok_or_else(|| {
            ExplainError::ShapeMismatch {
                expected: 1,
                actual: 0,
                detail: " (per-instance attribution matrix is empty)".to_string(),
            }
        }),
    }
}

/// Normalize a raw attribution into the canonical ranked-contribution input.
///
/// Fails with a shape mismatch when the attribution vector does not line up
/// with the feature metadata (the classic "model trained on encoded
/// features, explained on raw features" failure) instead of silently
/// truncating.
pub fn normalize(
    raw: &RawAttribution,
    feature_names: &[String],
    feature_values: &[f64],
    protected_attributes: &BTreeSet<String>,
) -> Result<CanonicalAttribution> {
    let contributions = flatten(raw)?;

    if contributions.len() != feature_names.len() {
        return Err(ExplainError::ShapeMismatch {
            expected: feature_names.len(),
            actual: contributions.len(),
            detail: format!(
                " (attribution vector covers {} features but metadata names {}; \
                 was the model explained on differently encoded features?)",
                contributions.len(),
                feature_names.len()
            ),
        });
    }
    if feature_values.len() != feature_names.len() {
        return Err(ExplainError::ShapeMismatch {
            expected: feature_names.len(),
            actual: feature_values.len(),
            detail: " (instance value count vs. feature metadata)".to_string(),
        });
    }

    let mut entries = Vec::with_capacity(feature_names.len());
    let mut excluded_features = BTreeSet::new();
    for (i, name) in feature_names.iter().enumerate() {
        if protected_attributes.contains(name) {
            excluded_features.insert(name.clone());
            continue;
        }
        entries.push(AttributionEntry {
            feature: name.clone(),
            contribution: contributions[i],
            value: feature_values[i],
        });
    }

    Ok(CanonicalAttribution {
        entries,
        excluded_features,
    })
}
