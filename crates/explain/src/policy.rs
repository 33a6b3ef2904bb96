//! Policy constraint model for recourse feasibility
//!
//! Represents the lender's recourse policy: which features an applicant
//! cannot change, which may only move in one direction, what a unit of
//! change costs, and hard value bounds. Violations are data attached to
//! candidates, never errors: "infeasible under current policy" is a
//! reportable outcome.

use crate::errors::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Allowed direction of change for a constrained feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonotonicDirection {
    IncreaseOnly,
    DecreaseOnly,
}

/// Recourse policy loaded from the audit configuration.
///
/// Maps are ordered so snapshots embedded in results serialize stably.
/// Advisory invariant (not enforced): a feature listed as immutable should
/// not also carry a monotonic constraint, since the constraint is
/// unreachable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyConstraints {
    #[serde(default)]
    pub immutable_features: BTreeSet<String>,
    #[serde(default)]
    pub monotonic_constraints: BTreeMap<String, MonotonicDirection>,
    /// Per-unit change cost; unlisted features cost 1.0 per unit.
    #[serde(default)]
    pub feature_costs: BTreeMap<String, f64>,
    /// Closed intervals `[min, max]` a proposed value must stay within.
    #[serde(default)]
    pub feature_bounds: BTreeMap<String, (f64, f64)>,
}

/// A single constraint violated by a proposed change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PolicyViolation {
    Immutable {
        feature: String,
    },
    Monotonic {
        feature: String,
        direction: MonotonicDirection,
    },
    OutOfBounds {
        feature: String,
        min: f64,
        max: f64,
        proposed: f64,
    },
}

impl PolicyConstraints {
    /// Parse the policy section of a YAML audit configuration.
    pub fn from_yaml_str(doc: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(doc)?)
    }

    pub fn is_mutable(&self, feature: &str) -> bool {
        !self.immutable_features.contains(feature)
    }

    pub fn cost_weight(&self, feature: &str) -> f64 {
        self.feature_costs.get(feature).copied().unwrap_or(1.0)
    }

    /// Check one feature's proposed change. `None` means allowed.
    pub fn check(&self, feature: &str, original: f64, proposed: f64) -> Option<PolicyViolation> {
        if proposed == original {
            return None;
        }
        if self.immutable_features.contains(feature) {
            return Some(PolicyViolation::Immutable {
                feature: feature.to_string(),
            });
        }
        if let Some(direction) = self.monotonic_constraints.get(feature) {
            let violated = match direction {
                MonotonicDirection::IncreaseOnly => proposed < original,
                MonotonicDirection::DecreaseOnly => proposed > original,
            };
            if violated {
                return Some(PolicyViolation::Monotonic {
                    feature: feature.to_string(),
                    direction: *direction,
                });
            }
        }
        if let Some(&(min, max)) = self.feature_bounds.get(feature) {
            if proposed < min || proposed > max {
                return Some(PolicyViolation::OutOfBounds {
                    feature: feature.to_string(),
                    min,
                    max,
                    proposed,
                });
            }
        }
        None
    }

    /// All violations of a proposed feature vector against the original.
    pub fn violations(
        &self,
        feature_names: &[String],
        original: &[f64],
        proposed: &[f64],
    ) -> Vec<PolicyViolation> {
        feature_names
            .iter()
            .zip(original.iter().zip(proposed))
            .filter_map(|(name, (&old, &new))| self.check(name, old, new))
            .collect()
    }

    pub fn is_feasible(&self, feature_names: &[String], original: &[f64], proposed: &[f64]) -> bool {
        self.violations(feature_names, original, proposed).is_empty()
    }

    /// Weighted L1 cost of a proposed change.
    ///
    /// Pure function of its inputs; identical candidates always receive
    /// identical costs, which deterministic ranking depends on.
    pub fn cost(&self, feature_names: &[String], original: &[f64], proposed: &[f64]) -> f64 {
        feature_names
            .iter()
            .zip(original.iter().zip(proposed))
            .filter(|(_, (&old, &new))| new != old)
            .map(|(name, (&old, &new))| self.cost_weight(name) * (new - old).abs())
            .sum()
    }
}
