//! Common data structures shared across the engine

use crate::errors::{ExplainError, Result};
use serde::{Deserialize, Serialize};

/// Binary audit decision in an "approve is positive" framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approved,
    Denied,
}

impl Decision {
    /// Classify a prediction against the decision threshold.
    ///
    /// A probability exactly equal to the threshold counts as approved; the
    /// recourse search uses the same `>=` rule when testing candidates.
    pub fn from_probability(prediction: f64, threshold: f64) -> Self {
        if prediction < threshold {
            Self::Denied
        } else {
            Self::Approved
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Denied => "denied",
        }
    }
}

/// Validate a requested instance index against the dataset length.
pub fn check_instance_index(index: usize, len: usize) -> Result<()> {
    if index >= len {
        return Err(ExplainError::InvalidInstance { index, len });
    }
    Ok(())
}
