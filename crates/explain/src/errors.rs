//! Error types for the explanation engine

use thiserror::Error;

/// Exit classification consumed by the CLI boundary.
///
/// Validation failures caused by caller input map to `User`; everything
/// else maps to `System`. The CLI turns these into distinct exit codes
/// without inspecting error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitClass {
    User,
    System,
}

/// Errors raised by the reason-code and recourse engine
#[derive(Error, Debug)]
pub enum ExplainError {
    /// Attribution vector length does not match the feature count
    #[error("attribution shape mismatch: expected {expected} features, got {actual}{detail}")]
    ShapeMismatch {
        expected: usize,
        actual: usize,
        detail: String,
    },

    /// Requested instance index is out of range for the dataset
    #[error("invalid instance index {index}: valid range is 0..{len}")]
    InvalidInstance { index: usize, len: usize },

    /// One or more determinism controls could not be applied
    #[error("determinism control failure ({failed}/{total} controls failed): {detail}")]
    DeterminismControl {
        failed: usize,
        total: usize,
        detail: String,
    },

    /// The underlying model's predict/predict_proba call failed
    #[error("model inference failed: {context}")]
    ModelInference { context: String },

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Policy/search configuration document could not be parsed
    #[error("config error: {0}")]
    Config(#[from] serde_yaml::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExplainError {
    /// Map an error kind to the exit class the CLI collaborator expects.
    pub fn exit_class(&self) -> ExitClass {
        match self {
            Self::ShapeMismatch { .. } | Self::InvalidInstance { .. } | Self::Config(_) => {
                ExitClass::User
            }
            Self::DeterminismControl { .. }
            | Self::ModelInference { .. }
            | Self::Serialization(_)
            | Self::Io(_) => ExitClass::System,
        }
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, ExplainError>;
