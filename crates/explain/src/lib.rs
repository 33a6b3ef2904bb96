//! Deterministic explanation engine for tabular classifier audits
//!
//! Computes ECOA-style reason codes from feature attributions and searches
//! for policy-feasible counterfactual recourse, with a determinism layer
//! that makes both byte-identical across runs, platforms, and report
//! formats. That property is what lets generated reports serve as
//! regulatory evidence.
//!
//! Modules:
//! - `determinism`: Scoped seeding, thread pinning, and timestamp control
//! - `attribution`: Raw attribution shapes normalized to a canonical form
//! - `reason_codes`: Top-N adverse reasons and the adverse-action notice
//! - `policy`: Immutability, monotonicity, bounds, and change costs
//! - `recourse`: Bounded deterministic counterfactual search
//! - `model`: Capability-checked scoring interface over the audited model
//! - `canon`: Canonical JSON and BLAKE3 digests for results and files
//! - `types`: Decision classification and boundary validation
//! - `errors`: Error taxonomy with CLI exit-class mapping

pub mod attribution;
pub mod canon;
pub mod determinism;
pub mod errors;
pub mod model;
pub mod policy;
pub mod reason_codes;
pub mod recourse;
pub mod types;

#[cfg(test)]
mod tests;

pub use attribution::{normalize, AttributionEntry, CanonicalAttribution, RawAttribution};
pub use canon::{canonical_digest_hex, to_canonical_json, verify_identical_outputs};
pub use determinism::{
    default_controls, resolve_timestamp, Control, ControlReport, DeterminismScope, ScopeOptions,
};
pub use errors::{ExitClass, ExplainError, Result};
pub use model::{LogisticModel, ScoreKind, Scorer, TabularModel};
pub use policy::{MonotonicDirection, PolicyConstraints, PolicyViolation};
pub use reason_codes::{extract, format_notice, ReasonCode, ReasonCodeResult};
pub use recourse::{
    generate, CounterfactualCandidate, RecourseRequest, RecourseResult, SearchParams,
};
pub use types::{check_instance_index, Decision};

/// Crate version string for manifests and validation reports
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
