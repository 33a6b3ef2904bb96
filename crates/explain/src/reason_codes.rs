//! Reason-code extraction and adverse-action notice formatting
//!
//! Selects the top-N most harmful feature contributions for a decision and
//! packages them with the traceability fields (model hash, seed,
//! deterministic timestamp) a regulator-facing report embeds. Ordering is a
//! stable ascending sort on contribution, so equal contributions keep the
//! original feature order and repeated runs serialize byte-identically.

use crate::attribution::CanonicalAttribution;
use crate::canon;
use crate::determinism;
use crate::errors::Result;
use crate::types::Decision;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

/// One ranked adverse-action reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasonCode {
    /// 1-based dense rank, most harmful first
    pub rank: usize,
    pub feature: String,
    pub contribution: f64,
    pub feature_value: f64,
}

/// Reason-code extraction result consumed by the report boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasonCodeResult {
    pub instance_id: usize,
    pub prediction: f64,
    pub decision: Decision,
    pub reason_codes: Vec<ReasonCode>,
    pub excluded_features: BTreeSet<String>,
    pub timestamp: String,
    pub model_hash: String,
    pub seed: u64,
}

impl ReasonCodeResult {
    /// Canonical JSON for manifest/report embedding.
    pub fn to_json(&self) -> Result<String> {
        canon::to_canonical_json(self)
    }
}

/// Extract ranked reason codes from a canonical attribution.
///
/// Only negative contributions qualify as reasons; when nothing pushes
/// toward denial the result legitimately carries zero reason codes. `top_n`
/// larger than the candidate count returns all candidates.
pub fn extract(
    attribution: &CanonicalAttribution,
    instance_id: usize,
    prediction: f64,
    threshold: f64,
    top_n: usize,
    model_hash: &str,
    seed: u64,
) -> ReasonCodeResult {
    let decision = Decision::from_probability(prediction, threshold);

    let mut candidates: Vec<&crate::attribution::AttributionEntry> = attribution
        .entries
        .iter()
        .filter(|entry| entry.contribution < 0.0)
        .collect();
    // stable: equal contributions keep original feature order
    candidates.sort_by(|a, b| a.contribution.total_cmp(&b.contribution));

    let reason_codes: Vec<ReasonCode> = candidates
        .into_iter()
        .take(top_n)
        .enumerate()
        .map(|(i, entry)| ReasonCode {
            rank: i + 1,
            feature: entry.feature.clone(),
            contribution: entry.contribution,
            feature_value: entry.value,
        })
        .collect();

    debug!(
        instance_id,
        decision = decision.as_str(),
        reasons = reason_codes.len(),
        "extracted reason codes"
    );

    ReasonCodeResult {
        instance_id,
        prediction,
        decision,
        reason_codes,
        excluded_features: attribution.excluded_features.clone(),
        timestamp: determinism::resolve_timestamp(seed),
        model_hash: model_hash.to_string(),
        seed,
    }
}

/// Render an ECOA-style adverse-action notice.
///
/// Pure formatting over an extraction result; contains no randomness and no
/// clock reads, so the notice inherits the result's reproducibility.
pub fn format_notice(result: &ReasonCodeResult, organization: &str, contact_info: &str) -> String {
    let mut notice = String::new();
    notice.push_str("NOTICE OF ADVERSE ACTION\n");
    notice.push_str("========================\n\n");
    notice.push_str(&format!("From: {organization}\n"));
    notice.push_str(&format!("Date: {}\n", result.timestamp));
    notice.push_str(&format!("Application reference: {}\n\n", result.instance_id));

    match result.decision {
        Decision::Denied => {
            notice.push_str(
                "After careful consideration, we are unable to approve your application \
                 at this time.\n\n",
            );
            if result.reason_codes.is_empty() {
                notice.push_str("No individual factor was identified as adverse.\n\n");
            } else {
                notice.push_str("Principal reason(s) for this decision:\n");
                for code in &result.reason_codes {
                    notice.push_str(&format!(
                        "  {}. {}\n",
                        code.rank,
                        code.feature.to_uppercase().replace('_', " ")
                    ));
                }
                notice.push('\n');
            }
        }
        Decision::Approved => {
            notice.push_str("Your application has been approved.\n\n");
        }
    }

    notice.push_str(
        "Under the federal Equal Credit Opportunity Act, you have the right to a \
         statement of specific reasons for this decision. To obtain the statement, \
         or if you have any questions, please contact:\n",
    );
    notice.push_str(&format!("  {contact_info}\n\n"));
    notice.push_str(
        "The federal agency that administers compliance with this law concerning \
         this creditor is the Consumer Financial Protection Bureau.\n",
    );
    notice
}
