//! Cross-module scenario tests
//!
//! End-to-end runs of the attribution -> reason-code and attribution ->
//! recourse paths inside a determinism scope, checking the byte-identical
//! guarantee the per-module tests only cover in isolation.

use crate::attribution::{normalize, RawAttribution};
use crate::determinism::{DeterminismScope, ENV_TEST_LOCK};
use crate::model::{LogisticModel, TabularModel};
use crate::policy::PolicyConstraints;
use crate::reason_codes;
use crate::recourse::{self, RecourseRequest, SearchParams};
use crate::types::Decision;
use std::collections::BTreeSet;

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

struct Applicant {
    feature_names: Vec<String>,
    values: Vec<f64>,
    protected: BTreeSet<String>,
    model: LogisticModel,
}

/// A denied credit applicant with one protected attribute.
fn denied_applicant() -> Applicant {
    let feature_names = names(&["gender", "income", "debt_ratio", "savings"]);
    let model = LogisticModel::new(
        feature_names.clone(),
        vec![0.1, 2.5, -2.0, 1.0],
        -0.8,
    )
    .unwrap();
    Applicant {
        feature_names,
        values: vec![1.0, 0.2, 0.7, 0.1],
        protected: ["gender".to_string()].into_iter().collect(),
        model,
    }
}

fn audit_json(applicant: &Applicant, seed: u64) -> (String, String) {
    let _scope = DeterminismScope::enter(seed, true).unwrap();

    let prediction = applicant.model.predict_proba(&applicant.values).unwrap();
    assert!(prediction < 0.5, "fixture applicant must be denied");

    let baseline = vec![0.0; applicant.values.len()];
    let raw = RawAttribution::Single(
        applicant
            .model
            .coefficient_attributions(&applicant.values, &baseline)
            .unwrap(),
    );
    let attribution = normalize(
        &raw,
        &applicant.feature_names,
        &applicant.values,
        &applicant.protected,
    )
    .unwrap();

    let model_hash = applicant.model.hash_hex().unwrap();
    let reasons = reason_codes::extract(&attribution, 0, prediction, 0.5, 3, &model_hash, seed);

    let request = RecourseRequest {
        instance_id: 0,
        original_values: &applicant.values,
        feature_names: &applicant.feature_names,
        original_prediction: prediction,
        threshold: 0.5,
        top_n: 3,
        seed,
    };
    let recourse_result = recourse::generate(
        &applicant.model,
        &request,
        &attribution,
        &PolicyConstraints::default(),
        &SearchParams::default(),
    )
    .unwrap();

    (
        reasons.to_json().unwrap(),
        recourse_result.to_json().unwrap(),
    )
}

#[test]
fn test_full_audit_path_is_byte_identical() {
    let _guard = ENV_TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let applicant = denied_applicant();
    let (reasons_a, recourse_a) = audit_json(&applicant, 42);
    let (reasons_b, recourse_b) = audit_json(&applicant, 42);
    assert_eq!(reasons_a, reasons_b);
    assert_eq!(recourse_a, recourse_b);
}

#[test]
fn test_seed_is_embedded_and_changes_timestamp_only() {
    let _guard = ENV_TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let applicant = denied_applicant();
    let (reasons_a, _) = audit_json(&applicant, 42);
    let (reasons_b, _) = audit_json(&applicant, 43);
    assert_ne!(reasons_a, reasons_b);

    let a: crate::reason_codes::ReasonCodeResult = serde_json::from_str(&reasons_a).unwrap();
    let b: crate::reason_codes::ReasonCodeResult = serde_json::from_str(&reasons_b).unwrap();
    assert_eq!(a.reason_codes, b.reason_codes);
    assert_ne!(a.timestamp, b.timestamp);
    assert_eq!(a.seed, 42);
    assert_eq!(b.seed, 43);
}

#[test]
fn test_protected_attribute_never_cited_anywhere() {
    let _guard = ENV_TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let applicant = denied_applicant();
    let (reasons, recourse_json) = audit_json(&applicant, 42);

    let reasons: crate::reason_codes::ReasonCodeResult = serde_json::from_str(&reasons).unwrap();
    assert!(reasons.reason_codes.iter().all(|c| c.feature != "gender"));
    assert!(reasons.excluded_features.contains("gender"));

    let recourse_result: crate::recourse::RecourseResult =
        serde_json::from_str(&recourse_json).unwrap();
    for candidate in &recourse_result.recommendations {
        assert!(!candidate.feature_changes.contains_key("gender"));
    }
}

#[test]
fn test_denied_applicant_gets_reasons_and_recourse() {
    let _guard = ENV_TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let applicant = denied_applicant();
    let (reasons_json, recourse_json) = audit_json(&applicant, 42);

    let reasons: crate::reason_codes::ReasonCodeResult =
        serde_json::from_str(&reasons_json).unwrap();
    assert_eq!(reasons.decision, Decision::Denied);
    assert!(!reasons.reason_codes.is_empty());
    // the heaviest drag on this applicant is the debt ratio
    assert_eq!(reasons.reason_codes[0].feature, "debt_ratio");

    let recourse_result: crate::recourse::RecourseResult =
        serde_json::from_str(&recourse_json).unwrap();
    assert!(recourse_result.feasible_candidates > 0);
    assert!(!recourse_result.recommendations.is_empty());

    let notice = reason_codes::format_notice(&reasons, "Acme Lending", "1-800-555-0100");
    assert!(notice.contains("DEBT RATIO"));
}

#[test]
fn test_notice_is_reproducible() {
    let _guard = ENV_TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let applicant = denied_applicant();

    let render = || {
        let (reasons_json, _) = audit_json(&applicant, 42);
        let reasons: crate::reason_codes::ReasonCodeResult =
            serde_json::from_str(&reasons_json).unwrap();
        reason_codes::format_notice(&reasons, "Acme Lending", "1-800-555-0100")
    };
    assert_eq!(render(), render());
}
