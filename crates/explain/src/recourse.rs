//! Counterfactual recourse search
//!
//! Bounded local search over feature-change candidates that flip a denied
//! prediction to approved. The search space over continuous features is
//! unbounded, so this is not an enumeration: candidates come from a fixed,
//! documented set of fractional steps on the most harmful features, plus
//! combinations over the top levers. Candidate generation order is fully
//! deterministic and doubles as the tie-break for equal-cost ranking, so
//! identical inputs always serialize byte-identically.
//!
//! The caller decides whether to invoke this at all: an already-approved
//! instance needs no recourse, and that check happens at the boundary.

use crate::attribution::{AttributionEntry, CanonicalAttribution};
use crate::canon;
use crate::errors::{ExplainError, Result};
use crate::model::{Scorer, TabularModel};
use crate::policy::{MonotonicDirection, PolicyConstraints};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Tunable bounds of the candidate generator.
///
/// These are audited policy, not incidental magic numbers: changing any of
/// them changes which recommendations are found, so the defaults are pinned
/// by a test and recorded alongside results via the constraints snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchParams {
    /// Fractional step sizes applied to a feature's magnitude, ascending.
    pub step_fractions: Vec<f64>,
    /// How many top levers participate in multi-feature combinations.
    pub combination_top_k: usize,
    /// Largest combination size generated (2 = pairs, 3 = triples).
    pub max_combination_size: usize,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            step_fractions: vec![0.05, 0.10, 0.25, 0.50],
            combination_top_k: 3,
            max_combination_size: 3,
        }
    }
}

/// One proposed feature-change vector with its evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterfactualCandidate {
    /// feature -> (old value, new value)
    pub feature_changes: BTreeMap<String, (f64, f64)>,
    pub total_cost: f64,
    pub predicted_probability: f64,
    /// True iff the probability crosses the threshold in the approving
    /// direction and every policy constraint holds.
    pub feasible: bool,
}

/// Recourse search result consumed by the report boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecourseResult {
    pub instance_id: usize,
    pub original_prediction: f64,
    pub threshold: f64,
    /// Feasible candidates, ascending cost, at most `top_n`.
    pub recommendations: Vec<CounterfactualCandidate>,
    /// Policy snapshot the search ran under.
    pub policy_constraints: PolicyConstraints,
    pub seed: u64,
    pub total_candidates: usize,
    pub feasible_candidates: usize,
}

impl RecourseResult {
    /// Canonical JSON for manifest/report embedding.
    pub fn to_json(&self) -> Result<String> {
        canon::to_canonical_json(self)
    }
}

/// Inputs for one recourse search.
#[derive(Debug, Clone, Copy)]
pub struct RecourseRequest<'a> {
    pub instance_id: usize,
    pub original_values: &'a [f64],
    pub feature_names: &'a [String],
    pub original_prediction: f64,
    pub threshold: f64,
    pub top_n: usize,
    pub seed: u64,
}

/// One lever: a feature position with its change directions, helpful
/// direction first.
struct Lever {
    feature: String,
    index: usize,
    directions: Vec<f64>,
}

/// Directions to try for a feature, most promising first.
///
/// A monotonic constraint fixes the direction outright. Otherwise the
/// helpful direction is implied by the attribution sign relative to the
/// value: a harmful (negative-contribution) feature with a positive value is
/// helped by decreasing it, one with a negative value by increasing it. The
/// opposite direction is still generated second, since the implication is a
/// heuristic, not a guarantee.
fn lever_directions(
    constraints: &PolicyConstraints,
    feature: &str,
    contribution: f64,
    value: f64,
) -> Vec<f64> {
    match constraints.monotonic_constraints.get(feature) {
        Some(MonotonicDirection::IncreaseOnly) => vec![1.0],
        Some(MonotonicDirection::DecreaseOnly) => vec![-1.0],
        None => {
            let implied = contribution * value;
            if implied < 0.0 {
                vec![-1.0, 1.0]
            } else {
                vec![1.0, -1.0]
            }
        }
    }
}

/// Step magnitude for a feature value. Zero-valued features step on a unit
/// magnitude so they are not stuck at zero.
fn step_delta(original: f64, fraction: f64) -> f64 {
    fraction * original.abs().max(1.0)
}

fn clamp_to_bounds(constraints: &PolicyConstraints, feature: &str, proposed: f64) -> f64 {
    match constraints.feature_bounds.get(feature) {
        Some(&(min, max)) => proposed.clamp(min, max),
        None => proposed,
    }
}

/// Lexicographic index combinations of `size` out of `n`.
fn combinations(n: usize, size: usize) -> Vec<Vec<usize>> {
    let mut out = Vec::new();
    let mut current = Vec::with_capacity(size);
    fn recurse(start: usize, n: usize, size: usize, current: &mut Vec<usize>, out: &mut Vec<Vec<usize>>) {
        if current.len() == size {
            out.push(current.clone());
            return;
        }
        for i in start..n {
            current.push(i);
            recurse(i + 1, n, size, current, out);
            current.pop();
        }
    }
    recurse(0, n, size, &mut current, &mut out);
    out
}

/// Rank levers most harmful first: mutable features lead, features the
/// policy freezes trail. Frozen features still generate candidates so the
/// result can report how many proposals the policy rejected.
fn rank_levers(
    attribution: &CanonicalAttribution,
    feature_names: &[String],
    constraints: &PolicyConstraints,
) -> Result<(Vec<Lever>, usize)> {
    let index: BTreeMap<&str, usize> = feature_names
        .iter()
        .enumerate()
        .map(|(i, name)| (name.as_str(), i))
        .collect();

    let mut mutable: Vec<&AttributionEntry> = Vec::new();
    let mut frozen: Vec<&AttributionEntry> = Vec::new();
    for entry in &attribution.entries {
        if constraints.is_mutable(&entry.feature) {
            mutable.push(entry);
        } else {
            frozen.push(entry);
        }
    }
    // stable: equal contributions keep original feature order
    mutable.sort_by(|a, b| a.contribution.total_cmp(&b.contribution));
    frozen.sort_by(|a, b| a.contribution.total_cmp(&b.contribution));

    let mutable_count = mutable.len();
    let mut levers = Vec::with_capacity(mutable_count + frozen.len());
    for entry in mutable.into_iter().chain(frozen) {
        let position = *index.get(entry.feature.as_str()).ok_or_else(|| {
            ExplainError::ShapeMismatch {
                expected: feature_names.len(),
                actual: attribution.entries.len(),
                detail: format!(
                    " (attribution names feature {:?} which is absent from the model's feature order)",
                    entry.feature
                ),
            }
        })?;
        levers.push(Lever {
            feature: entry.feature.clone(),
            index: position,
            directions: lever_directions(
                constraints,
                &entry.feature,
                entry.contribution,
                entry.value,
            ),
        });
    }
    Ok((levers, mutable_count))
}

/// Generate, evaluate, and rank counterfactual recourse candidates.
pub fn generate(
    model: &dyn TabularModel,
    request: &RecourseRequest<'_>,
    attribution: &CanonicalAttribution,
    constraints: &PolicyConstraints,
    params: &SearchParams,
) -> Result<RecourseResult> {
    if request.original_values.len() != request.feature_names.len() {
        return Err(ExplainError::ShapeMismatch {
            expected: request.feature_names.len(),
            actual: request.original_values.len(),
            detail: " (instance value count vs. feature metadata)".to_string(),
        });
    }

    let scorer = Scorer::resolve(model);
    let (levers, mutable_count) = rank_levers(attribution, request.feature_names, constraints)?;

    // Proposals as (feature position, new value) change lists, in a fixed
    // generation order that later doubles as the equal-cost tie-break.
    let mut proposals: Vec<Vec<(usize, f64)>> = Vec::new();

    // Single-feature candidates: every lever, each allowed direction, each
    // fraction ascending. Bound-clamped no-ops and repeats are skipped.
    for lever in &levers {
        let original = request.original_values[lever.index];
        for &direction in &lever.directions {
            let mut last_proposed = original;
            for &fraction in &params.step_fractions {
                let proposed = clamp_to_bounds(
                    constraints,
                    &lever.feature,
                    original + direction * step_delta(original, fraction),
                );
                if proposed == original || proposed == last_proposed {
                    continue;
                }
                last_proposed = proposed;
                proposals.push(vec![(lever.index, proposed)]);
            }
        }
    }

    // Multi-feature candidates: pairs and triples over the top-K mutable
    // levers, each member stepped in its most promising direction.
    let top: Vec<&Lever> = levers
        .iter()
        .take(params.combination_top_k.min(mutable_count))
        .collect();
    let deepest = params.max_combination_size.min(top.len());
    for size in 2..=deepest {
        for combo in combinations(top.len(), size) {
            for &fraction in &params.step_fractions {
                let mut changes = Vec::with_capacity(size);
                for &slot in &combo {
                    let lever = top[slot];
                    let original = request.original_values[lever.index];
                    let direction = lever.directions[0];
                    let proposed = clamp_to_bounds(
                        constraints,
                        &lever.feature,
                        original + direction * step_delta(original, fraction),
                    );
                    if proposed == original {
                        break;
                    }
                    changes.push((lever.index, proposed));
                }
                // partial combos would duplicate smaller candidates
                if changes.len() == size {
                    proposals.push(changes);
                }
            }
        }
    }

    let mut candidates = Vec::with_capacity(proposals.len());
    for changes in &proposals {
        let mut proposed_values = request.original_values.to_vec();
        for &(position, value) in changes {
            proposed_values[position] = value;
        }

        let predicted_probability = scorer.score(&proposed_values).map_err(|source| {
            let changed: Vec<&str> = changes
                .iter()
                .map(|&(position, _)| request.feature_names[position].as_str())
                .collect();
            ExplainError::ModelInference {
                context: format!(
                    "instance {} candidate changing [{}]: {source}",
                    request.instance_id,
                    changed.join(", ")
                ),
            }
        })?;

        let feasible = constraints.is_feasible(
            request.feature_names,
            request.original_values,
            &proposed_values,
        ) && predicted_probability >= request.threshold;

        let feature_changes: BTreeMap<String, (f64, f64)> = changes
            .iter()
            .map(|&(position, value)| {
                (
                    request.feature_names[position].clone(),
                    (request.original_values[position], value),
                )
            })
            .collect();

        candidates.push(CounterfactualCandidate {
            feature_changes,
            total_cost: constraints.cost(
                request.feature_names,
                request.original_values,
                &proposed_values,
            ),
            predicted_probability,
            feasible,
        });
    }

    let total_candidates = candidates.len();
    let mut recommendations: Vec<CounterfactualCandidate> =
        candidates.into_iter().filter(|c| c.feasible).collect();
    let feasible_candidates = recommendations.len();
    // stable: equal costs keep generation order
    recommendations.sort_by(|a, b| a.total_cost.total_cmp(&b.total_cost));
    recommendations.truncate(request.top_n);

    debug!(
        instance_id = request.instance_id,
        total_candidates,
        feasible_candidates,
        returned = recommendations.len(),
        "recourse search complete"
    );

    Ok(RecourseResult {
        instance_id: request.instance_id,
        original_prediction: request.original_prediction,
        threshold: request.threshold,
        recommendations,
        policy_constraints: constraints.clone(),
        seed: request.seed,
        total_candidates,
        feasible_candidates,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribution::{normalize, RawAttribution};
    use crate::model::LogisticModel;
    use std::collections::BTreeSet;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn canonical(
        contributions: Vec<f64>,
        feature_names: &[String],
        values: &[f64],
    ) -> CanonicalAttribution {
        normalize(
            &RawAttribution::Single(contributions),
            feature_names,
            values,
            &BTreeSet::new(),
        )
        .unwrap()
    }

    fn request<'a>(
        feature_names: &'a [String],
        values: &'a [f64],
        prediction: f64,
    ) -> RecourseRequest<'a> {
        RecourseRequest {
            instance_id: 0,
            original_values: values,
            feature_names,
            original_prediction: prediction,
            threshold: 0.5,
            top_n: 5,
            seed: 42,
        }
    }

    #[test]
    fn test_default_search_params_pinned() {
        let params = SearchParams::default();
        assert_eq!(params.step_fractions, vec![0.05, 0.10, 0.25, 0.50]);
        assert_eq!(params.combination_top_k, 3);
        assert_eq!(params.max_combination_size, 3);
    }

    #[test]
    fn test_combinations_lexicographic() {
        assert_eq!(combinations(3, 2), vec![vec![0, 1], vec![0, 2], vec![1, 2]]);
        assert_eq!(combinations(3, 3), vec![vec![0, 1, 2]]);
    }

    #[test]
    fn test_single_feature_recourse_found() {
        let feature_names = names(&["income"]);
        let model = LogisticModel::new(feature_names.clone(), vec![3.0], -1.5).unwrap();
        let values = [0.0];
        let prediction = model.predict_proba(&values).unwrap();
        assert!(prediction < 0.5);

        let attribution = canonical(vec![-0.4], &feature_names, &values);
        let result = generate(
            &model,
            &request(&feature_names, &values, prediction),
            &attribution,
            &PolicyConstraints::default(),
            &SearchParams::default(),
        )
        .unwrap();

        assert!(!result.recommendations.is_empty());
        let best = &result.recommendations[0];
        let (old, new) = best.feature_changes["income"];
        assert_eq!(old, 0.0);
        assert!(new > 0.0);
        assert!(best.feasible);
        assert!(best.predicted_probability >= 0.5);
    }

    #[test]
    fn test_recommendations_sorted_by_cost_and_feasible() {
        let feature_names = names(&["income", "savings"]);
        let model = LogisticModel::new(feature_names.clone(), vec![4.0, 4.0], -0.5).unwrap();
        let values = [0.0, 0.0];
        let prediction = model.predict_proba(&values).unwrap();
        assert!(prediction < 0.5);

        let attribution = canonical(vec![-0.4, -0.3], &feature_names, &values);
        let result = generate(
            &model,
            &request(&feature_names, &values, prediction),
            &attribution,
            &PolicyConstraints::default(),
            &SearchParams::default(),
        )
        .unwrap();

        assert!(result.feasible_candidates > 0);
        for pair in result.recommendations.windows(2) {
            assert!(pair[0].total_cost <= pair[1].total_cost);
        }
        for recommendation in &result.recommendations {
            assert!(recommendation.feasible);
            assert!(recommendation.predicted_probability >= result.threshold);
        }
    }

    #[test]
    fn test_combined_changes_when_no_single_lever_suffices() {
        let feature_names = names(&["income", "savings"]);
        let model = LogisticModel::new(feature_names.clone(), vec![2.0, 2.0], -1.9).unwrap();
        let values = [0.0, 0.0];
        let prediction = model.predict_proba(&values).unwrap();

        let attribution = canonical(vec![-0.4, -0.3], &feature_names, &values);
        let result = generate(
            &model,
            &request(&feature_names, &values, prediction),
            &attribution,
            &PolicyConstraints::default(),
            &SearchParams::default(),
        )
        .unwrap();

        // only the pair at the largest step crosses the threshold
        assert!(result.feasible_candidates > 0);
        assert_eq!(result.recommendations[0].feature_changes.len(), 2);
    }

    #[test]
    fn test_all_features_immutable_yields_empty_recommendations() {
        let feature_names = names(&["income", "savings"]);
        let model = LogisticModel::new(feature_names.clone(), vec![3.0, 3.0], -1.5).unwrap();
        let values = [0.0, 0.0];
        let prediction = model.predict_proba(&values).unwrap();

        let mut constraints = PolicyConstraints::default();
        constraints.immutable_features.insert("income".to_string());
        constraints.immutable_features.insert("savings".to_string());

        let attribution = canonical(vec![-0.4, -0.3], &feature_names, &values);
        let result = generate(
            &model,
            &request(&feature_names, &values, prediction),
            &attribution,
            &constraints,
            &SearchParams::default(),
        )
        .unwrap();

        assert!(result.total_candidates > 0);
        assert_eq!(result.feasible_candidates, 0);
        assert!(result.recommendations.is_empty());
    }

    #[test]
    fn test_monotonic_constraint_restricts_direction() {
        let feature_names = names(&["debt"]);
        // lowering debt raises approval probability
        let model = LogisticModel::new(feature_names.clone(), vec![-3.0], 1.5).unwrap();
        let values = [1.0];
        let prediction = model.predict_proba(&values).unwrap();
        assert!(prediction < 0.5);

        let mut constraints = PolicyConstraints::default();
        constraints
            .monotonic_constraints
            .insert("debt".to_string(), MonotonicDirection::DecreaseOnly);

        let attribution = canonical(vec![-0.6], &feature_names, &values);
        let result = generate(
            &model,
            &request(&feature_names, &values, prediction),
            &attribution,
            &constraints,
            &SearchParams::default(),
        )
        .unwrap();

        for candidate in &result.recommendations {
            let (old, new) = candidate.feature_changes["debt"];
            assert!(new < old);
        }
        assert!(result.feasible_candidates > 0);
    }

    #[test]
    fn test_bounds_clamp_candidate_values() {
        let feature_names = names(&["debt_ratio"]);
        let model = LogisticModel::new(feature_names.clone(), vec![-5.0], 2.0).unwrap();
        let values = [0.9];
        let prediction = model.predict_proba(&values).unwrap();

        let mut constraints = PolicyConstraints::default();
        constraints
            .feature_bounds
            .insert("debt_ratio".to_string(), (0.0, 1.0));

        let attribution = canonical(vec![-0.6], &feature_names, &values);
        let result = generate(
            &model,
            &request(&feature_names, &values, prediction),
            &attribution,
            &constraints,
            &SearchParams::default(),
        )
        .unwrap();

        assert!(result.feasible_candidates > 0);
        for candidate in &result.recommendations {
            let (_, new) = candidate.feature_changes["debt_ratio"];
            assert!((0.0..=1.0).contains(&new));
        }
    }

    #[test]
    fn test_protected_attributes_never_become_levers() {
        let feature_names = names(&["gender", "income"]);
        let model = LogisticModel::new(feature_names.clone(), vec![0.5, 3.0], -1.5).unwrap();
        let values = [1.0, 0.0];
        let prediction = model.predict_proba(&values).unwrap();

        let protected: BTreeSet<String> = ["gender".to_string()].into_iter().collect();
        let attribution = normalize(
            &RawAttribution::Single(vec![-0.2, -0.4]),
            &feature_names,
            &values,
            &protected,
        )
        .unwrap();

        let result = generate(
            &model,
            &request(&feature_names, &values, prediction),
            &attribution,
            &PolicyConstraints::default(),
            &SearchParams::default(),
        )
        .unwrap();

        assert!(result.total_candidates > 0);
        for candidate in &result.recommendations {
            assert!(!candidate.feature_changes.contains_key("gender"));
        }
    }

    #[test]
    fn test_search_is_byte_identical() {
        let feature_names = names(&["income", "savings"]);
        let model = LogisticModel::new(feature_names.clone(), vec![3.0, 1.0], -1.5).unwrap();
        let values = [0.0, 0.2];
        let prediction = model.predict_proba(&values).unwrap();
        let attribution = canonical(vec![-0.4, -0.1], &feature_names, &values);

        let run = || {
            generate(
                &model,
                &request(&feature_names, &values, prediction),
                &attribution,
                &PolicyConstraints::default(),
                &SearchParams::default(),
            )
            .unwrap()
            .to_json()
            .unwrap()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_model_failure_aborts_search() {
        struct BrokenModel;
        impl TabularModel for BrokenModel {
            fn n_features(&self) -> usize {
                1
            }
            fn supports_probability(&self) -> bool {
                true
            }
            fn predict(&self, _values: &[f64]) -> crate::errors::Result<f64> {
                Err(ExplainError::ShapeMismatch {
                    expected: 12,
                    actual: 1,
                    detail: String::new(),
                })
            }
            fn predict_proba(&self, _values: &[f64]) -> crate::errors::Result<f64> {
                self.predict(_values)
            }
        }

        let feature_names = names(&["income"]);
        let values = [0.0];
        let attribution = canonical(vec![-0.4], &feature_names, &values);

        let err = generate(
            &BrokenModel,
            &request(&feature_names, &values, 0.2),
            &attribution,
            &PolicyConstraints::default(),
            &SearchParams::default(),
        )
        .unwrap_err();

        match err {
            ExplainError::ModelInference { context } => {
                assert!(context.contains("income"));
                assert!(context.contains("12"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_json_round_trip_idempotent() {
        let feature_names = names(&["income"]);
        let model = LogisticModel::new(feature_names.clone(), vec![3.0], -1.5).unwrap();
        let values = [0.0];
        let prediction = model.predict_proba(&values).unwrap();
        let attribution = canonical(vec![-0.4], &feature_names, &values);

        let result = generate(
            &model,
            &request(&feature_names, &values, prediction),
            &attribution,
            &PolicyConstraints::default(),
            &SearchParams::default(),
        )
        .unwrap();

        let json = result.to_json().unwrap();
        let parsed: RecourseResult = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.to_json().unwrap(), json);
    }
}
