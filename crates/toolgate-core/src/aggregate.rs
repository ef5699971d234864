//! Aggregation of per-item verdicts and baseline/candidate comparison.
//!
//! Aggregates are derived data: always recomputed from the item results,
//! never the source of truth. Comparison uses a pooled two-proportion
//! z-test on per-rule pass rates.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::domain::rule::{ComparisonConfig, DesiredDirection};
use crate::domain::verdict::ItemResult;
use crate::obs;

// ---------------------------------------------------------------------------
// Pass-rate aggregation
// ---------------------------------------------------------------------------

/// Pass statistics for one rule across a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleAggregate {
    pub passed: usize,
    pub total: usize,
    pub pass_rate: f64,
    /// Mean of the scores reported by the grader, when any were.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean_score: Option<f64>,
    #[serde(default)]
    pub direction: DesiredDirection,
}

/// Per-rule pass rates across a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub per_rule: BTreeMap<String, RuleAggregate>,
    pub total_items: usize,
    /// Items excluded as malformed; never counted in any pass rate.
    pub quarantined_items: usize,
}

/// Combine item results into per-rule pass rates.
///
/// Rules listed in `directions` always appear, even with no verdicts.
pub fn aggregate(
    items: &[ItemResult],
    quarantined_items: usize,
    directions: &BTreeMap<String, DesiredDirection>,
) -> AggregateResult {
    #[derive(Default)]
    struct Tally {
        passed: usize,
        total: usize,
        score_sum: f64,
        scored: usize,
    }

    let mut tallies: BTreeMap<String, Tally> = directions
        .keys()
        .map(|name| (name.clone(), Tally::default()))
        .collect();

    for item in items {
        for (rule, verdict) in &item.verdicts {
            let tally = tallies.entry(rule.clone()).or_default();
            tally.total += 1;
            if verdict.passed {
                tally.passed += 1;
            }
            if let Some(score) = verdict.score {
                tally.score_sum += score;
                tally.scored += 1;
            }
        }
    }

    let per_rule = tallies
        .into_iter()
        .map(|(rule, t)| {
            let aggregate = RuleAggregate {
                passed: t.passed,
                total: t.total,
                pass_rate: if t.total == 0 {
                    0.0
                } else {
                    t.passed as f64 / t.total as f64
                },
                mean_score: (t.scored > 0).then(|| t.score_sum / t.scored as f64),
                direction: directions.get(&rule).copied().unwrap_or_default(),
            };
            (rule, aggregate)
        })
        .collect();

    AggregateResult {
        per_rule,
        total_items: items.len(),
        quarantined_items,
    }
}

// ---------------------------------------------------------------------------
// Significance
// ---------------------------------------------------------------------------

/// Ordinal classification of a baseline → candidate pass-rate change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Significance {
    ImprovedStrong,
    ImprovedWeak,
    DegradedStrong,
    DegradedWeak,
    ChangedStrong,
    ChangedWeak,
    Inconclusive,
}

impl Significance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ImprovedStrong => "improved_strong",
            Self::ImprovedWeak => "improved_weak",
            Self::DegradedStrong => "degraded_strong",
            Self::DegradedWeak => "degraded_weak",
            Self::ChangedStrong => "changed_strong",
            Self::ChangedWeak => "changed_weak",
            Self::Inconclusive => "inconclusive",
        }
    }
}

/// Complementary error function (Chebyshev fit, fractional error
/// below 1.2e-7).
pub fn erfc(x: f64) -> f64 {
    let z = x.abs();
    let t = 1.0 / (1.0 + 0.5 * z);
    let poly = -z * z - 1.265_512_23
        + t * (1.000_023_68
            + t * (0.374_091_96
                + t * (0.096_784_18
                    + t * (-0.186_288_06
                        + t * (0.278_868_07
                            + t * (-1.135_203_98
                                + t * (1.488_515_87 + t * (-0.822_152_23 + t * 0.170_872_77))))))));
    let ans = t * poly.exp();
    if x >= 0.0 {
        ans
    } else {
        2.0 - ans
    }
}

/// Pooled two-proportion z-test. Returns `(z, two-sided p)`, or `None`
/// when either side is empty.
pub fn two_proportion_test(
    baseline_passed: usize,
    baseline_total: usize,
    candidate_passed: usize,
    candidate_total: usize,
) -> Option<(f64, f64)> {
    if baseline_total == 0 || candidate_total == 0 {
        return None;
    }
    let n1 = baseline_total as f64;
    let n2 = candidate_total as f64;
    let p1 = baseline_passed as f64 / n1;
    let p2 = candidate_passed as f64 / n2;
    let pooled = (baseline_passed + candidate_passed) as f64 / (n1 + n2);
    let se = (pooled * (1.0 - pooled) * (1.0 / n1 + 1.0 / n2)).sqrt();

    // Pooled rate of 0 or 1 means both sides agree exactly.
    if se == 0.0 {
        return Some((0.0, 1.0));
    }
    let z = (p2 - p1) / se;
    let p = erfc(z.abs() / std::f64::consts::SQRT_2).clamp(0.0, 1.0);
    Some((z, p))
}

/// Bucket a pass-rate change by sample size, p-value and direction.
pub fn classify(
    config: &ComparisonConfig,
    direction: DesiredDirection,
    baseline_total: usize,
    candidate_total: usize,
    delta: f64,
    p_value: Option<f64>,
) -> Significance {
    if baseline_total < config.min_samples || candidate_total < config.min_samples {
        return Significance::Inconclusive;
    }
    let Some(p) = p_value else {
        return Significance::Inconclusive;
    };
    if p > config.weak_alpha || delta == 0.0 {
        return Significance::Inconclusive;
    }

    let strong = p <= config.strong_alpha;
    let improved = match direction {
        DesiredDirection::HigherIsBetter => Some(delta > 0.0),
        DesiredDirection::LowerIsBetter => Some(delta < 0.0),
        DesiredDirection::Neutral => None,
    };

    match (improved, strong) {
        (Some(true), true) => Significance::ImprovedStrong,
        (Some(true), false) => Significance::ImprovedWeak,
        (Some(false), true) => Significance::DegradedStrong,
        (Some(false), false) => Significance::DegradedWeak,
        (None, true) => Significance::ChangedStrong,
        (None, false) => Significance::ChangedWeak,
    }
}

/// One rule's baseline → candidate comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleComparison {
    pub rule: String,
    pub direction: DesiredDirection,
    pub baseline_pass_rate: f64,
    pub candidate_pass_rate: f64,
    pub baseline_total: usize,
    pub candidate_total: usize,
    /// Candidate minus baseline pass rate.
    pub delta: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p_value: Option<f64>,
    pub classification: Significance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub rules: Vec<RuleComparison>,
    /// Rules with results only in the baseline.
    pub baseline_only: Vec<String>,
    /// Rules with results only in the candidate.
    pub candidate_only: Vec<String>,
}

/// Compare two aggregates rule by rule.
///
/// The desired direction is taken from the candidate.
pub fn compare(
    baseline: &AggregateResult,
    candidate: &AggregateResult,
    config: &ComparisonConfig,
) -> ComparisonReport {
    let base_rules: BTreeSet<&String> = baseline.per_rule.keys().collect();
    let cand_rules: BTreeSet<&String> = candidate.per_rule.keys().collect();

    let mut rules = Vec::new();
    for name in base_rules.intersection(&cand_rules) {
        let (Some(b), Some(c)) = (baseline.per_rule.get(*name), candidate.per_rule.get(*name)) else {
            continue;
        };
        let test = two_proportion_test(b.passed, b.total, c.passed, c.total);
        let delta = c.pass_rate - b.pass_rate;
        let p_value = test.map(|(_, p)| p);
        let classification = classify(config, c.direction, b.total, c.total, delta, p_value);
        obs::emit_comparison_classified(name, classification.as_str(), p_value);

        rules.push(RuleComparison {
            rule: (*name).clone(),
            direction: c.direction,
            baseline_pass_rate: b.pass_rate,
            candidate_pass_rate: c.pass_rate,
            baseline_total: b.total,
            candidate_total: c.total,
            delta,
            z: test.map(|(z, _)| z),
            p_value,
            classification,
        });
    }

    ComparisonReport {
        rules,
        baseline_only: base_rules.difference(&cand_rules).map(|s| (*s).clone()).collect(),
        candidate_only: cand_rules.difference(&base_rules).map(|s| (*s).clone()).collect(),
    }
}
