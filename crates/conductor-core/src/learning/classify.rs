//! Outcome classification and outcome-to-pattern similarity.

use super::{keys, LearningConfig, Outcome};
use crate::planner::text::{jaccard, meaningful_words};
use conductor_memory::MemoryRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const WORD_WEIGHT: f64 = 0.5;
const TAG_WEIGHT: f64 = 0.3;
const DURATION_WEIGHT: f64 = 0.2;

/// Kind of lesson an outcome teaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    /// Succeeded the expected way
    Success,
    /// Failed with no established pattern to compare against
    Failure,
    /// Finished in at most half the estimated time
    Efficiency,
    /// Failed where a reliable pattern says it should have worked
    Regression,
    /// Succeeded with no similar pattern on record
    NovelApproach,
    /// Succeeded with several roles involved
    Collaboration,
}

impl PatternType {
    /// Stable snake_case name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Efficiency => "efficiency",
            Self::Regression => "regression",
            Self::NovelApproach => "novel_approach",
            Self::Collaboration => "collaboration",
        }
    }
}

impl std::fmt::Display for PatternType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify `outcome` given the closest pattern at or above the cluster
/// threshold, if any.
pub fn classify(outcome: &Outcome, matching: Option<&MemoryRecord>, config: &LearningConfig) -> PatternType {
    if !outcome.succeeded {
        return match matching {
            Some(pattern) if pattern.score >= config.regression_score => PatternType::Regression,
            _ => PatternType::Failure,
        };
    }

    let efficient = outcome.estimated_ms.is_some_and(|estimate| {
        estimate > 0 && (outcome.duration_ms as f64) <= estimate as f64 * config.efficiency_ratio
    });
    if efficient {
        PatternType::Efficiency
    } else if outcome.roles.len() >= config.collaboration_roles {
        PatternType::Collaboration
    } else if matching.is_none() {
        PatternType::NovelApproach
    } else {
        PatternType::Success
    }
}

/// Word overlap 0.5, tag overlap 0.3, duration ratio 0.2.
pub fn outcome_similarity(outcome: &Outcome, pattern: &MemoryRecord) -> f64 {
    let words = jaccard(
        &meaningful_words(&outcome.description),
        &meaningful_words(&pattern.title),
    );

    let pattern_tags: BTreeSet<String> = pattern
        .tags
        .iter()
        .filter(|t| !keys::SYSTEM_TAGS.contains(&t.as_str()))
        .cloned()
        .collect();
    let tags = if outcome.tags.is_empty() && pattern_tags.is_empty() {
        1.0
    } else {
        jaccard(&outcome.tags, &pattern_tags)
    };

    let duration = ratio(outcome.duration_ms, pattern.counter(keys::DURATION_MS));

    words * WORD_WEIGHT + tags * TAG_WEIGHT + duration * DURATION_WEIGHT
}

/// `min / max`, with two zeros counting as identical.
pub(crate) fn ratio(a: u64, b: u64) -> f64 {
    match (a, b) {
        (0, 0) => 1.0,
        (0, _) | (_, 0) => 0.0,
        (a, b) => a.min(b) as f64 / a.max(b) as f64,
    }
}
