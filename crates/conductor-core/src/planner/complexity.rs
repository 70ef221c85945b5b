//! Complexity estimation from weighted factors.

use super::similarity::SimilarTask;
use crate::task::Complexity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const KEYWORD_WEIGHT: f64 = 0.2;
const SCOPE_WEIGHT: f64 = 0.15;
const HISTORY_WEIGHT: f64 = 0.3;

/// Words that signal ordering between pieces of work.
pub const DEPENDENCY_MARKERS: &[&str] = &["after", "then", "depends", "requires", "integrate"];

/// Indicator phrases per level.
#[must_use]
pub fn complexity_keywords(level: Complexity) -> &'static [&'static str] {
    match level {
        Complexity::Trivial => &["fix typo", "update text", "change color", "simple update"],
        Complexity::Simple => &["add button", "update function", "simple feature", "minor change"],
        Complexity::Medium => &[
            "implement feature", "create component", "add integration", "refactor",
        ],
        Complexity::Complex => &[
            "design system", "architecture", "multi-service", "complex feature",
        ],
        Complexity::Epic => &["platform", "migration", "complete rewrite", "major overhaul"],
    }
}

/// Planner confidence in each level's estimates.
#[must_use]
pub fn level_confidence(level: Complexity) -> f64 {
    match level {
        Complexity::Trivial => 0.9,
        Complexity::Simple => 0.8,
        Complexity::Medium => 0.7,
        Complexity::Complex => 0.6,
        Complexity::Epic => 0.5,
    }
}

/// Result of [`estimate_complexity`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplexityEstimate {
    /// Chosen level
    pub level: Complexity,
    /// Score per level
    pub scores: BTreeMap<Complexity, f64>,
    /// Number of indicator phrases matched
    pub keyword_hits: usize,
    /// Human-readable factors that contributed
    pub factors: Vec<String>,
}

/// Estimate complexity from keyword hits, scope size, dependency markers and
/// the complexity most common among similar tasks.
///
/// Ties resolve to the smaller level.
pub fn estimate_complexity(
    text_lower: &str,
    words: &[String],
    similar: &[SimilarTask],
) -> ComplexityEstimate {
    let mut scores: BTreeMap<Complexity, f64> =
        Complexity::ALL.iter().map(|c| (*c, 0.0)).collect();
    let mut factors = Vec::new();
    let mut keyword_hits = 0;

    for level in Complexity::ALL {
        let hits = complexity_keywords(level)
            .iter()
            .filter(|k| text_lower.contains(*k))
            .count();
        if hits > 0 {
            keyword_hits += hits;
            *scores.entry(level).or_default() += hits as f64 * KEYWORD_WEIGHT;
            factors.push(format!("{hits} {level} indicator(s)"));
        }
    }

    let scope_level = match words.len() {
        0..=5 => Complexity::Simple,
        6..=15 => Complexity::Medium,
        16..=30 => Complexity::Complex,
        _ => Complexity::Epic,
    };
    *scores.entry(scope_level).or_default() += SCOPE_WEIGHT;
    factors.push(format!("scope of {} words", words.len()));

    let markers = words
        .iter()
        .filter(|w| DEPENDENCY_MARKERS.contains(&w.as_str()))
        .count();
    if markers >= 3 {
        *scores.entry(Complexity::Complex).or_default() += 0.2;
    } else if markers > 0 {
        *scores.entry(Complexity::Medium).or_default() += 0.1;
    }
    if markers > 0 {
        factors.push(format!("{markers} dependency marker(s)"));
    }

    if let Some(common) = most_common_complexity(similar) {
        *scores.entry(common).or_default() += HISTORY_WEIGHT;
        factors.push(format!("similar tasks were mostly {common}"));
    }

    let mut level = Complexity::Trivial;
    let mut best = f64::MIN;
    for (candidate, score) in &scores {
        if *score > best + f64::EPSILON {
            level = *candidate;
            best = *score;
        }
    }

    ComplexityEstimate {
        level,
        scores,
        keyword_hits,
        factors,
    }
}

/// Most frequent complexity among similar tasks; ties go to the larger level.
fn most_common_complexity(similar: &[SimilarTask]) -> Option<Complexity> {
    let mut counts: BTreeMap<Complexity, usize> = BTreeMap::new();
    for c in similar.iter().filter_map(|s| s.complexity) {
        *counts.entry(c).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by_key(|(c, n)| (*n, *c))
        .map(|(c, _)| c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::text::words;
    use uuid::Uuid;

    fn estimate(text: &str, similar: &[SimilarTask]) -> ComplexityEstimate {
        estimate_complexity(&text.to_lowercase(), &words(text), similar)
    }

    #[test]
    fn test_keywords_beat_scope() {
        assert_eq!(estimate("Fix typo in README", &[]).level, Complexity::Trivial);
        assert_eq!(
            estimate("Plan the platform migration for billing", &[]).level,
            Complexity::Epic
        );
    }

    #[test]
    fn test_scope_bands() {
        assert_eq!(estimate("add pagination", &[]).level, Complexity::Simple);
        assert_eq!(
            estimate("add pagination to the orders api and the admin list", &[]).level,
            Complexity::Medium
        );
    }

    #[test]
    fn test_dependency_markers() {
        let e = estimate("add cache then integrate after auth requires tokens", &[]);
        assert_eq!(e.level, Complexity::Complex);
        assert!(e.factors.iter().any(|f| f.contains("dependency marker")));
    }

    #[test]
    fn test_history_vote() {
        let similar: Vec<SimilarTask> = (0..2)
            .map(|_| SimilarTask {
                record_id: Uuid::new_v4(),
                description: "x".into(),
                similarity: 0.8,
                complexity: Some(Complexity::Complex),
                strategy: None,
                succeeded: true,
            })
            .collect();
        assert_eq!(estimate("add pagination", &similar).level, Complexity::Complex);
    }
}
