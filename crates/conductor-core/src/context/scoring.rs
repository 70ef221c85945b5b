//! Record scoring: independent signals combined by fixed weights.

use crate::agents::AgentRole;
use chrono::{DateTime, Utc};
use conductor_memory::{MemoryCategory, MemoryRecord};
use serde::{Deserialize, Serialize};

/// Tags marking a proven approach.
pub const SUCCESS_TAGS: &[&str] = &["successful", "approved", "high_quality", "best_practice"];
/// Tags marking a team convention.
pub const TEAM_PREFERENCE_TAGS: &[&str] = &["team_standard", "preferred_approach", "recommended"];
/// Tags marking something that has gone wrong before.
pub const ERROR_PREVENTION_TAGS: &[&str] =
    &["error_prone", "requires_attention", "vulnerability", "anti_pattern"];
/// Tags marking a fresh lesson; boosts recency while the record is young.
pub const RECENT_LEARNING_TAGS: &[&str] = &["lesson_learned", "recent_discovery", "new_approach"];

/// Weight of the role keyword boost.
pub const ROLE_BOOST: f64 = 0.3;

/// Per-signal weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    /// Whole description found in the record (default 1.0)
    #[serde(default = "default_exact_match")]
    pub exact_match: f64,
    /// Fraction of query terms found (default 0.8)
    #[serde(default = "default_keyword_match")]
    pub keyword_match: f64,
    /// Team convention tags (default 0.9)
    #[serde(default = "default_team_preference")]
    pub team_preference: f64,
    /// Proven approach (default 1.2)
    #[serde(default = "default_success_pattern")]
    pub success_pattern: f64,
    /// Known pitfalls (default 1.1)
    #[serde(default = "default_error_prevention")]
    pub error_prevention: f64,
    /// Age decay (default 0.5)
    #[serde(default = "default_recency")]
    pub recency: f64,
    /// Same project as the task (default 0.7)
    #[serde(default = "default_project_relevance")]
    pub project_relevance: f64,
}

fn default_exact_match() -> f64 {
    1.0
}

fn default_keyword_match() -> f64 {
    0.8
}

fn default_team_preference() -> f64 {
    0.9
}

fn default_success_pattern() -> f64 {
    1.2
}

fn default_error_prevention() -> f64 {
    1.1
}

fn default_recency() -> f64 {
    0.5
}

fn default_project_relevance() -> f64 {
    0.7
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            exact_match: default_exact_match(),
            keyword_match: default_keyword_match(),
            team_preference: default_team_preference(),
            success_pattern: default_success_pattern(),
            error_prevention: default_error_prevention(),
            recency: default_recency(),
            project_relevance: default_project_relevance(),
        }
    }
}

/// Raw signal values for one record, each in `0.0..=1.0` (recency up to 1.5).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalScores {
    /// Exact match
    pub exact_match: f64,
    /// Keyword match
    pub keyword_match: f64,
    /// Team preference
    pub team_preference: f64,
    /// Success pattern
    pub success_pattern: f64,
    /// Error prevention
    pub error_prevention: f64,
    /// Recency
    pub recency: f64,
    /// Project relevance
    pub project_relevance: f64,
    /// Role keyword boost, already weighted
    pub role_boost: f64,
}

impl SignalScores {
    /// Weighted total.
    #[must_use]
    pub fn combine(&self, weights: &ScoringWeights) -> f64 {
        weights.exact_match * self.exact_match
            + weights.keyword_match * self.keyword_match
            + weights.team_preference * self.team_preference
            + weights.success_pattern * self.success_pattern
            + weights.error_prevention * self.error_prevention
            + weights.recency * self.recency
            + weights.project_relevance * self.project_relevance
            + self.role_boost
    }
}

/// What a record is scored against.
#[derive(Debug, Clone, Copy)]
pub struct ScoringInput<'a> {
    /// Lowercased task description
    pub description: &'a str,
    /// Search terms from the description
    pub terms: &'a [String],
    /// Task project
    pub project: Option<&'a str>,
    /// Requesting role
    pub role: AgentRole,
    /// Reference time for recency
    pub now: DateTime<Utc>,
    /// Window in which recent-learning tags boost recency
    pub recent_days: i64,
}

/// Compute every signal for `record`.
pub fn score_signals(record: &MemoryRecord, input: &ScoringInput<'_>) -> SignalScores {
    let haystack = record_text(record);
    SignalScores {
        exact_match: exact_match_score(input.description, &record.title, &haystack),
        keyword_match: keyword_match_score(input.terms, &haystack),
        team_preference: tag_signal(record, TEAM_PREFERENCE_TAGS),
        success_pattern: success_pattern_score(record),
        error_prevention: error_prevention_score(record),
        recency: recency_score(record, input.now, input.recent_days),
        project_relevance: project_relevance_score(input.project, record.project.as_deref()),
        role_boost: role_keyword_boost(input.role, &haystack),
    }
}

/// Lowercased title, content and tags.
fn record_text(record: &MemoryRecord) -> String {
    let mut text = format!("{} {}", record.title, record.content).to_lowercase();
    for tag in &record.tags {
        text.push(' ');
        text.push_str(&tag.to_lowercase());
    }
    text
}

/// 1.0 when the description appears verbatim in the record, or the record
/// title appears verbatim in the description.
pub fn exact_match_score(description: &str, title: &str, haystack: &str) -> f64 {
    let description = description.trim();
    let title = title.trim().to_lowercase();
    if description.is_empty() {
        return 0.0;
    }
    if haystack.contains(description) || (!title.is_empty() && description.contains(&title)) {
        1.0
    } else {
        0.0
    }
}

/// Fraction of query terms found in the record text.
pub fn keyword_match_score(terms: &[String], haystack: &str) -> f64 {
    if terms.is_empty() {
        return 0.0;
    }
    let hits = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
    hits as f64 / terms.len() as f64
}

fn tag_signal(record: &MemoryRecord, tags: &[&str]) -> f64 {
    if tags.iter().any(|t| record.has_tag(t)) {
        1.0
    } else {
        0.0
    }
}

/// Tagged as successful, or a Pattern with a high success rate.
pub fn success_pattern_score(record: &MemoryRecord) -> f64 {
    let tagged = tag_signal(record, SUCCESS_TAGS);
    if tagged > 0.0 {
        return tagged;
    }
    if record.category == MemoryCategory::Pattern {
        record.score.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Error records and pitfall tags.
pub fn error_prevention_score(record: &MemoryRecord) -> f64 {
    if record.category == MemoryCategory::Error {
        1.0
    } else {
        tag_signal(record, ERROR_PREVENTION_TAGS)
    }
}

/// Linear decay over a year, boosted for fresh lessons.
pub fn recency_score(record: &MemoryRecord, now: DateTime<Utc>, recent_days: i64) -> f64 {
    let age = record.age_days(now);
    let base = (1.0 - age as f64 / 365.0).max(0.0);
    let fresh_lesson = age <= recent_days && RECENT_LEARNING_TAGS.iter().any(|t| record.has_tag(t));
    if fresh_lesson {
        base * 1.5
    } else {
        base
    }
}

/// 1.0 for the same project, 0.5 for project-less (global) records.
pub fn project_relevance_score(task_project: Option<&str>, record_project: Option<&str>) -> f64 {
    match (task_project, record_project) {
        (Some(task), Some(record)) if task == record => 1.0,
        (Some(_), None) => 0.5,
        _ => 0.0,
    }
}

/// Share of the role's keywords present in the record, weighted.
pub fn role_keyword_boost(role: AgentRole, haystack: &str) -> f64 {
    let keywords = role.keywords();
    if keywords.is_empty() {
        return 0.0;
    }
    let hits = keywords.iter().filter(|k| haystack.contains(*k)).count();
    hits as f64 / keywords.len() as f64 * ROLE_BOOST
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(title: &str, content: &str) -> MemoryRecord {
        MemoryRecord::new(MemoryCategory::Project, title, content)
    }

    #[test]
    fn test_combine_default_weights() {
        let w = ScoringWeights::default();
        let signals = SignalScores {
            exact_match: 1.0,
            keyword_match: 0.5,
            recency: 1.0,
            ..Default::default()
        };
        // 1.0 + 0.8*0.5 + 0.5*1.0 = 1.9
        assert!((signals.combine(&w) - 1.9).abs() < 1e-9);
    }

    #[test]
    fn test_keyword_match_fraction() {
        let terms = vec!["cache".to_string(), "redis".to_string()];
        assert!((keyword_match_score(&terms, "add a cache layer") - 0.5).abs() < 1e-9);
        assert_eq!(keyword_match_score(&[], "anything"), 0.0);
    }

    #[test]
    fn test_exact_match() {
        assert_eq!(exact_match_score("add pagination", "Pagination", "x"), 1.0);
        assert_eq!(exact_match_score("add pagination", "Other", "we add pagination here"), 1.0);
        assert_eq!(exact_match_score("add pagination", "Other", "nothing"), 0.0);
    }

    #[test]
    fn test_recency_decay_and_boost() {
        let now = Utc::now();
        let mut old = record("a", "b");
        old.created_at = now - Duration::days(400);
        assert_eq!(recency_score(&old, now, 30), 0.0);

        let mut fresh = record("a", "b").with_tag("lesson_learned");
        fresh.created_at = now - Duration::days(10);
        let plain = (1.0 - 10.0 / 365.0) as f64;
        assert!((recency_score(&fresh, now, 30) - plain * 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_success_and_error_signals() {
        let tagged = record("a", "b").with_tag("best_practice");
        assert_eq!(success_pattern_score(&tagged), 1.0);

        let pattern = MemoryRecord::new(MemoryCategory::Pattern, "p", "c").with_score(0.75);
        assert!((success_pattern_score(&pattern) - 0.75).abs() < 1e-9);

        let error = MemoryRecord::new(MemoryCategory::Error, "e", "c");
        assert_eq!(error_prevention_score(&error), 1.0);
        assert_eq!(error_prevention_score(&record("a", "b")), 0.0);
    }

    #[test]
    fn test_project_relevance() {
        assert_eq!(project_relevance_score(Some("shop"), Some("shop")), 1.0);
        assert_eq!(project_relevance_score(Some("shop"), None), 0.5);
        assert_eq!(project_relevance_score(Some("shop"), Some("blog")), 0.0);
        assert_eq!(project_relevance_score(None, Some("blog")), 0.0);
    }

    #[test]
    fn test_role_keyword_boost() {
        let role = AgentRole::QA;
        let n = role.keywords().len() as f64;
        let boost = role_keyword_boost(role, "coverage report");
        assert!((boost - ROLE_BOOST / n).abs() < 1e-9);
        assert_eq!(role_keyword_boost(role, "nothing relevant"), 0.0);
    }
}
