//! Similar-task lookup over recorded task outcomes.

use super::strategy::Strategy;
use super::text::{jaccard, meaningful_words};
use crate::learning::keys;
use crate::task::{Complexity, Task};
use conductor_memory::{MemoryRecord, RecordId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const LEXICAL_WEIGHT: f64 = 0.7;
const TAG_WEIGHT: f64 = 0.3;

/// A previously recorded task resembling the one being planned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarTask {
    /// Outcome record
    pub record_id: RecordId,
    /// Description of the past task
    pub description: String,
    /// Similarity in `0.0..=1.0`
    pub similarity: f64,
    /// Complexity it was planned at
    pub complexity: Option<Complexity>,
    /// Strategy it used
    pub strategy: Option<Strategy>,
    /// Whether it succeeded
    pub succeeded: bool,
}

/// Lexical overlap weighted 0.7 plus tag overlap weighted 0.3.
///
/// When neither side has tags, the word-count ratio stands in for the tag term.
pub fn task_similarity(
    a_words: &BTreeSet<String>,
    a_tags: &BTreeSet<String>,
    b_words: &BTreeSet<String>,
    b_tags: &BTreeSet<String>,
) -> f64 {
    let longest = a_words.len().max(b_words.len());
    if longest == 0 {
        return 0.0;
    }
    let lexical = a_words.intersection(b_words).count() as f64 / longest as f64;
    let secondary = if a_tags.is_empty() && b_tags.is_empty() {
        a_words.len().min(b_words.len()) as f64 / longest as f64
    } else {
        jaccard(a_tags, b_tags)
    };
    lexical * LEXICAL_WEIGHT + secondary * TAG_WEIGHT
}

/// Read a task-outcome record. Other records yield `None`.
fn outcome_view(record: &MemoryRecord) -> Option<(Option<Complexity>, Option<Strategy>, bool)> {
    let kind = record.metadata.get(keys::KIND).and_then(|v| v.as_str());
    if kind != Some(keys::TASK_OUTCOME) {
        return None;
    }
    let complexity = record
        .metadata
        .get(keys::COMPLEXITY)
        .and_then(|v| serde_json::from_value(v.clone()).ok());
    let strategy = record
        .metadata
        .get(keys::STRATEGY)
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok());
    let succeeded = record
        .metadata
        .get(keys::SUCCEEDED)
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false);
    Some((complexity, strategy, succeeded))
}

/// Top `top_k` outcomes at or above `threshold`, most similar first.
pub fn find_similar(
    task: &Task,
    history: &[MemoryRecord],
    threshold: f64,
    top_k: usize,
) -> Vec<SimilarTask> {
    let words = meaningful_words(&task.description);
    let task_id = task.id.to_string();

    let mut found: Vec<SimilarTask> = history
        .iter()
        .filter(|r| {
            r.metadata.get(keys::TASK_ID).and_then(|v| v.as_str()) != Some(task_id.as_str())
        })
        .filter_map(|record| {
            let (complexity, strategy, succeeded) = outcome_view(record)?;
            let record_tags: BTreeSet<String> = record
                .tags
                .iter()
                .filter(|t| t.as_str() != keys::TASK_OUTCOME)
                .cloned()
                .collect();
            let similarity = task_similarity(
                &words,
                &task.tags,
                &meaningful_words(&record.title),
                &record_tags,
            );
            (similarity >= threshold).then(|| SimilarTask {
                record_id: record.id,
                description: record.title.clone(),
                similarity,
                complexity,
                strategy,
                succeeded,
            })
        })
        .collect();

    found.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then_with(|| a.record_id.cmp(&b.record_id))
    });
    found.truncate(top_k);
    found
}
