//! Word extraction shared by the planner and the learning engine.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-z0-9]+").expect("word pattern is a valid constant regex"));

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "into", "from", "that", "this", "these", "those", "our",
    "your", "their", "its", "are", "was", "were", "been", "being", "has", "have", "had",
    "but", "not", "all", "any", "some", "can", "will", "should", "would", "could", "please",
    "via", "per", "using", "use", "also", "then", "than", "there", "here", "when", "what",
];

/// Verbs that make a description actionable.
pub const ACTION_VERBS: &[&str] = &[
    "add", "implement", "create", "build", "fix", "update", "refactor", "migrate", "design",
    "deploy", "test", "write", "remove", "delete", "optimize", "improve", "investigate",
    "research", "integrate", "configure", "setup", "set", "document", "review", "secure",
    "audit", "upgrade", "rename", "change", "develop", "support", "enable", "replace",
    "analyze", "rewrite", "port", "harden", "automate", "extend", "split", "merge",
];

/// Lowercased alphanumeric words, in order.
pub fn words(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    WORD_RE
        .find_iter(&lower)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Distinct words of three or more characters, minus stopwords.
pub fn meaningful_words(text: &str) -> BTreeSet<String> {
    words(text)
        .into_iter()
        .filter(|w| w.len() >= 3 && !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// Whether any word is an action verb or an inflection of one.
pub fn has_action_verb(words: &[String]) -> bool {
    words.iter().any(|w| {
        ACTION_VERBS
            .iter()
            .any(|v| w == v || (w.starts_with(v) && w.len() <= v.len() + 3))
    })
}

/// |A ∩ B| / |A ∪ B|, 0.0 when both are empty.
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}
