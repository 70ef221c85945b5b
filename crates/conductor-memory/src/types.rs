//! Core data types for the memory store.
//!
//! A [`MemoryRecord`] is one unit of historical knowledge: a project fact,
//! a reusable pattern, a team convention or an error post-mortem. Records
//! reference each other through weighted, non-owning [`MemoryLink`]s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Identifier of a stored record.
pub type RecordId = Uuid;

/// Broad category of a memory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryCategory {
    /// Project facts: decisions, task history, decomposition results
    Project,
    /// Reusable approaches distilled from successful work
    Pattern,
    /// Team conventions and preferences
    Team,
    /// Failures and the strategies that prevent them
    Error,
}

impl MemoryCategory {
    /// All categories, in declaration order.
    pub const ALL: [MemoryCategory; 4] = [Self::Project, Self::Pattern, Self::Team, Self::Error];

    /// Stable lowercase name used in storage.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Pattern => "pattern",
            Self::Team => "team",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for MemoryCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MemoryCategory {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "project" => Ok(Self::Project),
            "pattern" => Ok(Self::Pattern),
            "team" => Ok(Self::Team),
            "error" => Ok(Self::Error),
            other => Err(crate::Error::InvalidValue(format!(
                "unknown memory category '{other}'"
            ))),
        }
    }
}

/// Access classification of a record.
///
/// Ordered from least to most restricted, so `a <= b` reads as
/// "a is visible to anyone cleared for b".
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    /// Visible to every role
    #[default]
    Public,
    /// Visible to team members
    TeamOnly,
    /// Restricted to senior or operational roles
    Sensitive,
    /// Restricted to the most trusted roles
    Confidential,
}

impl SecurityLevel {
    /// Numeric rank (0 = public).
    #[must_use]
    pub fn rank(&self) -> u8 {
        match self {
            Self::Public => 0,
            Self::TeamOnly => 1,
            Self::Sensitive => 2,
            Self::Confidential => 3,
        }
    }

    /// Inverse of [`rank`](Self::rank).
    #[must_use]
    pub fn from_rank(rank: u8) -> Option<Self> {
        match rank {
            0 => Some(Self::Public),
            1 => Some(Self::TeamOnly),
            2 => Some(Self::Sensitive),
            3 => Some(Self::Confidential),
            _ => None,
        }
    }

    /// Stable snake_case name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::TeamOnly => "team_only",
            Self::Sensitive => "sensitive",
            Self::Confidential => "confidential",
        }
    }
}

impl std::fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Weighted, non-owning reference from one record to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryLink {
    /// Target record
    pub target: RecordId,
    /// Strength of the relationship (0.0 - 1.0)
    pub weight: f64,
}

/// A single stored memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Unique record ID
    pub id: RecordId,
    /// Category
    pub category: MemoryCategory,
    /// Short title
    pub title: String,
    /// Full content
    pub content: String,
    /// Free-form tags (`best_practice`, `anti_pattern`, technology names, ...)
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Confidence or success-rate score (0.0 - 1.0)
    pub score: f64,
    /// Access classification
    #[serde(default)]
    pub security_level: SecurityLevel,
    /// Owning project, if any
    #[serde(default)]
    pub project: Option<String>,
    /// When the record was first written
    pub created_at: DateTime<Utc>,
    /// When the record was last written
    pub updated_at: DateTime<Utc>,
    /// Outgoing links to related records
    #[serde(default)]
    pub links: Vec<MemoryLink>,
    /// Structured extras (counters, outcome ids)
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl MemoryRecord {
    /// Create a new public record with score 0.5.
    pub fn new(
        category: MemoryCategory,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            category,
            title: title.into(),
            content: content.into(),
            tags: BTreeSet::new(),
            score: 0.5,
            security_level: SecurityLevel::Public,
            project: None,
            created_at: now,
            updated_at: now,
            links: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Add a tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Add several tags.
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Set the score, clamped to `0.0..=1.0`.
    #[must_use]
    pub fn with_score(mut self, score: f64) -> Self {
        self.score = score.clamp(0.0, 1.0);
        self
    }

    /// Set the security level.
    #[must_use]
    pub fn with_security(mut self, level: SecurityLevel) -> Self {
        self.security_level = level;
        self
    }

    /// Set the owning project.
    #[must_use]
    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    /// Set a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Read an unsigned counter stored in metadata (0 when absent).
    #[must_use]
    pub fn counter(&self, key: &str) -> u64 {
        self.metadata
            .get(key)
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0)
    }

    /// Whether the record carries the tag.
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Age of the record in whole days.
    #[must_use]
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_days().max(0)
    }
}

/// Query filter accepted by [`MemoryStore::query`](crate::MemoryStore::query).
///
/// Empty collections mean "no constraint".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryFilter {
    /// Accept only these categories
    #[serde(default)]
    pub categories: Vec<MemoryCategory>,
    /// Require at least one of these tags
    #[serde(default)]
    pub tags_any: Vec<String>,
    /// Free-text terms; a record matches when any term appears in its
    /// title, content or tags (case-insensitive)
    #[serde(default)]
    pub text: Option<String>,
    /// Restrict to a project (records without a project match only when
    /// `include_global` is set)
    #[serde(default)]
    pub project: Option<String>,
    /// With `project`, also accept records that belong to no project
    #[serde(default)]
    pub include_global: bool,
    /// Highest security level to return
    #[serde(default)]
    pub max_security: Option<SecurityLevel>,
    /// Maximum number of records
    #[serde(default)]
    pub limit: Option<usize>,
}

impl MemoryFilter {
    /// Empty filter (matches everything).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to one category (accumulates).
    #[must_use]
    pub fn category(mut self, category: MemoryCategory) -> Self {
        if !self.categories.contains(&category) {
            self.categories.push(category);
        }
        self
    }

    /// Restrict to several categories (accumulates).
    #[must_use]
    pub fn categories(mut self, categories: impl IntoIterator<Item = MemoryCategory>) -> Self {
        for c in categories {
            self = self.category(c);
        }
        self
    }

    /// Require any of the given tags.
    #[must_use]
    pub fn tags_any<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags_any.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Free-text match.
    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Restrict to a project.
    #[must_use]
    pub fn project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    /// Restrict to a project plus project-less records.
    #[must_use]
    pub fn project_or_global(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self.include_global = true;
        self
    }

    /// Cap the security level.
    #[must_use]
    pub fn max_security(mut self, level: SecurityLevel) -> Self {
        self.max_security = Some(level);
        self
    }

    /// Cap the number of results.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Lowercased search terms of at least three characters.
    #[must_use]
    pub fn terms(&self) -> Vec<String> {
        self.text
            .as_deref()
            .map(search_terms)
            .unwrap_or_default()
    }

    /// Evaluate every constraint except `limit` against a record.
    #[must_use]
    pub fn matches(&self, record: &MemoryRecord) -> bool {
        if !self.categories.is_empty() && !self.categories.contains(&record.category) {
            return false;
        }
        if let Some(max) = self.max_security {
            if record.security_level > max {
                return false;
            }
        }
        if let Some(project) = &self.project {
            let global = self.include_global && record.project.is_none();
            if !global && record.project.as_deref() != Some(project.as_str()) {
                return false;
            }
        }
        if !self.tags_any.is_empty() && !self.tags_any.iter().any(|t| record.tags.contains(t)) {
            return false;
        }
        let terms = self.terms();
        if !terms.is_empty() {
            let haystack = format!(
                "{} {} {}",
                record.title.to_lowercase(),
                record.content.to_lowercase(),
                record
                    .tags
                    .iter()
                    .map(|t| t.to_lowercase())
                    .collect::<Vec<_>>()
                    .join(" ")
            );
            if !terms.iter().any(|t| haystack.contains(t.as_str())) {
                return false;
            }
        }
        true
    }
}

/// Split text into lowercase alphanumeric terms of at least three characters.
#[must_use]
pub fn search_terms(text: &str) -> Vec<String> {
    let mut terms: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| w.chars().count() >= 3)
        .map(str::to_lowercase)
        .collect();
    terms.sort();
    terms.dedup();
    terms
}
