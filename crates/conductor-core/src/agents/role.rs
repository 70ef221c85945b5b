//! The fixed agent roster.
//!
//! Every role declares what it can do, which memory categories it reads,
//! which tags it ignores, and how far up the security ladder it may see.

use conductor_memory::{MemoryCategory, SecurityLevel};
use serde::{Deserialize, Serialize};

/// One of the eleven specialised agent roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AgentRole {
    /// Coordinates work across the other roles
    #[serde(rename = "orchestrator")]
    Orchestrator,
    /// System and API design
    #[serde(rename = "architect")]
    Architect,
    /// Implementation
    #[serde(rename = "engineer")]
    Engineer,
    /// Testing and validation
    #[serde(rename = "qa")]
    QA,
    /// Investigation and analysis
    #[serde(rename = "researcher")]
    Researcher,
    /// Security review and hardening
    #[serde(rename = "security_engineer")]
    SecurityEngineer,
    /// Profiling and optimisation
    #[serde(rename = "performance_engineer")]
    PerformanceEngineer,
    /// Deployment and infrastructure
    #[serde(rename = "devops_engineer")]
    DevOpsEngineer,
    /// Data modelling and pipelines
    #[serde(rename = "data_engineer")]
    DataEngineer,
    /// Interface and experience design
    #[serde(rename = "ui_ux_engineer")]
    UIUXEngineer,
    /// Code review and standards
    #[serde(rename = "code_review_engineer")]
    CodeReviewEngineer,
}

impl AgentRole {
    /// Every role, in declaration order.
    pub const ALL: [AgentRole; 11] = [
        Self::Orchestrator,
        Self::Architect,
        Self::Engineer,
        Self::QA,
        Self::Researcher,
        Self::SecurityEngineer,
        Self::PerformanceEngineer,
        Self::DevOpsEngineer,
        Self::DataEngineer,
        Self::UIUXEngineer,
        Self::CodeReviewEngineer,
    ];

    /// Stable identifier, matching the serde name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Orchestrator => "orchestrator",
            Self::Architect => "architect",
            Self::Engineer => "engineer",
            Self::QA => "qa",
            Self::Researcher => "researcher",
            Self::SecurityEngineer => "security_engineer",
            Self::PerformanceEngineer => "performance_engineer",
            Self::DevOpsEngineer => "devops_engineer",
            Self::DataEngineer => "data_engineer",
            Self::UIUXEngineer => "ui_ux_engineer",
            Self::CodeReviewEngineer => "code_review_engineer",
        }
    }

    /// Capabilities this role provides.
    #[must_use]
    pub fn capabilities(&self) -> &'static [&'static str] {
        match self {
            Self::Orchestrator => &["coordination", "planning", "delegation"],
            Self::Architect => &["system_design", "api_design", "architecture_review"],
            Self::Engineer => &["implementation", "debugging", "refactoring"],
            Self::QA => &["testing", "validation", "quality_assurance"],
            Self::Researcher => &["research", "analysis", "requirements"],
            Self::SecurityEngineer => &["security_audit", "threat_modeling", "hardening"],
            Self::PerformanceEngineer => &["profiling", "optimization", "load_testing"],
            Self::DevOpsEngineer => &["deployment", "ci_cd", "infrastructure"],
            Self::DataEngineer => &["data_modeling", "etl", "database"],
            Self::UIUXEngineer => &["ui_design", "frontend", "accessibility"],
            Self::CodeReviewEngineer => &["code_review", "style_enforcement", "standards"],
        }
    }

    /// Whether the role declares `capability`.
    #[must_use]
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities().contains(&capability)
    }

    /// Memory categories this role reads by default.
    #[must_use]
    pub fn memory_affinity(&self) -> &'static [MemoryCategory] {
        use MemoryCategory::{Error, Pattern, Project, Team};
        match self {
            Self::Orchestrator | Self::Architect => &[Project, Pattern],
            Self::Engineer | Self::DevOpsEngineer | Self::CodeReviewEngineer => {
                &[Pattern, Team, Error]
            }
            Self::QA | Self::SecurityEngineer => &[Error, Pattern, Team],
            Self::Researcher | Self::DataEngineer => &[Pattern, Project],
            Self::PerformanceEngineer => &[Pattern, Error],
            Self::UIUXEngineer => &[Pattern, Team],
        }
    }

    /// Records carrying any of these tags are outside the role's boundary.
    #[must_use]
    pub fn excluded_tags(&self) -> &'static [&'static str] {
        match self {
            Self::Orchestrator | Self::CodeReviewEngineer => &["implementation_detail"],
            Self::Architect => &["minor_bug", "style_issue"],
            Self::Engineer => &["high_level_design"],
            Self::QA => &["architecture_decision"],
            Self::SecurityEngineer => &["performance_issue", "style_issue"],
            Self::PerformanceEngineer => &["security_issue", "style_issue"],
            Self::Researcher | Self::DevOpsEngineer | Self::DataEngineer | Self::UIUXEngineer => {
                &[]
            }
        }
    }

    /// Highest security level the role may read.
    #[must_use]
    pub fn access_tier(&self) -> SecurityLevel {
        match self {
            Self::Architect | Self::SecurityEngineer => SecurityLevel::Confidential,
            Self::Orchestrator | Self::DevOpsEngineer => SecurityLevel::Sensitive,
            Self::UIUXEngineer => SecurityLevel::Public,
            Self::Engineer
            | Self::QA
            | Self::Researcher
            | Self::PerformanceEngineer
            | Self::DataEngineer
            | Self::CodeReviewEngineer => SecurityLevel::TeamOnly,
        }
    }

    /// Senior roles see confidential material.
    #[must_use]
    pub fn is_senior(&self) -> bool {
        self.access_tier() == SecurityLevel::Confidential
    }

    /// Keywords describing the role's domain.
    ///
    /// Used both to boost context records and to assign planned subtasks.
    #[must_use]
    pub fn keywords(&self) -> &'static [&'static str] {
        match self {
            Self::Orchestrator => &[
                "coordination", "planning", "workflow", "orchestration", "roadmap",
            ],
            Self::Architect => &[
                "architecture", "design", "system design", "technical design", "specification",
                "design pattern", "scalability design", "blueprint",
            ],
            Self::Engineer => &[
                "implement", "code", "develop", "build", "create", "refactor", "debug", "fix",
                "feature", "function", "module", "endpoint", "integration", "backend",
            ],
            Self::QA => &[
                "test", "testing", "validate", "verification", "quality assurance", "qa",
                "regression test", "test plan", "coverage",
            ],
            Self::Researcher => &[
                "research", "investigate", "analyze", "study", "explore", "evaluation",
                "requirements gathering", "feasibility study", "discovery",
            ],
            Self::SecurityEngineer => &[
                "security", "secure", "authentication", "authorization", "encryption",
                "vulnerability", "security audit", "compliance", "threat analysis",
            ],
            Self::PerformanceEngineer => &[
                "performance", "optimization", "profiling", "benchmarking", "load testing",
                "latency", "throughput", "bottleneck",
            ],
            Self::DevOpsEngineer => &[
                "deploy", "deployment", "devops", "infrastructure", "ci/cd", "pipeline",
                "docker", "kubernetes", "monitoring", "release",
            ],
            Self::DataEngineer => &[
                "data", "database", "etl", "data pipeline", "analytics", "sql",
                "data migration", "data modeling",
            ],
            Self::UIUXEngineer => &[
                "ui", "ux", "user interface", "user experience", "frontend", "css",
                "accessibility", "usability", "wireframe",
            ],
            Self::CodeReviewEngineer => &[
                "code review", "review", "style", "standards", "lint", "readability",
                "maintainability",
            ],
        }
    }

    /// Pick the role whose keywords best match `text`.
    ///
    /// Multi-word keywords weigh more; scores are normalised by keyword
    /// count so roles with long lists are not favoured. Falls back to
    /// [`AgentRole::Engineer`].
    #[must_use]
    pub fn best_match(text: &str) -> AgentRole {
        let text = text.to_lowercase();
        let words: Vec<&str> = text
            .split(|c: char| !c.is_alphanumeric() && c != '/')
            .filter(|w| !w.is_empty())
            .collect();

        let mut best = (AgentRole::Engineer, 0.0_f64);
        // Orchestrator never receives planned subtasks
        for role in Self::ALL.iter().filter(|r| **r != Self::Orchestrator) {
            let keywords = role.keywords();
            let hits: f64 = keywords
                .iter()
                .filter(|k| keyword_present(&text, &words, k))
                .map(|k| k.split_whitespace().count() as f64 * 1.5)
                .sum();
            let score = hits / keywords.len() as f64;
            if score > best.1 {
                best = (*role, score);
            }
        }
        best.0
    }
}

/// Single words must match a whole token; phrases match as substrings.
fn keyword_present(text: &str, words: &[&str], keyword: &str) -> bool {
    if keyword.contains(' ') {
        text.contains(keyword)
    } else {
        words.contains(&keyword)
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AgentRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        Self::ALL
            .iter()
            .find(|r| r.as_str() == normalized)
            .copied()
            .ok_or_else(|| format!("unknown agent role '{s}'"))
    }
}
