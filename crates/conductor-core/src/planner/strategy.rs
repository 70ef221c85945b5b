//! Decomposition strategies and their selection.

use super::similarity::SimilarTask;
use crate::task::Complexity;
use serde::{Deserialize, Serialize};

/// How subtasks depend on each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Every step waits for the previous one
    SequentialPipeline,
    /// One planning step, independent work, one verification step
    ParallelFanOut,
    /// Sprints of three steps, each sprint after the previous
    IterativeRefinement,
    /// The whole task as one subtask
    SingleUnit,
    /// Template dependencies kept as designed
    Hybrid,
}

impl Strategy {
    /// Every strategy; also the final tie-break order.
    pub const ALL: [Strategy; 5] = [
        Self::SequentialPipeline,
        Self::ParallelFanOut,
        Self::IterativeRefinement,
        Self::SingleUnit,
        Self::Hybrid,
    ];

    /// Stable snake_case name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SequentialPipeline => "sequential_pipeline",
            Self::ParallelFanOut => "parallel_fan_out",
            Self::IterativeRefinement => "iterative_refinement",
            Self::SingleUnit => "single_unit",
            Self::Hybrid => "hybrid",
        }
    }

    /// Phrases in a description that favour this strategy.
    #[must_use]
    pub fn best_for(&self) -> &'static [&'static str] {
        match self {
            Self::SequentialPipeline => &["migration", "step-by-step", "sequential", "setup"],
            Self::ParallelFanOut => &[
                "independent features", "team work", "concurrent development", "parallel",
            ],
            Self::IterativeRefinement => &[
                "agile development", "mvp", "iterative improvement", "prototype",
            ],
            Self::SingleUnit => &["research", "poc", "investigation", "quick fix"],
            Self::Hybrid => &["architecture", "system design", "complex features", "platform"],
        }
    }

    /// Complexity levels the strategy suits.
    #[must_use]
    pub fn preferred_complexity(&self) -> &'static [Complexity] {
        use Complexity::{Complex, Epic, Medium, Simple, Trivial};
        match self {
            Self::SequentialPipeline => &[Simple, Medium],
            Self::ParallelFanOut | Self::IterativeRefinement => &[Medium, Complex],
            Self::SingleUnit => &[Trivial],
            Self::Hybrid => &[Complex, Epic],
        }
    }

    /// Strategy used when no similar history exists.
    #[must_use]
    pub fn fallback(complexity: Complexity) -> Strategy {
        match complexity {
            Complexity::Trivial => Self::SingleUnit,
            Complexity::Simple => Self::SequentialPipeline,
            Complexity::Epic => Self::Hybrid,
            Complexity::Medium | Complexity::Complex => Self::ParallelFanOut,
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|st| st.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown strategy '{s}'"))
    }
}

/// Score of one strategy for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyScore {
    /// Strategy
    pub strategy: Strategy,
    /// Combined score
    pub score: f64,
    /// Similar tasks that used it
    pub samples: usize,
    /// Share of those that succeeded
    pub success_rate: f64,
}

const KEYWORD_WEIGHT: f64 = 0.3;
const COMPLEXITY_WEIGHT: f64 = 0.4;
const HISTORY_WEIGHT: f64 = 0.5;

/// Score every strategy against the description, complexity and history.
pub fn score_strategies(
    text_lower: &str,
    complexity: Complexity,
    similar: &[SimilarTask],
    confidence_samples: usize,
) -> Vec<StrategyScore> {
    Strategy::ALL
        .iter()
        .map(|&strategy| {
            let keyword_hits = strategy
                .best_for()
                .iter()
                .filter(|k| text_lower.contains(*k))
                .count();
            let mut score = keyword_hits as f64 * KEYWORD_WEIGHT;
            if strategy.preferred_complexity().contains(&complexity) {
                score += COMPLEXITY_WEIGHT;
            }

            let used: Vec<&SimilarTask> =
                similar.iter().filter(|s| s.strategy == Some(strategy)).collect();
            let samples = used.len();
            let success_rate = if samples == 0 {
                0.0
            } else {
                used.iter().filter(|s| s.succeeded).count() as f64 / samples as f64
            };
            let confidence = (samples as f64 / confidence_samples.max(1) as f64).min(1.0);
            score += success_rate * confidence * HISTORY_WEIGHT;

            StrategyScore {
                strategy,
                score,
                samples,
                success_rate,
            }
        })
        .collect()
}

/// Pick a strategy. Ties go to the one with more samples, then to
/// declaration order. Without similar history the complexity fallback is used.
pub fn select_strategy(
    text_lower: &str,
    complexity: Complexity,
    similar: &[SimilarTask],
    confidence_samples: usize,
) -> (Strategy, Vec<StrategyScore>) {
    let scores = score_strategies(text_lower, complexity, similar, confidence_samples);
    if similar.is_empty() {
        return (Strategy::fallback(complexity), scores);
    }

    let mut best = &scores[0];
    for candidate in &scores[1..] {
        let better = candidate.score > best.score + f64::EPSILON
            || ((candidate.score - best.score).abs() <= f64::EPSILON
                && candidate.samples > best.samples);
        if better {
            best = candidate;
        }
    }
    (best.strategy, scores)
}
