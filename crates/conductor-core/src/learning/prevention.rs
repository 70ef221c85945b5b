//! Failure factors and the prevention strategies written into Error records.

use crate::error::ReasonCode;
use crate::task::TaskFailure;

/// Known failure factors and how to prevent them.
const PREVENTION: &[(&str, &str)] = &[
    ("insufficient requirements", "Implement a detailed requirements gathering phase"),
    ("unclear scope", "Define clear scope and boundaries upfront"),
    ("technical debt", "Allocate time for technical debt remediation"),
    ("resource constraints", "Ensure adequate workspace capacity before starting"),
    ("dependency issues", "Map and validate all dependencies early"),
    ("timeline pressure", "Split long-running steps or raise the subtask timeout"),
    ("integration complexity", "Plan the integration strategy and test it early"),
    ("changing requirements", "Agree on scope before dispatch to avoid cancellation"),
    ("cascading failure", "Isolate failing steps so dependants can fall back"),
];

/// Message fragments mapped to the factor they indicate.
const MESSAGE_HINTS: &[(&str, &str)] = &[
    ("integrat", "integration complexity"),
    ("requirement", "insufficient requirements"),
    ("ambiguous", "unclear scope"),
    ("scope", "unclear scope"),
    ("legacy", "technical debt"),
    ("debt", "technical debt"),
    ("depend", "dependency issues"),
    ("timed out", "timeline pressure"),
    ("timeout", "timeline pressure"),
    ("capacity", "resource constraints"),
];

/// Suggested once a pattern has failed this many times.
pub const ALTERNATIVE_APPROACH: &str = "Consider alternative approach";

/// Factors that explain `failure`, most specific first, without duplicates.
pub fn failure_factors(failure: &TaskFailure) -> Vec<String> {
    let mut factors: Vec<String> = Vec::new();

    match failure.reason {
        ReasonCode::DependencyFailed => push_unique(&mut factors, "dependency issues"),
        ReasonCode::NoCapacity => push_unique(&mut factors, "resource constraints"),
        ReasonCode::Timeout => push_unique(&mut factors, "timeline pressure"),
        ReasonCode::Cancelled => push_unique(&mut factors, "changing requirements"),
        ReasonCode::AgentError => {}
    }

    let message = failure.message.to_lowercase();
    for (hint, factor) in MESSAGE_HINTS {
        if message.contains(hint) {
            push_unique(&mut factors, factor);
        }
    }

    if failure.sibling_failures >= 2 {
        push_unique(&mut factors, "cascading failure");
    }
    if factors.is_empty() {
        factors.push(failure.reason.to_string().replace('_', " "));
    }
    factors
}

fn push_unique(factors: &mut Vec<String>, factor: &str) {
    if !factors.iter().any(|f| f == factor) {
        factors.push(factor.to_string());
    }
}

/// One strategy per factor; unknown factors get a generic mitigation line.
pub fn prevention_strategies(factors: &[String], failures_at_pattern: u64, alternative_after: u64) -> Vec<String> {
    let mut strategies: Vec<String> = factors
        .iter()
        .map(|factor| {
            PREVENTION
                .iter()
                .find(|(known, _)| known == factor)
                .map(|(_, strategy)| format!("{strategy} (prevents {factor})"))
                .unwrap_or_else(|| format!("Implement mitigation for: {factor}"))
        })
        .collect();
    if alternative_after > 0 && failures_at_pattern >= alternative_after {
        strategies.push(format!(
            "{ALTERNATIVE_APPROACH}: {failures_at_pattern} failures on this pattern"
        ));
    }
    strategies
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn failure(reason: ReasonCode, message: &str, siblings: usize) -> TaskFailure {
        TaskFailure {
            subtask_id: Uuid::new_v4(),
            reason,
            message: message.to_string(),
            sibling_failures: siblings,
        }
    }

    #[test]
    fn test_factors_from_reason_and_message() {
        let f = failure(ReasonCode::Timeout, "integration with billing timed out", 0);
        assert_eq!(
            failure_factors(&f),
            vec!["timeline pressure", "integration complexity"]
        );
    }

    #[test]
    fn test_cascading_failure_factor() {
        let f = failure(ReasonCode::DependencyFailed, "upstream failed", 3);
        assert_eq!(failure_factors(&f), vec!["dependency issues", "cascading failure"]);
    }

    #[test]
    fn test_unknown_agent_error_falls_back_to_reason() {
        let f = failure(ReasonCode::AgentError, "segfault", 0);
        let factors = failure_factors(&f);
        assert_eq!(factors, vec!["agent error"]);
        let strategies = prevention_strategies(&factors, 0, 3);
        assert_eq!(strategies, vec!["Implement mitigation for: agent error"]);
    }

    #[test]
    fn test_known_factor_and_alternative_approach() {
        let strategies = prevention_strategies(&["dependency issues".to_string()], 3, 3);
        assert_eq!(strategies.len(), 2);
        assert!(strategies[0].starts_with("Map and validate all dependencies early"));
        assert!(strategies[1].starts_with(ALTERNATIVE_APPROACH));
    }
}
