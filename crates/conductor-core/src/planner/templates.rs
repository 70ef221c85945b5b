//! Step templates per complexity and the dependency shape each strategy
//! imposes on them.

use super::strategy::Strategy;
use crate::task::Complexity;

/// One step of a template.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepTemplate {
    /// Title; also drives role assignment
    pub title: &'static str,
    /// What the step produces
    pub summary: &'static str,
    /// Estimated hours
    pub hours: f64,
    /// Indices of steps this one waits for
    pub depends_on: &'static [usize],
}

const fn step(
    title: &'static str,
    summary: &'static str,
    hours: f64,
    depends_on: &'static [usize],
) -> StepTemplate {
    StepTemplate {
        title,
        summary,
        hours,
        depends_on,
    }
}

const TRIVIAL: &[StepTemplate] = &[step("Implement the change", "Make the change", 1.0, &[])];

const SIMPLE: &[StepTemplate] = &[
    step("Research and analyze requirements", "Clarify what is needed", 1.0, &[]),
    step("Implement the feature", "Write the code", 4.0, &[0]),
    step("Test and validate the change", "Verify behaviour", 2.0, &[1]),
];

const MEDIUM: &[StepTemplate] = &[
    step("Research and analyze requirements", "Collect requirements and constraints", 2.0, &[]),
    step("Design the architecture", "Choose the structure and interfaces", 4.0, &[0]),
    step("Implement core module", "Build the main functionality", 8.0, &[1]),
    step("Build integration endpoint", "Connect the new code to existing systems", 4.0, &[1]),
    step("Write test coverage", "Cover the new behaviour with tests", 4.0, &[2, 3]),
    step("Code review for readability", "Review the change against standards", 2.0, &[4]),
];

const COMPLEX: &[StepTemplate] = &[
    step("Research and analyze requirements", "Investigate the problem space", 4.0, &[]),
    step("Design the architecture", "Produce the system design", 8.0, &[0]),
    step("Security audit of the design", "Review the design for threats", 4.0, &[1]),
    step("Data modeling and database schema", "Define storage and schema", 6.0, &[1]),
    step("Implement core module", "Build the core components", 16.0, &[1, 3]),
    step("Build integration endpoint", "Integrate components and services", 12.0, &[4]),
    step("Performance profiling and latency check", "Measure and tune hot paths", 6.0, &[5]),
    step("Write test coverage", "Unit and integration tests", 8.0, &[5]),
    step("Code review for readability", "Final review before merge", 4.0, &[2, 6, 7]),
];

const EPIC: &[StepTemplate] = &[
    step("Research and discovery", "Survey the domain and options", 8.0, &[]),
    step("Research and analyze requirements", "Agree on scope and requirements", 8.0, &[0]),
    step("Design the architecture", "Design the overall platform", 16.0, &[1]),
    step("Threat analysis and security hardening", "Threat model and controls", 6.0, &[2]),
    step("Data migration plan", "Plan data movement and schema", 8.0, &[2]),
    step("Infrastructure and deployment pipeline", "Provision environments and CI", 8.0, &[2]),
    step("Implement core module", "Build the platform core", 32.0, &[2, 4]),
    step("Build integration endpoint", "Integrate services end to end", 16.0, &[5, 6]),
    step("User interface and frontend", "Build the user-facing surface", 20.0, &[6]),
    step("Performance profiling and latency check", "Load and latency testing", 8.0, &[7]),
    step("Write test coverage", "End-to-end test suite", 12.0, &[7, 8]),
    step("Release deployment and monitoring", "Roll out and watch", 6.0, &[3, 9, 10]),
];

/// Template for a complexity level.
#[must_use]
pub fn template_for(level: Complexity) -> &'static [StepTemplate] {
    match level {
        Complexity::Trivial => TRIVIAL,
        Complexity::Simple => SIMPLE,
        Complexity::Medium => MEDIUM,
        Complexity::Complex => COMPLEX,
        Complexity::Epic => EPIC,
    }
}

/// Sprint size for [`Strategy::IterativeRefinement`].
pub const SPRINT_SIZE: usize = 3;

/// Dependency indices per step after applying `strategy`.
///
/// [`Strategy::SingleUnit`] is handled by the caller (the template collapses
/// to one step); here it keeps no edges.
#[must_use]
pub fn dependencies_for(strategy: Strategy, steps: &[StepTemplate]) -> Vec<Vec<usize>> {
    let n = steps.len();
    match strategy {
        Strategy::SingleUnit => vec![Vec::new(); n],
        Strategy::SequentialPipeline => (0..n)
            .map(|i| if i == 0 { Vec::new() } else { vec![i - 1] })
            .collect(),
        Strategy::ParallelFanOut => {
            if n < 3 {
                return dependencies_for(Strategy::SequentialPipeline, steps);
            }
            let last = n - 1;
            (0..n)
                .map(|i| match i {
                    0 => Vec::new(),
                    i if i == last => (1..last).collect(),
                    _ => vec![0],
                })
                .collect()
        }
        Strategy::IterativeRefinement => (0..n)
            .map(|i| {
                let sprint = i / SPRINT_SIZE;
                if sprint == 0 {
                    Vec::new()
                } else {
                    let start = (sprint - 1) * SPRINT_SIZE;
                    (start..start + SPRINT_SIZE).collect()
                }
            })
            .collect(),
        Strategy::Hybrid => steps.iter().map(|s| s.depends_on.to_vec()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentRole;

    #[test]
    fn test_template_sizes() {
        let sizes: Vec<usize> = Complexity::ALL.iter().map(|c| template_for(*c).len()).collect();
        assert_eq!(sizes, vec![1, 3, 6, 9, 12]);
    }

    #[test]
    fn test_template_edges_point_backwards() {
        for level in Complexity::ALL {
            for (i, step) in template_for(level).iter().enumerate() {
                assert!(step.depends_on.iter().all(|d| *d < i), "{level} step {i}");
            }
        }
    }

    #[test]
    fn test_titles_assign_expected_roles() {
        let roles: Vec<AgentRole> = template_for(Complexity::Medium)
            .iter()
            .map(|s| AgentRole::best_match(s.title))
            .collect();
        assert_eq!(
            roles,
            vec![
                AgentRole::Researcher,
                AgentRole::Architect,
                AgentRole::Engineer,
                AgentRole::Engineer,
                AgentRole::QA,
                AgentRole::CodeReviewEngineer,
            ]
        );
    }

    #[test]
    fn test_parallel_shape() {
        let deps = dependencies_for(Strategy::ParallelFanOut, template_for(Complexity::Medium));
        assert_eq!(deps[0], Vec::<usize>::new());
        assert_eq!(deps[2], vec![0]);
        assert_eq!(deps[5], vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_iterative_sprints() {
        let deps = dependencies_for(Strategy::IterativeRefinement, template_for(Complexity::Medium));
        assert!(deps[..3].iter().all(Vec::is_empty));
        assert_eq!(deps[4], vec![0, 1, 2]);
    }

    #[test]
    fn test_sequential_chain() {
        let deps = dependencies_for(Strategy::SequentialPipeline, template_for(Complexity::Simple));
        assert_eq!(deps, vec![vec![], vec![0], vec![1]]);
    }
}
