//! Dependency graph validation (Kahn's algorithm).

use super::PlanError;
use crate::task::{Subtask, SubtaskId};
use std::collections::{HashMap, VecDeque};

/// Topological order of `subtasks`, or the subtasks left on a cycle.
///
/// Among ready subtasks the input order is kept.
pub fn topological_order(subtasks: &[Subtask]) -> Result<Vec<SubtaskId>, PlanError> {
    let index: HashMap<SubtaskId, usize> =
        subtasks.iter().enumerate().map(|(i, s)| (s.id, i)).collect();

    let mut in_degree = vec![0usize; subtasks.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); subtasks.len()];
    for (i, subtask) in subtasks.iter().enumerate() {
        for dep in &subtask.dependencies {
            let Some(&d) = index.get(dep) else {
                return Err(PlanError::UnknownDependency {
                    subtask_id: subtask.id,
                    dependency_id: *dep,
                });
            };
            in_degree[i] += 1;
            dependents[d].push(i);
        }
    }

    let mut ready: VecDeque<usize> = (0..subtasks.len()).filter(|i| in_degree[*i] == 0).collect();
    let mut order = Vec::with_capacity(subtasks.len());
    while let Some(i) = ready.pop_front() {
        order.push(subtasks[i].id);
        for &next in &dependents[i] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push_back(next);
            }
        }
    }

    if order.len() != subtasks.len() {
        let stuck = subtasks
            .iter()
            .enumerate()
            .filter(|(i, _)| in_degree[*i] > 0)
            .map(|(_, s)| s.id)
            .collect();
        return Err(PlanError::Cycle(stuck));
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentRole;
    use uuid::Uuid;

    fn subtask(title: &str) -> Subtask {
        Subtask::new(Uuid::nil(), title, title, AgentRole::Engineer)
    }

    #[test]
    fn test_orders_chain() {
        let a = subtask("a");
        let b = subtask("b").depends_on(a.id);
        let c = subtask("c").depends_on(b.id);
        let order = topological_order(&[c.clone(), a.clone(), b.clone()]).unwrap();
        assert_eq!(order, vec![a.id, b.id, c.id]);
    }

    #[test]
    fn test_detects_cycle() {
        let mut a = subtask("a");
        let b = subtask("b").depends_on(a.id);
        a.dependencies.insert(b.id);
        let c = subtask("c");
        match topological_order(&[a.clone(), b.clone(), c]) {
            Err(PlanError::Cycle(stuck)) => {
                assert_eq!(stuck.len(), 2);
                assert!(stuck.contains(&a.id) && stuck.contains(&b.id));
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_dependency() {
        let a = subtask("a").depends_on(Uuid::new_v4());
        assert!(matches!(
            topological_order(&[a]),
            Err(PlanError::UnknownDependency { .. })
        ));
    }
}
