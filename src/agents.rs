//! Built-in agents
//!
//! `WorkspaceNoteAgent` records each subtask it receives as a markdown note in
//! its leased workspace, listing the memory it was given and the messages
//! other roles left for it. It lets the whole dispatch path run end to end
//! without a model behind it.

use async_trait::async_trait;
use conductor_core::coordinator::{AgentMessage, MessageKind};
use conductor_core::{
    Agent, AgentError, AgentRegistry, AgentRole, ContextBundle, MessageBus, Subtask,
    SubtaskOutput, WorkspaceHandle,
};
use serde_json::json;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::debug;

pub struct WorkspaceNoteAgent {
    role: AgentRole,
    bus: Arc<MessageBus>,
}

impl WorkspaceNoteAgent {
    pub fn new(role: AgentRole, bus: Arc<MessageBus>) -> Self {
        Self { role, bus }
    }

    fn render(&self, subtask: &Subtask, context: &ContextBundle, inbox: &[AgentMessage]) -> String {
        let mut note = String::new();
        let _ = writeln!(note, "# {}\n", subtask.title);
        let _ = writeln!(note, "- role: {}", self.role);
        let _ = writeln!(note, "- subtask: {}", subtask.id);
        let _ = writeln!(note, "- priority: {}", subtask.priority);
        let _ = writeln!(note, "\n{}\n", subtask.description);
        if context.role_view.is_empty() {
            let _ = writeln!(note, "No relevant memory.");
        } else {
            let _ = writeln!(note, "## Context\n");
            for scored in &context.role_view {
                let _ = writeln!(
                    note,
                    "- [{}] {} ({:.2})",
                    scored.record.category, scored.record.title, scored.score
                );
            }
        }
        if !inbox.is_empty() {
            let _ = writeln!(note, "\n## Messages\n");
            for msg in inbox {
                let _ = writeln!(note, "- from {}: {}", msg.from, msg.payload);
            }
        }
        note
    }
}

#[async_trait]
impl Agent for WorkspaceNoteAgent {
    fn role(&self) -> AgentRole {
        self.role
    }

    async fn execute(
        &self,
        subtask: &Subtask,
        context: &ContextBundle,
        workspace: &WorkspaceHandle,
    ) -> Result<SubtaskOutput, AgentError> {
        let inbox = self.bus.receive(subtask.task_id, self.role).await;
        let note = self.render(subtask, context, &inbox);
        let path = match &workspace.path {
            Some(dir) => {
                let path = dir.join(format!("{}.md", subtask.id));
                tokio::fs::write(&path, &note)
                    .await
                    .map_err(|e| AgentError::Execution(format!("{}: {e}", path.display())))?;
                debug!(subtask_id = %subtask.id, path = %path.display(), "note written");
                Some(path.display().to_string())
            }
            None => None,
        };

        if self.role != AgentRole::QA {
            self.bus
                .send(AgentMessage::new(
                    subtask.task_id,
                    self.role,
                    AgentRole::QA,
                    MessageKind::Handoff,
                    json!({ "subtask": subtask.title, "note": path }),
                ))
                .await;
        }

        let context_titles: Vec<&str> = context
            .role_view
            .iter()
            .map(|scored| scored.record.title.as_str())
            .collect();
        Ok(SubtaskOutput {
            summary: format!("{} noted by {}", subtask.title, self.role),
            data: json!({
                "note": path,
                "context_records": context_titles,
                "messages_read": inbox.len(),
            }),
            tags: vec![self.role.as_str().to_string()],
        })
    }
}

/// One note agent per role, all on `bus`.
pub fn note_agents(bus: &Arc<MessageBus>) -> AgentRegistry {
    AgentRole::ALL
        .iter()
        .fold(AgentRegistry::new(), |registry, role| {
            registry.with_agent(Arc::new(WorkspaceNoteAgent::new(*role, Arc::clone(bus))))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::Task;
    use uuid::Uuid;

    fn subtask(task: &Task) -> Subtask {
        Subtask::new(task.id, "Write tests", "Cover the pagination edge cases", AgentRole::QA)
    }

    #[tokio::test]
    async fn test_note_written_into_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let task = Task::new("Add pagination to the orders API");
        let subtask = subtask(&task);
        let workspace = WorkspaceHandle::new(task.id, Some(dir.path().to_path_buf()));
        let agent = WorkspaceNoteAgent::new(AgentRole::QA, Arc::new(MessageBus::default()));

        let output = agent
            .execute(&subtask, &ContextBundle::empty(task.id, AgentRole::QA), &workspace)
            .await
            .unwrap();

        let written = std::fs::read_to_string(dir.path().join(format!("{}.md", subtask.id))).unwrap();
        assert!(written.starts_with("# Write tests"));
        assert!(written.contains("No relevant memory."));
        assert!(output.summary.contains("qa"));
        assert!(output.data["note"].is_string());
    }

    #[tokio::test]
    async fn test_no_directory_still_succeeds() {
        let task = Task::new("Add pagination to the orders API");
        let workspace = WorkspaceHandle::new(task.id, None);
        let agent = WorkspaceNoteAgent::new(AgentRole::QA, Arc::new(MessageBus::default()));

        let output = agent
            .execute(&subtask(&task), &ContextBundle::empty(Uuid::new_v4(), AgentRole::QA), &workspace)
            .await
            .unwrap();
        assert!(output.data["note"].is_null());
    }

    #[tokio::test]
    async fn test_handoff_reaches_qa_note() {
        let dir = tempfile::tempdir().unwrap();
        let bus = Arc::new(MessageBus::default());
        let task = Task::new("Add pagination to the orders API");
        let workspace = WorkspaceHandle::new(task.id, Some(dir.path().to_path_buf()));

        let build = Subtask::new(task.id, "Build endpoint", "Cursor pagination", AgentRole::Engineer);
        WorkspaceNoteAgent::new(AgentRole::Engineer, bus.clone())
            .execute(&build, &ContextBundle::empty(task.id, AgentRole::Engineer), &workspace)
            .await
            .unwrap();
        assert_eq!(bus.pending_count(task.id, AgentRole::QA).await, 1);

        let check = subtask(&task);
        let output = WorkspaceNoteAgent::new(AgentRole::QA, bus.clone())
            .execute(&check, &ContextBundle::empty(task.id, AgentRole::QA), &workspace)
            .await
            .unwrap();

        assert_eq!(output.data["messages_read"], 1);
        let written = std::fs::read_to_string(dir.path().join(format!("{}.md", check.id))).unwrap();
        assert!(written.contains("## Messages"));
        assert!(written.contains("from engineer"));
        assert_eq!(bus.pending_count(task.id, AgentRole::QA).await, 0);
    }

    #[test]
    fn test_every_role_has_an_agent() {
        let registry = note_agents(&Arc::new(MessageBus::default()));
        assert_eq!(registry.len(), AgentRole::ALL.len());
        assert_eq!(registry.roles(), AgentRole::ALL.to_vec());
    }
}
