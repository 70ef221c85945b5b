//! CLI module for Conductor
//!
//! - `plan`, `run`, `resume`, `checkpoints`: task workflow
//! - `patterns`, `teach`: organizational memory

use crate::config::AppConfig;
use clap::{Args, Parser, Subcommand, ValueEnum};
use conductor_memory::{MemoryCategory, SecurityLevel};

pub mod memory;
pub mod task;

/// Conductor CLI
#[derive(Parser, Debug)]
#[command(name = "conductor")]
#[command(about = "Memory-augmented multi-agent orchestration")]
#[command(version)]
pub struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Decompose a task and show the plan without running it
    Plan(TaskArgs),
    /// Plan and execute a task
    Run {
        #[command(flatten)]
        task: TaskArgs,
        /// Skip the approval prompt
        #[arg(long)]
        auto_approve: bool,
    },
    /// Continue a task from its last checkpoint
    Resume {
        /// Task id
        task_id: uuid::Uuid,
        /// Skip the approval prompt
        #[arg(long)]
        auto_approve: bool,
    },
    /// List stored checkpoints
    Checkpoints {
        /// Remove finished checkpoints past the retention period
        #[arg(long)]
        cleanup: bool,
    },
    /// Show learned patterns, most reliable first
    Patterns {
        /// Maximum number of patterns
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Write a record into organizational memory
    Teach(TeachArgs),
}

#[derive(Args, Debug)]
pub struct TaskArgs {
    /// What needs to be done
    #[arg(required = true, num_args = 1..)]
    pub description: Vec<String>,
    /// Project the task belongs to
    #[arg(long)]
    pub project: Option<String>,
    /// Tags describing the task
    #[arg(long = "tag")]
    pub tags: Vec<String>,
    /// Priority from 1 (low) to 10 (high)
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub priority: u8,
}

impl TaskArgs {
    pub fn description(&self) -> String {
        self.description.join(" ")
    }
}

#[derive(Args, Debug)]
pub struct TeachArgs {
    /// Record category (project, pattern, team, error)
    #[arg(long, value_parser = parse_category)]
    pub category: MemoryCategory,
    #[arg(long)]
    pub title: String,
    #[arg(long)]
    pub content: String,
    #[arg(long = "tag")]
    pub tags: Vec<String>,
    #[arg(long)]
    pub project: Option<String>,
    /// Who may read the record
    #[arg(long, value_enum, default_value_t = Visibility::TeamOnly)]
    pub security: Visibility,
}

fn parse_category(raw: &str) -> Result<MemoryCategory, String> {
    raw.parse().map_err(|e: conductor_memory::Error| e.to_string())
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Visibility {
    Public,
    TeamOnly,
    Sensitive,
    Confidential,
}

impl From<Visibility> for SecurityLevel {
    fn from(v: Visibility) -> Self {
        match v {
            Visibility::Public => Self::Public,
            Visibility::TeamOnly => Self::TeamOnly,
            Visibility::Sensitive => Self::Sensitive,
            Visibility::Confidential => Self::Confidential,
        }
    }
}

/// Run the CLI command
pub async fn run(command: Option<Commands>, config: AppConfig) -> anyhow::Result<()> {
    match command {
        Some(Commands::Plan(args)) => task::plan(config, args).await,
        Some(Commands::Run { task, auto_approve }) => task::run(config, task, auto_approve).await,
        Some(Commands::Resume {
            task_id,
            auto_approve,
        }) => task::resume(config, task_id, auto_approve).await,
        Some(Commands::Checkpoints { cleanup }) => task::checkpoints(config, cleanup).await,
        Some(Commands::Patterns { limit }) => memory::patterns(config, limit).await,
        Some(Commands::Teach(args)) => memory::teach(config, args).await,
        None => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            cmd.print_help()?;
            println!();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        <Cli as clap::CommandFactory>::command().debug_assert();
    }

    #[test]
    fn test_run_arguments() {
        let cli = Cli::try_parse_from([
            "conductor",
            "--json",
            "run",
            "Add",
            "pagination",
            "--project",
            "orders",
            "--auto-approve",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Some(Commands::Run { task, auto_approve }) => {
                assert!(auto_approve);
                assert_eq!(task.description(), "Add pagination");
                assert_eq!(task.project.as_deref(), Some("orders"));
                assert_eq!(task.priority, 5);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_teach_arguments() {
        let cli = Cli::try_parse_from([
            "conductor",
            "teach",
            "--category",
            "pattern",
            "--title",
            "Cursor pagination",
            "--content",
            "Prefer cursors over offsets",
            "--tag",
            "best_practice",
            "--security",
            "public",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Teach(args)) => {
                assert_eq!(args.category, MemoryCategory::Pattern);
                assert_eq!(args.tags, vec!["best_practice".to_string()]);
                assert_eq!(SecurityLevel::from(args.security), SecurityLevel::Public);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_category_rejected() {
        let parsed = Cli::try_parse_from([
            "conductor", "teach", "--category", "gossip", "--title", "t", "--content", "c",
        ]);
        assert!(parsed.is_err());
    }
}
