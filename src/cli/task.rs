//! Task workflow commands
//!
//! `conductor plan`        : decompose and estimate without running
//! `conductor run`         : plan, approve, execute and learn
//! `conductor resume`      : continue from the last checkpoint
//! `conductor checkpoints` : list or clean up stored checkpoints

use super::TaskArgs;
use crate::config::AppConfig;
use crate::runtime::Runtime;
use anyhow::{Context, Result};
use conductor_core::{
    format_error_for_cli, Checkpoint, Error, OrchestrationEvent, Task, TaskId,
    TaskResult, WorkflowEngine,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

fn build_task(args: &TaskArgs) -> Task {
    let mut task = Task::new(args.description())
        .with_priority(args.priority)
        .with_tags(args.tags.iter().cloned());
    if let Some(project) = &args.project {
        task = task.with_project(project.clone());
    }
    task
}

fn confirm(prompt: &str) -> bool {
    use std::io::{self, Write};
    print!("{prompt} [y/N] ");
    io::stdout().flush().ok();
    let mut input = String::new();
    if io::stdin().read_line(&mut input).is_ok() {
        matches!(input.trim(), "y" | "Y" | "yes" | "YES")
    } else {
        false
    }
}

/// Turn a workflow error into a CLI error with the user-facing message.
fn explain(e: Error) -> anyhow::Error {
    anyhow::anyhow!(format_error_for_cli(&e))
}

// ── Plan ─────────────────────────────────────────────────────────────

pub async fn plan(config: AppConfig, args: TaskArgs) -> Result<()> {
    let runtime = Runtime::build(&config).await?;
    let workflow = &runtime.workflow;

    let task_id = workflow.submit(build_task(&args)).await.map_err(explain)?;
    let checkpoint = workflow.plan(task_id).await.map_err(explain)?;
    print_plan(&checkpoint);
    println!("\nRun it with: conductor resume {task_id}");
    Ok(())
}

fn print_plan(checkpoint: &Checkpoint) {
    let Some(plan) = &checkpoint.plan else {
        println!("No plan recorded for {}", checkpoint.task_id());
        return;
    };

    println!("\n🧭 {}", checkpoint.task.description);
    println!("─────────────────────────");
    println!("  Task:        {}", checkpoint.task_id());
    println!("  Complexity:  {}", plan.complexity.level);
    println!("  Strategy:    {}", plan.strategy.as_str());
    println!("  Confidence:  {:.0}%", plan.confidence * 100.0);
    if !plan.similar_tasks.is_empty() {
        println!("  Similar:     {} past task(s)", plan.similar_tasks.len());
    }

    println!("\n  Subtasks:");
    for (index, subtask) in plan.subtasks.iter().enumerate() {
        let after: Vec<String> = subtask
            .dependencies
            .iter()
            .filter_map(|dep| plan.subtasks.iter().position(|s| s.id == *dep))
            .map(|pos| (pos + 1).to_string())
            .collect();
        let after = if after.is_empty() {
            String::new()
        } else {
            format!(" (after {})", after.join(", "))
        };
        println!(
            "  {:>2}. [{}] {}{}",
            index + 1,
            subtask.role,
            subtask.title,
            after
        );
    }

    if let Some(estimate) = &checkpoint.estimate {
        println!(
            "\n  Estimate:    ${:.2}, ~{} min",
            estimate.cost_usd, estimate.duration_minutes
        );
        if estimate.requires_approval {
            println!("  ⚠️  Approval required:");
            for reason in &estimate.approval_reasons {
                println!("     - {reason}");
            }
        }
    }
}

// ── Run / Resume ─────────────────────────────────────────────────────

pub async fn run(mut config: AppConfig, args: TaskArgs, auto_approve: bool) -> Result<()> {
    config.workflow.auto_approve |= auto_approve;
    let runtime = Runtime::build(&config).await?;
    let task_id = runtime
        .workflow
        .submit(build_task(&args))
        .await
        .map_err(explain)?;
    drive(&runtime, task_id, false).await
}

pub async fn resume(mut config: AppConfig, task_id: TaskId, auto_approve: bool) -> Result<()> {
    config.workflow.auto_approve |= auto_approve;
    let runtime = Runtime::build(&config).await?;
    let checkpoint = runtime.workflow.checkpoint(task_id).await.map_err(explain)?;
    println!(
        "Resuming {} from {} ({} subtask(s) already done)",
        task_id,
        checkpoint.state,
        checkpoint.completed().len()
    );
    drive(&runtime, task_id, true).await
}

async fn drive(runtime: &Runtime, task_id: TaskId, resuming: bool) -> Result<()> {
    let watcher = watch(
        runtime.events.subscribe(),
        Arc::clone(&runtime.workflow),
        task_id,
    );
    let outcome = if resuming {
        runtime.workflow.resume(task_id).await
    } else {
        runtime.workflow.run(task_id).await
    };
    watcher.abort();

    let checkpoint = runtime.workflow.checkpoint(task_id).await.map_err(explain)?;
    print_plan(&checkpoint);
    match outcome {
        Ok(result) => {
            print_result(&result);
            let stats = runtime.learning.stats().await;
            println!(
                "\n  Learning:    {} outcome(s), {} new / {} reinforced pattern(s), {} error record(s)",
                stats.outcomes_captured,
                stats.patterns_created,
                stats.patterns_reinforced,
                stats.error_records
            );
            if result.is_success() {
                Ok(())
            } else {
                anyhow::bail!("task {task_id} failed")
            }
        }
        Err(e) => Err(explain(e)),
    }
}

fn print_result(result: &TaskResult) {
    println!("\n  Results ({} ms):", result.duration_ms);
    for subtask in &result.subtask_results {
        let mark = if subtask.is_success() { "✅" } else { "❌" };
        let detail = match (&subtask.output, &subtask.failure) {
            (Some(output), _) => output.summary.clone(),
            (None, Some(failure)) => format!("{}: {}", failure.reason, failure.message),
            (None, None) => String::new(),
        };
        println!("  {mark} [{}] {detail}", subtask.role);
    }
    if let Some(failure) = &result.failure {
        println!("\n  ❌ {failure}");
    }
}

/// Print progress and answer approval requests while the task runs.
fn watch(
    mut rx: broadcast::Receiver<OrchestrationEvent>,
    workflow: Arc<WorkflowEngine>,
    task_id: TaskId,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return,
            };
            if event.task_id() != task_id {
                continue;
            }
            match event {
                OrchestrationEvent::TaskStateChanged { to, .. } => println!("  → {to}"),
                OrchestrationEvent::SubtaskStarted { role, attempt, .. } => {
                    println!("    ▶ {role} (attempt {attempt})");
                }
                OrchestrationEvent::ApprovalRequired {
                    estimated_cost_usd, ..
                } => {
                    let prompt = format!("Estimated cost ${estimated_cost_usd:.2}. Approve?");
                    let approved = tokio::task::spawn_blocking(move || confirm(&prompt))
                        .await
                        .unwrap_or(false);
                    let decided = if approved {
                        workflow.approve(task_id).await
                    } else {
                        workflow.reject(task_id).await
                    };
                    if let Err(e) = decided {
                        eprintln!("{}", format_error_for_cli(&e));
                    }
                }
                _ => {}
            }
        }
    })
}

// ── Checkpoints ──────────────────────────────────────────────────────

pub async fn checkpoints(config: AppConfig, cleanup: bool) -> Result<()> {
    let runtime = Runtime::build(&config).await?;
    let workflow = &runtime.workflow;

    if cleanup {
        let removed = workflow
            .cleanup()
            .await
            .context("Failed to clean up checkpoints")?;
        println!(
            "Removed {removed} finished checkpoint(s) older than {} days",
            config.workflow.checkpoint_retention_days
        );
        return Ok(());
    }

    let summaries = workflow.list().await.context("Failed to list checkpoints")?;
    if summaries.is_empty() {
        println!("No checkpoints.");
        return Ok(());
    }
    println!(
        "{:<36}  {:<18}  {:>3}  {:<20}  DESCRIPTION",
        "TASK", "STATE", "V", "UPDATED"
    );
    for summary in summaries {
        println!(
            "{:<36}  {:<18}  {:>3}  {:<20}  {}",
            summary.task_id,
            summary.state.as_str(),
            summary.version,
            summary.updated_at.format("%Y-%m-%d %H:%M:%S"),
            summary.description
        );
    }
    Ok(())
}
