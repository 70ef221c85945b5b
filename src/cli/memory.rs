//! Memory CLI commands
//!
//! `conductor patterns` : learned patterns, most reliable first
//! `conductor teach`    : write a record into organizational memory

use super::TeachArgs;
use crate::config::AppConfig;
use crate::runtime::Runtime;
use anyhow::{Context, Result};
use conductor_core::learning::keys;
use conductor_memory::{MemoryRecord, SecurityLevel};

pub async fn patterns(config: AppConfig, limit: usize) -> Result<()> {
    let runtime = Runtime::build(&config).await?;
    let patterns = runtime
        .learning
        .patterns(limit)
        .await
        .context("Failed to load learned patterns")?;
    let total = runtime.store.count().await.context("Failed to count records")?;

    if patterns.is_empty() {
        println!("No learned patterns yet ({total} record(s) in memory).");
        return Ok(());
    }

    println!("\n📚 Learned patterns ({total} record(s) in memory)");
    println!("─────────────────────────");
    for pattern in &patterns {
        let successes = pattern.counter(keys::SUCCESS_COUNT);
        let samples = pattern.counter(keys::SAMPLE_COUNT);
        let strategy = pattern
            .metadata
            .get(keys::STRATEGY)
            .and_then(|v| v.as_str())
            .unwrap_or("-");
        println!(
            "  {:>4.0}%  {successes}/{samples}  {:<20}  {}",
            pattern.score * 100.0,
            strategy,
            pattern.title
        );
        if pattern.has_tag("error_prone") {
            println!("         ⚠️  error prone");
        }
    }
    Ok(())
}

pub async fn teach(config: AppConfig, args: TeachArgs) -> Result<()> {
    let runtime = Runtime::build(&config).await?;

    let mut record = MemoryRecord::new(args.category, &args.title, &args.content)
        .with_tags(args.tags.iter().cloned())
        .with_security(SecurityLevel::from(args.security));
    if let Some(project) = &args.project {
        record = record.with_project(project.clone());
    }

    let id = runtime
        .context
        .teach(record)
        .await
        .context("Failed to write memory record")?;
    println!("Taught {} record {id}: {}", args.category, args.title);
    Ok(())
}
