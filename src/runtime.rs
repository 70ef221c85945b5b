//! Component wiring
//!
//! Builds the stores, engines and agents a command needs from the resolved
//! configuration.

use crate::agents::note_agents;
use crate::config::{AppConfig, StorageBackend};
use anyhow::{Context, Result};
use conductor_core::{
    CheckpointStore, ContextEngine, Coordinator, EventBus, InMemoryCheckpointStore,
    LearningEngine, MessageBus, SqliteCheckpointStore, TaskPlanner, WorkflowEngine,
};
use conductor_memory::{InMemoryStore, MemoryStore, SqliteMemoryStore};
use std::sync::Arc;
use tracing::info;

const EVENT_CAPACITY: usize = 1024;

/// Everything a command can work with
pub struct Runtime {
    pub store: Arc<dyn MemoryStore>,
    pub context: Arc<ContextEngine>,
    pub learning: Arc<LearningEngine>,
    pub events: Arc<EventBus>,
    pub workflow: Arc<WorkflowEngine>,
}

impl Runtime {
    pub async fn build(config: &AppConfig) -> Result<Self> {
        let (store, checkpoints) = open_stores(config).await?;

        let events = Arc::new(EventBus::new(EVENT_CAPACITY));
        let context = Arc::new(ContextEngine::new(store.clone(), config.context.clone()));
        let messages = Arc::new(
            MessageBus::new(config.coordinator.max_message_history).with_events(events.clone()),
        );
        let registry = Arc::new(note_agents(&messages));
        let coordinator = Arc::new(
            Coordinator::new(
                config.coordinator.clone(),
                registry,
                context.clone(),
                config.provisioner.build(),
                events.clone(),
            )
            .with_messages(messages),
        );
        let learning = Arc::new(
            LearningEngine::new(context.clone(), config.learning.clone())
                .with_events(events.clone()),
        );
        let workflow = Arc::new(WorkflowEngine::new(
            config.workflow.clone(),
            TaskPlanner::new(config.planner.clone()),
            context.clone(),
            coordinator,
            learning.clone(),
            checkpoints,
            events.clone(),
        ));

        Ok(Self {
            store,
            context,
            learning,
            events,
            workflow,
        })
    }
}

async fn open_stores(
    config: &AppConfig,
) -> Result<(Arc<dyn MemoryStore>, Arc<dyn CheckpointStore>)> {
    match config.storage.backend {
        StorageBackend::Memory => {
            info!("Using in-process memory and checkpoint stores");
            Ok((
                Arc::new(InMemoryStore::new()),
                Arc::new(InMemoryCheckpointStore::new()),
            ))
        }
        StorageBackend::Sqlite => {
            let memory_path = config.storage.memory_path();
            let store = SqliteMemoryStore::from_path(&memory_path)
                .await
                .context("Failed to initialize SQLite memory store")?;
            info!("SQLite memory store initialized at {}", memory_path.display());

            let checkpoint_path = config.storage.checkpoint_path();
            let checkpoints = SqliteCheckpointStore::from_path(&checkpoint_path)
                .await
                .context("Failed to initialize SQLite checkpoint store")?;

            Ok((Arc::new(store), Arc::new(checkpoints)))
        }
    }
}
