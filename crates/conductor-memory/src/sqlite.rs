//! SqliteMemoryStore: SQLite persistence for memory records.
//!
//! Tables: `memory_records`, `memory_links`.

use crate::error::{Error, Result};
use crate::store::{finish_query, MemoryStore};
use crate::types::{MemoryFilter, MemoryLink, MemoryRecord, RecordId, SecurityLevel};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{Sqlite, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Row};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};
use uuid::Uuid;

const RECORD_COLUMNS: &str = "id, category, title, content, tags, score, security_rank, \
                              project, created_at, updated_at, metadata";

/// SQLite-backed memory store.
#[derive(Clone)]
pub struct SqliteMemoryStore {
    pool: SqlitePool,
}

impl SqliteMemoryStore {
    /// Open (or create) a store at the given path.
    pub async fn from_path(db_path: &std::path::Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Internal(format!("mkdir: {e}")))?;
        }
        let url = format!("sqlite:{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        // WAL keeps readers from blocking on the learning engine's writes
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&pool)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("Memory store initialized at {}", db_path.display());
        Ok(store)
    }

    /// In-memory store (for tests).
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.run_migrations().await?;
        debug!("In-memory sqlite memory store initialized");
        Ok(store)
    }

    // ── Migrations ──────────────────────────────────────────────

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS memory_records (
                id            TEXT PRIMARY KEY,
                category      TEXT NOT NULL,
                title         TEXT NOT NULL,
                content       TEXT NOT NULL,
                tags          TEXT NOT NULL DEFAULT '[]',
                score         REAL NOT NULL,
                security_rank INTEGER NOT NULL DEFAULT 0,
                project       TEXT,
                created_at    TEXT NOT NULL,
                updated_at    TEXT NOT NULL,
                metadata      TEXT NOT NULL DEFAULT '{}'
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_memory_category
             ON memory_records(category, security_rank)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_memory_project ON memory_records(project)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS memory_links (
                source TEXT NOT NULL REFERENCES memory_records(id),
                target TEXT NOT NULL REFERENCES memory_records(id),
                weight REAL NOT NULL,
                PRIMARY KEY (source, target)
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ── Rows ────────────────────────────────────────────────────

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<MemoryRecord> {
        let id: String = row.try_get("id")?;
        let category: String = row.try_get("category")?;
        let tags: String = row.try_get("tags")?;
        let metadata: String = row.try_get("metadata")?;
        let rank: i64 = row.try_get("security_rank")?;
        let created: String = row.try_get("created_at")?;
        let updated: String = row.try_get("updated_at")?;

        let security_level = u8::try_from(rank)
            .ok()
            .and_then(SecurityLevel::from_rank)
            .ok_or_else(|| Error::InvalidValue(format!("security rank {rank}")))?;

        Ok(MemoryRecord {
            id: parse_id(&id)?,
            category: category.parse()?,
            title: row.try_get("title")?,
            content: row.try_get("content")?,
            tags: serde_json::from_str::<BTreeSet<String>>(&tags)?,
            score: row.try_get("score")?,
            security_level,
            project: row.try_get("project")?,
            created_at: parse_time(&created)?,
            updated_at: parse_time(&updated)?,
            links: Vec::new(),
            metadata: serde_json::from_str::<BTreeMap<String, serde_json::Value>>(&metadata)?,
        })
    }

    async fn load_links(&self, record: &mut MemoryRecord) -> Result<()> {
        let rows = sqlx::query(
            "SELECT target, weight FROM memory_links WHERE source = ?1 ORDER BY target",
        )
        .bind(record.id.to_string())
        .fetch_all(&self.pool)
        .await?;

        record.links = rows
            .iter()
            .map(|row| {
                let target: String = row.try_get("target")?;
                Ok(MemoryLink {
                    target: parse_id(&target)?,
                    weight: row.try_get("weight")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(())
    }

    async fn exists(&self, id: RecordId) -> Result<bool> {
        let row = sqlx::query("SELECT 1 AS present FROM memory_records WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Delete a record and its outgoing/incoming links.
    pub async fn delete(&self, id: RecordId) -> Result<bool> {
        let key = id.to_string();
        sqlx::query("DELETE FROM memory_links WHERE source = ?1 OR target = ?1")
            .bind(&key)
            .execute(&self.pool)
            .await?;
        let res = sqlx::query("DELETE FROM memory_records WHERE id = ?1")
            .bind(&key)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }
}

fn parse_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| Error::InvalidValue(format!("record id '{raw}': {e}")))
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::InvalidValue(format!("timestamp '{raw}': {e}")))
}

#[async_trait]
impl MemoryStore for SqliteMemoryStore {
    async fn query(&self, filter: &MemoryFilter) -> Result<Vec<MemoryRecord>> {
        let mut qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new(format!("SELECT {RECORD_COLUMNS} FROM memory_records WHERE 1 = 1"));

        if !filter.categories.is_empty() {
            qb.push(" AND category IN (");
            let mut sep = qb.separated(", ");
            for category in &filter.categories {
                sep.push_bind(category.as_str());
            }
            sep.push_unseparated(")");
        }
        if let Some(max) = filter.max_security {
            qb.push(" AND security_rank <= ");
            qb.push_bind(i64::from(max.rank()));
        }
        if let Some(project) = &filter.project {
            qb.push(" AND (project = ");
            qb.push_bind(project.clone());
            if filter.include_global {
                qb.push(" OR project IS NULL");
            }
            qb.push(")");
        }
        qb.push(" ORDER BY updated_at DESC");

        let rows = qb.build().fetch_all(&self.pool).await?;

        // Tag and text constraints are evaluated in Rust against decoded rows
        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let record = Self::row_to_record(row)?;
            if filter.matches(&record) {
                records.push(record);
            }
        }
        let mut records = finish_query(records, filter);
        for record in &mut records {
            self.load_links(record).await?;
        }
        Ok(records)
    }

    async fn write(&self, record: MemoryRecord) -> Result<RecordId> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO memory_records
             (id, category, title, content, tags, score, security_rank, project,
              created_at, updated_at, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(id) DO UPDATE SET
                category = excluded.category,
                title = excluded.title,
                content = excluded.content,
                tags = excluded.tags,
                score = excluded.score,
                security_rank = excluded.security_rank,
                project = excluded.project,
                updated_at = excluded.updated_at,
                metadata = excluded.metadata",
        )
        .bind(record.id.to_string())
        .bind(record.category.as_str())
        .bind(&record.title)
        .bind(&record.content)
        .bind(serde_json::to_string(&record.tags)?)
        .bind(record.score)
        .bind(i64::from(record.security_level.rank()))
        .bind(&record.project)
        .bind(record.created_at.to_rfc3339())
        .bind(&now)
        .bind(serde_json::to_string(&record.metadata)?)
        .execute(&self.pool)
        .await?;

        for link in &record.links {
            if self.exists(link.target).await? {
                self.link(record.id, link.target, link.weight).await?;
            }
        }
        debug!(record_id = %record.id, category = %record.category, "memory record written");
        Ok(record.id)
    }

    async fn link(&self, from: RecordId, to: RecordId, weight: f64) -> Result<()> {
        if !self.exists(from).await? {
            return Err(Error::NotFound(from));
        }
        if !self.exists(to).await? {
            return Err(Error::NotFound(to));
        }
        sqlx::query(
            "INSERT INTO memory_links (source, target, weight) VALUES (?1, ?2, ?3)
             ON CONFLICT(source, target) DO UPDATE SET weight = excluded.weight",
        )
        .bind(from.to_string())
        .bind(to.to_string())
        .bind(weight.clamp(0.0, 1.0))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: RecordId) -> Result<Option<MemoryRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM memory_records WHERE id = ?1"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let mut record = Self::row_to_record(&row)?;
                self.load_links(&mut record).await?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn count(&self) -> Result<usize> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM memory_records")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("cnt")? as usize)
    }
}
