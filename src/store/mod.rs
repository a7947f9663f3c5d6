//! State Store (C5) — WAL-backed SQLite persistence for Execution State.
//!
//! Durability has two goals: fast reads during a live execution (served from
//! an in-memory per-execution cache) and at-least-once persistence for
//! post-mortem inspection and resumption. All writes funnel through a single
//! async writer task draining a queue serially against one connection, so no
//! two transactions ever interleave.

mod cache;
mod schema;
mod writer;

pub use cache::ExecutionState;

use crate::envelope::{deserialize_protocol, serialize_protocol, Envelope};
use crate::tracker::TokenUsage;
use crate::types::{Config, DiagramId, Error, ExecutionId, NodeId, Result, StateStoreConfig};
use cache::Cache;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use writer::Writer;

/// One row of `list_executions`.
#[derive(Debug, Clone)]
pub struct ExecutionSummaryRow {
    pub execution_id: ExecutionId,
    pub diagram_id: Option<DiagramId>,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// WAL-backed SQLite store of Execution State, fronted by an in-memory
/// per-execution cache and a single-writer persistence queue.
#[derive(Debug)]
pub struct StateStore {
    pool: SqlitePool,
    cache: Cache,
    writer: Writer,
    config: StateStoreConfig,
}

impl StateStore {
    /// Opens (creating if absent) the SQLite database at `config.db_path`,
    /// applies the WAL pragmas, runs the idempotent `metrics` migration, and
    /// starts the single writer task.
    pub async fn open(config: StateStoreConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", config.db_path))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms as u64))
            .pragma("cache_size", format!("-{}", config.cache_size_bytes / 1024))
            .pragma("temp_store", "memory")
            .pragma("mmap_size", config.mmap_size_bytes.to_string());

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        schema::migrate(&pool).await?;

        Ok(Self {
            writer: Writer::new(pool.clone(), config.max_retries, config.retry_base_delay),
            pool,
            cache: Cache::new(),
            config,
        })
    }

    /// Convenience constructor reading `config.state_store` off a full
    /// engine `Config`.
    pub async fn from_config(config: &Config) -> Result<Self> {
        Self::open(config.state_store.clone()).await
    }

    pub fn config(&self) -> &StateStoreConfig {
        &self.config
    }

    /// Creates a fresh Execution State (cache + DB row) for `id`.
    pub async fn create_execution(
        &self,
        id: ExecutionId,
        diagram_id: Option<DiagramId>,
        variables: Option<Value>,
    ) -> Result<ExecutionState> {
        let state = ExecutionState::new(id.clone(), diagram_id, variables.unwrap_or(Value::Null));
        self.cache.insert(state.clone());
        self.writer.enqueue_insert(state.clone()).await?;
        Ok(state)
    }

    /// Persists `state` as-is, refreshing the cache entry.
    pub async fn save_state(&self, state: ExecutionState) -> Result<()> {
        self.cache.insert(state.clone());
        self.writer.enqueue_upsert(state).await
    }

    /// Cache-first read; falls back to the database for an execution not
    /// (or no longer) resident in memory.
    pub async fn get_state(&self, id: &ExecutionId) -> Result<Option<ExecutionState>> {
        if let Some(state) = self.cache.get(id) {
            return Ok(Some(state));
        }
        self.load_from_db(id).await
    }

    pub async fn update_status(&self, id: &ExecutionId, status: impl Into<String>, error: Option<String>) -> Result<()> {
        let status = status.into();
        let is_terminal = matches!(status.as_str(), "COMPLETED" | "FAILED" | "ABORTED");
        let state = self
            .cache
            .update(id, |state| {
                state.status = status.clone();
                state.error = error.clone();
                if is_terminal {
                    state.ended_at = Some(Utc::now());
                }
            })
            .ok_or_else(|| Error::not_found(format!("execution {id} not in cache")))?;

        self.writer.enqueue_upsert(state.clone()).await?;
        if is_terminal {
            self.persist_final_state(id).await?;
        }
        Ok(())
    }

    /// Records `output` for `node_id`, auto-wrapping non-envelope values
    /// (or an exception message) into a text/error envelope the way a
    /// handler's raw return value would be wrapped by the engine.
    pub async fn update_node_output(
        &self,
        id: &ExecutionId,
        node_id: &NodeId,
        output: Envelope,
        is_exception: bool,
        llm_usage: Option<TokenUsage>,
    ) -> Result<()> {
        let output = if is_exception && !output.is_error() {
            output.with_error(
                output.as_text().unwrap_or_default(),
                "NodeException".to_string(),
            )
        } else {
            output
        };

        let state = self
            .cache
            .update(id, |state| {
                state.node_outputs.insert(node_id.clone(), output.clone());
                if let Some(usage) = &llm_usage {
                    state.llm_usage.add(usage);
                }
            })
            .ok_or_else(|| Error::not_found(format!("execution {id} not in cache")))?;

        self.writer.enqueue_upsert(state).await
    }

    /// Mirrors tracker transition rules; appends to `executed_nodes` the
    /// first time `node_id` goes RUNNING.
    pub async fn update_node_status(
        &self,
        id: &ExecutionId,
        node_id: &NodeId,
        status: impl Into<String>,
        error: Option<String>,
    ) -> Result<()> {
        let status = status.into();
        let state = self
            .cache
            .update(id, |state| {
                if status == "RUNNING" && !state.executed_nodes.contains(node_id) {
                    state.executed_nodes.push(node_id.clone());
                    *state.exec_counts.entry(node_id.clone()).or_insert(0) += 1;
                }
                state.node_states.insert(node_id.clone(), status.clone());
                if let Some(error) = &error {
                    state.node_errors.insert(node_id.clone(), error.clone());
                } else {
                    state.node_errors.remove(node_id);
                }
            })
            .ok_or_else(|| Error::not_found(format!("execution {id} not in cache")))?;

        self.writer.enqueue_upsert(state).await
    }

    pub async fn get_node_output(&self, id: &ExecutionId, node_id: &NodeId) -> Result<Option<Envelope>> {
        Ok(self
            .get_state(id)
            .await?
            .and_then(|state| state.node_outputs.get(node_id).cloned()))
    }

    pub async fn update_variables(&self, id: &ExecutionId, variables: Value) -> Result<()> {
        let state = self
            .cache
            .update(id, |state| state.variables = variables.clone())
            .ok_or_else(|| Error::not_found(format!("execution {id} not in cache")))?;
        self.writer.enqueue_upsert(state).await
    }

    pub async fn update_metrics(&self, id: &ExecutionId, metrics: Value) -> Result<()> {
        let state = self
            .cache
            .update(id, |state| state.metrics = Some(metrics.clone()))
            .ok_or_else(|| Error::not_found(format!("execution {id} not in cache")))?;
        self.writer.enqueue_upsert(state).await
    }

    pub async fn add_llm_usage(&self, id: &ExecutionId, usage: TokenUsage) -> Result<()> {
        let state = self
            .cache
            .update(id, |state| state.llm_usage.add(&usage))
            .ok_or_else(|| Error::not_found(format!("execution {id} not in cache")))?;
        self.writer.enqueue_upsert(state).await
    }

    /// Lists executions newest-first, optionally filtered by diagram/status.
    pub async fn list_executions(
        &self,
        diagram_id: Option<&DiagramId>,
        status: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ExecutionSummaryRow>> {
        let rows = sqlx::query(
            r#"
            SELECT execution_id, diagram_id, status, started_at, ended_at
            FROM execution_states
            WHERE ($1 IS NULL OR diagram_id = $1)
              AND ($2 IS NULL OR status = $2)
            ORDER BY started_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(diagram_id.map(|d| d.to_string()))
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let execution_id: String = row.get("execution_id");
                let diagram_id: Option<String> = row.get("diagram_id");
                Ok(ExecutionSummaryRow {
                    execution_id: ExecutionId::from_string(execution_id)
                        .map_err(|e| Error::internal(e.to_string()))?,
                    diagram_id: diagram_id.map(DiagramId::from),
                    status: row.get("status"),
                    started_at: row.get("started_at"),
                    ended_at: row.get("ended_at"),
                })
            })
            .collect()
    }

    /// Deletes execution rows older than `days`, then reclaims space.
    pub async fn cleanup_old_states(&self, days: i64) -> Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::days(days);
        let result = sqlx::query("DELETE FROM execution_states WHERE started_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Flushes the cached state for `id` to the database and evicts it —
    /// called automatically by `update_status` on reaching a terminal
    /// status.
    pub async fn persist_final_state(&self, id: &ExecutionId) -> Result<()> {
        if let Some(state) = self.cache.remove(id) {
            self.writer.enqueue_upsert_and_wait(state).await?;
        }
        Ok(())
    }

    /// Drains the writer queue and closes the pool. Call before process
    /// shutdown so no enqueued write is lost.
    pub async fn shutdown(self) -> Result<()> {
        self.writer.shutdown().await;
        self.pool.close().await;
        Ok(())
    }

    async fn load_from_db(&self, id: &ExecutionId) -> Result<Option<ExecutionState>> {
        let row = sqlx::query("SELECT * FROM execution_states WHERE execution_id = $1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            None => Ok(None),
            Some(row) => Ok(Some(cache::row_to_state(&row)?)),
        }
    }
}

pub(crate) fn envelope_to_json(envelope: &Envelope) -> Value {
    serde_json::to_value(serialize_protocol(envelope)).unwrap_or(Value::Null)
}

pub(crate) fn json_to_envelope(value: &Value) -> Result<Envelope> {
    deserialize_protocol(value)
}
