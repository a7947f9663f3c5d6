//! The single async writer task persisting `ExecutionState` to SQLite.
//!
//! Every write — insert or upsert — is enqueued here rather than issued
//! directly against the pool, so no two writes ever race against the same
//! row. Connection errors get one reconnect attempt (the pool re-acquires
//! transparently) followed by up to `max_retries` linear-backoff retries.

use super::cache::{state_to_columns, ExecutionState};
use crate::types::{Error, Result};
use sqlx::SqlitePool;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

enum Job {
    Write(ExecutionState),
    WriteAndAck(ExecutionState, oneshot::Sender<Result<()>>),
    Shutdown(oneshot::Sender<()>),
}

#[derive(Debug)]
pub(crate) struct Writer {
    tx: mpsc::UnboundedSender<Job>,
}

impl Writer {
    pub(crate) fn new(pool: SqlitePool, max_retries: u32, retry_base_delay: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(pool, max_retries, retry_base_delay, rx));
        Self { tx }
    }

    pub(crate) async fn enqueue_insert(&self, state: ExecutionState) -> Result<()> {
        self.tx
            .send(Job::Write(state))
            .map_err(|_| Error::internal("state store writer task is gone"))
    }

    pub(crate) async fn enqueue_upsert(&self, state: ExecutionState) -> Result<()> {
        self.tx
            .send(Job::Write(state))
            .map_err(|_| Error::internal("state store writer task is gone"))
    }

    /// Enqueues the write and waits for it to actually land, used when the
    /// caller (terminal-status persistence) must not return before the row
    /// is durable.
    pub(crate) async fn enqueue_upsert_and_wait(&self, state: ExecutionState) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(Job::WriteAndAck(state, ack_tx))
            .map_err(|_| Error::internal("state store writer task is gone"))?;
        ack_rx.await.map_err(|_| Error::internal("writer dropped without acking"))?
    }

    /// Drains the queue and stops the writer task.
    pub(crate) async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Job::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

async fn run(
    pool: SqlitePool,
    max_retries: u32,
    retry_base_delay: Duration,
    mut rx: mpsc::UnboundedReceiver<Job>,
) {
    while let Some(job) = rx.recv().await {
        match job {
            Job::Write(state) => {
                if let Err(err) = write_with_retry(&pool, &state, max_retries, retry_base_delay).await {
                    tracing::error!(execution_id = %state.execution_id, error = %err, "state_store_write_failed");
                }
            }
            Job::WriteAndAck(state, ack) => {
                let result = write_with_retry(&pool, &state, max_retries, retry_base_delay).await;
                let _ = ack.send(result);
            }
            Job::Shutdown(ack) => {
                let _ = ack.send(());
                break;
            }
        }
    }
}

async fn write_with_retry(
    pool: &SqlitePool,
    state: &ExecutionState,
    max_retries: u32,
    retry_base_delay: Duration,
) -> Result<()> {
    let mut attempt = 0u32;
    loop {
        match write_once(pool, state).await {
            Ok(()) => return Ok(()),
            Err(err) if attempt < max_retries => {
                attempt += 1;
                tracing::warn!(execution_id = %state.execution_id, attempt, error = %err, "state_store_write_retry");
                tokio::time::sleep(retry_base_delay * attempt).await;
            }
            Err(err) => return Err(err),
        }
    }
}

async fn write_once(pool: &SqlitePool, state: &ExecutionState) -> Result<()> {
    let columns = state_to_columns(state)?;
    sqlx::query(
        r#"
        INSERT INTO execution_states (
            execution_id, status, diagram_id, started_at, ended_at,
            node_states, node_outputs, llm_usage, error, variables,
            exec_counts, executed_nodes, metrics, created_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        ON CONFLICT (execution_id) DO UPDATE SET
            status = excluded.status,
            diagram_id = excluded.diagram_id,
            ended_at = excluded.ended_at,
            node_states = excluded.node_states,
            node_outputs = excluded.node_outputs,
            llm_usage = excluded.llm_usage,
            error = excluded.error,
            variables = excluded.variables,
            exec_counts = excluded.exec_counts,
            executed_nodes = excluded.executed_nodes,
            metrics = excluded.metrics
        "#,
    )
    .bind(state.execution_id.to_string())
    .bind(&state.status)
    .bind(state.diagram_id.as_ref().map(|d| d.to_string()))
    .bind(state.started_at)
    .bind(state.ended_at)
    .bind(columns.node_states)
    .bind(columns.node_outputs)
    .bind(columns.llm_usage)
    .bind(&state.error)
    .bind(columns.variables)
    .bind(columns.exec_counts)
    .bind(columns.executed_nodes)
    .bind(columns.metrics)
    .bind(state.created_at)
    .execute(pool)
    .await?;

    Ok(())
}
