//! Schema creation and idempotent migration for `execution_states`.

use crate::types::Result;
use sqlx::SqlitePool;

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS execution_states (
    execution_id   TEXT PRIMARY KEY,
    status         TEXT NOT NULL,
    diagram_id     TEXT,
    started_at     TIMESTAMP NOT NULL,
    ended_at       TIMESTAMP,
    node_states    TEXT NOT NULL,
    node_outputs   TEXT NOT NULL,
    llm_usage      TEXT NOT NULL,
    error          TEXT,
    variables      TEXT NOT NULL,
    exec_counts    TEXT NOT NULL,
    executed_nodes TEXT NOT NULL,
    created_at     TIMESTAMP NOT NULL
)
"#;

const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_execution_states_status ON execution_states(status)",
    "CREATE INDEX IF NOT EXISTS idx_execution_states_started_at ON execution_states(started_at)",
    "CREATE INDEX IF NOT EXISTS idx_execution_states_diagram_id ON execution_states(diagram_id)",
];

/// Creates `execution_states` and its indexes if absent, then adds the
/// `metrics` column via an idempotent `ALTER TABLE` (SQLite has no
/// `ADD COLUMN IF NOT EXISTS`, so a duplicate-column error is swallowed).
pub(crate) async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(CREATE_TABLE).execute(pool).await?;
    for index in CREATE_INDEXES {
        sqlx::query(index).execute(pool).await?;
    }

    match sqlx::query("ALTER TABLE execution_states ADD COLUMN metrics TEXT")
        .execute(pool)
        .await
    {
        Ok(_) => {}
        Err(sqlx::Error::Database(db_err)) if db_err.message().contains("duplicate column") => {}
        Err(err) => return Err(err.into()),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let pool = memory_pool().await;
        migrate(&pool).await.unwrap();
        migrate(&pool).await.unwrap();

        let row = sqlx::query("PRAGMA table_info(execution_states)")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert!(!row.is_empty());
    }

    #[tokio::test]
    async fn metrics_column_exists_after_migration() {
        use sqlx::Row;
        let pool = memory_pool().await;
        migrate(&pool).await.unwrap();

        let columns = sqlx::query("PRAGMA table_info(execution_states)")
            .fetch_all(&pool)
            .await
            .unwrap();
        let has_metrics = columns.iter().any(|r| r.get::<String, _>("name") == "metrics");
        assert!(has_metrics);
    }
}
