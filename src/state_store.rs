// SQLite workspace-scoped flag store (showCPU / showMemory survive restarts; samples never do)

use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::instrument;

pub const SHOW_CPU_KEY: &str = "showCPU";
pub const SHOW_MEMORY_KEY: &str = "showMemory";

pub struct WorkspaceState {
    pool: SqlitePool,
    workspace: String,
}

impl WorkspaceState {
    /// Opens (creating if needed) the store at `path`; every key is scoped to `workspace`.
    pub async fn connect(path: &str, workspace: &str) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new().connect_with(opts).await?;
        Ok(Self {
            pool,
            workspace: workspace.to_string(),
        })
    }

    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workspace_state (
                workspace TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (workspace, key)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub fn workspace(&self) -> &str {
        &self.workspace
    }

    /// Stored flag, or `default` when unset or unreadable.
    #[instrument(skip(self), fields(repo = "state", operation = "get_bool", workspace = %self.workspace))]
    pub async fn get_bool(&self, key: &str, default: bool) -> anyhow::Result<bool> {
        let row = sqlx::query("SELECT value FROM workspace_state WHERE workspace = $1 AND key = $2")
            .bind(&self.workspace)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(default);
        };
        let value: String = row.try_get("value")?;
        Ok(match value.as_str() {
            "true" => true,
            "false" => false,
            other => {
                tracing::warn!(key, value = other, "ignoring malformed flag");
                default
            }
        })
    }

    #[instrument(skip(self), fields(repo = "state", operation = "set_bool", workspace = %self.workspace))]
    pub async fn set_bool(&self, key: &str, value: bool) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO workspace_state (workspace, key, value) VALUES ($1, $2, $3) \
             ON CONFLICT(workspace, key) DO UPDATE SET value = excluded.value",
        )
        .bind(&self.workspace)
        .bind(key)
        .bind(if value { "true" } else { "false" })
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
