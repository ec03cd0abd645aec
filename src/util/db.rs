use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{info, instrument};

use super::env::redact_db_url;

/// SQLite caps bound parameters per statement; bulk inserts chunk below it.
pub const MAX_BIND_PARAMS: usize = 32_766;

/// Rows per multi-row INSERT for a table with `columns` bound columns.
pub fn rows_per_statement(columns: usize) -> usize {
    (MAX_BIND_PARAMS / columns.max(1)).clamp(1, 250)
}

#[derive(Clone)]
pub struct Db {
    pub pool: SqlitePool,
}

impl Db {
    // Never record the raw URI in spans.
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let db = Self::connect_no_migrate(database_url, max_connections).await?;
        sqlx::migrate!("./migrations")
            .run(&db.pool)
            .await
            .context("run migrations")?;
        info!("migrations applied");
        Ok(db)
    }

    #[instrument(skip(database_url))]
    pub async fn connect_no_migrate(database_url: &str, max_connections: u32) -> Result<Self> {
        if !database_url.starts_with("sqlite:") {
            anyhow::bail!(
                "unsupported DATABASE_URI {}; only sqlite: URLs are supported",
                redact_db_url(database_url)
            );
        }
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("parse DATABASE_URI {}", redact_db_url(database_url)))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .with_context(|| format!("open {}", redact_db_url(database_url)))?;
        info!(db = %redact_db_url(database_url), "connected to db");
        Ok(Self { pool })
    }

    /// Every `id` currently stored in `table`.
    pub async fn existing_ids(&self, table: Table) -> Result<HashSet<i64>> {
        let sql = format!("SELECT id FROM {}", table.name());
        let ids: Vec<i64> = sqlx::query_scalar(&sql)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("load ids from {}", table.name()))?;
        Ok(ids.into_iter().collect())
    }

    /// Every `natural_key` currently stored in `table`.
    pub async fn existing_natural_keys(&self, table: Table) -> Result<HashSet<String>> {
        let sql = format!("SELECT natural_key FROM {}", table.name());
        let keys: Vec<String> = sqlx::query_scalar(&sql)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("load natural keys from {}", table.name()))?;
        Ok(keys.into_iter().collect())
    }

    pub async fn count(&self, table: Table) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.name());
        let n: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(n)
    }
}

/// Tables the loader writes. Names never come from input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Tournaments,
    Teams,
    Matches,
    Incidents,
    Bets,
    IncidentEvent,
}

impl Table {
    pub const ALL: [Table; 6] = [
        Table::Tournaments,
        Table::Teams,
        Table::Matches,
        Table::Incidents,
        Table::Bets,
        Table::IncidentEvent,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Table::Tournaments => "tournaments",
            Table::Teams => "teams",
            Table::Matches => "matches",
            Table::Incidents => "incidents",
            Table::Bets => "bets",
            Table::IncidentEvent => "incident_event",
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// A migrated, file-backed database that lives as long as the returned dir.
    pub async fn temp_db() -> (tempfile::TempDir, Db) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());
        let db = Db::connect(&url, 2).await.unwrap();
        (dir, db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_size_respects_bind_limit() {
        assert_eq!(rows_per_statement(29), 250);
        assert_eq!(rows_per_statement(0), 250);
        assert!(rows_per_statement(29) * 29 <= MAX_BIND_PARAMS);
    }

    #[tokio::test]
    async fn connect_migrates_every_table() {
        let (_dir, db) = testing::temp_db().await;
        for table in Table::ALL {
            assert_eq!(db.count(table).await.unwrap(), 0, "{}", table.name());
        }
    }

    #[tokio::test]
    async fn non_sqlite_urls_are_rejected() {
        let err = Db::connect("postgres://u:p@localhost/x", 1).await.err().unwrap();
        assert!(err.to_string().contains("only sqlite"));
        assert!(!err.to_string().contains("u:p"));
    }
}
