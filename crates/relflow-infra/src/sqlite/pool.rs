//! SQLite connection pools for the checkpoint store.
//!
//! Every step transition is a write, and a busy worker produces many of them
//! while `relflow list`/`show` read concurrently. WAL mode lets readers
//! proceed during a write; writes are funnelled through one connection so
//! they never contend for the database lock among themselves.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

const READER_CONNECTIONS: u32 = 8;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const DATABASE_FILE: &str = "relflow.db";

/// Reader and writer pools over one SQLite database.
#[derive(Clone)]
pub struct DatabasePool {
    /// Read-only connections for queries.
    pub reader: SqlitePool,
    /// The single connection all inserts and updates go through.
    pub writer: SqlitePool,
}

impl DatabasePool {
    /// Connect to `database_url` and bring the schema up to date.
    ///
    /// Migrations run on the writer before the reader pool opens, so readers
    /// never observe a partially migrated schema.
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT)
            .create_if_missing(true);

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options.clone())
            .await?;
        sqlx::migrate!("../../migrations").run(&writer).await?;

        let reader = SqlitePoolOptions::new()
            .max_connections(READER_CONNECTIONS)
            .connect_with(options.read_only(true))
            .await?;

        tracing::debug!(url = database_url, "workflow database ready");
        Ok(Self { reader, writer })
    }

    /// Open (or create) `relflow.db` inside `data_dir`.
    pub async fn open(data_dir: &Path) -> Result<Self, sqlx::Error> {
        Self::new(&database_url(data_dir)).await
    }
}

/// Resolve the data directory: `RELFLOW_DATA_DIR` if set, else `~/.relflow`.
pub fn default_data_dir() -> PathBuf {
    std::env::var_os("RELFLOW_DATA_DIR")
        .map(PathBuf::from)
        .or_else(|| dirs::home_dir().map(|home| home.join(".relflow")))
        .unwrap_or_else(|| PathBuf::from(".relflow"))
}

/// The database URL for `{data_dir}/relflow.db`.
pub fn database_url(data_dir: &Path) -> String {
    format!("sqlite://{}?mode=rwc", data_dir.join(DATABASE_FILE).display())
}
