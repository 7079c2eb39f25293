//! Application state wiring storage and the engine together.
//!
//! AppState pins the engine's generic `Worker` to the SQLite repository and
//! carries the resolved data directory and configuration.

use std::path::PathBuf;

use relflow_core::event::EventBus;
use relflow_core::workflow::Worker;
use relflow_infra::config::{load_global_config, resolve_database_url};
use relflow_infra::sqlite::pool::{DatabasePool, default_data_dir};
use relflow_infra::sqlite::workflow::SqliteWorkflowRepository;
use relflow_types::config::GlobalConfig;

/// Concrete worker type pinned to the infra implementation.
pub type ConcreteWorker = Worker<SqliteWorkflowRepository>;

/// Every step transition is one event; a burst larger than this makes a slow
/// terminal skip lines rather than block the engine.
const EVENT_BUS_CAPACITY: usize = 1024;

/// Shared state for CLI commands.
#[derive(Clone)]
pub struct AppState {
    pub data_dir: PathBuf,
    pub config: GlobalConfig,
    pub db_pool: DatabasePool,
}

impl AppState {
    /// Initialize the application state: resolve directories, load config,
    /// connect to the database.
    pub async fn init(data_dir: Option<PathBuf>) -> anyhow::Result<Self> {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);

        // Ensure data directory exists
        tokio::fs::create_dir_all(&data_dir).await?;

        let config = load_global_config(&data_dir).await;
        let db_url = resolve_database_url(&config, &data_dir);
        tracing::debug!(data_dir = %data_dir.display(), "opening workflow database");
        let db_pool = DatabasePool::new(&db_url).await?;

        Ok(Self {
            data_dir,
            config,
            db_pool,
        })
    }

    pub fn repo(&self) -> SqliteWorkflowRepository {
        SqliteWorkflowRepository::new(self.db_pool.clone())
    }

    /// A worker that checkpoints into this state's database.
    pub fn worker(&self) -> ConcreteWorker {
        Worker::new(self.repo(), EventBus::new(EVENT_BUS_CAPACITY), self.config.engine.clone())
    }
}
