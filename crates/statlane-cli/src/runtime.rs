//! Assembles the store, the engine, and the queue from configuration.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use statlane_core::{ActionKind, AppId, StatlaneConfig};
use statlane_queue::{Action, ActionQueue, ActionSettings};
use statlane_store::{SessionOptions, StatsDatabase};
use statlane_sync::{
    Collaborators, CsvReportParser, Endpoints, HttpFetcher, StaticAppDirectory, SyncEngine,
    SyncSettings, SystemClock,
};

pub struct Runtime {
    pub config: StatlaneConfig,
    pub db: StatsDatabase,
    pub engine: Arc<SyncEngine>,
    pub queue: ActionQueue,
    pub action_settings: ActionSettings,
}

impl Runtime {
    pub fn load(config_path: &Path) -> anyhow::Result<Self> {
        let config = StatlaneConfig::load_or_default(config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;

        if let Some(parent) = config.store.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let db = StatsDatabase::open(&config.store.path)?;
        info!(path = ?config.store.path, "store opened");

        let collaborators = Collaborators {
            fetcher: Arc::new(HttpFetcher::new(&config.portal)?),
            parser: Arc::new(CsvReportParser),
            apps: Arc::new(StaticAppDirectory::from_config(&config)),
            clock: Arc::new(SystemClock),
        };
        let options = SessionOptions {
            max_schema_retries: config.store.max_schema_retries,
            ..SessionOptions::default()
        };
        let engine = Arc::new(
            SyncEngine::new(db.clone(), collaborators, Endpoints::from_config(&config.portal)?)
                .with_settings(SyncSettings::from_config(&config.sync))
                .with_schema(config.store.schema_version, options),
        );
        let queue =
            ActionQueue::new(engine.clone()).with_failed_history(config.queue.failed_history);

        Ok(Self {
            action_settings: ActionSettings::from_config(&config.queue),
            config,
            db,
            engine,
            queue,
        })
    }

    pub fn action(&self, app_id: AppId, kind: ActionKind) -> Action {
        Action::new(app_id, kind).with_settings(self.action_settings)
    }

    /// Configured application ids, in order.
    pub fn app_ids(&self) -> anyhow::Result<Vec<AppId>> {
        self.config
            .apps
            .keys()
            .map(|id| parse_app(id))
            .collect()
    }
}

pub fn parse_app(id: &str) -> anyhow::Result<AppId> {
    AppId::new(id).with_context(|| format!("invalid application id {id:?}"))
}
