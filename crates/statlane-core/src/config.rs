//! statlane.toml configuration parser.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StatlaneConfig {
    pub store: StoreConfig,
    pub queue: QueueConfig,
    pub portal: PortalConfig,
    pub sync: SyncConfig,
    /// Per-application metadata keyed by application id.
    pub apps: BTreeMap<String, AppConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
    /// Version index requested on open. Healing may settle on a higher one.
    pub schema_version: u64,
    pub max_schema_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub execute_timeout_secs: u64,
    pub minimal_execution_time_ms: u64,
    /// How many failed actions are kept for diagnostics.
    pub failed_history: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    pub base_url: String,
    pub user_agent: String,
    pub request_timeout_secs: u64,
    /// Session cookie header forwarded with every request.
    pub cookie: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Days before today whose figures are provisional and always re-fetched.
    pub recent_refetch_days: u64,
    /// Consecutive empty days that end a wishlist backfill.
    pub wishlist_empty_day_limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub page_creation_date: NaiveDate,
    #[serde(default)]
    pub package_ids: Vec<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("statlane.redb"),
            schema_version: 1,
            max_schema_retries: 200,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            execute_timeout_secs: 20,
            minimal_execution_time_ms: 0,
            failed_history: 100,
        }
    }
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: "https://partner.steamgames.com".to_string(),
            user_agent: concat!("statlane/", env!("CARGO_PKG_VERSION")).to_string(),
            request_timeout_secs: 30,
            cookie: None,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            recent_refetch_days: 3,
            wishlist_empty_day_limit: 5,
        }
    }
}

impl StatlaneConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: StatlaneConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Scaffold a config with a single application entry.
    pub fn scaffold(app_id: &str, page_creation_date: NaiveDate) -> Self {
        let mut config = StatlaneConfig::default();
        config.apps.insert(
            app_id.to_string(),
            AppConfig {
                page_creation_date,
                package_ids: Vec::new(),
            },
        );
        config
    }
}
