use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use darkstar_auction::AuctionConfig;
use darkstar_delivery::DeliveryConfig;

use crate::error::{SdkError, SdkResult};

/// Top-level configuration, usually read from a TOML file.
///
/// Every section and field is optional; anything missing takes its default.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DarkstarConfig {
    pub storage: StorageConfig,
    pub auction: AuctionConfig,
    pub delivery: DeliveryConfig,
    pub scheduler: SchedulerConfig,
    pub log: LogConfig,
}

impl DarkstarConfig {
    pub fn from_toml_str(s: &str) -> SdkResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| SdkError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> SdkResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
            .map_err(|e| SdkError::Config(format!("{}: {e}", path.display())))
    }

    pub fn validate(&self) -> SdkResult<()> {
        if self.storage.backend == StorageBackend::Log && self.storage.path.is_none() {
            return Err(SdkError::Config("log storage requires a path".into()));
        }
        if self.scheduler.interval_ms == 0 {
            return Err(SdkError::Config("scheduler interval must be positive".into()));
        }
        if self.auction.max_bid_attempts == 0 || self.delivery.max_claim_attempts == 0 {
            return Err(SdkError::Config("retry attempts must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    /// Append-only file log.
    Log,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Log file location; required for the `log` backend.
    pub path: Option<PathBuf>,
    pub sync_on_write: bool,
    /// How long tombstones of generic tables are kept before purging.
    pub tombstone_retention_secs: u64,
}

impl StorageConfig {
    pub fn tombstone_retention(&self) -> Duration {
        Duration::from_secs(self.tombstone_retention_secs)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            path: None,
            sync_on_write: false,
            tombstone_retention_secs: 24 * 60 * 60,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub interval_ms: u64,
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { interval_ms: 1_000 }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    pub with_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".into(),
            with_target: true,
        }
    }
}
