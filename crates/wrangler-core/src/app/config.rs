//! RegulatorConfig - 設定
//!
//! Every field has a default, so an empty TOML document is a valid config.
//!
//! ```toml
//! default_group = "mail"
//! herd_batch_size = 100
//! herd_interval_secs = 600
//! table_prefix = "acme_"
//! debounce_on_duplicate = false
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::table_names::TableNames;
use crate::domain::Group;

pub const DEFAULT_GROUP: &str = "wrangler";
pub const DEFAULT_HERD_BATCH_SIZE: usize = 50;
pub const DEFAULT_HERD_INTERVAL_SECS: u64 = 3600;
pub const DEFAULT_TABLE_PREFIX: &str = "wrangler_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegulatorConfig {
    /// Group used when a task does not name one.
    pub default_group: String,
    /// Rows deleted per herding transaction.
    pub herd_batch_size: usize,
    /// Delay between herding sweeps.
    pub herd_interval_secs: u64,
    pub table_prefix: String,
    /// Postpone the pending job of a debouncable task on duplicate dispatch.
    pub debounce_on_duplicate: bool,
}

impl Default for RegulatorConfig {
    fn default() -> Self {
        Self {
            default_group: DEFAULT_GROUP.to_string(),
            herd_batch_size: DEFAULT_HERD_BATCH_SIZE,
            herd_interval_secs: DEFAULT_HERD_INTERVAL_SECS,
            table_prefix: DEFAULT_TABLE_PREFIX.to_string(),
            debounce_on_duplicate: true,
        }
    }
}

impl RegulatorConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: RegulatorConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_group.trim().is_empty() {
            return Err(ConfigError::Invalid("default_group must not be empty".into()));
        }
        if self.herd_batch_size == 0 {
            return Err(ConfigError::Invalid("herd_batch_size must be at least 1".into()));
        }
        if self.herd_interval_secs == 0 {
            return Err(ConfigError::Invalid("herd_interval_secs must be at least 1".into()));
        }
        if !self
            .table_prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(ConfigError::Invalid(format!(
                "table_prefix {:?} may only contain [A-Za-z0-9_]",
                self.table_prefix
            )));
        }
        Ok(())
    }

    pub fn default_group(&self) -> Group {
        Group::new(self.default_group.clone())
    }

    pub fn herd_interval(&self) -> Duration {
        Duration::from_secs(self.herd_interval_secs)
    }

    pub fn table_names(&self) -> TableNames {
        TableNames::new(&self.table_prefix)
    }
}
