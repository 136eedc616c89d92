//! Configuration for the handle table manager.
//!
//! Values come from defaults merged with `HANDLE_TABLE_*` environment
//! variables, e.g. `HANDLE_TABLE_MAX_TABLES=64`.

use figment::{
    Figment,
    providers::{Env, Serialized},
};
use serde::{Deserialize, Serialize};

/// Environment variable prefix read by [`HandleTableConfig::load`].
pub const ENV_PREFIX: &str = "HANDLE_TABLE_";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to load handle table config: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("invalid handle table config: {0}")]
    Invalid(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct HandleTableConfig {
    /// Upper bound on distinct per-type tables.
    pub max_tables: u16,
    /// Upper bound on live handles in a single table.
    pub max_entries_per_table: Option<usize>,
    /// Log objects still held by tables when teardown discards them.
    pub warn_on_live_objects: bool,
    /// Keep running termination callbacks after one of them panics.
    pub catch_callback_panics: bool,
}

impl Default for HandleTableConfig {
    fn default() -> Self {
        Self {
            max_tables: u16::MAX,
            max_entries_per_table: None,
            warn_on_live_objects: true,
            catch_callback_panics: true,
        }
    }
}

impl HandleTableConfig {
    /// Extracts and validates a config from an arbitrary figment.
    ///
    /// # Errors
    /// `ConfigError::Load` on malformed values, `ConfigError::Invalid` when a
    /// limit is zero.
    pub fn from_figment(figment: &Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults merged with `HANDLE_TABLE_*` environment variables.
    ///
    /// # Errors
    /// See [`HandleTableConfig::from_figment`].
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_figment(&Self::figment())
    }

    #[must_use]
    pub fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    /// # Errors
    /// `ConfigError::Invalid` when `max_tables` or `max_entries_per_table`
    /// is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_tables == 0 {
            return Err(ConfigError::Invalid("max_tables must be at least 1"));
        }
        if self.max_entries_per_table == Some(0) {
            return Err(ConfigError::Invalid(
                "max_entries_per_table must be at least 1",
            ));
        }
        Ok(())
    }
}
