//! Configuration management for Tidemark services.
//!
//! Configuration is loaded from (in priority order):
//! 1. Environment variables (TIDEMARK__ prefix, `__` separator)
//! 2. Config file (tidemark.toml, or any prefix passed in)
//! 3. Defaults

use serde::de::DeserializeOwned;

use crate::error::TidemarkError;

/// Environment variable prefix for every Tidemark setting.
pub const ENV_PREFIX: &str = "TIDEMARK";

/// Build the layered configuration source for a file prefix.
pub fn layered(file_prefix: &str) -> Result<config::Config, TidemarkError> {
    config::Config::builder()
        .add_source(config::File::with_name(file_prefix).required(false))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| TidemarkError::Config(e.to_string()))
}

/// Load one section (e.g. `neo4j`, `sync`) into a typed settings struct.
///
/// A missing section yields `T::default()`; a present but malformed section
/// is an error.
pub fn load_section<T>(file_prefix: &str, section: &str) -> Result<T, TidemarkError>
where
    T: DeserializeOwned + Default,
{
    let cfg = layered(file_prefix)?;
    section_from(&cfg, section)
}

pub(crate) fn section_from<T>(cfg: &config::Config, section: &str) -> Result<T, TidemarkError>
where
    T: DeserializeOwned + Default,
{
    match cfg.get::<T>(section) {
        Ok(value) => Ok(value),
        Err(config::ConfigError::NotFound(_)) => {
            tracing::debug!(section, "Config section absent, using defaults");
            Ok(T::default())
        }
        Err(e) => Err(TidemarkError::Config(format!("[{section}]: {e}"))),
    }
}
