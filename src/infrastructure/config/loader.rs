//! Configuration loader using Figment for layered config management.
//!
//! Precedence (lowest to highest):
//! 1. Compiled defaults
//! 2. TOML config file
//! 3. Environment variables (CJCORE_* prefix)
//! 4. Explicit CLI overrides

use crate::foundation::{CoinjoinError, Result};
use crate::infrastructure::config::types::AppConfig;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use std::path::Path;

/// Example: `CJCORE_COINJOIN__COUNTERPARTY_COUNT` -> `coinjoin.counterparty_count`.
pub const ENV_PREFIX: &str = "CJCORE_";

pub fn load_config(config_path: Option<&Path>) -> Result<AppConfig> {
    load_config_with_overrides(config_path, &[])
}

/// CLI overrides are dotted-path/value string pairs applied above every
/// other layer, e.g. `("coinjoin.counterparty_count", "6")`.
pub fn load_config_with_overrides(config_path: Option<&Path>, overrides: &[(String, String)]) -> Result<AppConfig> {
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));
    if let Some(path) = config_path {
        figment = figment.merge(Toml::file(path));
    }
    figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__").lowercase(true));
    for (key, value) in overrides {
        figment = figment.merge(Serialized::default(key, value));
    }

    let config: AppConfig =
        figment.extract().map_err(|err| CoinjoinError::ConfigInvalid(format!("config extraction: {err}")))?;
    config.validate()?;
    log::debug!(
        "config loaded: counterparties={} dust={} policy={:?}",
        config.coinjoin.counterparty_count,
        config.coinjoin.dust_threshold,
        config.coinjoin.broadcast_policy
    );
    Ok(config)
}
