//! Configuration loader using Figment for layered config management.
//!
//! Precedence (lowest to highest):
//! 1. Compiled defaults
//! 2. TOML config file
//! 3. Environment variables (TESSERA_* prefix)

use super::types::AppConfig;
use super::validation::validate_config;
use crate::foundation::{Result, SignerError};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use log::{debug, info};
use std::path::Path;

/// Environment variable prefix for config overrides.
///
/// Example: `TESSERA_THRESHOLD__RAFT_TIMEOUT_MS` -> `threshold.raft_timeout_ms`
const ENV_PREFIX: &str = "TESSERA_";

pub fn load_config(path: &Path) -> Result<AppConfig> {
    info!("loading configuration path={}", path.display());
    let figment = Figment::from(Serialized::defaults(AppConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));
    let config: AppConfig =
        figment.extract().map_err(|err| SignerError::ConfigError(format!("config extraction failed: {}", err)))?;
    validate_config(&config)?;
    debug!(
        "configuration loaded sign_mode={} chain_nodes={} cosigners={}",
        config.sign_mode,
        config.chain_nodes.len(),
        config.threshold.cosigners.len()
    );
    Ok(config)
}
