//! # Engine Configuration - Declarative Parameter Management
//!
//! Every tunable of the engine lives in one TOML file, deserialized into the
//! section structs here and validated as a whole before anything starts. No
//! component reads an environment variable or a magic constant at runtime;
//! the config object is passed explicitly to every constructor.
//!
//! A handful of operational values accept `CQT_*` environment overrides for
//! deployment convenience (RPC URL, ledger path, minimum profit), following
//! the same pattern the strategy services have always used.

mod sections;
mod validate;

pub use sections::{
    ArbitrageConfig, BlpConfig, CrossChainConfig, EngineConfig, EngineSection, NetworkConfig,
    PoolConfig, PriceRange, SecurityConfig,
};

use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl EngineConfig {
    /// Load and validate a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: EngineConfig = toml::from_str(&contents)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `CQT_*` environment overrides to operational values.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("CQT_LEDGER_PATH") {
            self.engine.ledger_path = path;
        }

        if let Ok(min_profit) = std::env::var("CQT_MIN_PROFIT_BPS") {
            match min_profit.parse::<u32>() {
                Ok(value) => self.arbitrage.min_profit_bps = value,
                Err(_) => tracing::warn!(
                    "ignoring unparseable CQT_MIN_PROFIT_BPS override: {}",
                    min_profit
                ),
            }
        }

        for (id, network) in self.networks.iter_mut() {
            let key = format!("CQT_RPC_URL_{}", id.to_uppercase().replace('-', "_"));
            if let Ok(url) = std::env::var(&key) {
                network.rpc_url = url;
            }
        }
    }
}
