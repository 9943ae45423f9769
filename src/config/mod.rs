mod basic;
mod policy;
mod upstreams;

pub use basic::BasicConfig;
pub use policy::{PolicyConfig, PoolMode};
pub use upstreams::{
    ANTIGRAVITY_SYSTEM_PREAMBLE, AntigravityUpstreamConfig, GeminiCliUpstreamConfig,
    ResolvedUpstreams, UpstreamDefaults, UpstreamsConfig,
};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Application configuration managed by Figment.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    /// Core server configuration (see `basic` table in config.toml).
    #[serde(default)]
    pub basic: BasicConfig,

    /// Upstream settings (see `upstreams` table in config.toml).
    #[serde(default)]
    pub upstreams: UpstreamsConfig,

    /// Pool, quota and rate-limit policy (see `policy` table in config.toml).
    #[serde(default)]
    pub policy: PolicyConfig,
}

const DEFAULT_CONFIG_FILE: &str = "config.toml";

impl Config {
    /// Builds a Figment merging struct defaults, an optional config TOML file
    /// and `CASTOR_`-prefixed environment variables (`__` splits sections,
    /// e.g. `CASTOR_POLICY__POOL_MODE=full_shared`). `DATABASE_URL` is honored
    /// directly for deployment convenience.
    pub fn figment() -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));
        if PathBuf::from(DEFAULT_CONFIG_FILE).is_file() {
            figment = figment.merge(Toml::file(DEFAULT_CONFIG_FILE));
        }
        figment = figment.merge(Env::prefixed("CASTOR_").split("__"));
        if let Ok(url) = std::env::var("DATABASE_URL") {
            figment = figment.merge(Serialized::default("basic.database_url", url));
        }
        figment
    }

    /// Loads configuration without validating required fields. Library code
    /// and tests use this; the server binary should call `load()`.
    pub fn from_optional_sources() -> Self {
        Self::figment().extract().unwrap_or_else(|err| {
            panic!("failed to extract configuration (defaults + config.toml + env): {err}")
        })
    }

    /// Loads configuration and validates required fields.
    pub fn load() -> Self {
        let cfg = Self::from_optional_sources();
        if cfg.basic.vault_key.trim().is_empty() {
            panic!("basic.vault_key must be set and non-empty (CASTOR_BASIC__VAULT_KEY)");
        }
        cfg
    }

    pub fn upstreams(&self) -> ResolvedUpstreams {
        self.upstreams.resolve()
    }
}
