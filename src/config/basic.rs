use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};

/// Basic (core) configuration managed by Figment.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BasicConfig {
    /// HTTP server listen address (e.g., "0.0.0.0", "127.0.0.1").
    /// TOML: `basic.listen_addr`. Default: `0.0.0.0`.
    #[serde(default = "default_listen_ip")]
    pub listen_addr: IpAddr,

    /// HTTP server listen port.
    /// TOML: `basic.listen_port`. Default: `8189`.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Database URL for SQLite. The `DATABASE_URL` environment variable
    /// overrides this when set.
    /// TOML: `basic.database_url`. Default: `sqlite://castor.db`.
    #[serde(default)]
    pub database_url: String,

    /// Log level for tracing subscriber initialization (e.g., "error", "warn",
    /// "info", "debug", "trace").
    /// TOML: `basic.loglevel`. Default: `info`.
    #[serde(default)]
    pub loglevel: String,

    /// Symmetric key for secrets at rest (required, non-empty). Any string;
    /// it is hashed to 256 bits before use.
    /// TOML: `basic.vault_key`. Env: `CASTOR_BASIC__VAULT_KEY`.
    #[serde(default)]
    pub vault_key: String,

    /// Directory for generated images, served under `/images/`.
    /// TOML: `basic.image_dir`. Default: `data/images`.
    #[serde(default = "default_image_dir")]
    pub image_dir: String,
}

impl Default for BasicConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_ip(),
            listen_port: default_listen_port(),
            database_url: "sqlite://castor.db".to_string(),
            loglevel: "info".to_string(),
            // No insecure default. `Config::load()` enforces non-empty.
            vault_key: String::new(),
            image_dir: default_image_dir(),
        }
    }
}

fn default_listen_ip() -> IpAddr {
    Ipv4Addr::new(0, 0, 0, 0).into()
}

fn default_listen_port() -> u16 {
    8189
}

fn default_image_dir() -> String {
    "data/images".to_string()
}
