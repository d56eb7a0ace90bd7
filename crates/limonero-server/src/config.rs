//! Configuration management
//!
//! Options are read from an optional TOML file (`LIMONERO_CONFIG`, default
//! `limonero.toml`) and from `LIMONERO_`-prefixed environment variables, with
//! `__` separating nested keys. Dotted keys such as
//! `dfs.client.use.datanode.hostname` and `services.thorn.url` are written as
//! TOML dotted keys:
//!
//! ```toml
//! instance = "lemon"
//! gateway_port = 3321
//! database_url = "postgresql://localhost/limonero"
//! secret = "123456"
//! services.thorn.url = "http://thorn:3000"
//! dfs.client.use.datanode.hostname = true
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

// ============================================================================
// Configuration Constants
// ============================================================================

pub const DEFAULT_CONFIG_FILE: &str = "limonero.toml";

pub const DEFAULT_INSTANCE: &str = "default";

pub const DEFAULT_HOST: &str = "0.0.0.0";

pub const DEFAULT_GATEWAY_PORT: u16 = 3321;

pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/limonero";

pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// `database_url` value selecting the in-process catalog
pub const MEMORY_DATABASE_URL: &str = "memory:";

const DATANODE_HOSTNAME_KEY: &str = "dfs.client.use.datanode.hostname";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Tag embedded in the path of every finalized upload
    pub instance: String,
    pub host: String,
    pub gateway_port: u16,
    pub database_url: String,
    /// Shared secret accepted in `X-Auth-Token` for the system user
    pub secret: String,
    /// Include backend error details in 500 responses
    pub debug: bool,
    pub shutdown_timeout_secs: u64,
    pub database: DatabaseConfig,
    pub cors: CorsConfig,
    pub services: ServicesConfig,
    /// `dfs.client.use.datanode.hostname`
    #[serde(skip)]
    pub use_datanode_hostname: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    pub thorn: ThornConfig,
}

/// External identity verification service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ThornConfig {
    pub url: Option<String>,
}

impl Config {
    /// Load configuration from `.env`, the config file and the environment
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let path = std::env::var("LIMONERO_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        let figment = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("LIMONERO_").split("__"));

        let config = Self::from_figment(&figment)?;
        config.validate()?;

        Ok(config)
    }

    /// Extract the configuration from an already assembled figment
    pub fn from_figment(figment: &Figment) -> Result<Self, figment::Error> {
        let mut config: Config = figment.extract()?;

        config.use_datanode_hostname = match figment.extract_inner::<bool>(DATANODE_HOSTNAME_KEY) {
            Ok(value) => value,
            Err(e) if e.missing() => true,
            Err(e) => return Err(e),
        };

        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.gateway_port == 0 {
            anyhow::bail!("gateway_port must be greater than 0");
        }

        if self.database_url.trim().is_empty() {
            anyhow::bail!("database_url cannot be empty");
        }

        if self.secret.is_empty() {
            anyhow::bail!("secret cannot be empty");
        }

        if self.instance.is_empty() || self.instance.contains('/') {
            anyhow::bail!("instance must be a non-empty name without '/': '{}'", self.instance);
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("database.max_connections must be greater than 0");
        }

        if self.services.thorn.url.is_none() {
            tracing::warn!("services.thorn.url is not set - only the system token will authenticate");
        }

        Ok(())
    }

    pub fn uses_memory_catalog(&self) -> bool {
        self.database_url.starts_with(MEMORY_DATABASE_URL)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            instance: DEFAULT_INSTANCE.to_string(),
            host: DEFAULT_HOST.to_string(),
            gateway_port: DEFAULT_GATEWAY_PORT,
            database_url: DEFAULT_DATABASE_URL.to_string(),
            secret: String::new(),
            debug: false,
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            database: DatabaseConfig::default(),
            cors: CorsConfig::default(),
            services: ServicesConfig::default(),
            use_datanode_hostname: true,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
            allow_credentials: false,
        }
    }
}
