//! Process configuration.
//!
//! Loaded in layers:
//! 1. defaults in code
//! 2. `config/{environment}.toml` (optional)
//! 3. `FIELDSTOCK__*` environment variables, `__` separating sections
//!    (`FIELDSTOCK__SERVER__PORT=8080`)

use config::{ConfigError, Environment, File};
use serde::Deserialize;

pub use fieldstock_observability::LogFormat;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// Current environment (development, production, test)
    pub environment: String,
    pub server: ServerSettings,
    pub storage: StorageSettings,
    pub database: DatabaseSettings,
    pub log: LogSettings,
    pub ledger: LedgerSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl ServerSettings {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageSettings {
    pub backend: StorageBackend,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseSettings {
    /// PostgreSQL connection URL. Required when `storage.backend = "postgres"`.
    pub url: Option<String>,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    pub format: LogFormat,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LedgerSettings {
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Settings {
    /// Load settings for the environment named by `FIELDSTOCK_ENVIRONMENT`
    /// (default `development`).
    pub fn load() -> Result<Self, ConfigError> {
        let environment =
            std::env::var("FIELDSTOCK_ENVIRONMENT").unwrap_or_else(|_| "development".into());
        Self::load_for(&environment)
    }

    pub fn load_for(environment: &str) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .set_default("environment", environment)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("storage.backend", "memory")?
            .set_default("database.max_connections", 10)?
            .set_default("log.format", "json")?
            .set_default("ledger.default_page_size", 25)?
            .set_default("ledger.max_page_size", 100)?
            .add_source(File::with_name(&format!("config/{environment}")).required(false))
            .add_source(
                Environment::with_prefix("FIELDSTOCK")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = settings.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.backend == StorageBackend::Postgres && self.database.url.is_none() {
            return Err(ConfigError::Message(
                "database.url is required when storage.backend is postgres".to_string(),
            ));
        }
        let ledger = &self.ledger;
        if ledger.default_page_size == 0 || ledger.max_page_size < ledger.default_page_size {
            return Err(ConfigError::Message(
                "ledger.default_page_size must be between 1 and ledger.max_page_size".to_string(),
            ));
        }
        Ok(())
    }
}
