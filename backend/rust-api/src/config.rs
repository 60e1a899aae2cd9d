use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Mongo,
}

impl FromStr for StoreBackend {
    type Err = config::ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "mongo" | "mongodb" => Ok(StoreBackend::Mongo),
            other => Err(config::ConfigError::Message(format!(
                "unknown store backend '{}', expected 'memory' or 'mongo'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub bind_addr: String,
    pub store_backend: StoreBackend,
    pub mongo_uri: String,
    pub mongo_database: String,
    pub store_timeout_ms: u64,
    pub events_channel_capacity: usize,
    pub tests_seed_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8081".to_string(),
            store_backend: StoreBackend::Memory,
            mongo_uri: "mongodb://localhost:27017".to_string(),
            mongo_database: "assessments".to_string(),
            store_timeout_ms: crate::services::attempt_service::DEFAULT_STORE_TIMEOUT.as_millis() as u64,
            events_channel_capacity: crate::services::progress::DEFAULT_CHANNEL_CAPACITY,
            tests_seed_path: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Root .env first, then the local one
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // config/*.toml + ENV overrides (prefix: APP_)
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let defaults = Config::default();

        let bind_addr = lookup(&settings, "server.bind_addr", "BIND_ADDR")
            .unwrap_or(defaults.bind_addr);

        let store_backend = match lookup(&settings, "store.backend", "STORE_BACKEND") {
            Some(raw) => raw.parse()?,
            None => defaults.store_backend,
        };

        let mongo_uri =
            lookup(&settings, "database.mongo_uri", "MONGO_URI").unwrap_or(defaults.mongo_uri);

        let mongo_database = lookup(&settings, "database.mongo_database", "MONGO_DATABASE")
            .unwrap_or(defaults.mongo_database);

        let store_timeout_ms = match lookup(&settings, "store.timeout_ms", "STORE_TIMEOUT_MS") {
            Some(raw) => parse_positive(&raw, "store.timeout_ms")?,
            None => defaults.store_timeout_ms,
        };

        let events_channel_capacity =
            match lookup(&settings, "events.channel_capacity", "EVENTS_CHANNEL_CAPACITY") {
                Some(raw) => parse_positive(&raw, "events.channel_capacity")?,
                None => defaults.events_channel_capacity,
            };

        let tests_seed_path = lookup(&settings, "store.seed_path", "TESTS_SEED_PATH")
            .filter(|path| !path.trim().is_empty());

        Ok(Config {
            bind_addr,
            store_backend,
            mongo_uri,
            mongo_database,
            store_timeout_ms,
            events_channel_capacity,
            tests_seed_path,
        })
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

fn lookup(settings: &config::Config, key: &str, env_key: &str) -> Option<String> {
    settings
        .get_string(key)
        .ok()
        .or_else(|| env::var(env_key).ok())
}

fn parse_positive<T>(raw: &str, key: &str) -> Result<T, config::ConfigError>
where
    T: FromStr + PartialOrd + Default,
{
    match raw.trim().parse::<T>() {
        Ok(value) if value > T::default() => Ok(value),
        _ => Err(config::ConfigError::Message(format!(
            "{} must be a positive integer, got '{}'",
            key, raw
        ))),
    }
}
