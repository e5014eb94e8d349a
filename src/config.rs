//! Process configuration, read from the environment.

use std::str::FromStr;
use std::time::Duration;

use crate::messaging::{ConsumerSettings, RedeliveryPolicy};
use crate::storage::StoreConfig;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub store: StoreConfig,
    /// Apply embedded migrations before serving
    pub run_migrations: bool,
    pub consumer: ConsumerSettings,
    /// Consumer instances in this process, all in the same group
    pub consumer_workers: usize,
    /// `None` disables dead-lettering
    pub dead_letter_topic: Option<String>,
    /// 0 = unbounded
    pub cache_capacity: usize,
    pub app_host: String,
    pub app_port: u16,
    /// Default filter when RUST_LOG is unset
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Config {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenv::dotenv() {
            tracing::debug!(path = %path.display(), "Loaded .env file");
        }
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let store = StoreConfig {
            database_url: env.database_url()?,
            max_connections: env.positive("DATABASE_MAX_CONNECTIONS", 10)?,
            operation_timeout: Duration::from_millis(env.positive("DATABASE_TIMEOUT_MS", 5_000)?),
            warm_up_timeout: Duration::from_millis(env.positive("DATABASE_WARM_UP_TIMEOUT_MS", 60_000)?),
        };

        let redelivery = RedeliveryPolicy {
            max_deliveries: env.parse("REDELIVERY_MAX_ATTEMPTS", 5)?,
            initial_delay: Duration::from_millis(env.parse("REDELIVERY_INITIAL_DELAY_MS", 500)?),
            max_delay: Duration::from_millis(env.parse("REDELIVERY_MAX_DELAY_MS", 30_000)?),
            ..RedeliveryPolicy::default()
        };
        if redelivery.max_delay < redelivery.initial_delay {
            return Err(ConfigError::Invalid {
                var: "REDELIVERY_MAX_DELAY_MS",
                value: redelivery.max_delay.as_millis().to_string(),
            });
        }

        let consumer = ConsumerSettings {
            brokers: env.string("KAFKA_BROKERS", "127.0.0.1:9092"),
            group_id: env.string("CONSUMER_GROUP", "order_tracker"),
            topic: env.string("ORDERS_TOPIC", "orders"),
            redelivery,
        };

        // Empty is meaningful here: it switches dead-lettering off.
        let dead_letter_topic = match (env.lookup)("DEAD_LETTER_TOPIC") {
            Some(topic) if topic.trim().is_empty() => None,
            Some(topic) => Some(topic.trim().to_string()),
            None => Some("orders.dlq".to_string()),
        };

        Ok(Self {
            store,
            run_migrations: env.parse("RUN_MIGRATIONS", true)?,
            consumer,
            consumer_workers: env.positive("CONSUMER_WORKERS", 1)?,
            dead_letter_topic,
            cache_capacity: env.parse("CACHE_CAPACITY", 100_000)?,
            app_host: env.string("APP_HOST", "0.0.0.0"),
            app_port: env.parse("APP_PORT", 8080)?,
            log_level: env.string("LOG_LEVEL", "info"),
            log_format: env.parse("LOG_FORMAT", LogFormat::Json)?,
        })
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Unset and blank are the same thing.
    fn get(&self, var: &str) -> Option<String> {
        (self.lookup)(var)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn string(&self, var: &str, default: &str) -> String {
        self.get(var).unwrap_or_else(|| default.to_string())
    }

    fn parse<T: FromStr>(&self, var: &'static str, default: T) -> Result<T, ConfigError> {
        match self.get(var) {
            Some(value) => value
                .parse()
                .map_err(|_| ConfigError::Invalid { var, value }),
            None => Ok(default),
        }
    }

    fn positive<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + PartialOrd + Default + ToString,
    {
        let value = self.parse(var, default)?;
        if value <= T::default() {
            return Err(ConfigError::Invalid {
                var,
                value: value.to_string(),
            });
        }
        Ok(value)
    }

    fn required(&self, var: &'static str) -> Result<String, ConfigError> {
        self.get(var).ok_or(ConfigError::Missing(var))
    }

    fn database_url(&self) -> Result<String, ConfigError> {
        if let Some(url) = self.get("DATABASE_URL") {
            return Ok(url);
        }

        let host = self.required("POSTGRES_HOST")?;
        let port: u16 = self.parse("POSTGRES_PORT", 5432)?;
        let user = self.required("POSTGRES_USER")?;
        let password = self.required("POSTGRES_PASSWORD")?;
        let db = self.required("POSTGRES_DB")?;

        Ok(format!("postgres://{user}:{password}@{host}:{port}/{db}"))
    }
}
