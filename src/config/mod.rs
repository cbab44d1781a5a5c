use crate::error::AppError;
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub port: u16,
    pub mongodb: MongoConfig,
    pub storage: StorageConfig,
    pub broker: BrokerConfig,
    pub upload: UploadConfig,
    pub worker: WorkerConfig,
    pub reconcile: ReconcileConfig,
    /// When set, every adapter is replaced by its in-memory stand-in and no
    /// network connection is attempted.
    pub disable_external_connections: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub local_path: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Local,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    pub url: String,
    pub exchange: String,
    pub queue: String,
    pub routing_key: String,
    pub dead_letter_queue: String,
}

impl BrokerConfig {
    /// Redis list key events are pushed to and popped from.
    pub fn queue_key(&self) -> String {
        format!("{}:{}", self.exchange, self.queue)
    }

    /// Redis list key for events that exhausted retries.
    pub fn dead_letter_key(&self) -> String {
        format!("{}:{}", self.exchange, self.dead_letter_queue)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    pub allowed_extensions: Vec<String>,
    pub allowed_content_types: Vec<String>,
    pub max_file_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    pub enabled: bool,
    pub worker_count: usize,
    pub max_retries: i32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub processing_timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl WorkerConfig {
    pub fn processing_timeout(&self) -> Duration {
        Duration::from_secs(self.processing_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Delay before re-enqueueing a failed event: base × 2^attempt, capped.
    pub fn retry_delay(&self, attempt: i32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.max(0) as u32);
        let delay = self.base_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileConfig {
    pub interval_secs: u64,
    pub stale_after_secs: u64,
}

impl ReconcileConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_after_secs as i64)
    }
}

impl ServiceConfig {
    pub fn load() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let is_prod = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";

        Ok(ServiceConfig {
            port: get_env("PORT", Some("8080"), is_prod)?
                .parse()
                .map_err(|e| AppError::Config(anyhow::anyhow!("Invalid PORT: {}", e)))?,
            mongodb: MongoConfig {
                uri: get_env("MONGODB_URI", Some("mongodb://localhost:27017"), is_prod)?,
                database: get_env("MONGODB_DATABASE", Some("ingest_db"), is_prod)?,
            },
            storage: StorageConfig {
                backend: get_env("STORAGE_BACKEND", Some("local"), is_prod)?
                    .parse()
                    .map_err(|e: String| AppError::Config(anyhow::anyhow!(e)))?,
                local_path: get_env("STORAGE_LOCAL_PATH", Some("storage"), is_prod)?,
            },
            broker: BrokerConfig {
                url: get_env("BROKER_URL", Some("redis://localhost:6379"), is_prod)?,
                exchange: get_env("BROKER_EXCHANGE", Some("document_events"), is_prod)?,
                queue: get_env("BROKER_QUEUE", Some("document_processing"), is_prod)?,
                routing_key: get_env("BROKER_ROUTING_KEY", Some("document.process"), is_prod)?,
                dead_letter_queue: get_env(
                    "BROKER_DEAD_LETTER_QUEUE",
                    Some("document_dead_letter"),
                    is_prod,
                )?,
            },
            upload: UploadConfig {
                allowed_extensions: parse_csv(&get_env(
                    "ALLOWED_EXTENSIONS",
                    Some(".pdf,.txt,.json"),
                    is_prod,
                )?),
                allowed_content_types: parse_csv(&get_env(
                    "ALLOWED_CONTENT_TYPES",
                    Some("application/pdf,text/plain,application/json,text/json"),
                    is_prod,
                )?),
                max_file_size: get_env("MAX_FILE_SIZE", Some("10485760"), is_prod)?
                    .parse()
                    .map_err(|e| AppError::Config(anyhow::anyhow!("Invalid MAX_FILE_SIZE: {}", e)))?,
            },
            worker: WorkerConfig {
                enabled: get_env("WORKER_ENABLED", Some("true"), is_prod)? == "true",
                worker_count: parse_env("WORKER_COUNT", Some("4"), is_prod)?,
                max_retries: parse_env("WORKER_MAX_RETRIES", Some("3"), is_prod)?,
                base_delay_ms: parse_env("WORKER_BASE_DELAY_MS", Some("500"), is_prod)?,
                max_delay_ms: parse_env("WORKER_MAX_DELAY_MS", Some("30000"), is_prod)?,
                processing_timeout_secs: parse_env("WORKER_PROCESSING_TIMEOUT_SECS", Some("60"), is_prod)?,
                poll_interval_ms: parse_env("WORKER_POLL_INTERVAL_MS", Some("1000"), is_prod)?,
            },
            reconcile: ReconcileConfig {
                interval_secs: parse_env("RECONCILE_INTERVAL_SECS", Some("60"), is_prod)?,
                stale_after_secs: parse_env("RECONCILE_STALE_AFTER_SECS", Some("300"), is_prod)?,
            },
            disable_external_connections: get_env(
                "DISABLE_EXTERNAL_CONNECTIONS",
                Some("false"),
                is_prod,
            )?
            .to_lowercase()
                == "true",
        })
    }
}

impl std::str::FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(StorageBackend::Local),
            "memory" => Ok(StorageBackend::Memory),
            _ => Err(format!("Invalid storage backend: {}", s)),
        }
    }
}

fn parse_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::Config(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::Config(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: Option<&str>, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, default, is_prod)?
        .parse()
        .map_err(|e| AppError::Config(anyhow::anyhow!("Invalid {}: {}", key, e)))
}
