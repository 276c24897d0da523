use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::models::{queue::QueueTopology, retry::RetryConfig};

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    #[serde(default = "default_rabbitmq_host")]
    pub rabbitmq_host: String,
    #[serde(default = "default_rabbitmq_port")]
    pub rabbitmq_port: u16,
    #[serde(default = "default_guest")]
    pub rabbitmq_user: String,
    #[serde(default = "default_guest")]
    pub rabbitmq_password: String,
    #[serde(default = "default_vhost")]
    pub rabbitmq_vhost: String,
    #[serde(default = "default_queue_name")]
    pub queue_name: String,

    #[serde(default = "default_db_host")]
    pub db_host: String,
    #[serde(default = "default_db_port")]
    pub db_port: u16,
    #[serde(default = "default_db_user")]
    pub db_user: String,
    #[serde(default = "default_db_password")]
    pub db_password: String,
    #[serde(default = "default_db_name")]
    pub db_name: String,
    #[serde(default = "default_db_table")]
    pub db_table: String,

    #[serde(default = "default_server_port")]
    pub server_port: u16,

    #[serde(default = "default_max_attempts")]
    pub publish_max_attempts: u32,
    #[serde(default = "default_publish_initial_delay_ms")]
    pub publish_initial_delay_ms: u64,
    #[serde(default = "default_publish_max_delay_ms")]
    pub publish_max_delay_ms: u64,
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,

    #[serde(default = "default_max_attempts")]
    pub persist_max_attempts: u32,
    #[serde(default = "default_persist_retry_delay_ms")]
    pub persist_retry_delay_ms: u64,
    #[serde(default = "default_persist_timeout_ms")]
    pub persist_timeout_ms: u64,

    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_health_timeout_ms")]
    pub health_timeout_ms: u64,

    #[serde(default)]
    pub requeue_on_dlq_failure: bool,
    #[serde(default = "default_true")]
    pub run_worker: bool,
}

fn default_rabbitmq_host() -> String {
    "localhost".to_string()
}

fn default_rabbitmq_port() -> u16 {
    5672
}

fn default_guest() -> String {
    "guest".to_string()
}

fn default_vhost() -> String {
    "/".to_string()
}

fn default_queue_name() -> String {
    "user_activity_events".to_string()
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_port() -> u16 {
    5432
}

fn default_db_user() -> String {
    "postgres".to_string()
}

fn default_db_password() -> String {
    "postgres".to_string()
}

fn default_db_name() -> String {
    "user_activity_db".to_string()
}

fn default_db_table() -> String {
    "user_activities".to_string()
}

fn default_server_port() -> u16 {
    8000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_publish_initial_delay_ms() -> u64 {
    1000
}

fn default_publish_max_delay_ms() -> u64 {
    16000
}

fn default_publish_timeout_ms() -> u64 {
    5000
}

fn default_persist_retry_delay_ms() -> u64 {
    2000
}

fn default_persist_timeout_ms() -> u64 {
    5000
}

fn default_reconnect_delay_ms() -> u64 {
    5000
}

fn default_health_timeout_ms() -> u64 {
    2000
}

fn default_true() -> bool {
    true
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I>(vars: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: Self = envy::from_iter(vars)
            .map_err(|e| anyhow!("Invalid or missing environmental variable: {}", e))?;

        if config.queue_name.trim().is_empty() {
            return Err(anyhow!("QUEUE_NAME must not be empty"));
        }
        if config.publish_max_attempts == 0 || config.persist_max_attempts == 0 {
            return Err(anyhow!("Retry attempt limits must be at least 1"));
        }
        if !is_table_name(&config.db_table) {
            return Err(anyhow!(
                "DB_TABLE must be a table name like `events` or `analytics.events`, got {:?}",
                config.db_table
            ));
        }

        Ok(config)
    }

    /// AMQP URI with user, password and vhost percent-encoded. The default
    /// vhost `/` becomes `%2F`.
    pub fn rabbitmq_url(&self) -> String {
        let vhost = match self.rabbitmq_vhost.as_str() {
            "/" => "/",
            vhost => vhost.trim_start_matches('/'),
        };

        format!(
            "amqp://{}:{}@{}:{}/{}",
            urlencoding::encode(&self.rabbitmq_user),
            urlencoding::encode(&self.rabbitmq_password),
            self.rabbitmq_host,
            self.rabbitmq_port,
            urlencoding::encode(vhost)
        )
    }

    pub fn topology(&self) -> QueueTopology {
        QueueTopology::new(self.queue_name.clone())
    }

    pub fn publish_retry_config(&self) -> RetryConfig {
        RetryConfig::exponential(
            self.publish_max_attempts,
            self.publish_initial_delay_ms,
            self.publish_max_delay_ms,
        )
    }

    pub fn persist_retry_config(&self) -> RetryConfig {
        RetryConfig::fixed(self.persist_max_attempts, self.persist_retry_delay_ms)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn persist_timeout(&self) -> Duration {
        Duration::from_millis(self.persist_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }

    pub fn store_config(&self) -> tokio_postgres::Config {
        let mut pg = tokio_postgres::Config::new();
        pg.host(&self.db_host)
            .port(self.db_port)
            .user(&self.db_user)
            .password(&self.db_password)
            .dbname(&self.db_name)
            .connect_timeout(self.persist_timeout())
            .application_name("activity_pipeline");
        pg
    }
}

/// A bare identifier, optionally schema-qualified once. Quoted names are
/// not supported.
fn is_table_name(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() > 2 {
        return false;
    }

    parts.iter().all(|part| {
        let mut chars = part.chars();
        matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    })
}
