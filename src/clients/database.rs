use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::{sync::Mutex, time::timeout};
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error, info, warn};

use crate::{config::Config, error::PipelineError, models::event::Event};

/// Destination for successfully processed events: one row per event.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn insert_event(&self, event: &Event) -> Result<(), PipelineError>;
}

/// PostgreSQL-backed store. The connection is opened lazily and replaced
/// whenever the previous one has gone away, so a store outage turns into
/// per-attempt failures rather than a permanently broken client.
///
/// Each insert, connecting included, is bounded by `attempt_timeout`.
pub struct DatabaseClient {
    pg_config: tokio_postgres::Config,
    insert_sql: String,
    attempt_timeout: Duration,
    client: Mutex<Option<Client>>,
}

impl DatabaseClient {
    pub fn new(pg_config: tokio_postgres::Config, table: &str, attempt_timeout: Duration) -> Self {
        let insert_sql = format!(
            "INSERT INTO {} (user_id, event_type, timestamp, metadata) VALUES ($1, $2, $3, $4)",
            table
        );

        Self {
            pg_config,
            insert_sql,
            attempt_timeout,
            client: Mutex::new(None),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.store_config(), &config.db_table, config.persist_timeout())
    }

    pub async fn connect(pg_config: &tokio_postgres::Config) -> Result<Client, PipelineError> {
        debug!("Connecting to PostgreSQL database");

        let (client, connection) = pg_config.connect(NoTls).await.map_err(|e| {
            PipelineError::TransientPersistFailure(format!("Failed to connect to database: {}", e))
        })?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "PostgreSQL connection closed with error");
            }
        });

        info!("PostgreSQL connection established");

        Ok(client)
    }

    /// Opens a throwaway connection and runs `SELECT 1`.
    pub async fn health_check(pg_config: &tokio_postgres::Config) -> Result<(), PipelineError> {
        let client = Self::connect(pg_config).await?;

        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| PipelineError::TransientPersistFailure(format!("Database health check failed: {}", e)))?;

        Ok(())
    }

    pub fn pg_config(&self) -> &tokio_postgres::Config {
        &self.pg_config
    }
}

#[async_trait]
impl EventStore for DatabaseClient {
    async fn insert_event(&self, event: &Event) -> Result<(), PipelineError> {
        let timestamp = event.parsed_timestamp().ok_or_else(|| {
            PipelineError::TransientPersistFailure(format!(
                "Invalid timestamp '{}'",
                event.timestamp()
            ))
        })?;
        let user_id = event.user_id().to_string();
        let event_type = event.event_type();
        let metadata = Value::Object(event.metadata().clone());

        let mut guard = self.client.lock().await;

        let attempt = timeout(self.attempt_timeout, async {
            let stale = guard.as_ref().is_none_or(|client| client.is_closed());
            if stale {
                match Self::connect(&self.pg_config).await {
                    Ok(client) => *guard = Some(client),
                    Err(e) => return Err(e),
                }
            }

            let Some(client) = guard.as_ref() else {
                return Err(PipelineError::TransientPersistFailure(
                    "database client unavailable".to_string(),
                ));
            };

            client
                .execute(
                    self.insert_sql.as_str(),
                    &[&user_id, &event_type, &timestamp, &metadata],
                )
                .await
                .map_err(|e| {
                    PipelineError::TransientPersistFailure(format!("Database write failed: {}", e))
                })
        })
        .await;

        let result = match attempt {
            Ok(result) => result,
            Err(_) => Err(PipelineError::TransientPersistFailure(format!(
                "Database did not answer within {}ms",
                self.attempt_timeout.as_millis()
            ))),
        };

        match result {
            Ok(_) => {
                debug!(
                    user_id = %user_id,
                    event_type,
                    "Event written to database"
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    error = %e,
                    user_id = %user_id,
                    "Failed to write event to database"
                );
                // A connection that timed out or closed mid-query is not reused.
                *guard = None;
                Err(e)
            }
        }
    }
}
