use std::{collections::BTreeMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use futures_util::future::join_all;
use tokio::time::{Instant, timeout};
use tracing::{debug, warn};

use crate::{
    clients::{database::DatabaseClient, rbmq::RabbitMqClient},
    config::Config,
    error::PipelineError,
    models::health::{ComponentError, HealthCheckResponse, HealthStatus, ServiceHealth},
};

pub const BROKER_COMPONENT: &str = "message_broker";
pub const STORE_COMPONENT: &str = "database";

/// One reachability check against an external dependency.
#[async_trait]
pub trait DependencyProbe: Send + Sync {
    fn component(&self) -> &str;

    async fn probe(&self) -> Result<(), PipelineError>;
}

pub struct BrokerProbe {
    rabbitmq_url: String,
}

impl BrokerProbe {
    pub fn new(rabbitmq_url: impl Into<String>) -> Self {
        Self {
            rabbitmq_url: rabbitmq_url.into(),
        }
    }
}

#[async_trait]
impl DependencyProbe for BrokerProbe {
    fn component(&self) -> &str {
        BROKER_COMPONENT
    }

    async fn probe(&self) -> Result<(), PipelineError> {
        let client = RabbitMqClient::open(&self.rabbitmq_url).await?;
        client.close().await;
        Ok(())
    }
}

pub struct StoreProbe {
    pg_config: tokio_postgres::Config,
}

impl StoreProbe {
    pub fn new(pg_config: tokio_postgres::Config) -> Self {
        Self { pg_config }
    }
}

#[async_trait]
impl DependencyProbe for StoreProbe {
    fn component(&self) -> &str {
        STORE_COMPONENT
    }

    async fn probe(&self) -> Result<(), PipelineError> {
        DatabaseClient::health_check(&self.pg_config).await
    }
}

/// Point-in-time readiness of the broker and the store.
///
/// Probes run concurrently, once each, under a shared per-probe timeout.
/// A single failure is reported as is; there is no retry or voting.
pub struct HealthChecker {
    probes: Vec<Arc<dyn DependencyProbe>>,
    timeout: Duration,
}

impl HealthChecker {
    pub fn new(probes: Vec<Arc<dyn DependencyProbe>>, timeout: Duration) -> Self {
        Self { probes, timeout }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            vec![
                Arc::new(BrokerProbe::new(config.rabbitmq_url())),
                Arc::new(StoreProbe::new(config.store_config())),
            ],
            config.health_timeout(),
        )
    }

    pub async fn check_all(&self) -> HealthCheckResponse {
        let results = join_all(self.probes.iter().map(|probe| self.run_probe(probe.as_ref()))).await;

        let mut checks = BTreeMap::new();
        let mut errors = Vec::new();

        for (component, health) in results {
            if let Some(error) = &health.error {
                errors.push(ComponentError {
                    component: component.clone(),
                    error: error.clone(),
                });
            }
            checks.insert(component, health);
        }

        let status = if errors.is_empty() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };

        HealthCheckResponse {
            status,
            timestamp: Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            checks,
            errors,
            worker: None,
        }
    }

    async fn run_probe(&self, probe: &dyn DependencyProbe) -> (String, ServiceHealth) {
        let component = probe.component().to_string();
        let start = Instant::now();

        let health = match timeout(self.timeout, probe.probe()).await {
            Ok(Ok(())) => {
                let elapsed = start.elapsed().as_millis() as u64;
                debug!(component = %component, response_time_ms = elapsed, "Health check passed");
                ServiceHealth::healthy(elapsed)
            }
            Ok(Err(e)) => {
                warn!(component = %component, error = %e, "Health check failed");
                ServiceHealth::unhealthy(e.to_string())
            }
            Err(_) => {
                warn!(
                    component = %component,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Health check timed out"
                );
                ServiceHealth::unhealthy(format!(
                    "No response within {}ms",
                    self.timeout.as_millis()
                ))
            }
        };

        (component, health)
    }
}
