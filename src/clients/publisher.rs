use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::time::timeout;
use tracing::{debug, error};

use crate::{
    clients::rbmq::RabbitMqClient,
    config::Config,
    error::PipelineError,
    models::{event::Event, retry::RetryConfig},
    utils::retry_with_backoff,
};

/// A single, unretried attempt to put an encoded event on the primary queue.
#[async_trait]
pub trait EventTransport: Send + Sync {
    async fn publish(&self, payload: &[u8]) -> Result<(), PipelineError>;
}

/// Publishes over a fresh AMQP connection per call. Nothing is pooled, so a
/// broken connection only ever affects the request that opened it.
pub struct AmqpTransport {
    rabbitmq_url: String,
    queue_name: String,
}

impl AmqpTransport {
    pub fn new(rabbitmq_url: impl Into<String>, queue_name: impl Into<String>) -> Self {
        Self {
            rabbitmq_url: rabbitmq_url.into(),
            queue_name: queue_name.into(),
        }
    }

    async fn publish_on(&self, client: &RabbitMqClient, payload: &[u8]) -> Result<(), PipelineError> {
        client.declare_queue(&self.queue_name).await?;
        client.enable_confirms().await?;
        client.publish_persistent(&self.queue_name, payload).await
    }
}

#[async_trait]
impl EventTransport for AmqpTransport {
    async fn publish(&self, payload: &[u8]) -> Result<(), PipelineError> {
        let client = RabbitMqClient::open(&self.rabbitmq_url).await?;

        let result = self.publish_on(&client, payload).await;
        client.close().await;

        result
    }
}

pub struct EventPublisher {
    transport: Arc<dyn EventTransport>,
    retry_config: RetryConfig,
    attempt_timeout: Duration,
}

impl EventPublisher {
    pub fn new(
        transport: Arc<dyn EventTransport>,
        retry_config: RetryConfig,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            retry_config,
            attempt_timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let transport = AmqpTransport::new(config.rabbitmq_url(), config.queue_name.clone());

        Self::new(
            Arc::new(transport),
            config.publish_retry_config(),
            config.publish_timeout(),
        )
    }

    /// Queues a contract-valid event with persistent delivery.
    ///
    /// Transport failures are retried with exponential backoff. Once every
    /// attempt has failed the caller gets [`PipelineError::PublishExhausted`].
    pub async fn publish(&self, event: &Event) -> Result<(), PipelineError> {
        let payload = event
            .to_payload()
            .map_err(|e| PipelineError::Encode(e.to_string()))?;

        let result = retry_with_backoff(&self.retry_config, || {
            let payload = payload.as_slice();
            async move {
                match timeout(self.attempt_timeout, self.transport.publish(payload)).await {
                    Ok(result) => result,
                    Err(_) => Err(PipelineError::Connection(format!(
                        "publish timed out after {}ms",
                        self.attempt_timeout.as_millis()
                    ))),
                }
            }
        })
        .await;

        match result {
            Ok(()) => {
                debug!(
                    user_id = %event.user_id(),
                    event_type = event.event_type(),
                    "Event published to queue"
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    user_id = %event.user_id(),
                    event_type = event.event_type(),
                    attempts = self.retry_config.max_attempts,
                    error = %e,
                    "Giving up on publishing event"
                );
                Err(PipelineError::PublishExhausted {
                    attempts: self.retry_config.max_attempts,
                    last_error: e.to_string(),
                })
            }
        }
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry_config
    }
}
