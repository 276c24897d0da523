use async_trait::async_trait;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, ConfirmSelectOptions,
    },
    types::FieldTable,
};
use tracing::{debug, info, warn};

use crate::{
    error::PipelineError,
    models::queue::{QueueTopology, declare_durable},
};

/// AMQP delivery mode that makes the broker persist a message to disk.
pub const PERSISTENT_DELIVERY: u8 = 2;

/// One broker connection and its channel, owned by whoever opened it.
///
/// Callers must end every code path with [`RabbitMqClient::close`].
pub struct RabbitMqClient {
    connection: Connection,
    channel: Channel,
    dead_letter_queue: Option<String>,
}

impl RabbitMqClient {
    pub async fn open(rabbitmq_url: &str) -> Result<Self, PipelineError> {
        debug!("Connecting to RabbitMQ");

        let connection = Connection::connect(rabbitmq_url, ConnectionProperties::default())
            .await
            .map_err(|e| PipelineError::Connection(format!("Failed to connect to RabbitMQ: {}", e)))?;

        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                let _ = connection.close(200, "channel creation failed").await;
                return Err(PipelineError::Connection(format!(
                    "RabbitMQ channel creation failed: {}",
                    e
                )));
            }
        };

        debug!("RabbitMQ connection and channel established");

        Ok(Self {
            connection,
            channel,
            dead_letter_queue: None,
        })
    }

    /// Opens a connection set up for consuming: primary and dead-letter queues
    /// declared, at most `prefetch_count` unacknowledged deliveries, and
    /// publisher confirms on for dead-letter publishes.
    pub async fn connect_consumer(
        rabbitmq_url: &str,
        topology: &QueueTopology,
        prefetch_count: u16,
    ) -> Result<Self, PipelineError> {
        let mut client = Self::open(rabbitmq_url).await?;

        if let Err(e) = client.prepare_consumer(topology, prefetch_count).await {
            client.close().await;
            return Err(e);
        }

        info!(
            queue = %topology.primary,
            dead_letter_queue = %topology.dead_letter,
            prefetch_count,
            "RabbitMQ consumer connection ready"
        );

        Ok(client)
    }

    async fn prepare_consumer(
        &mut self,
        topology: &QueueTopology,
        prefetch_count: u16,
    ) -> Result<(), PipelineError> {
        topology.declare(&self.channel).await?;

        self.channel
            .basic_qos(prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| PipelineError::Connection(format!("Failed to set up QoS: {}", e)))?;

        // Dead-letter publishes on this channel wait for the broker's confirm.
        self.enable_confirms().await?;

        self.dead_letter_queue = Some(topology.dead_letter.clone());
        Ok(())
    }

    pub async fn declare_queue(&self, queue_name: &str) -> Result<(), PipelineError> {
        declare_durable(&self.channel, queue_name)
            .await
            .map_err(|e| PipelineError::Connection(format!("Failed to declare queue {}: {}", queue_name, e)))
    }

    /// Switches the channel to publisher confirms so `publish_persistent`
    /// only returns once the broker has taken responsibility for the message.
    pub async fn enable_confirms(&self) -> Result<(), PipelineError> {
        self.channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| PipelineError::Connection(format!("Failed to enable publisher confirms: {}", e)))
    }

    pub async fn create_consumer(&self, queue_name: &str, consumer_tag: &str) -> Result<Consumer, PipelineError> {
        let consumer = self
            .channel
            .basic_consume(
                queue_name,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| PipelineError::Connection(format!("Failed to create consumer: {}", e)))?;

        debug!(queue = queue_name, consumer_tag, "Consumer created");

        Ok(consumer)
    }

    pub async fn publish_persistent(&self, queue_name: &str, payload: &[u8]) -> Result<(), PipelineError> {
        let confirm = self
            .channel
            .basic_publish(
                "",
                queue_name,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default()
                    .with_delivery_mode(PERSISTENT_DELIVERY)
                    .with_content_type("application/json".into()),
            )
            .await
            .map_err(|e| PipelineError::Connection(format!("Failed to publish message to {}: {}", queue_name, e)))?;

        let confirmation = confirm
            .await
            .map_err(|e| PipelineError::Connection(format!("Publish to {} was not confirmed: {}", queue_name, e)))?;

        if confirmation.is_nack() {
            return Err(PipelineError::Connection(format!(
                "Broker rejected message for {}",
                queue_name
            )));
        }

        Ok(())
    }

    pub async fn close(self) {
        if let Err(e) = self.channel.close(200, "OK").await {
            debug!(error = %e, "RabbitMQ channel was already closed");
        }
        if let Err(e) = self.connection.close(200, "OK").await {
            debug!(error = %e, "RabbitMQ connection was already closed");
        }
    }
}

/// Broker operations needed to resolve a delivery. Implemented by
/// [`RabbitMqClient`] and by in-memory fakes in tests.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    async fn acknowledge(&self, delivery_tag: u64) -> Result<(), PipelineError>;

    /// Returns a delivery to the head of its queue.
    async fn requeue(&self, delivery_tag: u64) -> Result<(), PipelineError>;

    async fn publish_to_dlq(&self, payload: &[u8]) -> Result<(), PipelineError>;
}

#[async_trait]
impl DeliveryChannel for RabbitMqClient {
    async fn acknowledge(&self, delivery_tag: u64) -> Result<(), PipelineError> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| PipelineError::Connection(format!("Failed to acknowledge message: {}", e)))
    }

    async fn requeue(&self, delivery_tag: u64) -> Result<(), PipelineError> {
        self.channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    requeue: true,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| PipelineError::Connection(format!("Failed to requeue message: {}", e)))
    }

    async fn publish_to_dlq(&self, payload: &[u8]) -> Result<(), PipelineError> {
        let Some(dead_letter_queue) = self.dead_letter_queue.as_deref() else {
            warn!("Dead-letter publish on a connection without a declared topology");
            return Err(PipelineError::Connection(
                "dead-letter queue not declared on this connection".to_string(),
            ));
        };

        self.publish_persistent(dead_letter_queue, payload).await
    }
}
