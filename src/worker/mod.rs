//! Background consumer that moves events from the primary queue into the store.
//!
//! The worker owns its broker connection for its whole life and walks the
//! lifecycle `Disconnected -> Connecting -> Consuming -> ShuttingDown -> Stopped`.
//! Connection failures never end the worker; only its cancellation token does.

mod process;

pub use process::{ProcessingPolicy, process_delivery};

use std::{sync::Arc, time::Duration};

use futures_util::StreamExt;
use tokio::{sync::watch, task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    clients::{database::EventStore, rbmq::RabbitMqClient},
    config::Config,
    error::PipelineError,
    models::{queue::QueueTopology, status::WorkerState},
};

/// One unacknowledged delivery at a time.
pub const PREFETCH_COUNT: u16 = 1;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub rabbitmq_url: String,
    pub topology: QueueTopology,
    pub consumer_tag: String,
    pub reconnect_delay: Duration,
    pub policy: ProcessingPolicy,
}

impl WorkerConfig {
    pub fn from_config(config: &Config) -> Self {
        let mut policy = ProcessingPolicy::new(config.persist_retry_config());
        policy.requeue_on_dlq_failure = config.requeue_on_dlq_failure;

        Self {
            rabbitmq_url: config.rabbitmq_url(),
            topology: config.topology(),
            consumer_tag: format!("activity_worker_{}", Uuid::new_v4()),
            reconnect_delay: config.reconnect_delay(),
            policy,
        }
    }
}

pub struct Worker {
    config: WorkerConfig,
    store: Arc<dyn EventStore>,
    state: watch::Sender<WorkerState>,
}

impl Worker {
    pub fn new(config: WorkerConfig, store: Arc<dyn EventStore>) -> Self {
        let (state, _) = watch::channel(WorkerState::Disconnected);

        Self {
            config,
            store,
            state,
        }
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    /// Runs the worker on its own task. The returned handle owns the
    /// task's cancellation token.
    pub fn spawn(self, shutdown: CancellationToken) -> WorkerHandle {
        let state = self.subscribe();
        let task = tokio::spawn(self.run(shutdown.clone()));

        WorkerHandle {
            shutdown,
            state,
            task: Some(task),
        }
    }

    /// Connects, consumes, and reconnects until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            queue = %self.config.topology.primary,
            dead_letter_queue = %self.config.topology.dead_letter,
            "Worker starting"
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            self.transition(WorkerState::Connecting);

            let connect = RabbitMqClient::connect_consumer(
                &self.config.rabbitmq_url,
                &self.config.topology,
                PREFETCH_COUNT,
            );

            let connected = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                connected = connect => connected,
            };

            let client = match connected {
                Ok(client) => client,
                Err(e) => {
                    warn!(
                        error = %e,
                        retry_in_ms = self.config.reconnect_delay.as_millis() as u64,
                        "Worker could not connect to RabbitMQ"
                    );
                    self.transition(WorkerState::Disconnected);
                    if !self.wait_before_reconnect(&shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            self.transition(WorkerState::Consuming);
            let result = self.consume(&client, &shutdown).await;

            if result.is_ok() {
                self.transition(WorkerState::ShuttingDown);
            }
            client.close().await;

            match result {
                Ok(()) => break,
                Err(e) => {
                    error!(
                        error = %e,
                        retry_in_ms = self.config.reconnect_delay.as_millis() as u64,
                        "Worker lost its RabbitMQ connection"
                    );
                    self.transition(WorkerState::Disconnected);
                    if !self.wait_before_reconnect(&shutdown).await {
                        break;
                    }
                }
            }
        }

        self.transition(WorkerState::ShuttingDown);
        self.transition(WorkerState::Stopped);
        info!("Worker stopped");
    }

    /// Pulls deliveries one at a time until shutdown (`Ok`) or a connection
    /// failure (`Err`). An in-flight delivery always runs to completion.
    async fn consume(&self, client: &RabbitMqClient, shutdown: &CancellationToken) -> Result<(), PipelineError> {
        let mut consumer = client
            .create_consumer(&self.config.topology.primary, &self.config.consumer_tag)
            .await?;

        info!(consumer_tag = %self.config.consumer_tag, "Waiting for messages");

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(()),
                next = consumer.next() => next,
            };

            let delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => return Err(e.into()),
                None => {
                    return Err(PipelineError::Connection(
                        "consumer stream ended".to_string(),
                    ));
                }
            };

            let outcome = process_delivery(
                client,
                self.store.as_ref(),
                &self.config.policy,
                shutdown,
                delivery.delivery_tag,
                &delivery.data,
            )
            .await?;

            info!(delivery_tag = delivery.delivery_tag, outcome = %outcome, "Delivery resolved");
        }
    }

    /// Returns `false` if shutdown was requested while waiting.
    async fn wait_before_reconnect(&self, shutdown: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => false,
            _ = sleep(self.config.reconnect_delay) => true,
        }
    }

    fn transition(&self, next: WorkerState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            info!(from = %previous, to = %next, "Worker state changed");
        }
    }
}

/// Supervises a spawned [`Worker`]: exposes its state, stops it, and waits
/// for it to finish. Dropping the handle also requests shutdown.
pub struct WorkerHandle {
    shutdown: CancellationToken,
    state: watch::Receiver<WorkerState>,
    task: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Requests a graceful stop. Calling it more than once has no effect.
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            info!("Worker shutdown requested");
        }
        self.shutdown.cancel();
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(|task| task.is_finished())
    }

    /// Waits for the worker task to end. Does not request shutdown by itself.
    pub async fn join(mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!(error = %e, "Worker task panicked or was aborted");
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
