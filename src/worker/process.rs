//! Per-delivery state machine: parse, persist with retry, then acknowledge,
//! dead-letter, or requeue.

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    clients::{database::EventStore, rbmq::DeliveryChannel},
    error::PipelineError,
    models::{event::Event, retry::RetryConfig, status::MessageOutcome},
};

/// How a delivery is persisted and what happens when persistence gives up.
#[derive(Debug, Clone)]
pub struct ProcessingPolicy {
    pub persist_retry: RetryConfig,
    /// When the dead-letter publish fails, hand the message back to the
    /// primary queue instead of acknowledging it.
    pub requeue_on_dlq_failure: bool,
}

impl ProcessingPolicy {
    pub fn new(persist_retry: RetryConfig) -> Self {
        Self {
            persist_retry,
            requeue_on_dlq_failure: false,
        }
    }
}

enum PersistResult {
    Stored,
    Exhausted(PipelineError),
    Interrupted { attempts: u32 },
}

/// Drives one delivery to exactly one terminal resolution.
///
/// An `Err` is only returned when the resolution itself (ack or requeue)
/// could not be sent, which means the connection is gone and the broker
/// will redeliver.
pub async fn process_delivery<C>(
    channel: &C,
    store: &dyn EventStore,
    policy: &ProcessingPolicy,
    shutdown: &CancellationToken,
    delivery_tag: u64,
    payload: &[u8],
) -> Result<MessageOutcome, PipelineError>
where
    C: DeliveryChannel + ?Sized,
{
    let event = match Event::from_payload(payload) {
        Ok(event) => event,
        Err(e) => {
            warn!(
                delivery_tag,
                error = %PipelineError::MalformedMessage(e),
                payload_bytes = payload.len(),
                "Dropping malformed message"
            );
            channel.acknowledge(delivery_tag).await?;
            return Ok(MessageOutcome::Malformed);
        }
    };

    debug!(
        delivery_tag,
        user_id = %event.user_id(),
        event_type = event.event_type(),
        "Processing event"
    );

    match persist_with_retry(store, &policy.persist_retry, shutdown, delivery_tag, &event).await {
        PersistResult::Stored => {
            channel.acknowledge(delivery_tag).await?;
            info!(
                delivery_tag,
                user_id = %event.user_id(),
                event_type = event.event_type(),
                "Event persisted"
            );
            Ok(MessageOutcome::Done)
        }
        PersistResult::Interrupted { attempts } => {
            channel.requeue(delivery_tag).await?;
            info!(
                delivery_tag,
                attempts,
                "Shutdown requested during persistence retries, message requeued"
            );
            Ok(MessageOutcome::Requeued)
        }
        PersistResult::Exhausted(e) => {
            error!(delivery_tag, error = %e, "Persistence exhausted, dead-lettering message");

            match channel.publish_to_dlq(payload).await {
                Ok(()) => {
                    info!(delivery_tag, "Dead-letter publish confirmed by broker");
                }
                Err(dlq_err) if policy.requeue_on_dlq_failure => {
                    error!(
                        delivery_tag,
                        error = %dlq_err,
                        "Dead-letter publish failed, requeueing message"
                    );
                    channel.requeue(delivery_tag).await?;
                    return Ok(MessageOutcome::Requeued);
                }
                Err(dlq_err) => {
                    error!(
                        delivery_tag,
                        error = %dlq_err,
                        "Dead-letter publish failed, message will be dropped"
                    );
                }
            }

            channel.acknowledge(delivery_tag).await?;
            Ok(MessageOutcome::DeadLettered)
        }
    }
}

async fn persist_with_retry(
    store: &dyn EventStore,
    retry: &RetryConfig,
    shutdown: &CancellationToken,
    delivery_tag: u64,
    event: &Event,
) -> PersistResult {
    let mut attempt = 0;

    loop {
        attempt += 1;

        let e = match store.insert_event(event).await {
            Ok(()) => return PersistResult::Stored,
            Err(e) => e,
        };

        if attempt >= retry.max_attempts {
            return PersistResult::Exhausted(PipelineError::PersistExhausted {
                attempts: attempt,
                last_error: e.to_string(),
            });
        }

        let delay = retry.delay_after(attempt);
        warn!(
            delivery_tag,
            attempt,
            max_attempts = retry.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %e,
            "Persist attempt failed, retrying"
        );

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => return PersistResult::Interrupted { attempts: attempt },
            _ = sleep(delay) => {}
        }
    }
}
