mod common;

use std::time::Duration;

use activity_pipeline::{
    models::{retry::RetryConfig, status::MessageOutcome},
    worker::{ProcessingPolicy, process_delivery},
};
use anyhow::Result;
use common::{FakeChannel, FakeStore, valid_event};
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

fn policy() -> ProcessingPolicy {
    ProcessingPolicy::new(RetryConfig::fixed(5, 2000))
}

/// Test: A valid message is persisted once and acknowledged
#[tokio::test(start_paused = true)]
async fn test_valid_message_persisted_and_acked() -> Result<()> {
    let channel = FakeChannel::new();
    let store = FakeStore::healthy();
    let payload = valid_event().to_payload()?;

    let outcome = assert_ok!(
        process_delivery(
            &channel,
            &store,
            &policy(),
            &CancellationToken::new(),
            1,
            &payload,
        )
        .await
    );

    assert_eq!(outcome, MessageOutcome::Done);
    assert_eq!(store.rows(), vec![valid_event()]);
    assert_eq!(channel.acks(), vec![1]);
    assert!(channel.dead_letters().is_empty());

    Ok(())
}

/// Test: A malformed message is acknowledged and does not block the next one
#[tokio::test(start_paused = true)]
async fn test_malformed_message_acked_and_skipped() -> Result<()> {
    let channel = FakeChannel::new();
    let store = FakeStore::healthy();
    let shutdown = CancellationToken::new();

    let malformed = process_delivery(&channel, &store, &policy(), &shutdown, 1, b"{not json").await?;
    assert_eq!(malformed, MessageOutcome::Malformed);

    let payload = valid_event().to_payload()?;
    let next = process_delivery(&channel, &store, &policy(), &shutdown, 2, &payload).await?;
    assert_eq!(next, MessageOutcome::Done);

    assert_eq!(channel.acks(), vec![1, 2]);
    assert_eq!(store.attempts(), 1, "malformed body never reaches the store");
    assert!(channel.dead_letters().is_empty());

    Ok(())
}

/// Test: JSON that lacks event fields counts as malformed
#[tokio::test(start_paused = true)]
async fn test_wrong_shape_is_malformed() -> Result<()> {
    let channel = FakeChannel::new();
    let store = FakeStore::healthy();

    let outcome = process_delivery(
        &channel,
        &store,
        &policy(),
        &CancellationToken::new(),
        7,
        br#"{"hello": "world"}"#,
    )
    .await?;

    assert_eq!(outcome, MessageOutcome::Malformed);
    assert_eq!(channel.acks(), vec![7]);

    Ok(())
}

/// Test: Null metadata is an empty map, not a malformed message
#[tokio::test(start_paused = true)]
async fn test_null_metadata_is_persisted() -> Result<()> {
    let channel = FakeChannel::new();
    let store = FakeStore::healthy();

    let outcome = process_delivery(
        &channel,
        &store,
        &policy(),
        &CancellationToken::new(),
        11,
        br#"{"user_id":1,"event_type":"x","timestamp":"2026-02-17T15:10:00Z","metadata":null}"#,
    )
    .await?;

    assert_eq!(outcome, MessageOutcome::Done);
    assert_eq!(channel.acks(), vec![11]);

    let rows = store.rows();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].metadata().is_empty());

    Ok(())
}

/// Test: A transient store failure is retried and then succeeds
#[tokio::test(start_paused = true)]
async fn test_transient_store_failure_recovers() -> Result<()> {
    let channel = FakeChannel::new();
    let store = FakeStore::failing_first(2);
    let payload = valid_event().to_payload()?;
    let start = Instant::now();

    let outcome = process_delivery(
        &channel,
        &store,
        &policy(),
        &CancellationToken::new(),
        3,
        &payload,
    )
    .await?;

    assert_eq!(outcome, MessageOutcome::Done);
    assert_eq!(store.attempts(), 3);
    assert_eq!(start.elapsed(), Duration::from_secs(4));
    assert_eq!(channel.acks(), vec![3]);
    assert!(channel.dead_letters().is_empty());

    Ok(())
}

/// Test: Persistent store failure means 5 attempts, one DLQ copy, one ack
#[tokio::test(start_paused = true)]
async fn test_always_failing_store_dead_letters_once() -> Result<()> {
    let channel = FakeChannel::new();
    let store = FakeStore::always_failing();
    let payload = valid_event().to_payload()?;
    let start = Instant::now();

    let outcome = process_delivery(
        &channel,
        &store,
        &policy(),
        &CancellationToken::new(),
        9,
        &payload,
    )
    .await?;

    assert_eq!(outcome, MessageOutcome::DeadLettered);
    assert_eq!(store.attempts(), 5);
    assert_eq!(start.elapsed(), Duration::from_secs(8));
    assert_eq!(channel.dead_letters(), vec![payload]);
    assert_eq!(channel.acks(), vec![9]);
    assert!(channel.requeues().is_empty());

    Ok(())
}

/// Test: The DLQ copy carries the original bytes, not a re-encoding
#[tokio::test(start_paused = true)]
async fn test_dead_letter_keeps_original_bytes() -> Result<()> {
    let channel = FakeChannel::new();
    let store = FakeStore::always_failing();
    let payload = br#"{ "user_id": "u-1", "event_type": "login", "timestamp": "2026-02-17 15:10:00", "metadata": {} }"#;

    let outcome = process_delivery(
        &channel,
        &store,
        &policy(),
        &CancellationToken::new(),
        4,
        payload,
    )
    .await?;

    assert_eq!(outcome, MessageOutcome::DeadLettered);
    assert_eq!(channel.dead_letters(), vec![payload.to_vec()]);

    Ok(())
}

/// Test: A failed DLQ publish still acknowledges by default
#[tokio::test(start_paused = true)]
async fn test_dlq_failure_acks_by_default() -> Result<()> {
    let channel = FakeChannel::failing_dlq();
    let store = FakeStore::always_failing();
    let payload = valid_event().to_payload()?;

    let outcome = process_delivery(
        &channel,
        &store,
        &policy(),
        &CancellationToken::new(),
        5,
        &payload,
    )
    .await?;

    assert_eq!(outcome, MessageOutcome::DeadLettered);
    assert_eq!(channel.acks(), vec![5]);
    assert!(channel.requeues().is_empty());

    Ok(())
}

/// Test: With requeue_on_dlq_failure a failed DLQ publish hands the message back
#[tokio::test(start_paused = true)]
async fn test_dlq_failure_requeues_when_enabled() -> Result<()> {
    let channel = FakeChannel::failing_dlq();
    let store = FakeStore::always_failing();
    let payload = valid_event().to_payload()?;
    let mut policy = policy();
    policy.requeue_on_dlq_failure = true;

    let outcome = process_delivery(
        &channel,
        &store,
        &policy,
        &CancellationToken::new(),
        6,
        &payload,
    )
    .await?;

    assert_eq!(outcome, MessageOutcome::Requeued);
    assert!(channel.acks().is_empty());
    assert_eq!(channel.requeues(), vec![6]);

    Ok(())
}

/// Test: Shutdown during a retry wait requeues instead of finishing the retries
#[tokio::test(start_paused = true)]
async fn test_shutdown_interrupts_retry_wait() -> Result<()> {
    let channel = FakeChannel::new();
    let store = FakeStore::always_failing();
    let payload = valid_event().to_payload()?;
    let shutdown = CancellationToken::new();

    let canceller = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        canceller.cancel();
    });

    let start = Instant::now();
    let outcome = process_delivery(&channel, &store, &policy(), &shutdown, 8, &payload).await?;

    assert_eq!(outcome, MessageOutcome::Requeued);
    assert_eq!(store.attempts(), 1);
    assert_eq!(start.elapsed(), Duration::from_millis(500));
    assert_eq!(channel.requeues(), vec![8]);
    assert!(channel.acks().is_empty());
    assert!(channel.dead_letters().is_empty());

    Ok(())
}

/// Test: A lost channel surfaces as an error so the worker reconnects
#[tokio::test(start_paused = true)]
async fn test_ack_failure_is_an_error() -> Result<()> {
    let channel = FakeChannel::failing_ack();
    let store = FakeStore::healthy();
    let payload = valid_event().to_payload()?;

    let result = process_delivery(
        &channel,
        &store,
        &policy(),
        &CancellationToken::new(),
        10,
        &payload,
    )
    .await;

    let err = assert_err!(result);
    assert!(err.is_connection_error());
    assert_eq!(store.rows().len(), 1);

    Ok(())
}
