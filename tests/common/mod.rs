#![allow(dead_code)]

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use activity_pipeline::{
    clients::{
        database::EventStore, health::DependencyProbe, publisher::EventTransport,
        rbmq::DeliveryChannel,
    },
    error::PipelineError,
    models::event::Event,
};
use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::time::{Instant, sleep};

pub fn valid_body() -> Value {
    json!({
        "user_id": 123,
        "event_type": "page_view",
        "timestamp": "2026-02-17T15:10:00Z",
        "metadata": {"page": "/home", "referrer": "google"}
    })
}

pub fn valid_event() -> Event {
    Event::from_json(&valid_body()).expect("valid body")
}

/// Transport that fails the first `fail_first` publishes and records every
/// attempt with its (tokio) time.
#[derive(Default)]
pub struct FakeTransport {
    fail_first: u32,
    attempts: AtomicU32,
    attempt_times: Mutex<Vec<Instant>>,
    published: Mutex<Vec<Vec<u8>>>,
}

impl FakeTransport {
    pub fn healthy() -> Self {
        Self::default()
    }

    pub fn failing_first(fail_first: u32) -> Self {
        Self {
            fail_first,
            ..Self::default()
        }
    }

    pub fn always_failing() -> Self {
        Self::failing_first(u32::MAX)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn attempt_times(&self) -> Vec<Instant> {
        self.attempt_times.lock().unwrap().clone()
    }

    pub fn published(&self) -> Vec<Vec<u8>> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventTransport for FakeTransport {
    async fn publish(&self, payload: &[u8]) -> Result<(), PipelineError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        self.attempt_times.lock().unwrap().push(Instant::now());

        if attempt < self.fail_first {
            return Err(PipelineError::Connection("broker unreachable".to_string()));
        }

        self.published.lock().unwrap().push(payload.to_vec());
        Ok(())
    }
}

/// Store that fails the first `fail_first` inserts.
#[derive(Default)]
pub struct FakeStore {
    fail_first: u32,
    attempts: AtomicU32,
    rows: Mutex<Vec<Event>>,
}

impl FakeStore {
    pub fn healthy() -> Self {
        Self::default()
    }

    pub fn failing_first(fail_first: u32) -> Self {
        Self {
            fail_first,
            ..Self::default()
        }
    }

    pub fn always_failing() -> Self {
        Self::failing_first(u32::MAX)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn rows(&self) -> Vec<Event> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventStore for FakeStore {
    async fn insert_event(&self, event: &Event) -> Result<(), PipelineError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);

        if attempt < self.fail_first {
            return Err(PipelineError::TransientPersistFailure(
                "connection refused".to_string(),
            ));
        }

        self.rows.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Records every resolution sent for a delivery.
#[derive(Default)]
pub struct FakeChannel {
    fail_dlq: bool,
    fail_ack: bool,
    acks: Mutex<Vec<u64>>,
    requeues: Mutex<Vec<u64>>,
    dead_letters: Mutex<Vec<Vec<u8>>>,
}

impl FakeChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_dlq() -> Self {
        Self {
            fail_dlq: true,
            ..Self::default()
        }
    }

    pub fn failing_ack() -> Self {
        Self {
            fail_ack: true,
            ..Self::default()
        }
    }

    pub fn acks(&self) -> Vec<u64> {
        self.acks.lock().unwrap().clone()
    }

    pub fn requeues(&self) -> Vec<u64> {
        self.requeues.lock().unwrap().clone()
    }

    pub fn dead_letters(&self) -> Vec<Vec<u8>> {
        self.dead_letters.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliveryChannel for FakeChannel {
    async fn acknowledge(&self, delivery_tag: u64) -> Result<(), PipelineError> {
        if self.fail_ack {
            return Err(PipelineError::Connection("channel closed".to_string()));
        }
        self.acks.lock().unwrap().push(delivery_tag);
        Ok(())
    }

    async fn requeue(&self, delivery_tag: u64) -> Result<(), PipelineError> {
        self.requeues.lock().unwrap().push(delivery_tag);
        Ok(())
    }

    async fn publish_to_dlq(&self, payload: &[u8]) -> Result<(), PipelineError> {
        if self.fail_dlq {
            return Err(PipelineError::Connection("dlq unreachable".to_string()));
        }
        self.dead_letters.lock().unwrap().push(payload.to_vec());
        Ok(())
    }
}

/// Probe with a fixed answer, optionally delayed.
pub struct FakeProbe {
    component: &'static str,
    error: Option<&'static str>,
    delay: Duration,
}

impl FakeProbe {
    pub fn up(component: &'static str) -> Arc<Self> {
        Arc::new(Self {
            component,
            error: None,
            delay: Duration::ZERO,
        })
    }

    pub fn down(component: &'static str, error: &'static str) -> Arc<Self> {
        Arc::new(Self {
            component,
            error: Some(error),
            delay: Duration::ZERO,
        })
    }

    pub fn slow(component: &'static str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            component,
            error: None,
            delay,
        })
    }
}

#[async_trait]
impl DependencyProbe for FakeProbe {
    fn component(&self) -> &str {
        self.component
    }

    async fn probe(&self) -> Result<(), PipelineError> {
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        match self.error {
            Some(error) => Err(PipelineError::Connection(error.to_string())),
            None => Ok(()),
        }
    }
}
