use std::fmt::{Display, Formatter, Result};

use serde::{Deserialize, Serialize};

/// Lifecycle of the worker's broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Disconnected,
    Connecting,
    Consuming,
    ShuttingDown,
    Stopped,
}

/// Terminal result of processing one delivery. Each variant corresponds to
/// exactly one resolution sent to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageOutcome {
    /// Persisted and acknowledged.
    Done,
    /// Body did not deserialize; acknowledged and dropped.
    Malformed,
    /// Persistence exhausted; sent to the dead-letter queue (best effort) and acknowledged.
    DeadLettered,
    /// Handed back to the primary queue without acknowledgment.
    Requeued,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Disconnected => "disconnected",
            WorkerState::Connecting => "connecting",
            WorkerState::Consuming => "consuming",
            WorkerState::ShuttingDown => "shutting_down",
            WorkerState::Stopped => "stopped",
        }
    }
}

impl Display for WorkerState {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "{}", self.as_str())
    }
}

impl Display for MessageOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            MessageOutcome::Done => write!(f, "done"),
            MessageOutcome::Malformed => write!(f, "malformed"),
            MessageOutcome::DeadLettered => write!(f, "dead_lettered"),
            MessageOutcome::Requeued => write!(f, "requeued"),
        }
    }
}
