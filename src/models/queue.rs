use lapin::{Channel, options::QueueDeclareOptions, types::FieldTable};

pub const DEAD_LETTER_SUFFIX: &str = "_dlq";

/// The primary queue and its dead-letter companion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueTopology {
    pub primary: String,
    pub dead_letter: String,
}

impl QueueTopology {
    pub fn new(primary: impl Into<String>) -> Self {
        let primary = primary.into();
        let dead_letter = format!("{}{}", primary, DEAD_LETTER_SUFFIX);

        Self {
            primary,
            dead_letter,
        }
    }

    /// Declares both queues as durable. Safe to repeat on every (re)connect:
    /// the broker treats a declare with identical arguments as a no-op.
    pub async fn declare(&self, channel: &Channel) -> Result<(), lapin::Error> {
        declare_durable(channel, &self.primary).await?;
        declare_durable(channel, &self.dead_letter).await?;
        Ok(())
    }
}

pub async fn declare_durable(channel: &Channel, queue_name: &str) -> Result<(), lapin::Error> {
    channel
        .queue_declare(
            queue_name,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;

    Ok(())
}
