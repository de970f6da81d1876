//! Event channel
//!
//! In-memory pub/sub carrying two independent message kinds: pipeline
//! progress events (engine → observers) and command events (observers →
//! engine). Pure fan-out over broadcast channels; delivery is in publish
//! order per channel, with no ordering guarantee across channels and no
//! replay for late subscribers.

mod types;

pub use types::{CommandEvent, EventEnvelope, PipelineEvent};

use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 1024;

/// Receiver half of a pipeline-event subscription.
pub type PipelineSubscription = broadcast::Receiver<EventEnvelope>;

/// Receiver half of a command-event subscription.
pub type CommandSubscription = broadcast::Receiver<CommandEvent>;

/// The process-owned event bus.
///
/// Constructed once at the entry point and passed to the engine and every
/// observer; there is no global instance. Dropping the bus closes both
/// channels, which ends subscriber loops.
#[derive(Debug)]
pub struct EventBus {
    pipeline_tx: broadcast::Sender<EventEnvelope>,
    command_tx: broadcast::Sender<CommandEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        let (pipeline_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (command_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            pipeline_tx,
            command_tx,
        }
    }
}

impl EventBus {
    /// Creates a bus with empty subscriber sets.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a pipeline event to all current subscribers.
    ///
    /// The envelope timestamp is stamped here. A send with no subscribers
    /// is not an error; the event is simply dropped.
    pub fn publish(&self, event: PipelineEvent) {
        tracing::trace!(event = ?event, "publish pipeline event");
        let _ = self.pipeline_tx.send(EventEnvelope::now(event));
    }

    /// Publishes a command event toward the engine.
    pub fn publish_command(&self, command: CommandEvent) {
        tracing::debug!(command = ?command, "publish command event");
        let _ = self.command_tx.send(command);
    }

    /// Subscribes to pipeline events published from this point on.
    #[must_use]
    pub fn subscribe(&self) -> PipelineSubscription {
        self.pipeline_tx.subscribe()
    }

    /// Subscribes to command events published from this point on.
    #[must_use]
    pub fn subscribe_commands(&self) -> CommandSubscription {
        self.command_tx.subscribe()
    }
}
