//! Mutation fan-out bus.
//!
//! Best-effort pub/sub: subscribers that are not ready to receive miss
//! events. There is no acknowledgement and no retry; adequate sink buffering
//! is the subscriber's problem. The bus never back-pressures publishers.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

enum NotifierCommand {
    Join {
        id: Uuid,
        sink: mpsc::Sender<Vec<u8>>,
    },
    Exit {
        id: Uuid,
    },
    Publish(Vec<u8>),
}

/// Fan-out bus over independent subscriber sinks.
///
/// A single worker task serializes joins, exits and broadcasts. Sinks are
/// caller-owned; the bus only ever holds a sender handle and never closes
/// them. Dropping the notifier stops the worker once queued commands drain.
///
/// Must be constructed within a tokio runtime.
#[derive(Debug)]
pub struct MutationNotifier {
    commands: mpsc::UnboundedSender<NotifierCommand>,
}

impl MutationNotifier {
    pub fn new() -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_notifier(rx));
        Self { commands }
    }

    /// Register a subscriber sink. The returned guard unsubscribes on drop.
    ///
    /// Joins and publishes travel the same command channel, so a subscriber
    /// observes every publication submitted after its `subscribe` call
    /// returns (readiness of its own sink permitting).
    pub fn subscribe(&self, sink: mpsc::Sender<Vec<u8>>) -> SubscriptionGuard {
        let id = Uuid::now_v7();
        let _ = self.commands.send(NotifierCommand::Join { id, sink });
        SubscriptionGuard {
            id,
            commands: self.commands.clone(),
        }
    }

    /// Broadcast a pre-serialized payload to all current subscribers.
    ///
    /// Never blocks: the command channel is unbounded and per-sink delivery
    /// inside the worker is non-blocking.
    pub fn publish(&self, payload: Vec<u8>) {
        let _ = self.commands.send(NotifierCommand::Publish(payload));
    }
}

impl Default for MutationNotifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to an active subscription; dropping it enqueues the exit.
#[derive(Debug)]
pub struct SubscriptionGuard {
    id: Uuid,
    commands: mpsc::UnboundedSender<NotifierCommand>,
}

impl SubscriptionGuard {
    /// Explicit unsubscribe; equivalent to dropping the guard.
    pub fn unsubscribe(self) {}
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        let _ = self.commands.send(NotifierCommand::Exit { id: self.id });
    }
}

async fn run_notifier(mut commands: mpsc::UnboundedReceiver<NotifierCommand>) {
    let mut sinks: HashMap<Uuid, mpsc::Sender<Vec<u8>>> = HashMap::new();

    while let Some(command) = commands.recv().await {
        match command {
            NotifierCommand::Join { id, sink } => {
                sinks.insert(id, sink);
            }
            NotifierCommand::Exit { id } => {
                sinks.remove(&id);
            }
            NotifierCommand::Publish(payload) => {
                // Non-blocking sends; a sink that isn't ready misses the
                // event. Closed sinks are pruned while publishing.
                sinks.retain(|id, sink| match sink.try_send(payload.clone()) {
                    Ok(()) => true,
                    Err(TrySendError::Full(_)) => {
                        tracing::debug!(subscriber = %id, "subscriber not ready, dropping event");
                        true
                    }
                    Err(TrySendError::Closed(_)) => false,
                });
            }
        }
    }
}
