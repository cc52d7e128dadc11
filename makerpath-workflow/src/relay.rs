//! Rebroadcast of runtime events between rendered step surfaces

use crate::definition::StepId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

const RELAY_CAPACITY: usize = 64;

/// Event raised inside one step surface and delivered to all of them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepEvent {
    /// An anchor inside a step's content was clicked
    AnchorClicked {
        /// Step whose content holds the anchor
        step_id: StepId,
        /// Anchor target
        anchor: String,
    },
}

/// Publish/rebroadcast channel for [`StepEvent`]s
#[derive(Debug, Clone)]
pub struct EventRelay {
    sender: broadcast::Sender<StepEvent>,
}

impl Default for EventRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRelay {
    /// Relay with no subscribers
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(RELAY_CAPACITY);
        Self { sender }
    }

    /// Receive every event relayed from now on
    pub fn subscribe(&self) -> broadcast::Receiver<StepEvent> {
        self.sender.subscribe()
    }

    /// Deliver `event` to all subscribers; returns how many received it
    pub fn relay(&self, event: StepEvent) -> usize {
        trace!("Relaying {:?}", event);
        self.sender.send(event).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_relay_reaches_every_subscriber() {
        let relay = EventRelay::new();
        let mut first = relay.subscribe();
        let mut second = relay.subscribe();
        let event = StepEvent::AnchorClicked {
            step_id: StepId::new(2),
            anchor: "#pricing".to_string(),
        };

        assert_eq!(relay.relay(event.clone()), 2);
        assert_eq!(first.recv().await.unwrap(), event);
        assert_eq!(second.recv().await.unwrap(), event);
    }

    #[test]
    fn test_relay_without_subscribers_is_dropped() {
        let relay = EventRelay::new();
        let delivered = relay.relay(StepEvent::AnchorClicked {
            step_id: StepId::new(1),
            anchor: "#top".to_string(),
        });
        assert_eq!(delivered, 0);
    }
}
