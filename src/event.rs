//! UI-facing events and the subscribe-by-type bus that delivers them.
//!
//! Every dispatched message is re-published as [`ClientEvent::Message`]. The
//! state machines add a few derived events on top (both players ready, unread
//! counter changed, bracket phase changed) so the UI does not need to diff
//! snapshots itself.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::dispatch::MessageKind;
use crate::protocol::{LobbyId, ServerMessage, UserId};
use crate::tournament::TournamentPhase;

/// Events delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The socket is open for `identity`.
    Connected { identity: UserId },
    /// The socket closed. Always delivered, even to full subscribers.
    Disconnected { reason: Option<String> },
    /// A reconnect attempt is scheduled after `delay`.
    Reconnecting { attempt: u32, delay: Duration },
    /// An inbound message was dispatched.
    Message(ServerMessage),
    /// Both lobby participants are ready; the pregame countdown follows.
    LobbyBothReady { lobby_id: LobbyId },
    /// The unread counter of a conversation changed.
    UnreadChanged { friend: UserId, count: u32 },
    /// The tournament state machine moved to a new phase.
    BracketPhaseChanged { phase: TournamentPhase },
}

impl ClientEvent {
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Self::Connected { .. } | Self::Disconnected { .. } | Self::Reconnecting { .. }
        )
    }
}

/// What a subscriber wants to receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subscription {
    /// Everything.
    All,
    /// Dispatched messages of one kind.
    Kind(MessageKind),
    /// Connection lifecycle only.
    Lifecycle,
    /// Derived state events only.
    State,
}

impl Subscription {
    pub fn matches(&self, event: &ClientEvent) -> bool {
        match (self, event) {
            (Self::All, _) => true,
            (Self::Kind(kind), ClientEvent::Message(msg)) => msg.kind() == *kind,
            (Self::Kind(_), _) => false,
            (Self::Lifecycle, event) => event.is_lifecycle(),
            (Self::State, event) => {
                !event.is_lifecycle() && !matches!(event, ClientEvent::Message(_))
            }
        }
    }
}

struct Subscriber {
    filter: Subscription,
    tx: mpsc::Sender<ClientEvent>,
}

/// Fan-out of [`ClientEvent`]s to bounded subscriber channels.
///
/// A full subscriber loses the event (with a warning) instead of stalling the
/// connection loop; closed subscribers are pruned on the next emit.
pub struct EventBus {
    capacity: usize,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl EventBus {
    /// A bus whose subscriber channels hold `capacity` events (at least 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, filter: Subscription) -> mpsc::Receiver<ClientEvent> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscriber { filter, tx });
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Deliver `event` to every matching subscriber without waiting.
    pub fn emit(&self, event: &ClientEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|sub| {
            if !sub.filter.matches(event) {
                return !sub.tx.is_closed();
            }
            match sub.tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(dropped)) => {
                    warn!(
                        "event channel full, dropping event: {:?}",
                        std::mem::discriminant(&dropped)
                    );
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!("event channel closed, receiver dropped");
                    false
                }
            }
        });
    }

    /// Deliver `event`, waiting for room in each matching channel.
    ///
    /// Used for [`ClientEvent::Disconnected`], which must never be dropped.
    pub async fn emit_reliable(&self, event: ClientEvent) {
        let targets: Vec<_> = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|sub| sub.filter.matches(&event))
            .map(|sub| sub.tx.clone())
            .collect();
        for tx in targets {
            if tx.send(event.clone()).await.is_err() {
                debug!("event channel closed, receiver dropped");
            }
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn kind_subscription_filters_messages() {
        let bus = EventBus::new(8);
        let mut chat = bus.subscribe(Subscription::Kind(MessageKind::Chat));
        let mut all = bus.subscribe(Subscription::All);

        bus.emit(&ClientEvent::Message(ServerMessage::NewConnection { user: 1 }));
        bus.emit(&ClientEvent::Message(ServerMessage::Chat {
            data: "hi".into(),
            sender_id: 2,
            receiver_id: 1,
        }));

        assert!(matches!(
            chat.try_recv().unwrap(),
            ClientEvent::Message(ServerMessage::Chat { .. })
        ));
        assert!(chat.try_recv().is_err());
        assert!(all.try_recv().is_ok());
        assert!(all.try_recv().is_ok());
    }

    #[test]
    fn full_channel_drops_instead_of_blocking() {
        let bus = EventBus::new(1);
        let mut rx = bus.subscribe(Subscription::State);
        bus.emit(&ClientEvent::UnreadChanged {
            friend: 2,
            count: 1,
        });
        bus.emit(&ClientEvent::UnreadChanged {
            friend: 2,
            count: 2,
        });
        assert_eq!(
            rx.try_recv().unwrap(),
            ClientEvent::UnreadChanged {
                friend: 2,
                count: 1
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let bus = EventBus::new(4);
        let rx = bus.subscribe(Subscription::All);
        drop(rx);
        bus.emit(&ClientEvent::Connected { identity: 1 });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn lifecycle_subscription_skips_messages() {
        let filter = Subscription::Lifecycle;
        assert!(filter.matches(&ClientEvent::Disconnected { reason: None }));
        assert!(!filter.matches(&ClientEvent::Message(ServerMessage::NewConnection {
            user: 1
        })));
        assert!(!Subscription::State.matches(&ClientEvent::Connected { identity: 1 }));
    }

    #[tokio::test]
    async fn reliable_emit_waits_for_room() {
        let bus = std::sync::Arc::new(EventBus::new(1));
        let mut rx = bus.subscribe(Subscription::Lifecycle);
        bus.emit(&ClientEvent::Connected { identity: 1 });

        let sender = std::sync::Arc::clone(&bus);
        let task = tokio::spawn(async move {
            sender
                .emit_reliable(ClientEvent::Disconnected { reason: None })
                .await;
        });

        assert_eq!(rx.recv().await, Some(ClientEvent::Connected { identity: 1 }));
        assert_eq!(rx.recv().await, Some(ClientEvent::Disconnected { reason: None }));
        task.await.unwrap();
    }
}
