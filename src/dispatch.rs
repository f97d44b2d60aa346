//! Message dispatch table.
//!
//! [`Dispatcher`] maps each inbound [`MessageKind`] to exactly one handler.
//! Registering a second handler for the same kind replaces the first; fan-out
//! to several listeners happens downstream through [`Command::Emit`].
//!
//! Handlers are synchronous and run to completion. Instead of performing side
//! effects they return follow-up [`Command`]s (outbound sends, UI events) that
//! the connection loop executes after the handler returns.

use std::collections::HashMap;
use std::fmt;

use tracing::{debug, warn};

use crate::event::ClientEvent;
use crate::frame::Inbound;
use crate::protocol::{ClientMessage, ServerMessage};

/// Every inbound tag this client understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageKind {
    OnlineUsers,
    NewConnection,
    UserDisconnected,
    Chat,
    LobbyInvitationToFriend,
    LobbyInvitationFromFriend,
    LobbyDenied,
    LobbyCreated,
    LobbyPlayerStatus,
    LobbySpecialModeToggled,
    LobbyPregameRemainingTime,
    LobbyDestroyed,
    GameStart,
    GameEvent,
    GameFinished,
    TournamentCreate,
    TournamentJoinWithCode,
    TournamentEvent,
    TournamentStart,
    TournamentTreeState,
    TournamentGame,
    TournamentTimer,
    TournamentTerminate,
    TournamentError,
}

impl MessageKind {
    /// All kinds, in declaration order.
    pub const ALL: [MessageKind; 24] = [
        Self::OnlineUsers,
        Self::NewConnection,
        Self::UserDisconnected,
        Self::Chat,
        Self::LobbyInvitationToFriend,
        Self::LobbyInvitationFromFriend,
        Self::LobbyDenied,
        Self::LobbyCreated,
        Self::LobbyPlayerStatus,
        Self::LobbySpecialModeToggled,
        Self::LobbyPregameRemainingTime,
        Self::LobbyDestroyed,
        Self::GameStart,
        Self::GameEvent,
        Self::GameFinished,
        Self::TournamentCreate,
        Self::TournamentJoinWithCode,
        Self::TournamentEvent,
        Self::TournamentStart,
        Self::TournamentTreeState,
        Self::TournamentGame,
        Self::TournamentTimer,
        Self::TournamentTerminate,
        Self::TournamentError,
    ];

    /// The wire `type` tag.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OnlineUsers => "ONLINE_USERS",
            Self::NewConnection => "NEW_CONNECTION",
            Self::UserDisconnected => "USER_DISCONNECTED",
            Self::Chat => "CHAT",
            Self::LobbyInvitationToFriend => "LOBBY_INVITATION_TO_FRIEND",
            Self::LobbyInvitationFromFriend => "LOBBY_INVITATION_FROM_FRIEND",
            Self::LobbyDenied => "LOBBY_DENIED",
            Self::LobbyCreated => "LOBBY_CREATED",
            Self::LobbyPlayerStatus => "LOBBY_PLAYER_STATUS",
            Self::LobbySpecialModeToggled => "LOBBY_SPECIAL_MODE_TOGGLED",
            Self::LobbyPregameRemainingTime => "LOBBY_PREGAME_REMAINING_TIME",
            Self::LobbyDestroyed => "LOBBY_DESTROYED",
            Self::GameStart => "GAME_START",
            Self::GameEvent => "GAME_EVENT",
            Self::GameFinished => "GAME_FINISHED",
            Self::TournamentCreate => "TOURNAMENT_CREATE",
            Self::TournamentJoinWithCode => "TOURNAMENT_JOIN_WITH_CODE",
            Self::TournamentEvent => "TOURNAMENT_EVENT",
            Self::TournamentStart => "TOURNAMENT_START",
            Self::TournamentTreeState => "TOURNAMENT_TREE_STATE",
            Self::TournamentGame => "TOURNAMENT_GAME",
            Self::TournamentTimer => "TOURNAMENT_TIMER",
            Self::TournamentTerminate => "TOURNAMENT_TERMINATE",
            Self::TournamentError => "TOURNAMENT_ERROR",
        }
    }

    /// Look up a wire tag. Returns `None` for tags this client does not know.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == tag)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ServerMessage {
    /// The dispatch key of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::OnlineUsers { .. } => MessageKind::OnlineUsers,
            Self::NewConnection { .. } => MessageKind::NewConnection,
            Self::UserDisconnected { .. } => MessageKind::UserDisconnected,
            Self::Chat { .. } => MessageKind::Chat,
            Self::LobbyInvitationToFriend { .. } => MessageKind::LobbyInvitationToFriend,
            Self::LobbyInvitationFromFriend { .. } => MessageKind::LobbyInvitationFromFriend,
            Self::LobbyDenied { .. } => MessageKind::LobbyDenied,
            Self::LobbyCreated { .. } => MessageKind::LobbyCreated,
            Self::LobbyPlayerStatus { .. } => MessageKind::LobbyPlayerStatus,
            Self::LobbySpecialModeToggled { .. } => MessageKind::LobbySpecialModeToggled,
            Self::LobbyPregameRemainingTime { .. } => MessageKind::LobbyPregameRemainingTime,
            Self::LobbyDestroyed { .. } => MessageKind::LobbyDestroyed,
            Self::GameStart { .. } => MessageKind::GameStart,
            Self::GameEvent { .. } => MessageKind::GameEvent,
            Self::GameFinished { .. } => MessageKind::GameFinished,
            Self::TournamentCreate { .. } => MessageKind::TournamentCreate,
            Self::TournamentJoinWithCode { .. } => MessageKind::TournamentJoinWithCode,
            Self::TournamentEvent { .. } => MessageKind::TournamentEvent,
            Self::TournamentStart { .. } => MessageKind::TournamentStart,
            Self::TournamentTreeState { .. } => MessageKind::TournamentTreeState,
            Self::TournamentGame { .. } => MessageKind::TournamentGame,
            Self::TournamentTimer { .. } => MessageKind::TournamentTimer,
            Self::TournamentTerminate { .. } => MessageKind::TournamentTerminate,
            Self::TournamentError { .. } => MessageKind::TournamentError,
        }
    }
}

// ── Commands ────────────────────────────────────────────────────────

/// A follow-up action requested by a handler.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Write an envelope to the socket (dropped if the socket is not open).
    /// The built-in handlers never reply on their own; this is for handlers
    /// installed with [`PongClient::register_handler`](crate::PongClient::register_handler).
    Send(ClientMessage),
    /// Publish an event to UI subscribers.
    Emit(ClientEvent),
}

/// Result of dispatching one inbound document.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// A handler ran and asked for these follow-ups.
    Handled {
        kind: MessageKind,
        commands: Vec<Command>,
    },
    /// No handler is registered for this tag. Nothing changed.
    Unhandled { tag: String },
}

impl DispatchOutcome {
    /// The follow-up commands, empty when unhandled.
    pub fn into_commands(self) -> Vec<Command> {
        match self {
            Self::Handled { commands, .. } => commands,
            Self::Unhandled { .. } => Vec::new(),
        }
    }
}

// ── Dispatcher ──────────────────────────────────────────────────────

/// A message handler operating on the injected context `C`.
pub type Handler<C> = Box<dyn FnMut(&mut C, &ServerMessage) -> Vec<Command> + Send>;

/// Single-handler-per-kind routing table over a context `C`.
pub struct Dispatcher<C> {
    handlers: HashMap<MessageKind, Handler<C>>,
}

impl<C> Default for Dispatcher<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Dispatcher<C> {
    /// An empty table: every message is unhandled.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register `handler` for `kind`. Returns `true` if it replaced a handler.
    pub fn register_handler<F>(&mut self, kind: MessageKind, handler: F) -> bool
    where
        F: FnMut(&mut C, &ServerMessage) -> Vec<Command> + Send + 'static,
    {
        let replaced = self.handlers.insert(kind, Box::new(handler)).is_some();
        if replaced {
            debug!(kind = %kind, "replaced message handler");
        }
        replaced
    }

    /// Remove the handler for `kind`. Returns `true` if one was registered.
    pub fn unregister_handler(&mut self, kind: MessageKind) -> bool {
        self.handlers.remove(&kind).is_some()
    }

    /// Whether a handler is registered for `kind`.
    pub fn is_registered(&self, kind: MessageKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Route one decoded document.
    pub fn dispatch(&mut self, ctx: &mut C, inbound: &Inbound) -> DispatchOutcome {
        match inbound {
            Inbound::Message(msg) => self.dispatch_message(ctx, msg),
            Inbound::Unknown { tag } => {
                warn!(tag = %tag, "no handler for message type");
                DispatchOutcome::Unhandled { tag: tag.clone() }
            }
        }
    }

    /// Route one typed message.
    pub fn dispatch_message(&mut self, ctx: &mut C, msg: &ServerMessage) -> DispatchOutcome {
        let kind = msg.kind();
        match self.handlers.get_mut(&kind) {
            Some(handler) => {
                let commands = handler(ctx, msg);
                DispatchOutcome::Handled { kind, commands }
            }
            None => {
                warn!(tag = %kind, "no handler for message type");
                DispatchOutcome::Unhandled {
                    tag: kind.as_str().to_owned(),
                }
            }
        }
    }
}

impl<C> fmt::Debug for Dispatcher<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.handlers.keys().copied().collect();
        kinds.sort();
        f.debug_struct("Dispatcher")
            .field("registered", &kinds)
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

    #[derive(Default)]
    struct Counter {
        calls: Vec<&'static str>,
    }

    #[test]
    fn every_kind_round_trips_through_its_tag() {
        for kind in MessageKind::ALL {
            assert_eq!(MessageKind::from_tag(kind.as_str()), Some(kind));
        }
        assert_eq!(MessageKind::from_tag("FOO"), None);
    }

    #[test]
    fn last_registration_wins() {
        let mut dispatcher = Dispatcher::<Counter>::new();
        assert!(!dispatcher.register_handler(MessageKind::NewConnection, |c, _| {
            c.calls.push("first");
            vec![]
        }));
        assert!(dispatcher.register_handler(MessageKind::NewConnection, |c, _| {
            c.calls.push("second");
            vec![]
        }));

        let mut ctx = Counter::default();
        let out = dispatcher.dispatch_message(&mut ctx, &ServerMessage::NewConnection { user: 1 });
        assert!(matches!(
            out,
            DispatchOutcome::Handled {
                kind: MessageKind::NewConnection,
                ..
            }
        ));
        assert_eq!(ctx.calls, vec!["second"]);
    }

    #[test]
    fn miss_returns_unhandled_without_touching_context() {
        let mut dispatcher = Dispatcher::<Counter>::new();
        let mut ctx = Counter::default();

        let out = dispatcher.dispatch(
            &mut ctx,
            &Inbound::Unknown {
                tag: "FOO".to_owned(),
            },
        );
        assert_eq!(
            out,
            DispatchOutcome::Unhandled {
                tag: "FOO".to_owned()
            }
        );

        let out = dispatcher.dispatch_message(&mut ctx, &ServerMessage::NewConnection { user: 1 });
        assert!(out.into_commands().is_empty());
        assert!(ctx.calls.is_empty());
    }

    #[test]
    fn unregister_turns_kind_into_a_miss() {
        let mut dispatcher = Dispatcher::<Counter>::new();
        dispatcher.register_handler(MessageKind::Chat, |_, _| vec![]);
        assert!(dispatcher.is_registered(MessageKind::Chat));
        assert!(dispatcher.unregister_handler(MessageKind::Chat));
        assert!(!dispatcher.is_registered(MessageKind::Chat));
    }
}
