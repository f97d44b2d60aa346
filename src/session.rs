//! Per-identity synchronization state and the engine that feeds it.
//!
//! [`SyncContext`] bundles every store mutated by inbound traffic and is
//! handed to the [`Dispatcher`] explicitly. [`SyncEngine`] owns both and turns
//! raw frames into follow-up [`Command`]s.

use tracing::{debug, warn};

use crate::chat::ConversationTracker;
use crate::dispatch::{Command, DispatchOutcome, Dispatcher, MessageKind};
use crate::event::ClientEvent;
use crate::frame::{self, DecodeError};
use crate::game::GameRelay;
use crate::lobby::LobbyMachine;
use crate::presence::PresenceRegistry;
use crate::protocol::{ServerMessage, UserId};
use crate::tournament::{Bracket, TournamentMachine};

// ── Context ─────────────────────────────────────────────────────────

/// All client-side state owned by one authenticated identity.
#[derive(Debug, Clone)]
pub struct SyncContext {
    pub local_id: UserId,
    pub presence: PresenceRegistry,
    pub chat: ConversationTracker,
    pub lobby: LobbyMachine,
    pub tournament: TournamentMachine,
    pub game: GameRelay,
}

impl SyncContext {
    pub fn new(local_id: UserId) -> Self {
        Self {
            local_id,
            presence: PresenceRegistry::new(),
            chat: ConversationTracker::new(),
            lobby: LobbyMachine::new(local_id),
            tournament: TournamentMachine::new(local_id),
            game: GameRelay::new(local_id),
        }
    }

    /// Apply one inbound message to the stores.
    ///
    /// Always re-publishes the message itself, followed by any derived events.
    pub fn apply(&mut self, msg: &ServerMessage) -> Vec<Command> {
        let phase_before = self.tournament.phase();
        let mut out = vec![Command::Emit(ClientEvent::Message(msg.clone()))];

        match msg {
            ServerMessage::OnlineUsers { users_online } => {
                self.presence.set_online_users(users_online.iter().copied());
            }
            ServerMessage::NewConnection { user } => {
                self.presence.add_online_user(*user);
            }
            ServerMessage::UserDisconnected { user } => {
                self.presence.remove_online_user(*user);
            }
            ServerMessage::Chat {
                sender_id,
                receiver_id,
                ..
            } => {
                if let Some((friend, count)) =
                    self.chat.on_message(self.local_id, *sender_id, *receiver_id)
                {
                    out.push(Command::Emit(ClientEvent::UnreadChanged { friend, count }));
                }
            }
            ServerMessage::LobbyInvitationToFriend {
                sender,
                receiver,
                lobby_id,
                ..
            } => {
                if sender.id == self.local_id {
                    self.lobby.on_invitation_echo(receiver.id, *lobby_id);
                } else {
                    self.lobby.on_invitation(sender.id, receiver.id, *lobby_id);
                }
            }
            ServerMessage::LobbyInvitationFromFriend {
                sender,
                receiver,
                lobby_id,
                ..
            } => {
                self.lobby.on_invitation(sender.id, receiver.id, *lobby_id);
            }
            ServerMessage::LobbyDenied { lobby_id, .. } => {
                self.lobby.on_denied(*lobby_id);
            }
            ServerMessage::LobbyCreated {
                sender,
                receiver,
                lobby_id,
                is_tournament_game,
            } => {
                self.lobby
                    .on_created(*lobby_id, *sender, *receiver, *is_tournament_game);
            }
            ServerMessage::LobbyPlayerStatus {
                lobby_id,
                sender,
                receiver,
                ..
            } => {
                if self.lobby.on_player_status(*lobby_id, *sender, *receiver) {
                    out.push(Command::Emit(ClientEvent::LobbyBothReady {
                        lobby_id: *lobby_id,
                    }));
                }
            }
            ServerMessage::LobbySpecialModeToggled {
                lobby_id,
                is_game_mode,
            } => {
                self.lobby.on_special_mode(*lobby_id, *is_game_mode);
            }
            ServerMessage::LobbyPregameRemainingTime {
                remaining_seconds_to_start,
                lobby_id,
            } => {
                self.lobby
                    .on_pregame_tick(*lobby_id, *remaining_seconds_to_start);
            }
            ServerMessage::LobbyDestroyed { lobby_id, error } => {
                if self.lobby.on_destroyed(*lobby_id) {
                    if let Some(reason) = error {
                        debug!(lobby_id = ?lobby_id, reason = %reason, "lobby destroyed by server");
                    }
                }
            }
            ServerMessage::GameStart {
                state,
                lobby_id,
                is_tournament_game,
            } => {
                let from_lobby = self.lobby.on_game_start(*lobby_id);
                let bracket = self.tournament.live_match().map(|live| live.lobby_id);
                match lobby_id.or(from_lobby).or(bracket) {
                    Some(id) => self
                        .game
                        .on_game_start(id, state.clone(), *is_tournament_game),
                    None => warn!("GAME_START without a lobby to bind"),
                }
            }
            ServerMessage::GameEvent {
                lobby_id,
                state,
                player1,
                player2,
                is_tournament_game,
            } => {
                let score = state.as_ref().map(|s| s.score);
                let applied = self.game.on_game_event(
                    *lobby_id,
                    state.clone(),
                    (*player1, *player2),
                    *is_tournament_game,
                );
                if let (true, true, Some(score)) = (applied, *is_tournament_game, score) {
                    self.tournament.record_live_score(*lobby_id, score);
                }
            }
            ServerMessage::GameFinished {
                lobby_id,
                state,
                is_tournament_game,
                ..
            } => {
                if let Some(finished) = self
                    .game
                    .on_game_finished(*lobby_id, state.clone(), *is_tournament_game)
                    .map(|result| result.lobby_id)
                {
                    if *is_tournament_game {
                        self.tournament.on_match_finished(finished);
                    }
                    self.lobby.on_match_finished(finished);
                }
            }
            ServerMessage::TournamentCreate {
                code,
                user_id,
                player1,
            } => {
                self.tournament.on_created(code, *user_id, *player1);
            }
            ServerMessage::TournamentJoinWithCode { code, user_id } => {
                self.tournament.on_joined(code, *user_id);
            }
            ServerMessage::TournamentEvent {
                code,
                player1,
                player2,
                player3,
                player4,
            } => {
                self.tournament
                    .on_roster(code, [*player1, *player2, *player3, *player4]);
            }
            ServerMessage::TournamentStart {
                code,
                player1,
                player2,
                player3,
                player4,
            } => {
                self.tournament
                    .on_started(code, [*player1, *player2, *player3, *player4]);
            }
            ServerMessage::TournamentTreeState {
                code,
                semi1,
                semi2,
                final_match,
            } => {
                self.tournament.on_tree_state(Bracket {
                    code: code.clone(),
                    semi1: semi1.clone(),
                    semi2: semi2.clone(),
                    final_match: final_match.clone(),
                });
            }
            ServerMessage::TournamentGame { code, lobby_id } => {
                if let Some(live) = self.tournament.on_game(code, *lobby_id) {
                    self.game.bind(live.lobby_id, true);
                }
            }
            ServerMessage::TournamentTimer {
                code,
                remaining_time,
            } => {
                self.tournament.on_timer(code, *remaining_time);
            }
            ServerMessage::TournamentTerminate { code } => {
                if self.tournament.on_terminated(code) && self.game.is_tournament_game() {
                    self.game.reset();
                }
            }
            ServerMessage::TournamentError { code, error } => {
                self.tournament.on_error(code.as_deref(), error);
            }
        }

        let phase = self.tournament.phase();
        if phase != phase_before {
            debug!(from = ?phase_before, to = ?phase, "tournament phase changed");
            out.push(Command::Emit(ClientEvent::BracketPhaseChanged { phase }));
        }
        out
    }

    /// Drop everything learned for the current identity.
    pub fn clear(&mut self) {
        self.presence.clear();
        self.chat.clear();
        self.lobby.reset();
        self.tournament.reset();
        self.game.reset();
    }

    /// Drop lobby, bracket and match state but keep presence and unread counters.
    pub fn reset_pairings(&mut self) {
        self.lobby.reset();
        self.tournament.reset();
        self.game.reset();
    }
}

// ── Engine ──────────────────────────────────────────────────────────

/// What happened to one document of a frame.
#[derive(Debug)]
pub enum DocumentOutcome {
    Dispatched(MessageKind),
    Unhandled { tag: String },
    Malformed(DecodeError),
}

/// Result of processing one raw frame.
#[derive(Debug, Default)]
pub struct FrameReport {
    /// One entry per non-blank document, in arrival order.
    pub documents: Vec<DocumentOutcome>,
    /// Follow-ups requested by the handlers, in dispatch order.
    pub commands: Vec<Command>,
}

impl FrameReport {
    pub fn dispatched(&self) -> usize {
        self.documents
            .iter()
            .filter(|doc| matches!(doc, DocumentOutcome::Dispatched(_)))
            .count()
    }
}

/// Dispatcher plus the context it mutates.
#[derive(Debug)]
pub struct SyncEngine {
    dispatcher: Dispatcher<SyncContext>,
    ctx: SyncContext,
}

impl SyncEngine {
    /// An engine with [`SyncContext::apply`] registered for every message kind.
    pub fn new(local_id: UserId) -> Self {
        let mut dispatcher = Dispatcher::new();
        for kind in MessageKind::ALL {
            dispatcher.register_handler(kind, |ctx: &mut SyncContext, msg: &ServerMessage| {
                ctx.apply(msg)
            });
        }
        Self {
            dispatcher,
            ctx: SyncContext::new(local_id),
        }
    }

    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut SyncContext {
        &mut self.ctx
    }

    pub fn local_id(&self) -> UserId {
        self.ctx.local_id
    }

    /// Access to the routing table, e.g. to override a handler.
    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher<SyncContext> {
        &mut self.dispatcher
    }

    /// Decode and dispatch every document of `frame`, in order.
    pub fn handle_frame(&mut self, frame: &str) -> FrameReport {
        let mut report = FrameReport::default();
        for decoded in frame::decode_frame(frame) {
            let inbound = match decoded {
                Ok(inbound) => inbound,
                Err(e) => {
                    warn!("dropping malformed document: {e}");
                    report.documents.push(DocumentOutcome::Malformed(e));
                    continue;
                }
            };
            match self.dispatcher.dispatch(&mut self.ctx, &inbound) {
                DispatchOutcome::Handled { kind, commands } => {
                    report.documents.push(DocumentOutcome::Dispatched(kind));
                    report.commands.extend(commands);
                }
                DispatchOutcome::Unhandled { tag } => {
                    report.documents.push(DocumentOutcome::Unhandled { tag });
                }
            }
        }
        report
    }

    /// Switch to another identity, discarding all per-identity state.
    pub fn reset_identity(&mut self, local_id: UserId) {
        if local_id != self.ctx.local_id {
            self.ctx = SyncContext::new(local_id);
        } else {
            self.ctx.clear();
        }
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
    fn every_kind_is_registered() {
        let mut engine = SyncEngine::new(1);
        for kind in MessageKind::ALL {
            assert!(engine.dispatcher_mut().is_registered(kind), "{kind}");
        }
    }

    #[test]
    fn chat_for_closed_conversation_emits_unread_change() {
        let mut ctx = SyncContext::new(1);
        let cmds = ctx.apply(&ServerMessage::Chat {
            data: "gg".into(),
            sender_id: 2,
            receiver_id: 1,
        });
        assert_eq!(cmds.len(), 2);
        assert_eq!(
            cmds[1],
            Command::Emit(ClientEvent::UnreadChanged {
                friend: 2,
                count: 1
            })
        );
    }

    #[test]
    fn frame_with_broken_document_still_dispatches_siblings() {
        let mut engine = SyncEngine::new(1);
        let report = engine.handle_frame(concat!(
            r#"{"type":"NEW_CONNECTION","user":2}"#,
            "\n",
            "not json",
            "\n",
            r#"{"type":"NEW_CONNECTION","user":3}"#,
        ));
        assert_eq!(report.documents.len(), 3);
        assert_eq!(report.dispatched(), 2);
        assert_eq!(engine.context().presence.snapshot(), vec![2, 3]);
    }

    #[test]
    fn reset_identity_clears_state() {
        let mut engine = SyncEngine::new(1);
        engine.handle_frame(r#"{"type":"NEW_CONNECTION","user":2}"#);
        engine.reset_identity(9);
        assert_eq!(engine.local_id(), 9);
        assert!(engine.context().presence.is_empty());
    }
}
