//! 1v1 lobby invitation protocol.
//!
//! ```text
//! Idle ──invite──▶ InvitationSent ──LOBBY_DENIED──▶ Idle
//! Idle ──LOBBY_INVITATION_FROM_FRIEND──▶ InvitationReceived ──deny──▶ Idle
//!                                        InvitationReceived ──accept──▶ Accepted
//! any ──LOBBY_CREATED──▶ Active{NotReady, NotReady}
//! Active ──terminate / LOBBY_DESTROYED / match finished──▶ Idle
//! ```
//!
//! Local actions return the envelope to send; inbound messages are applied by
//! the `on_*` methods. The server stays authoritative: `LOBBY_CREATED` and
//! `LOBBY_PLAYER_STATUS` overwrite whatever the client assumed.

use tracing::{debug, warn};

use crate::error::{RealtimeError, Result};
use crate::protocol::{ClientMessage, LobbyId, LobbyUserState, UserId};

const MACHINE: &str = "lobby";

/// A paired lobby with exactly two participants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LobbySession {
    pub lobby_id: LobbyId,
    /// The player who sent the invitation.
    pub sender: LobbyUserState,
    /// The player who accepted it.
    pub receiver: LobbyUserState,
    pub special_mode: bool,
    /// Last pregame countdown tick, cleared when the match starts or the lobby closes.
    pub pregame_remaining: Option<u32>,
    pub is_tournament_game: bool,
    /// Set once `GAME_START` arrives for this lobby.
    pub in_game: bool,
    /// Both-ready value from the last `LOBBY_PLAYER_STATUS`. Local optimistic
    /// ready toggles never touch it.
    pub both_ready_confirmed: bool,
}

impl LobbySession {
    fn new(
        lobby_id: LobbyId,
        sender: LobbyUserState,
        receiver: LobbyUserState,
        is_tournament_game: bool,
    ) -> Self {
        Self {
            lobby_id,
            sender,
            receiver,
            special_mode: false,
            pregame_remaining: None,
            is_tournament_game,
            in_game: false,
            both_ready_confirmed: sender.is_ready && receiver.is_ready,
        }
    }

    pub fn both_ready(&self) -> bool {
        self.sender.is_ready && self.receiver.is_ready
    }

    pub fn participant(&self, user: UserId) -> Option<&LobbyUserState> {
        [&self.sender, &self.receiver]
            .into_iter()
            .find(|side| side.id == user)
    }

    /// The other side of the lobby from `user`'s point of view.
    pub fn opponent_of(&self, user: UserId) -> Option<&LobbyUserState> {
        if self.sender.id == user {
            Some(&self.receiver)
        } else if self.receiver.id == user {
            Some(&self.sender)
        } else {
            None
        }
    }

    /// Set the ready flag of `user`. Returns `false` if `user` is not in the lobby.
    pub fn set_ready_for(&mut self, user: UserId, ready: bool) -> bool {
        if self.sender.id == user {
            self.sender.is_ready = ready;
            true
        } else if self.receiver.id == user {
            self.receiver.is_ready = ready;
            true
        } else {
            false
        }
    }
}

/// Where the local player currently is in the lobby protocol.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LobbyPhase {
    #[default]
    Idle,
    /// We invited `friend`; the lobby id arrives with the server echo.
    InvitationSent {
        friend: UserId,
        lobby_id: Option<LobbyId>,
    },
    /// `from` invited us.
    InvitationReceived {
        from: UserId,
        lobby_id: Option<LobbyId>,
    },
    /// We accepted; waiting for `LOBBY_CREATED`.
    Accepted { lobby_id: LobbyId },
    Active(LobbySession),
}

impl LobbyPhase {
    fn lobby_id(&self) -> Option<LobbyId> {
        match self {
            Self::Idle => None,
            Self::InvitationSent { lobby_id, .. } | Self::InvitationReceived { lobby_id, .. } => {
                *lobby_id
            }
            Self::Accepted { lobby_id } => Some(*lobby_id),
            Self::Active(session) => Some(session.lobby_id),
        }
    }
}

/// Lobby protocol state machine for one local identity.
#[derive(Debug, Clone)]
pub struct LobbyMachine {
    local: UserId,
    phase: LobbyPhase,
}

impl LobbyMachine {
    pub fn new(local: UserId) -> Self {
        Self {
            local,
            phase: LobbyPhase::Idle,
        }
    }

    pub fn phase(&self) -> &LobbyPhase {
        &self.phase
    }

    pub fn session(&self) -> Option<&LobbySession> {
        match &self.phase {
            LobbyPhase::Active(session) => Some(session),
            _ => None,
        }
    }

    /// Lobby id known for the current phase, if any.
    pub fn current_lobby_id(&self) -> Option<LobbyId> {
        self.phase.lobby_id()
    }

    pub fn is_idle(&self) -> bool {
        self.phase == LobbyPhase::Idle
    }

    pub(crate) fn reset(&mut self) {
        self.phase = LobbyPhase::Idle;
    }

    fn refuse(&self, action: &'static str) -> RealtimeError {
        RealtimeError::invalid_transition(MACHINE, action, &self.phase)
    }

    fn matches_current(&self, lobby_id: Option<LobbyId>) -> bool {
        match (lobby_id, self.current_lobby_id()) {
            (Some(incoming), Some(current)) => incoming == current,
            _ => true,
        }
    }

    // ── Local actions ───────────────────────────────────────────────

    /// Invite `friend` into a new lobby.
    ///
    /// # Errors
    ///
    /// [`RealtimeError::InvalidTransition`] unless idle, or when inviting ourselves.
    pub fn invite(&mut self, friend: UserId) -> Result<ClientMessage> {
        if !self.is_idle() || friend == self.local {
            return Err(self.refuse("invite"));
        }
        self.phase = LobbyPhase::InvitationSent {
            friend,
            lobby_id: None,
        };
        Ok(ClientMessage::LobbyInvitationToFriend {
            user_id: self.local,
            sender: LobbyUserState::waiting(self.local),
            receiver: LobbyUserState::waiting(friend),
        })
    }

    /// Accept the pending invitation.
    ///
    /// # Errors
    ///
    /// [`RealtimeError::InvalidTransition`] without a pending invitation that
    /// carries a lobby id.
    pub fn accept(&mut self) -> Result<ClientMessage> {
        let LobbyPhase::InvitationReceived {
            from,
            lobby_id: Some(lobby_id),
        } = self.phase
        else {
            return Err(self.refuse("accept"));
        };
        self.phase = LobbyPhase::Accepted { lobby_id };
        Ok(ClientMessage::LobbyAcceptFromFriend {
            user_id: self.local,
            sender: LobbyUserState::waiting(from),
            receiver: LobbyUserState::waiting(self.local),
            lobby_id,
        })
    }

    /// Refuse the pending invitation and return to idle.
    ///
    /// # Errors
    ///
    /// [`RealtimeError::InvalidTransition`] without a pending invitation that
    /// carries a lobby id.
    pub fn deny(&mut self) -> Result<ClientMessage> {
        let LobbyPhase::InvitationReceived {
            from,
            lobby_id: Some(lobby_id),
        } = self.phase
        else {
            return Err(self.refuse("deny"));
        };
        self.phase = LobbyPhase::Idle;
        Ok(ClientMessage::LobbyDenyFromFriend {
            user_id: self.local,
            sender: LobbyUserState::waiting(from),
            receiver: LobbyUserState::waiting(self.local),
            lobby_id,
        })
    }

    /// Toggle the local ready flag. Applied optimistically, then overwritten by
    /// the next `LOBBY_PLAYER_STATUS`.
    ///
    /// # Errors
    ///
    /// [`RealtimeError::NoActiveLobby`] outside an active pregame lobby.
    pub fn set_ready(&mut self, ready: bool) -> Result<ClientMessage> {
        let local = self.local;
        let session = match &mut self.phase {
            LobbyPhase::Active(session) if !session.in_game => session,
            _ => return Err(RealtimeError::NoActiveLobby),
        };
        session.set_ready_for(local, ready);
        let lobby_id = session.lobby_id;
        Ok(if ready {
            ClientMessage::LobbyPlayerReadyStatus {
                user_id: local,
                lobby_id,
            }
        } else {
            ClientMessage::LobbyPlayerUnreadyStatus {
                user_id: local,
                lobby_id,
            }
        })
    }

    /// Ask the server to switch the special game mode. The local flag changes
    /// only when the server broadcasts `LOBBY_SPECIAL_MODE_TOGGLED`.
    ///
    /// # Errors
    ///
    /// [`RealtimeError::NoActiveLobby`] outside an active lobby.
    pub fn toggle_special_mode(&self, enabled: bool) -> Result<ClientMessage> {
        let session = self.session().ok_or(RealtimeError::NoActiveLobby)?;
        Ok(ClientMessage::LobbySpecialModeToggled {
            lobby_id: session.lobby_id,
            is_game_mode: enabled,
        })
    }

    /// Drop an invitation the server has not echoed yet. There is no lobby id
    /// to address, so nothing goes on the wire. Returns `true` if one was dropped.
    pub fn cancel_unconfirmed_invitation(&mut self) -> bool {
        if let LobbyPhase::InvitationSent {
            friend,
            lobby_id: None,
        } = self.phase
        {
            debug!(friend, "invitation withdrawn before the server echo");
            self.phase = LobbyPhase::Idle;
            true
        } else {
            false
        }
    }

    /// Leave the lobby. Collapses to idle and drops any pending countdown.
    ///
    /// # Errors
    ///
    /// [`RealtimeError::NoActiveLobby`] when no lobby id is known yet.
    pub fn terminate(&mut self) -> Result<ClientMessage> {
        let lobby_id = match &self.phase {
            LobbyPhase::Active(session) => session.lobby_id,
            LobbyPhase::Accepted { lobby_id }
            | LobbyPhase::InvitationSent {
                lobby_id: Some(lobby_id),
                ..
            } => *lobby_id,
            _ => return Err(RealtimeError::NoActiveLobby),
        };
        let sender = self
            .session()
            .and_then(|s| s.participant(self.local).copied())
            .unwrap_or(LobbyUserState::waiting(self.local));
        self.phase = LobbyPhase::Idle;
        Ok(ClientMessage::LobbyTerminate {
            user_id: self.local,
            sender,
            lobby_id,
        })
    }

    // ── Inbound ─────────────────────────────────────────────────────

    /// Server echo of our own invitation. Records the assigned lobby id.
    pub fn on_invitation_echo(&mut self, receiver: UserId, lobby_id: Option<LobbyId>) {
        if let LobbyPhase::InvitationSent {
            friend,
            lobby_id: slot,
        } = &mut self.phase
        {
            if *friend == receiver {
                *slot = lobby_id;
            }
        }
    }

    /// A friend invited us. Returns `true` if the invitation is now pending.
    pub fn on_invitation(
        &mut self,
        sender: UserId,
        receiver: UserId,
        lobby_id: Option<LobbyId>,
    ) -> bool {
        if receiver != self.local {
            debug!(sender, receiver, "invitation addressed to someone else");
            return false;
        }
        if !self.is_idle() {
            debug!(sender, phase = ?self.phase, "busy, invitation left pending in UI only");
            return false;
        }
        self.phase = LobbyPhase::InvitationReceived {
            from: sender,
            lobby_id,
        };
        true
    }

    /// The invitation was refused by either side.
    pub fn on_denied(&mut self, lobby_id: Option<LobbyId>) -> bool {
        let pending = matches!(
            self.phase,
            LobbyPhase::InvitationSent { .. }
                | LobbyPhase::InvitationReceived { .. }
                | LobbyPhase::Accepted { .. }
        );
        if pending && self.matches_current(lobby_id) {
            self.phase = LobbyPhase::Idle;
            true
        } else {
            false
        }
    }

    /// The server paired both players. Returns `false` if we are not one of them.
    pub fn on_created(
        &mut self,
        lobby_id: LobbyId,
        sender: LobbyUserState,
        receiver: LobbyUserState,
        is_tournament_game: bool,
    ) -> bool {
        if sender.id != self.local && receiver.id != self.local {
            warn!(%lobby_id, sender = sender.id, receiver = receiver.id, "LOBBY_CREATED for a lobby we are not part of");
            return false;
        }
        if let LobbyPhase::Active(previous) = &self.phase {
            if previous.lobby_id != lobby_id {
                debug!(old = %previous.lobby_id, new = %lobby_id, "replacing active lobby");
            }
        }
        self.phase = LobbyPhase::Active(LobbySession::new(
            lobby_id,
            sender,
            receiver,
            is_tournament_game,
        ));
        true
    }

    /// Authoritative ready flags. Returns `true` when the server reports both
    /// players ready and its previous report did not.
    pub fn on_player_status(
        &mut self,
        lobby_id: LobbyId,
        sender: LobbyUserState,
        receiver: LobbyUserState,
    ) -> bool {
        let LobbyPhase::Active(session) = &mut self.phase else {
            return false;
        };
        if session.lobby_id != lobby_id {
            return false;
        }
        session.set_ready_for(sender.id, sender.is_ready);
        session.set_ready_for(receiver.id, receiver.is_ready);
        let was_confirmed = session.both_ready_confirmed;
        session.both_ready_confirmed = session.both_ready();
        session.both_ready_confirmed && !was_confirmed
    }

    pub fn on_special_mode(&mut self, lobby_id: LobbyId, enabled: bool) -> bool {
        match &mut self.phase {
            LobbyPhase::Active(session) if session.lobby_id == lobby_id => {
                session.special_mode = enabled;
                true
            }
            _ => false,
        }
    }

    /// Informational countdown; never changes the phase.
    pub fn on_pregame_tick(&mut self, lobby_id: Option<LobbyId>, remaining: u32) -> bool {
        let matches = self.matches_current(lobby_id);
        match &mut self.phase {
            LobbyPhase::Active(session) if matches && !session.in_game => {
                session.pregame_remaining = Some(remaining);
                true
            }
            _ => false,
        }
    }

    /// The hosted match started. Returns the lobby id to bind the match relay to.
    pub fn on_game_start(&mut self, lobby_id: Option<LobbyId>) -> Option<LobbyId> {
        let matches = self.matches_current(lobby_id);
        match &mut self.phase {
            LobbyPhase::Active(session) if matches => {
                session.in_game = true;
                session.pregame_remaining = None;
                Some(session.lobby_id)
            }
            _ => None,
        }
    }

    /// Server-side teardown. Returns `true` if our lobby was closed.
    pub fn on_destroyed(&mut self, lobby_id: Option<LobbyId>) -> bool {
        if self.current_lobby_id().is_none() || !self.matches_current(lobby_id) {
            return false;
        }
        self.phase = LobbyPhase::Idle;
        true
    }

    /// The hosted match ended; the lobby is spent.
    pub fn on_match_finished(&mut self, lobby_id: Option<LobbyId>) -> bool {
        if self.session().is_some() && self.matches_current(lobby_id) {
            self.phase = LobbyPhase::Idle;
            true
        } else {
            false
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
    use uuid::Uuid;

    const ME: UserId = 1;
    const FRIEND: UserId = 2;

    fn lobby() -> LobbyId {
        Uuid::from_u128(0xabc)
    }

    fn active_machine() -> LobbyMachine {
        let mut m = LobbyMachine::new(ME);
        assert!(m.on_created(
            lobby(),
            LobbyUserState::waiting(ME),
            LobbyUserState::waiting(FRIEND),
            false
        ));
        m
    }

    #[test]
    fn invite_then_echo_records_lobby_id() {
        let mut m = LobbyMachine::new(ME);
        let msg = m.invite(FRIEND).unwrap();
        assert!(matches!(msg, ClientMessage::LobbyInvitationToFriend { .. }));
        m.on_invitation_echo(FRIEND, Some(lobby()));
        assert_eq!(m.current_lobby_id(), Some(lobby()));
    }

    #[test]
    fn cannot_invite_twice_or_self() {
        let mut m = LobbyMachine::new(ME);
        assert!(m.invite(ME).is_err());
        m.invite(FRIEND).unwrap();
        assert!(matches!(
            m.invite(3),
            Err(RealtimeError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn received_invitation_can_be_accepted() {
        let mut m = LobbyMachine::new(ME);
        assert!(m.on_invitation(FRIEND, ME, Some(lobby())));
        let msg = m.accept().unwrap();
        match msg {
            ClientMessage::LobbyAcceptFromFriend {
                sender,
                receiver,
                lobby_id,
                ..
            } => {
                assert_eq!(sender.id, FRIEND);
                assert_eq!(receiver.id, ME);
                assert_eq!(lobby_id, lobby());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(m.phase(), &LobbyPhase::Accepted { lobby_id: lobby() });
    }

    #[test]
    fn deny_returns_to_idle() {
        let mut m = LobbyMachine::new(ME);
        m.on_invitation(FRIEND, ME, Some(lobby()));
        m.deny().unwrap();
        assert!(m.is_idle());
    }

    #[test]
    fn denied_by_friend_returns_to_idle() {
        let mut m = LobbyMachine::new(ME);
        m.invite(FRIEND).unwrap();
        assert!(m.on_denied(None));
        assert!(m.is_idle());
    }

    #[test]
    fn created_then_both_ready() {
        let mut m = active_machine();
        m.set_ready(true).unwrap();
        assert!(!m.session().unwrap().both_ready());

        let both = m.on_player_status(
            lobby(),
            LobbyUserState {
                id: ME,
                is_ready: true,
            },
            LobbyUserState {
                id: FRIEND,
                is_ready: true,
            },
        );
        assert!(both);
    }

    #[test]
    fn both_ready_fires_for_the_second_player_to_ready_up() {
        let mut m = active_machine();
        let friend_ready = LobbyUserState {
            id: FRIEND,
            is_ready: true,
        };
        assert!(!m.on_player_status(lobby(), LobbyUserState::waiting(ME), friend_ready));

        m.set_ready(true).unwrap();
        assert!(m.session().unwrap().both_ready());
        assert!(!m.session().unwrap().both_ready_confirmed);

        let me_ready = LobbyUserState {
            id: ME,
            is_ready: true,
        };
        assert!(m.on_player_status(lobby(), me_ready, friend_ready));
        assert!(!m.on_player_status(lobby(), me_ready, friend_ready));
    }

    #[test]
    fn unconfirmed_invitation_can_be_withdrawn() {
        let mut m = LobbyMachine::new(ME);
        m.invite(FRIEND).unwrap();
        assert!(matches!(m.terminate(), Err(RealtimeError::NoActiveLobby)));
        assert!(m.cancel_unconfirmed_invitation());
        assert!(m.is_idle());
        m.invite(3).unwrap();

        m.on_invitation_echo(3, Some(lobby()));
        assert!(!m.cancel_unconfirmed_invitation());
        assert!(m.terminate().is_ok());
    }

    #[test]
    fn destroyed_clears_session_regardless_of_ready_state() {
        let mut m = active_machine();
        m.set_ready(true).unwrap();
        m.on_pregame_tick(None, 3);
        assert!(m.on_destroyed(Some(lobby())));
        assert!(m.is_idle());
        assert!(m.session().is_none());
    }

    #[test]
    fn destroyed_for_other_lobby_is_ignored() {
        let mut m = active_machine();
        assert!(!m.on_destroyed(Some(Uuid::from_u128(0xdef))));
        assert!(m.session().is_some());
    }

    #[test]
    fn terminate_drops_countdown() {
        let mut m = active_machine();
        m.on_pregame_tick(Some(lobby()), 5);
        assert_eq!(m.session().unwrap().pregame_remaining, Some(5));
        let msg = m.terminate().unwrap();
        assert!(matches!(msg, ClientMessage::LobbyTerminate { .. }));
        assert!(m.is_idle());
    }

    #[test]
    fn special_mode_only_flips_attribute() {
        let mut m = active_machine();
        assert!(m.on_special_mode(lobby(), true));
        let session = m.session().unwrap();
        assert!(session.special_mode);
        assert!(!session.both_ready());
    }

    #[test]
    fn game_start_clears_countdown_and_blocks_ready_toggle() {
        let mut m = active_machine();
        m.on_pregame_tick(None, 1);
        assert_eq!(m.on_game_start(None), Some(lobby()));
        assert_eq!(m.session().unwrap().pregame_remaining, None);
        assert!(matches!(
            m.set_ready(false),
            Err(RealtimeError::NoActiveLobby)
        ));
    }

    #[test]
    fn created_for_strangers_is_ignored() {
        let mut m = LobbyMachine::new(ME);
        assert!(!m.on_created(
            lobby(),
            LobbyUserState::waiting(8),
            LobbyUserState::waiting(9),
            false
        ));
        assert!(m.is_idle());
    }
}
