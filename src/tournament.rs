//! Four-player bracket: waiting room, two semifinals and a final.
//!
//! ```text
//! Idle ─TOURNAMENT_CREATE/JOIN echo─▶ WaitingRoom ─4 players─▶ Populated
//!      ─TOURNAMENT_START─▶ InProgress ─semis finished─▶ FinalReady ─final finished─▶ Finished
//! any active phase ─TOURNAMENT_TERMINATE─▶ Terminated
//! any non-terminal phase ─TOURNAMENT_ERROR─▶ Error
//! ```
//!
//! Bracket contents only ever come from `TOURNAMENT_TREE_STATE` snapshots,
//! which replace the local bracket wholesale.

use tracing::{debug, warn};

use crate::error::{RealtimeError, Result};
use crate::error_codes::ErrorCode;
use crate::protocol::{BracketMatch, ClientMessage, LobbyId, Score, UserId};

const MACHINE: &str = "tournament";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum TournamentPhase {
    #[default]
    Idle,
    /// Waiting room exists, fewer than four players.
    WaitingRoom,
    /// Four players seated, waiting for the creator to start.
    Populated,
    /// Semifinals running.
    InProgress,
    /// Both semifinals finished and the final is seeded.
    FinalReady,
    Finished,
    /// Shut down by the server or the creator.
    Terminated,
    /// The server rejected a request.
    Error,
}

impl TournamentPhase {
    /// Phases in which the local player is part of a tournament.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::WaitingRoom | Self::Populated | Self::InProgress | Self::FinalReady
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Terminated | Self::Error)
    }
}

/// Position of a match in the bracket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchSlot {
    Semi1,
    Semi2,
    Final,
}

impl MatchSlot {
    pub const ALL: [MatchSlot; 3] = [Self::Semi1, Self::Semi2, Self::Final];
}

/// Last snapshot of the bracket as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bracket {
    pub code: String,
    pub semi1: BracketMatch,
    pub semi2: BracketMatch,
    pub final_match: BracketMatch,
}

impl Bracket {
    pub fn slot(&self, slot: MatchSlot) -> &BracketMatch {
        match slot {
            MatchSlot::Semi1 => &self.semi1,
            MatchSlot::Semi2 => &self.semi2,
            MatchSlot::Final => &self.final_match,
        }
    }

    fn slot_mut(&mut self, slot: MatchSlot) -> &mut BracketMatch {
        match slot {
            MatchSlot::Semi1 => &mut self.semi1,
            MatchSlot::Semi2 => &mut self.semi2,
            MatchSlot::Final => &mut self.final_match,
        }
    }

    pub fn semis_finished(&self) -> bool {
        self.semi1.is_finished && self.semi2.is_finished
    }

    /// The final may only be seeded once both semifinals are decided.
    pub fn is_consistent(&self) -> bool {
        !self.final_match.has_players() || self.semis_finished()
    }

    /// The unfinished match `user` plays in, latest round first.
    pub fn pending_slot_for(&self, user: UserId) -> Option<MatchSlot> {
        MatchSlot::ALL
            .into_iter()
            .rev()
            .find(|slot| {
                let m = self.slot(*slot);
                m.involves(user) && !m.is_finished
            })
    }

    pub fn slot_for_lobby(&self, lobby_id: LobbyId) -> Option<MatchSlot> {
        MatchSlot::ALL
            .into_iter()
            .find(|slot| self.slot(*slot).lobby_id == Some(lobby_id))
    }

    fn derived_phase(&self) -> TournamentPhase {
        if self.final_match.is_finished {
            TournamentPhase::Finished
        } else if self.final_match.has_players() {
            TournamentPhase::FinalReady
        } else {
            TournamentPhase::InProgress
        }
    }
}

/// The bracket match currently being played, as announced by `TOURNAMENT_GAME`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveMatch {
    pub slot: Option<MatchSlot>,
    pub lobby_id: LobbyId,
}

/// A `TOURNAMENT_ERROR`, kept as data for the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TournamentFailure {
    pub code: ErrorCode,
    pub message: String,
}

/// Tournament protocol state machine for one local identity.
#[derive(Debug, Clone)]
pub struct TournamentMachine {
    local: UserId,
    phase: TournamentPhase,
    code: Option<String>,
    creator: Option<UserId>,
    players: [Option<UserId>; 4],
    bracket: Option<Bracket>,
    timer: Option<u32>,
    live: Option<LiveMatch>,
    last_error: Option<TournamentFailure>,
}

impl TournamentMachine {
    pub fn new(local: UserId) -> Self {
        Self {
            local,
            phase: TournamentPhase::Idle,
            code: None,
            creator: None,
            players: [None; 4],
            bracket: None,
            timer: None,
            live: None,
            last_error: None,
        }
    }

    pub fn phase(&self) -> TournamentPhase {
        self.phase
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn creator(&self) -> Option<UserId> {
        self.creator
    }

    pub fn is_creator(&self) -> bool {
        self.creator == Some(self.local)
    }

    /// Waiting-room roster, `None` for empty seats.
    pub fn players(&self) -> &[Option<UserId>; 4] {
        &self.players
    }

    pub fn bracket(&self) -> Option<&Bracket> {
        self.bracket.as_ref()
    }

    pub fn timer(&self) -> Option<u32> {
        self.timer
    }

    pub fn live_match(&self) -> Option<LiveMatch> {
        self.live
    }

    pub fn last_error(&self) -> Option<&TournamentFailure> {
        self.last_error.as_ref()
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::new(self.local);
    }

    fn refuse(&self, action: &'static str) -> RealtimeError {
        RealtimeError::invalid_transition(MACHINE, action, &self.phase)
    }

    fn active_code(&self, action: &'static str) -> Result<String> {
        match (&self.code, self.phase.is_active()) {
            (Some(code), true) => Ok(code.clone()),
            _ => Err(self.refuse(action)),
        }
    }

    /// Whether `code` names the tournament we are in. Guests join with the
    /// short code while the server broadcasts the full id, so only the part
    /// before the first `-` is compared.
    fn accepts_code(&self, code: &str) -> bool {
        self.code
            .as_deref()
            .is_none_or(|current| short_code(current) == short_code(code))
    }

    /// Remember the longest known form of the code.
    fn adopt_code(&mut self, code: &str) {
        if self.code.as_deref().is_none_or(|current| current.len() < code.len()) {
            self.code = Some(code.to_owned());
        }
    }

    /// Enter a fresh waiting room, discarding whatever the previous
    /// tournament left behind.
    fn enter_waiting_room(&mut self, code: String) {
        let local = self.local;
        *self = Self::new(local);
        self.code = Some(code);
        self.phase = TournamentPhase::WaitingRoom;
    }

    // ── Local actions ───────────────────────────────────────────────

    /// Request a new waiting room.
    ///
    /// # Errors
    ///
    /// [`RealtimeError::InvalidTransition`] while already in a tournament.
    pub fn create(&self) -> Result<ClientMessage> {
        if self.phase.is_active() {
            return Err(self.refuse("create"));
        }
        Ok(ClientMessage::TournamentCreate {
            user_id: self.local,
        })
    }

    /// Request a seat in the waiting room identified by `code`.
    ///
    /// # Errors
    ///
    /// [`RealtimeError::InvalidTransition`] while already in a tournament.
    pub fn join(&self, code: impl Into<String>) -> Result<ClientMessage> {
        if self.phase.is_active() {
            return Err(self.refuse("join"));
        }
        Ok(ClientMessage::TournamentJoinWithCode {
            user_id: self.local,
            code: code.into(),
        })
    }

    /// Start the bracket. Only the creator of a full waiting room may do this.
    ///
    /// # Errors
    ///
    /// [`RealtimeError::InvalidTransition`] unless populated and we created it.
    pub fn start(&self) -> Result<ClientMessage> {
        if self.phase != TournamentPhase::Populated || !self.is_creator() {
            return Err(self.refuse("start"));
        }
        let code = self.active_code("start")?;
        Ok(ClientMessage::TournamentStart {
            user_id: self.local,
            code,
        })
    }

    /// Leave before the bracket starts.
    ///
    /// # Errors
    ///
    /// [`RealtimeError::InvalidTransition`] outside the waiting room.
    pub fn leave_waiting_room(&mut self) -> Result<ClientMessage> {
        if !matches!(
            self.phase,
            TournamentPhase::WaitingRoom | TournamentPhase::Populated
        ) {
            return Err(self.refuse("leave_waiting_room"));
        }
        let code = self.active_code("leave_waiting_room")?;
        self.reset();
        Ok(ClientMessage::TournamentLeaveWaitingRoom {
            user_id: self.local,
            code,
        })
    }

    /// Forfeit a running tournament.
    ///
    /// # Errors
    ///
    /// [`RealtimeError::InvalidTransition`] unless the bracket is running.
    pub fn leave(&mut self) -> Result<ClientMessage> {
        if !matches!(
            self.phase,
            TournamentPhase::InProgress | TournamentPhase::FinalReady
        ) {
            return Err(self.refuse("leave"));
        }
        let code = self.active_code("leave")?;
        self.reset();
        Ok(ClientMessage::TournamentLeave {
            user_id: self.local,
            code,
        })
    }

    /// Tear the tournament down for everyone. Creator only.
    ///
    /// # Errors
    ///
    /// [`RealtimeError::InvalidTransition`] when not the creator of an active tournament.
    pub fn terminate(&mut self) -> Result<ClientMessage> {
        if !self.is_creator() {
            return Err(self.refuse("terminate"));
        }
        let code = self.active_code("terminate")?;
        self.phase = TournamentPhase::Terminated;
        self.live = None;
        self.timer = None;
        Ok(ClientMessage::TournamentTerminate {
            user_id: self.local,
            code,
        })
    }

    // ── Inbound ─────────────────────────────────────────────────────

    /// Our create request succeeded; `player1` is the creator.
    pub fn on_created(&mut self, code: &str, user_id: UserId, player1: Option<UserId>) {
        let creator = player1.unwrap_or(user_id);
        if creator != self.local && user_id != self.local {
            debug!(code, creator, "TOURNAMENT_CREATE echo for another user");
            return;
        }
        self.enter_waiting_room(code.to_owned());
        self.creator = Some(creator);
        self.players = [Some(creator), None, None, None];
    }

    /// Our join request succeeded.
    pub fn on_joined(&mut self, code: &str, user_id: UserId) {
        if user_id != 0 && user_id != self.local {
            debug!(code, user_id, "TOURNAMENT_JOIN_WITH_CODE echo for another user");
            return;
        }
        if self.phase.is_active() && self.accepts_code(code) {
            return;
        }
        self.enter_waiting_room(code.to_owned());
    }

    /// Waiting-room roster update. Seat one is always the creator.
    pub fn on_roster(&mut self, code: &str, players: [Option<UserId>; 4]) {
        if !matches!(
            self.phase,
            TournamentPhase::WaitingRoom | TournamentPhase::Populated
        ) || !self.accepts_code(code)
        {
            debug!(code, phase = ?self.phase, "roster update outside waiting room");
            return;
        }
        self.adopt_code(code);
        let [first, ..] = players;
        self.creator = first.or(self.creator);
        self.players = players;
        self.phase = if players.iter().all(Option::is_some) {
            TournamentPhase::Populated
        } else {
            TournamentPhase::WaitingRoom
        };
    }

    pub fn on_started(&mut self, code: &str, players: [Option<UserId>; 4]) {
        if !self.accepts_code(code) || self.phase.is_terminal() {
            debug!(code, phase = ?self.phase, "ignoring TOURNAMENT_START");
            return;
        }
        self.adopt_code(code);
        self.players = players;
        self.phase = TournamentPhase::InProgress;
    }

    /// Apply a full bracket snapshot.
    ///
    /// Returns `false` if the snapshot was ignored: wrong tournament, terminal
    /// phase, or a final seeded before both semifinals finished. A rejected
    /// snapshot leaves the previous bracket untouched.
    pub fn on_tree_state(&mut self, snapshot: Bracket) -> bool {
        if !self.accepts_code(&snapshot.code) {
            warn!(code = %snapshot.code, current = ?self.code, "bracket snapshot for another tournament");
            return false;
        }
        if matches!(
            self.phase,
            TournamentPhase::Terminated | TournamentPhase::Error
        ) {
            debug!(code = %snapshot.code, phase = ?self.phase, "bracket snapshot after shutdown");
            return false;
        }
        if !snapshot.is_consistent() {
            warn!(code = %snapshot.code, "final seeded before both semifinals finished, snapshot dropped");
            return false;
        }
        self.phase = snapshot.derived_phase();
        self.adopt_code(&snapshot.code);
        self.bracket = Some(snapshot);
        true
    }

    /// A bracket match went live in `lobby_id`. Returns where it was routed.
    pub fn on_game(&mut self, code: &str, lobby_id: Option<LobbyId>) -> Option<LiveMatch> {
        let Some(lobby_id) = lobby_id else {
            debug!(code, "TOURNAMENT_GAME without lobby id");
            return None;
        };
        if !self.accepts_code(code) {
            return None;
        }
        let slot = self.bracket.as_ref().and_then(|b| {
            b.slot_for_lobby(lobby_id)
                .or_else(|| b.pending_slot_for(self.local))
        });
        if slot.is_none() {
            debug!(code, %lobby_id, "live match not found in bracket yet");
        }
        let live = LiveMatch { slot, lobby_id };
        self.live = Some(live);
        self.timer = None;
        Some(live)
    }

    /// Advisory countdown; negative values clamp to zero.
    pub fn on_timer(&mut self, code: &str, remaining: i32) {
        if self.accepts_code(code) {
            self.timer = Some(u32::try_from(remaining).unwrap_or(0));
        }
    }

    pub fn on_terminated(&mut self, code: &str) -> bool {
        if !self.phase.is_active() || !self.accepts_code(code) {
            return false;
        }
        self.phase = TournamentPhase::Terminated;
        self.live = None;
        self.timer = None;
        true
    }

    pub fn on_error(&mut self, code: Option<&str>, error: &str) -> ErrorCode {
        let classified = ErrorCode::classify(error);
        warn!(code = ?code, error, kind = %classified, "tournament request rejected");
        self.last_error = Some(TournamentFailure {
            code: classified,
            message: error.to_owned(),
        });
        if !self.phase.is_terminal() {
            self.phase = TournamentPhase::Error;
            self.live = None;
        }
        classified
    }

    /// Mirror a live score into the bracket slot bound to `lobby_id`.
    pub fn record_live_score(&mut self, lobby_id: LobbyId, score: Score) -> bool {
        let Some(LiveMatch {
            slot: Some(slot),
            lobby_id: live_lobby,
        }) = self.live
        else {
            return false;
        };
        if live_lobby != lobby_id {
            return false;
        }
        match self.bracket.as_mut() {
            Some(bracket) => {
                bracket.slot_mut(slot).score = score;
                true
            }
            None => false,
        }
    }

    /// A tournament match ended. Finishing the final finishes the tournament.
    pub fn on_match_finished(&mut self, lobby_id: Option<LobbyId>) -> Option<MatchSlot> {
        let live = self.live?;
        if lobby_id.is_some_and(|id| id != live.lobby_id) {
            return None;
        }
        self.live = None;
        if live.slot == Some(MatchSlot::Final) && self.phase == TournamentPhase::FinalReady {
            self.phase = TournamentPhase::Finished;
        }
        live.slot
    }
}

/// Tournament codes are UUIDs; the part before the first `-` is what players type.
fn short_code(code: &str) -> &str {
    code.split_once('-').map_or(code, |(head, _)| head)
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

    fn bracket_match(p1: UserId, p2: UserId) -> BracketMatch {
        BracketMatch {
            player1: Some(p1),
            player2: Some(p2),
            ..BracketMatch::default()
        }
    }

    fn finished(mut m: BracketMatch, winner: UserId) -> BracketMatch {
        m.is_finished = true;
        m.winner = Some(winner);
        m
    }

    fn snapshot(semi1: BracketMatch, semi2: BracketMatch, final_match: BracketMatch) -> Bracket {
        Bracket {
            code: "ab12".into(),
            semi1,
            semi2,
            final_match,
        }
    }

    fn populated() -> TournamentMachine {
        let mut t = TournamentMachine::new(ME);
        t.on_created("ab12", ME, Some(ME));
        t.on_roster("ab12", [Some(ME), Some(2), Some(3), Some(4)]);
        t
    }

    #[test]
    fn create_echo_opens_waiting_room() {
        let mut t = TournamentMachine::new(ME);
        t.create().unwrap();
        t.on_created("ab12", ME, Some(ME));
        assert_eq!(t.phase(), TournamentPhase::WaitingRoom);
        assert_eq!(t.code(), Some("ab12"));
        assert!(t.is_creator());
    }

    #[test]
    fn full_roster_populates_and_only_creator_starts() {
        let t = populated();
        assert_eq!(t.phase(), TournamentPhase::Populated);
        assert!(t.start().is_ok());

        let mut guest = TournamentMachine::new(2);
        guest.on_joined("ab12", 2);
        guest.on_roster("ab12", [Some(ME), Some(2), Some(3), Some(4)]);
        assert!(matches!(
            guest.start(),
            Err(RealtimeError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn guest_follows_full_id_after_joining_with_short_code() {
        const FULL: &str = "abcd1234-5678-4abc-9def-0123456789ab";
        let mut guest = TournamentMachine::new(2);
        guest.on_joined("abcd1234", 2);

        guest.on_roster(FULL, [Some(ME), Some(2), Some(3), Some(4)]);
        assert_eq!(guest.phase(), TournamentPhase::Populated);
        assert_eq!(guest.code(), Some(FULL));

        guest.on_started(FULL, [Some(ME), Some(2), Some(3), Some(4)]);
        assert_eq!(guest.phase(), TournamentPhase::InProgress);

        let mut tree = snapshot(bracket_match(ME, 2), bracket_match(3, 4), BracketMatch::default());
        tree.code = FULL.into();
        assert!(guest.on_tree_state(tree));
        assert!(guest.bracket().is_some());

        guest.on_roster("zzzz9999-5678", [Some(9), None, None, None]);
        assert!(!guest.on_terminated("zzzz9999"));
        assert_eq!(guest.phase(), TournamentPhase::InProgress);
    }

    #[test]
    fn cannot_create_while_in_waiting_room() {
        let t = populated();
        assert!(t.create().is_err());
        assert!(t.join("zz99").is_err());
    }

    #[test]
    fn tree_state_overwrites_wholesale() {
        let mut t = populated();
        t.on_started("ab12", [Some(ME), Some(2), Some(3), Some(4)]);

        let mut first = bracket_match(ME, 2);
        first.score = Score {
            player1: 4,
            player2: 1,
        };
        first.lobby_id = Some(Uuid::from_u128(1));
        assert!(t.on_tree_state(snapshot(
            first,
            bracket_match(3, 4),
            BracketMatch::default()
        )));

        let mut second = bracket_match(ME, 2);
        second.score = Score {
            player1: 0,
            player2: 2,
        };
        let expected = snapshot(second, bracket_match(3, 4), BracketMatch::default());
        assert!(t.on_tree_state(expected.clone()));
        assert_eq!(t.bracket(), Some(&expected));
        assert_eq!(t.bracket().unwrap().semi1.lobby_id, None);
    }

    #[test]
    fn premature_final_is_rejected() {
        let mut t = populated();
        let good = snapshot(bracket_match(ME, 2), bracket_match(3, 4), BracketMatch::default());
        t.on_tree_state(good.clone());

        let bad = snapshot(
            finished(bracket_match(ME, 2), ME),
            bracket_match(3, 4),
            bracket_match(ME, 3),
        );
        assert!(!t.on_tree_state(bad));
        assert_eq!(t.bracket(), Some(&good));
        assert_eq!(t.phase(), TournamentPhase::InProgress);
    }

    #[test]
    fn phase_follows_bracket_progress() {
        let mut t = populated();
        t.on_tree_state(snapshot(
            finished(bracket_match(ME, 2), ME),
            finished(bracket_match(3, 4), 3),
            bracket_match(ME, 3),
        ));
        assert_eq!(t.phase(), TournamentPhase::FinalReady);

        t.on_tree_state(snapshot(
            finished(bracket_match(ME, 2), ME),
            finished(bracket_match(3, 4), 3),
            finished(bracket_match(ME, 3), 3),
        ));
        assert_eq!(t.phase(), TournamentPhase::Finished);
    }

    #[test]
    fn tournament_game_routes_live_scores_to_slot() {
        let mut t = populated();
        t.on_tree_state(snapshot(
            finished(bracket_match(ME, 2), ME),
            finished(bracket_match(3, 4), 3),
            bracket_match(ME, 3),
        ));
        let lobby = Uuid::from_u128(7);
        let live = t.on_game("ab12", Some(lobby)).unwrap();
        assert_eq!(live.slot, Some(MatchSlot::Final));

        let score = Score {
            player1: 2,
            player2: 2,
        };
        assert!(t.record_live_score(lobby, score));
        assert_eq!(t.bracket().unwrap().final_match.score, score);
        assert!(!t.record_live_score(Uuid::from_u128(8), score));

        assert_eq!(t.on_match_finished(Some(lobby)), Some(MatchSlot::Final));
        assert_eq!(t.phase(), TournamentPhase::Finished);
    }

    #[test]
    fn error_is_classified_and_kept_as_data() {
        let mut t = TournamentMachine::new(ME);
        let code = t.on_error(None, "Tournament does not exist");
        assert_eq!(code, ErrorCode::TournamentNotFound);
        assert_eq!(t.phase(), TournamentPhase::Error);
        assert_eq!(t.last_error().unwrap().message, "Tournament does not exist");

        t.create().unwrap();
        t.on_created("cd34", ME, Some(ME));
        assert_eq!(t.phase(), TournamentPhase::WaitingRoom);
        assert!(t.last_error().is_none());
    }

    #[test]
    fn terminate_from_server_ends_active_tournament() {
        let mut t = populated();
        assert!(t.on_terminated("ab12"));
        assert_eq!(t.phase(), TournamentPhase::Terminated);
        assert!(!t.on_tree_state(snapshot(
            bracket_match(ME, 2),
            bracket_match(3, 4),
            BracketMatch::default()
        )));
    }

    #[test]
    fn leave_waiting_room_resets() {
        let mut t = populated();
        let msg = t.leave_waiting_room().unwrap();
        assert_eq!(msg.tag(), "TOURNAMENT_LEAVE_WAITING_ROOM");
        assert_eq!(t.phase(), TournamentPhase::Idle);
        assert_eq!(t.code(), None);
    }

    #[test]
    fn negative_timer_clamps_to_zero() {
        let mut t = populated();
        t.on_timer("ab12", -3);
        assert_eq!(t.timer(), Some(0));
        t.on_timer("other", 9);
        assert_eq!(t.timer(), Some(0));
    }
}
