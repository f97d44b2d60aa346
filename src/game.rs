//! Live match relay: forwards key input, mirrors authoritative server state.
//!
//! The client never simulates the match. Every inbound snapshot replaces the
//! previous one and is handed to rendering as is.

use tracing::{debug, warn};

use crate::error::{RealtimeError, Result};
use crate::protocol::{BoostState, ClientMessage, GameState, KeyInput, LobbyId, UserId};

// ── Boost transitions ───────────────────────────────────────────────

impl BoostState {
    /// Count one paddle hit. Returns `true` when this hit made the boost ready.
    pub fn register_hit(&mut self, threshold: u32) -> bool {
        if self.ready || self.active {
            return false;
        }
        self.hit_counter = self.hit_counter.saturating_add(1);
        if self.hit_counter >= threshold {
            self.ready = true;
            return true;
        }
        false
    }

    /// Fire the boost. Only a ready boost can become active; activation
    /// consumes the readiness and the hit counter.
    pub fn activate(&mut self) -> bool {
        if !self.ready {
            return false;
        }
        self.active = true;
        self.ready = false;
        self.hit_counter = 0;
        true
    }

    /// Whether `next` is a legal successor of `prev`: a boost may only turn
    /// active if it was ready in the previous snapshot.
    pub fn check_transition(prev: &BoostState, next: &BoostState) -> bool {
        !next.active || prev.active || prev.ready
    }
}

// ── Relay ───────────────────────────────────────────────────────────

/// Terminal outcome of a match.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub lobby_id: Option<LobbyId>,
    pub state: Option<GameState>,
    pub winner: Option<UserId>,
    /// Tournament matches lead back to the bracket, standalone ones to the lobby list.
    pub is_tournament_game: bool,
}

#[derive(Debug, Clone)]
pub struct GameRelay {
    local: UserId,
    lobby_id: Option<LobbyId>,
    players: (Option<UserId>, Option<UserId>),
    is_tournament_game: bool,
    state: Option<GameState>,
    result: Option<MatchResult>,
}

impl GameRelay {
    pub fn new(local: UserId) -> Self {
        Self {
            local,
            lobby_id: None,
            players: (None, None),
            is_tournament_game: false,
            state: None,
            result: None,
        }
    }

    /// Lobby of the running match, if any.
    pub fn lobby_id(&self) -> Option<LobbyId> {
        self.lobby_id
    }

    pub fn is_playing(&self) -> bool {
        self.lobby_id.is_some()
    }

    pub fn is_tournament_game(&self) -> bool {
        self.is_tournament_game
    }

    /// Latest authoritative snapshot.
    pub fn state(&self) -> Option<&GameState> {
        self.state.as_ref()
    }

    /// Outcome of the last finished match.
    pub fn result(&self) -> Option<&MatchResult> {
        self.result.as_ref()
    }

    /// 1 or 2 when the local player's side is known.
    pub fn local_side(&self) -> Option<u8> {
        match self.players {
            (Some(p1), _) if p1 == self.local => Some(1),
            (_, Some(p2)) if p2 == self.local => Some(2),
            _ => None,
        }
    }

    /// Route the next match traffic to `lobby_id`.
    pub fn bind(&mut self, lobby_id: LobbyId, is_tournament_game: bool) {
        if self.lobby_id != Some(lobby_id) {
            self.state = None;
            self.players = (None, None);
        }
        self.lobby_id = Some(lobby_id);
        self.is_tournament_game = is_tournament_game;
        self.result = None;
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::new(self.local);
    }

    /// Build the outbound envelope for a local key press.
    ///
    /// # Errors
    ///
    /// [`RealtimeError::NoActiveMatch`] when no match is bound.
    pub fn key_input(&self, key: KeyInput) -> Result<ClientMessage> {
        let lobby_id = self.lobby_id.ok_or(RealtimeError::NoActiveMatch)?;
        Ok(ClientMessage::GameEvent {
            lobby_id,
            user_id: self.local,
            key_pressed: key,
        })
    }

    pub fn on_game_start(
        &mut self,
        lobby_id: LobbyId,
        state: Option<GameState>,
        is_tournament_game: bool,
    ) {
        self.bind(lobby_id, is_tournament_game);
        if state.is_some() {
            self.state = state;
        }
    }

    /// Replace the snapshot with an inbound tick. Returns `false` if the tick
    /// belongs to another match.
    pub fn on_game_event(
        &mut self,
        lobby_id: LobbyId,
        state: Option<GameState>,
        players: (Option<UserId>, Option<UserId>),
        is_tournament_game: bool,
    ) -> bool {
        match self.lobby_id {
            Some(bound) if bound != lobby_id => {
                warn!(%lobby_id, %bound, "GAME_EVENT for another match dropped");
                return false;
            }
            Some(_) => {}
            None => {
                debug!(%lobby_id, "binding match from first GAME_EVENT");
                self.bind(lobby_id, is_tournament_game);
            }
        }
        if players.0.is_some() || players.1.is_some() {
            self.players = players;
        }
        let Some(next) = state else {
            return true;
        };
        if let Some(prev) = &self.state {
            for (side, before, after) in [
                (1u8, &prev.player1_boost, &next.player1_boost),
                (2u8, &prev.player2_boost, &next.player2_boost),
            ] {
                if !BoostState::check_transition(before, after) {
                    warn!(%lobby_id, side, "boost turned active without being ready");
                }
            }
        }
        self.state = Some(next);
        true
    }

    /// Terminal snapshot. Unbinds the match and records its result.
    pub fn on_game_finished(
        &mut self,
        lobby_id: Option<LobbyId>,
        state: Option<GameState>,
        is_tournament_game: bool,
    ) -> Option<&MatchResult> {
        if let (Some(bound), Some(incoming)) = (self.lobby_id, lobby_id) {
            if bound != incoming {
                warn!(%incoming, %bound, "GAME_FINISHED for another match dropped");
                return None;
            }
        }
        let winner = state.as_ref().and_then(|s| s.winner);
        if let Some(last) = &state {
            self.state = Some(last.clone());
        }
        self.result = Some(MatchResult {
            lobby_id: lobby_id.or(self.lobby_id),
            state,
            winner,
            is_tournament_game,
        });
        self.lobby_id = None;
        self.result.as_ref()
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
    use crate::protocol::{Ball, Score, BOOST_HIT_THRESHOLD};
    use uuid::Uuid;

    const ME: UserId = 5;

    fn state(score: (u32, u32)) -> GameState {
        GameState {
            ball: Ball { x: 1.0, y: 2.0 },
            paddle: None,
            score: Score {
                player1: score.0,
                player2: score.1,
            },
            is_active: true,
            is_game_mode: false,
            winner: None,
            is_paused: false,
            pause_time: None,
            player1_boost: BoostState::default(),
            player2_boost: BoostState::default(),
            remaining_time: 60,
        }
    }

    #[test]
    fn boost_becomes_ready_at_threshold() {
        let mut boost = BoostState::default();
        assert!(!boost.register_hit(BOOST_HIT_THRESHOLD));
        assert!(!boost.register_hit(BOOST_HIT_THRESHOLD));
        assert!(boost.register_hit(BOOST_HIT_THRESHOLD));
        assert!(boost.ready);
        assert_eq!(boost.hit_counter, BOOST_HIT_THRESHOLD);
    }

    #[test]
    fn activation_resets_counter_and_ready_together() {
        let mut boost = BoostState::default();
        for _ in 0..BOOST_HIT_THRESHOLD {
            boost.register_hit(BOOST_HIT_THRESHOLD);
        }
        let before = boost;
        assert!(boost.activate());
        assert_eq!(
            boost,
            BoostState {
                hit_counter: 0,
                ready: false,
                active: true,
            }
        );
        assert!(BoostState::check_transition(&before, &boost));
    }

    #[test]
    fn cannot_activate_unready_boost() {
        let mut boost = BoostState::default();
        assert!(!boost.activate());
        assert!(!boost.active);
        let illegal = BoostState {
            active: true,
            ..BoostState::default()
        };
        assert!(!BoostState::check_transition(&BoostState::default(), &illegal));
    }

    #[test]
    fn key_input_requires_bound_match() {
        let mut relay = GameRelay::new(ME);
        assert!(matches!(
            relay.key_input(KeyInput::Up),
            Err(RealtimeError::NoActiveMatch)
        ));
        let lobby = Uuid::from_u128(3);
        relay.bind(lobby, false);
        match relay.key_input(KeyInput::Space).unwrap() {
            ClientMessage::GameEvent {
                lobby_id,
                user_id,
                key_pressed,
            } => {
                assert_eq!(lobby_id, lobby);
                assert_eq!(user_id, ME);
                assert_eq!(key_pressed, KeyInput::Space);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn snapshots_replace_previous_state() {
        let mut relay = GameRelay::new(ME);
        let lobby = Uuid::from_u128(3);
        relay.on_game_start(lobby, None, false);

        let mut first = state((1, 0));
        first.paddle = Some(crate::protocol::Paddle::default());
        assert!(relay.on_game_event(lobby, Some(first), (Some(ME), Some(6)), false));
        assert!(relay.on_game_event(lobby, Some(state((1, 1))), (None, None), false));

        assert_eq!(relay.state(), Some(&state((1, 1))));
        assert_eq!(relay.local_side(), Some(1));
    }

    #[test]
    fn foreign_match_traffic_is_dropped() {
        let mut relay = GameRelay::new(ME);
        relay.bind(Uuid::from_u128(3), false);
        assert!(!relay.on_game_event(Uuid::from_u128(4), Some(state((9, 9))), (None, None), false));
        assert!(relay.state().is_none());
    }

    #[test]
    fn finish_records_result_and_unbinds() {
        let mut relay = GameRelay::new(ME);
        let lobby = Uuid::from_u128(3);
        relay.bind(lobby, true);
        let mut last = state((5, 2));
        last.winner = Some(ME);
        let result = relay
            .on_game_finished(Some(lobby), Some(last), true)
            .cloned()
            .unwrap();
        assert_eq!(result.winner, Some(ME));
        assert!(result.is_tournament_game);
        assert!(!relay.is_playing());
    }
}
