//! Wire-compatible protocol types for the Pong realtime socket.
//!
//! Every payload is a flat JSON object carrying a `type` discriminant. Tags are
//! `SCREAMING_SNAKE_CASE`, fields are `camelCase`. Inbound traffic decodes into
//! [`ServerMessage`], outbound traffic is built as [`ClientMessage`].
//!
//! Server quirks that the types absorb:
//!
//! - a player id of `0` means "no player" and decodes to `None`
//! - an empty `usersOnline` list may arrive as `null`
//! - the lobby/tournament echo messages reuse the request tag

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

// ── Type aliases ────────────────────────────────────────────────────

/// Identity of an authenticated user.
pub type UserId = u64;

/// Server-assigned identifier of a 1v1 lobby (and of the match it hosts).
pub type LobbyId = Uuid;

/// Paddle hits a player needs before their boost becomes ready.
pub const BOOST_HIT_THRESHOLD: u32 = 3;

// ── Serde helpers ───────────────────────────────────────────────────

/// `0` on the wire ⇔ `None` in Rust.
pub(crate) mod zero_as_none {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::UserId;

    pub fn serialize<S: Serializer>(id: &Option<UserId>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(id.unwrap_or(0))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<UserId>, D::Error> {
        let raw = Option::<UserId>::deserialize(d)?;
        Ok(raw.filter(|id| *id != 0))
    }
}

fn null_as_empty<'de, D, T>(d: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(d)?.unwrap_or_default())
}

// ── Shared structs ──────────────────────────────────────────────────

/// One side of a lobby: who it is and whether they pressed "ready".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyUserState {
    pub id: UserId,
    #[serde(default)]
    pub is_ready: bool,
}

impl LobbyUserState {
    /// A participant that has not signalled readiness yet.
    pub fn waiting(id: UserId) -> Self {
        Self { id, is_ready: false }
    }
}

/// Local key input forwarded to the server during a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyInput {
    /// Start moving the paddle up.
    Up,
    /// Start moving the paddle down.
    Down,
    /// Stop the paddle.
    Stop,
    /// Request boost activation (honoured only when the boost is ready).
    Space,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Ball {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paddle {
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub player1_x: f64,
    #[serde(default)]
    pub player1_y: f64,
    #[serde(default)]
    pub player2_x: f64,
    #[serde(default)]
    pub player2_y: f64,
    #[serde(default, alias = "player1Direction")]
    pub player1_y_direction: i8,
    #[serde(default, alias = "player2Direction")]
    pub player2_y_direction: i8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub player1: u32,
    pub player2: u32,
}

/// Per-player boost power-up as reported by the server.
///
/// Transitions are modelled in [`crate::game`]; the client only mirrors what
/// the server reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoostState {
    #[serde(rename = "ballhit", default)]
    pub hit_counter: u32,
    #[serde(rename = "boostReady", alias = "boostready", default)]
    pub ready: bool,
    #[serde(rename = "isboostactive", default)]
    pub active: bool,
}

/// Authoritative per-tick match state. Never authored by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    pub ball: Ball,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paddle: Option<Paddle>,
    pub score: Score,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_game_mode: bool,
    #[serde(default, with = "zero_as_none")]
    pub winner: Option<UserId>,
    #[serde(default)]
    pub is_paused: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause_time: Option<String>,
    #[serde(rename = "player1boost", default)]
    pub player1_boost: BoostState,
    #[serde(rename = "player2boost", default)]
    pub player2_boost: BoostState,
    #[serde(default)]
    pub remaining_time: u32,
}

/// One match of the four-player bracket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BracketMatch {
    #[serde(rename = "player1id", default, with = "zero_as_none")]
    pub player1: Option<UserId>,
    #[serde(rename = "player2id", default, with = "zero_as_none")]
    pub player2: Option<UserId>,
    #[serde(default)]
    pub score: Score,
    #[serde(default)]
    pub is_finished: bool,
    #[serde(default, with = "zero_as_none")]
    pub winner: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lobby_id: Option<LobbyId>,
}

impl BracketMatch {
    /// Whether `user` plays in this match.
    pub fn involves(&self, user: UserId) -> bool {
        self.player1 == Some(user) || self.player2 == Some(user)
    }

    /// Whether any player slot is filled.
    pub fn has_players(&self) -> bool {
        self.player1.is_some() || self.player2.is_some()
    }
}

// ── Messages ────────────────────────────────────────────────────────

/// Message types sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    /// Full presence resync: every other connected identity.
    OnlineUsers {
        #[serde(default, deserialize_with = "null_as_empty")]
        users_online: Vec<UserId>,
    },
    /// An identity came online.
    NewConnection { user: UserId },
    /// An identity went offline.
    UserDisconnected { user: UserId },
    /// Direct message, delivered to both participants.
    Chat {
        data: String,
        #[serde(alias = "senderID")]
        sender_id: UserId,
        #[serde(alias = "receiverID")]
        receiver_id: UserId,
    },
    /// Echo of our own invitation, now carrying the server-assigned lobby id.
    LobbyInvitationToFriend {
        #[serde(default)]
        user_id: UserId,
        sender: LobbyUserState,
        receiver: LobbyUserState,
        #[serde(default)]
        lobby_id: Option<LobbyId>,
    },
    /// A friend invites us into a lobby.
    LobbyInvitationFromFriend {
        #[serde(default)]
        user_id: UserId,
        sender: LobbyUserState,
        receiver: LobbyUserState,
        #[serde(default)]
        lobby_id: Option<LobbyId>,
    },
    /// The invitation was refused.
    LobbyDenied {
        #[serde(default)]
        sender: LobbyUserState,
        #[serde(default)]
        receiver: LobbyUserState,
        #[serde(default)]
        lobby_id: Option<LobbyId>,
    },
    /// Both players are paired; the session starts with nobody ready.
    LobbyCreated {
        sender: LobbyUserState,
        receiver: LobbyUserState,
        lobby_id: LobbyId,
        #[serde(default)]
        is_tournament_game: bool,
    },
    /// Authoritative ready flags after a ready/unready request.
    LobbyPlayerStatus {
        #[serde(default)]
        user_id: UserId,
        lobby_id: LobbyId,
        sender: LobbyUserState,
        receiver: LobbyUserState,
    },
    /// The special game mode flag of the lobby changed.
    LobbySpecialModeToggled {
        lobby_id: LobbyId,
        is_game_mode: bool,
    },
    /// Informational pregame countdown tick.
    LobbyPregameRemainingTime {
        remaining_seconds_to_start: u32,
        #[serde(default)]
        lobby_id: Option<LobbyId>,
    },
    /// The lobby no longer exists on the server.
    LobbyDestroyed {
        #[serde(default)]
        lobby_id: Option<LobbyId>,
        #[serde(default)]
        error: Option<String>,
    },
    /// The match hosted by the lobby is starting.
    GameStart {
        #[serde(default)]
        state: Option<GameState>,
        #[serde(default)]
        lobby_id: Option<LobbyId>,
        #[serde(default)]
        is_tournament_game: bool,
    },
    /// Per-tick authoritative state of a running match.
    GameEvent {
        lobby_id: LobbyId,
        #[serde(default)]
        state: Option<GameState>,
        #[serde(rename = "player1id", default, with = "zero_as_none")]
        player1: Option<UserId>,
        #[serde(rename = "player2id", default, with = "zero_as_none")]
        player2: Option<UserId>,
        #[serde(default)]
        is_tournament_game: bool,
    },
    /// Terminal state of a match.
    GameFinished {
        #[serde(default)]
        lobby_id: Option<LobbyId>,
        #[serde(default)]
        state: Option<GameState>,
        #[serde(rename = "player1id", default, with = "zero_as_none")]
        player1: Option<UserId>,
        #[serde(rename = "player2id", default, with = "zero_as_none")]
        player2: Option<UserId>,
        #[serde(default)]
        is_tournament_game: bool,
    },
    /// Echo of a create request: the waiting room exists under `code`.
    TournamentCreate {
        code: String,
        #[serde(default)]
        user_id: UserId,
        #[serde(rename = "player1id", default, with = "zero_as_none")]
        player1: Option<UserId>,
    },
    /// Echo of a join request: we are in the waiting room.
    TournamentJoinWithCode {
        code: String,
        #[serde(default)]
        user_id: UserId,
    },
    /// Waiting-room roster update.
    TournamentEvent {
        code: String,
        #[serde(rename = "player1id", default, with = "zero_as_none")]
        player1: Option<UserId>,
        #[serde(rename = "player2id", default, with = "zero_as_none")]
        player2: Option<UserId>,
        #[serde(rename = "player3id", default, with = "zero_as_none")]
        player3: Option<UserId>,
        #[serde(rename = "player4id", default, with = "zero_as_none")]
        player4: Option<UserId>,
    },
    /// The creator started the bracket.
    TournamentStart {
        code: String,
        #[serde(rename = "player1id", default, with = "zero_as_none")]
        player1: Option<UserId>,
        #[serde(rename = "player2id", default, with = "zero_as_none")]
        player2: Option<UserId>,
        #[serde(rename = "player3id", default, with = "zero_as_none")]
        player3: Option<UserId>,
        #[serde(rename = "player4id", default, with = "zero_as_none")]
        player4: Option<UserId>,
    },
    /// Full bracket snapshot. Always replaces local bracket state.
    TournamentTreeState {
        code: String,
        semi1: BracketMatch,
        semi2: BracketMatch,
        #[serde(rename = "final")]
        final_match: BracketMatch,
    },
    /// A bracket match is now live in the given lobby.
    TournamentGame {
        code: String,
        #[serde(default)]
        lobby_id: Option<LobbyId>,
    },
    /// Advisory countdown before the next bracket match.
    TournamentTimer { code: String, remaining_time: i32 },
    /// The tournament was shut down (creator left).
    TournamentTerminate {
        #[serde(default)]
        code: String,
    },
    /// Server-side rejection, surfaced as data.
    TournamentError {
        #[serde(default)]
        code: Option<String>,
        error: String,
    },
}

/// Message types sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    /// Direct message to a friend.
    Chat {
        data: String,
        sender_id: UserId,
        receiver_id: UserId,
    },
    /// Invite a friend into a 1v1 lobby.
    LobbyInvitationToFriend {
        user_id: UserId,
        sender: LobbyUserState,
        receiver: LobbyUserState,
    },
    /// Accept a pending invitation.
    LobbyAcceptFromFriend {
        user_id: UserId,
        sender: LobbyUserState,
        receiver: LobbyUserState,
        lobby_id: LobbyId,
    },
    /// Refuse a pending invitation.
    LobbyDenyFromFriend {
        user_id: UserId,
        sender: LobbyUserState,
        receiver: LobbyUserState,
        lobby_id: LobbyId,
    },
    /// Local player is ready.
    LobbyPlayerReadyStatus { user_id: UserId, lobby_id: LobbyId },
    /// Local player withdrew readiness.
    LobbyPlayerUnreadyStatus { user_id: UserId, lobby_id: LobbyId },
    /// Toggle the special game mode of the lobby.
    LobbySpecialModeToggled {
        lobby_id: LobbyId,
        is_game_mode: bool,
    },
    /// Leave and destroy the lobby.
    LobbyTerminate {
        user_id: UserId,
        sender: LobbyUserState,
        lobby_id: LobbyId,
    },
    /// Key input for the running match.
    GameEvent {
        lobby_id: LobbyId,
        user_id: UserId,
        key_pressed: KeyInput,
    },
    /// Open a new tournament waiting room.
    TournamentCreate { user_id: UserId },
    /// Join a waiting room by code.
    TournamentJoinWithCode { user_id: UserId, code: String },
    /// Start the bracket (creator only).
    TournamentStart { user_id: UserId, code: String },
    /// Leave a running tournament.
    TournamentLeave { user_id: UserId, code: String },
    /// Leave the waiting room before the bracket starts.
    TournamentLeaveWaitingRoom { user_id: UserId, code: String },
    /// Tear the tournament down.
    TournamentTerminate { user_id: UserId, code: String },
}

impl ClientMessage {
    /// The wire `type` tag of this message.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Chat { .. } => "CHAT",
            Self::LobbyInvitationToFriend { .. } => "LOBBY_INVITATION_TO_FRIEND",
            Self::LobbyAcceptFromFriend { .. } => "LOBBY_ACCEPT_FROM_FRIEND",
            Self::LobbyDenyFromFriend { .. } => "LOBBY_DENY_FROM_FRIEND",
            Self::LobbyPlayerReadyStatus { .. } => "LOBBY_PLAYER_READY_STATUS",
            Self::LobbyPlayerUnreadyStatus { .. } => "LOBBY_PLAYER_UNREADY_STATUS",
            Self::LobbySpecialModeToggled { .. } => "LOBBY_SPECIAL_MODE_TOGGLED",
            Self::LobbyTerminate { .. } => "LOBBY_TERMINATE",
            Self::GameEvent { .. } => "GAME_EVENT",
            Self::TournamentCreate { .. } => "TOURNAMENT_CREATE",
            Self::TournamentJoinWithCode { .. } => "TOURNAMENT_JOIN_WITH_CODE",
            Self::TournamentStart { .. } => "TOURNAMENT_START",
            Self::TournamentLeave { .. } => "TOURNAMENT_LEAVE",
            Self::TournamentLeaveWaitingRoom { .. } => "TOURNAMENT_LEAVE_WAITING_ROOM",
            Self::TournamentTerminate { .. } => "TOURNAMENT_TERMINATE",
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
    fn client_tag_matches_serialized_type() {
        let msg = ClientMessage::TournamentLeaveWaitingRoom {
            user_id: 3,
            code: "ab12".into(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], msg.tag());
        assert_eq!(value["userId"], 3);
    }

    #[test]
    fn zero_player_ids_decode_as_none() {
        let m: BracketMatch =
            serde_json::from_str(r#"{"player1id":0,"player2id":7,"isFinished":false}"#).unwrap();
        assert_eq!(m.player1, None);
        assert_eq!(m.player2, Some(7));
        assert!(m.has_players() && m.involves(7));
    }

    #[test]
    fn null_online_users_decode_as_empty() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"type":"ONLINE_USERS","usersOnline":null}"#).unwrap();
        assert_eq!(
            msg,
            ServerMessage::OnlineUsers {
                users_online: vec![]
            }
        );
    }

    #[test]
    fn key_input_uses_upper_case() {
        assert_eq!(serde_json::to_string(&KeyInput::Space).unwrap(), "\"SPACE\"");
    }
}
