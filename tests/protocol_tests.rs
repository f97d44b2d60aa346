#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Wire-format tests for the realtime protocol.
//!
//! Inbound fixtures are shaped like real server output; outbound checks pin the
//! exact field names the server expects.

use pong_realtime_client::frame::{decode_document, DecodeError, Inbound};
use pong_realtime_client::protocol::{
    BracketMatch, ClientMessage, GameState, KeyInput, LobbyUserState, Score, ServerMessage,
};
use pong_realtime_client::MessageKind;
use serde_json::json;
use uuid::Uuid;

const LOBBY: &str = "6f1c2a7e-3b7d-4c8e-9d43-0f2b9a6c1d55";

fn lobby() -> Uuid {
    Uuid::parse_str(LOBBY).unwrap()
}

fn decode(value: serde_json::Value) -> ServerMessage {
    match decode_document(&value.to_string()) {
        Ok(Inbound::Message(msg)) => msg,
        other => panic!("expected a known message, got {other:?}"),
    }
}

// ════════════════════════════════════════════════════════════════════
// Inbound
// ════════════════════════════════════════════════════════════════════

#[test]
fn every_known_tag_maps_back_to_its_kind() {
    for kind in MessageKind::ALL {
        assert_eq!(MessageKind::from_tag(kind.as_str()), Some(kind));
    }
    assert_eq!(MessageKind::from_tag("FOO"), None);
}

#[test]
fn chat_accepts_both_id_spellings() {
    let camel = decode(json!({"type":"CHAT","data":"hi","senderId":2,"receiverId":1}));
    let upper = decode(json!({"type":"CHAT","data":"hi","senderID":2,"receiverID":1}));
    assert_eq!(camel, upper);
    assert_eq!(camel.kind(), MessageKind::Chat);
}

#[test]
fn invitation_from_friend_fixture() {
    let msg = decode(json!({
        "type": "LOBBY_INVITATION_FROM_FRIEND",
        "userId": 2,
        "sender": {"id": 2, "isReady": false},
        "receiver": {"id": 1, "isReady": false},
        "lobbyId": LOBBY
    }));
    assert_eq!(
        msg,
        ServerMessage::LobbyInvitationFromFriend {
            user_id: 2,
            sender: LobbyUserState::waiting(2),
            receiver: LobbyUserState::waiting(1),
            lobby_id: Some(lobby()),
        }
    );
}

#[test]
fn pregame_countdown_fixture() {
    let msg = decode(json!({
        "type": "LOBBY_PREGAME_REMAINING_TIME",
        "remainingSecondsToStart": 3,
        "lobbyId": LOBBY
    }));
    assert_eq!(
        msg,
        ServerMessage::LobbyPregameRemainingTime {
            remaining_seconds_to_start: 3,
            lobby_id: Some(lobby()),
        }
    );
}

#[test]
fn game_event_state_fixture() {
    let msg = decode(json!({
        "type": "GAME_EVENT",
        "lobbyId": LOBBY,
        "player1id": 1,
        "player2id": 2,
        "state": {
            "ball": {"x": 12.5, "y": 40.0},
            "paddle": {
                "width": 10, "height": 80,
                "player1Y": 100, "player2Y": 120,
                "player1Direction": -1, "player2Direction": 0
            },
            "score": {"player1": 3, "player2": 1},
            "isActive": true,
            "winner": 0,
            "player1boost": {"ballhit": 3, "boostready": true, "isboostactive": false},
            "remainingTime": 75
        }
    }));
    let ServerMessage::GameEvent {
        lobby_id,
        state: Some(state),
        player1,
        player2,
        is_tournament_game,
    } = msg
    else {
        panic!("expected GAME_EVENT with state");
    };
    assert_eq!(lobby_id, lobby());
    assert_eq!((player1, player2), (Some(1), Some(2)));
    assert!(!is_tournament_game);
    assert_eq!(state.score, Score { player1: 3, player2: 1 });
    assert_eq!(state.winner, None);
    assert_eq!(state.paddle.unwrap().player1_y_direction, -1);
    assert!(state.player1_boost.ready);
    assert_eq!(state.player2_boost.hit_counter, 0);
    assert_eq!(state.remaining_time, 75);
}

#[test]
fn tree_state_fixture_treats_zero_as_empty_seat() {
    let msg = decode(json!({
        "type": "TOURNAMENT_TREE_STATE",
        "code": "ab12",
        "semi1": {
            "player1id": 1, "player2id": 2,
            "score": {"player1": 5, "player2": 2},
            "isFinished": true, "winner": 1,
            "lobbyId": LOBBY
        },
        "semi2": {"player1id": 3, "player2id": 4, "isFinished": false, "winner": 0},
        "final": {"player1id": 1, "player2id": 0, "isFinished": false, "winner": 0}
    }));
    let ServerMessage::TournamentTreeState {
        code,
        semi1,
        semi2,
        final_match,
    } = msg
    else {
        panic!("expected TOURNAMENT_TREE_STATE");
    };
    assert_eq!(code, "ab12");
    assert_eq!(semi1.winner, Some(1));
    assert_eq!(semi1.lobby_id, Some(lobby()));
    assert_eq!(semi2.winner, None);
    assert_eq!(
        final_match,
        BracketMatch {
            player1: Some(1),
            ..BracketMatch::default()
        }
    );
}

#[test]
fn tournament_error_without_code() {
    let msg = decode(json!({"type": "TOURNAMENT_ERROR", "error": "Tournament not found"}));
    assert_eq!(
        msg,
        ServerMessage::TournamentError {
            code: None,
            error: "Tournament not found".into(),
        }
    );
}

#[test]
fn negative_timer_is_kept_for_the_state_machine() {
    let msg = decode(json!({"type": "TOURNAMENT_TIMER", "code": "ab12", "remainingTime": -1}));
    assert_eq!(
        msg,
        ServerMessage::TournamentTimer {
            code: "ab12".into(),
            remaining_time: -1,
        }
    );
}

#[test]
fn unknown_tag_and_bad_payload_are_distinguished() {
    assert!(matches!(
        decode_document(r#"{"type":"FOO","x":1}"#),
        Ok(Inbound::Unknown { ref tag }) if tag == "FOO"
    ));
    assert!(matches!(
        decode_document(r#"{"type":"LOBBY_CREATED","lobbyId":"not-a-uuid"}"#),
        Err(DecodeError::InvalidPayload {
            tag: "LOBBY_CREATED",
            ..
        })
    ));
    assert!(matches!(
        decode_document(r#"{"type":7}"#),
        Err(DecodeError::MissingType)
    ));
    assert!(matches!(
        decode_document("not json"),
        Err(DecodeError::NotJson(_))
    ));
}

// ════════════════════════════════════════════════════════════════════
// Outbound
// ════════════════════════════════════════════════════════════════════

#[test]
fn chat_serializes_with_camel_case_ids() {
    let value = serde_json::to_value(ClientMessage::Chat {
        data: "gg".into(),
        sender_id: 1,
        receiver_id: 2,
    })
    .unwrap();
    assert_eq!(
        value,
        json!({"type": "CHAT", "data": "gg", "senderId": 1, "receiverId": 2})
    );
}

#[test]
fn invitation_carries_both_lobby_users() {
    let value = serde_json::to_value(ClientMessage::LobbyInvitationToFriend {
        user_id: 1,
        sender: LobbyUserState::waiting(1),
        receiver: LobbyUserState::waiting(2),
    })
    .unwrap();
    assert_eq!(
        value,
        json!({
            "type": "LOBBY_INVITATION_TO_FRIEND",
            "userId": 1,
            "sender": {"id": 1, "isReady": false},
            "receiver": {"id": 2, "isReady": false}
        })
    );
}

#[test]
fn key_input_envelope() {
    let value = serde_json::to_value(ClientMessage::GameEvent {
        lobby_id: lobby(),
        user_id: 1,
        key_pressed: KeyInput::Space,
    })
    .unwrap();
    assert_eq!(
        value,
        json!({"type": "GAME_EVENT", "lobbyId": LOBBY, "userId": 1, "keyPressed": "SPACE"})
    );
}

#[test]
fn tournament_requests_carry_user_and_code() {
    for msg in [
        ClientMessage::TournamentJoinWithCode {
            user_id: 4,
            code: "ab12".into(),
        },
        ClientMessage::TournamentStart {
            user_id: 4,
            code: "ab12".into(),
        },
        ClientMessage::TournamentLeave {
            user_id: 4,
            code: "ab12".into(),
        },
        ClientMessage::TournamentTerminate {
            user_id: 4,
            code: "ab12".into(),
        },
    ] {
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], msg.tag());
        assert_eq!(value["userId"], 4);
        assert_eq!(value["code"], "ab12");
    }
}

#[test]
fn game_state_winner_serializes_zero_when_unset() {
    let state: GameState = serde_json::from_value(json!({
        "ball": {"x": 0, "y": 0},
        "score": {"player1": 0, "player2": 0}
    }))
    .unwrap();
    let value = serde_json::to_value(&state).unwrap();
    assert_eq!(value["winner"], 0);
    assert_eq!(value["player1boost"]["boostReady"], false);
}
