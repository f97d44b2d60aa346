//! Frame handling and state machine behaviour driven through [`SyncEngine`].
//!
//! Every test feeds raw server frames, exactly as they come off the socket,
//! and inspects the injected context afterwards.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

mod common;

use std::io::Write;
use std::sync::{Arc, Mutex};

use pong_realtime_client::dispatch::Command;
use pong_realtime_client::lobby::LobbyPhase;
use pong_realtime_client::protocol::{BoostState, Score, ServerMessage};
use pong_realtime_client::session::DocumentOutcome;
use pong_realtime_client::tournament::TournamentPhase;
use pong_realtime_client::{ClientEvent, MessageKind, SyncEngine};

use common::{
    batch, chat, game_event, lobby_created, lobby_destroyed, lobby_player_status, new_connection,
    online_users, user_disconnected,
};

const ME: u64 = 1;

fn emitted(commands: &[Command]) -> Vec<ClientEvent> {
    commands
        .iter()
        .filter_map(|c| match c {
            Command::Emit(event) => Some(event.clone()),
            Command::Send(_) => None,
        })
        .collect()
}

// ── Frames ──────────────────────────────────────────────────────────

#[test]
fn every_document_of_a_frame_gets_one_dispatch_attempt_in_order() {
    let mut engine = SyncEngine::new(ME);
    let frame = batch(&[
        new_connection(5),
        r#"{"type":"CHAT","data":"#.to_owned(),
        r#"{"type":"FOO"}"#.to_owned(),
        r#"{"type":"NEW_CONNECTION","user":"x"}"#.to_owned(),
        user_disconnected(5),
    ]);

    let report = engine.handle_frame(&frame);
    assert_eq!(report.documents.len(), 5);
    assert!(matches!(
        report.documents[0],
        DocumentOutcome::Dispatched(MessageKind::NewConnection)
    ));
    assert!(matches!(report.documents[1], DocumentOutcome::Malformed(_)));
    assert!(matches!(
        &report.documents[2],
        DocumentOutcome::Unhandled { tag } if tag == "FOO"
    ));
    assert!(matches!(report.documents[3], DocumentOutcome::Malformed(_)));
    assert!(matches!(
        report.documents[4],
        DocumentOutcome::Dispatched(MessageKind::UserDisconnected)
    ));
    assert!(!engine.context().presence.is_online(5));
}

#[test]
fn dispatched_messages_are_republished_in_arrival_order() {
    let mut engine = SyncEngine::new(ME);
    let report = engine.handle_frame(&batch(&[new_connection(2), new_connection(3)]));
    assert_eq!(
        emitted(&report.commands),
        vec![
            ClientEvent::Message(ServerMessage::NewConnection { user: 2 }),
            ClientEvent::Message(ServerMessage::NewConnection { user: 3 }),
        ]
    );
}

// ── Presence ────────────────────────────────────────────────────────

#[test]
fn presence_end_to_end() {
    let mut engine = SyncEngine::new(ME);
    engine.handle_frame(&online_users(&[1, 2, 3]));
    engine.handle_frame(&new_connection(4));
    engine.handle_frame(&user_disconnected(2));
    assert_eq!(engine.context().presence.snapshot(), vec![1, 3, 4]);
}

#[test]
fn presence_mutations_are_idempotent() {
    let mut engine = SyncEngine::new(ME);
    engine.handle_frame(&batch(&[new_connection(4), new_connection(4)]));
    engine.handle_frame(&user_disconnected(9));
    assert_eq!(engine.context().presence.snapshot(), vec![4]);
}

#[test]
fn null_online_list_empties_presence() {
    let mut engine = SyncEngine::new(ME);
    engine.handle_frame(&online_users(&[2, 3]));
    engine.handle_frame(r#"{"type":"ONLINE_USERS","usersOnline":null}"#);
    assert!(engine.context().presence.is_empty());
}

// ── Chat ────────────────────────────────────────────────────────────

#[test]
fn unread_counts_skip_selected_conversation() {
    let mut engine = SyncEngine::new(ME);
    engine.context_mut().chat.select_conversation(Some(2));

    for _ in 0..3 {
        engine.handle_frame(&chat(2, ME, "in view"));
        engine.handle_frame(&chat(3, ME, "elsewhere"));
    }
    engine.handle_frame(&chat(ME, 3, "my own echo"));

    let chat = &engine.context().chat;
    assert_eq!(chat.unread_count_for(2), 0);
    assert_eq!(chat.unread_count_for(3), 3);
    assert_eq!(chat.total_unread(), 3);
}

#[test]
fn unread_change_is_published() {
    let mut engine = SyncEngine::new(ME);
    let report = engine.handle_frame(&chat(7, ME, "hi"));
    assert!(emitted(&report.commands).contains(&ClientEvent::UnreadChanged {
        friend: 7,
        count: 1
    }));
}

// ── Lobby ───────────────────────────────────────────────────────────

#[test]
fn lobby_reaches_both_ready_then_destroyed_clears_it() {
    let mut engine = SyncEngine::new(ME);
    engine.handle_frame(&lobby_created(ME, 2));
    assert!(matches!(
        engine.context().lobby.phase(),
        LobbyPhase::Active(_)
    ));

    engine.handle_frame(&lobby_player_status((ME, true), (2, false)));
    let report = engine.handle_frame(&lobby_player_status((ME, true), (2, true)));
    let session = engine.context().lobby.session().unwrap();
    assert!(session.both_ready());
    assert!(emitted(&report.commands)
        .iter()
        .any(|e| matches!(e, ClientEvent::LobbyBothReady { .. })));

    engine.handle_frame(r#"{"type":"LOBBY_PREGAME_REMAINING_TIME","remainingSecondsToStart":3}"#);
    assert_eq!(
        engine.context().lobby.session().unwrap().pregame_remaining,
        Some(3)
    );

    engine.handle_frame(&lobby_destroyed());
    assert_eq!(engine.context().lobby.phase(), &LobbyPhase::Idle);
}

#[test]
fn both_ready_reaches_the_player_who_readies_second() {
    let mut engine = SyncEngine::new(ME);
    engine.handle_frame(&lobby_created(ME, 2));
    engine.handle_frame(&lobby_player_status((ME, false), (2, true)));

    engine.context_mut().lobby.set_ready(true).unwrap();
    let report = engine.handle_frame(&lobby_player_status((ME, true), (2, true)));
    let both_ready: Vec<_> = emitted(&report.commands)
        .into_iter()
        .filter(|e| matches!(e, ClientEvent::LobbyBothReady { .. }))
        .collect();
    assert_eq!(both_ready.len(), 1);

    let report = engine.handle_frame(&lobby_player_status((ME, true), (2, true)));
    assert!(!emitted(&report.commands)
        .iter()
        .any(|e| matches!(e, ClientEvent::LobbyBothReady { .. })));
}

#[test]
fn invitation_from_friend_then_deny() {
    let mut engine = SyncEngine::new(ME);
    engine.handle_frame(&format!(
        r#"{{"type":"LOBBY_INVITATION_FROM_FRIEND","userId":2,"sender":{{"id":2,"isReady":false}},"receiver":{{"id":1,"isReady":false}},"lobbyId":"{}"}}"#,
        common::LOBBY
    ));
    assert!(matches!(
        engine.context().lobby.phase(),
        LobbyPhase::InvitationReceived { from: 2, .. }
    ));
    let msg = engine.context_mut().lobby.deny().unwrap();
    assert_eq!(msg.tag(), "LOBBY_DENY_FROM_FRIEND");
    assert_eq!(engine.context().lobby.phase(), &LobbyPhase::Idle);
}

// ── Tournament ──────────────────────────────────────────────────────

fn tree_state(code: &str, semi1_score: (u32, u32)) -> String {
    serde_json::json!({
        "type": "TOURNAMENT_TREE_STATE",
        "code": code,
        "semi1": { "player1id": 1, "player2id": 2,
                   "score": { "player1": semi1_score.0, "player2": semi1_score.1 },
                   "isFinished": false, "winner": 0 },
        "semi2": { "player1id": 3, "player2id": 4,
                   "score": { "player1": 0, "player2": 0 },
                   "isFinished": false, "winner": 0 },
        "final": { "player1id": 0, "player2id": 0,
                   "score": { "player1": 0, "player2": 0 },
                   "isFinished": false, "winner": 0 }
    })
    .to_string()
}

#[test]
fn tree_state_keeps_only_latest_snapshot() {
    let mut engine = SyncEngine::new(ME);
    engine.handle_frame(r#"{"type":"TOURNAMENT_CREATE","code":"ab12","userId":1,"player1id":1}"#);
    engine.handle_frame(
        r#"{"type":"TOURNAMENT_START","code":"ab12","player1id":1,"player2id":2,"player3id":3,"player4id":4}"#,
    );
    engine.handle_frame(&tree_state("ab12", (3, 1)));
    engine.handle_frame(&tree_state("ab12", (0, 2)));

    let bracket = engine.context().tournament.bracket().unwrap();
    assert_eq!(
        bracket.semi1.score,
        Score {
            player1: 0,
            player2: 2
        }
    );
    assert_eq!(engine.context().tournament.phase(), TournamentPhase::InProgress);
}

#[test]
fn guest_joining_with_short_code_receives_bracket() {
    const FULL: &str = "abcd1234-5678-4abc-9def-0123456789ab";
    let mut guest = SyncEngine::new(2);
    guest.handle_frame(r#"{"type":"TOURNAMENT_JOIN_WITH_CODE","code":"abcd1234","userId":2}"#);
    assert_eq!(guest.context().tournament.phase(), TournamentPhase::WaitingRoom);

    guest.handle_frame(&format!(
        r#"{{"type":"TOURNAMENT_EVENT","code":"{FULL}","player1id":1,"player2id":2,"player3id":3,"player4id":4}}"#
    ));
    assert_eq!(guest.context().tournament.phase(), TournamentPhase::Populated);
    assert_eq!(
        guest.context().tournament.players(),
        &[Some(1), Some(2), Some(3), Some(4)]
    );

    guest.handle_frame(&format!(
        r#"{{"type":"TOURNAMENT_START","code":"{FULL}","player1id":1,"player2id":2,"player3id":3,"player4id":4}}"#
    ));
    guest.handle_frame(&tree_state(FULL, (1, 0)));
    let tournament = &guest.context().tournament;
    assert_eq!(tournament.phase(), TournamentPhase::InProgress);
    assert_eq!(tournament.bracket().unwrap().code, FULL);

    let msg = guest.context_mut().tournament.leave().unwrap();
    assert_eq!(msg.tag(), "TOURNAMENT_LEAVE");
}

#[test]
fn tournament_phase_changes_are_published() {
    let mut engine = SyncEngine::new(ME);
    let report = engine
        .handle_frame(r#"{"type":"TOURNAMENT_CREATE","code":"ab12","userId":1,"player1id":1}"#);
    assert!(emitted(&report.commands).contains(&ClientEvent::BracketPhaseChanged {
        phase: TournamentPhase::WaitingRoom
    }));

    let report = engine.handle_frame(r#"{"type":"TOURNAMENT_ERROR","error":"Tournament is full"}"#);
    assert!(emitted(&report.commands).contains(&ClientEvent::BracketPhaseChanged {
        phase: TournamentPhase::Error
    }));
}

// ── Match ───────────────────────────────────────────────────────────

#[test]
fn game_events_replace_state_wholesale() {
    let mut engine = SyncEngine::new(ME);
    engine.handle_frame(&lobby_created(ME, 2));
    engine.handle_frame(&format!(
        r#"{{"type":"GAME_START","lobbyId":"{}","isTournamentGame":false}}"#,
        common::LOBBY
    ));
    engine.handle_frame(&game_event((1, 0)));
    engine.handle_frame(&game_event((1, 2)));

    let game = &engine.context().game;
    let state = game.state().unwrap();
    assert_eq!(
        state.score,
        Score {
            player1: 1,
            player2: 2
        }
    );
    assert!(state.player2_boost.ready);
    assert_eq!(game.local_side(), Some(1));
}

#[test]
fn boost_activation_consumes_readiness() {
    let mut boost = BoostState::default();
    for _ in 0..pong_realtime_client::protocol::BOOST_HIT_THRESHOLD {
        boost.register_hit(pong_realtime_client::protocol::BOOST_HIT_THRESHOLD);
    }
    assert!(boost.ready);
    assert!(boost.activate());
    assert!(boost.active);
    assert!(!boost.ready);
    assert_eq!(boost.hit_counter, 0);
}

#[test]
fn standalone_match_end_returns_lobby_to_idle() {
    let mut engine = SyncEngine::new(ME);
    engine.handle_frame(&lobby_created(ME, 2));
    engine.handle_frame(&format!(
        r#"{{"type":"GAME_START","lobbyId":"{}"}}"#,
        common::LOBBY
    ));
    engine.handle_frame(&format!(
        r#"{{"type":"GAME_FINISHED","lobbyId":"{}","isTournamentGame":false,"state":{{"ball":{{"x":0,"y":0}},"score":{{"player1":5,"player2":3}},"winner":1}}}}"#,
        common::LOBBY
    ));
    let ctx = engine.context();
    assert_eq!(ctx.lobby.phase(), &LobbyPhase::Idle);
    assert_eq!(ctx.game.result().unwrap().winner, Some(ME));
    assert!(!ctx.game.is_playing());
}

// ── Unknown types ───────────────────────────────────────────────────

#[derive(Clone)]
struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

impl Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn unknown_type_logs_one_warning_and_changes_nothing() {
    let buf = Arc::new(Mutex::new(Vec::new()));
    let writer = CaptureWriter(Arc::clone(&buf));
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::WARN)
        .finish();

    let mut engine = SyncEngine::new(ME);
    engine.handle_frame(&online_users(&[2]));
    let before = format!("{:?}", engine.context());

    let report = tracing::subscriber::with_default(subscriber, || {
        engine.handle_frame(r#"{"type":"FOO","user":3}"#)
    });

    assert_eq!(report.dispatched(), 0);
    assert!(report.commands.is_empty());
    assert_eq!(format!("{:?}", engine.context()), before);

    let logs = String::from_utf8(buf.lock().unwrap().clone()).unwrap();
    let warnings: Vec<_> = logs.lines().filter(|l| l.contains("WARN")).collect();
    assert_eq!(warnings.len(), 1, "{logs}");
    assert!(warnings[0].contains("FOO"));
}
