//! Connection manager tests.
//!
//! Uses the scripted `MockTransport`/`MockConnector` from `tests/common` to
//! drive `PongClient` through connect, dispatch, send and disconnect.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use pong_realtime_client::lobby::LobbyPhase;
use pong_realtime_client::protocol::{ClientMessage, KeyInput, ServerMessage};
use pong_realtime_client::{
    ClientConfig, ClientEvent, ConnectionState, Deployment, MessageKind, PongClient,
    RealtimeError, ReconnectPolicy, Subscription,
};
use tokio::sync::mpsc;

use common::{
    batch, chat, lobby_created, new_connection, online_users, user_disconnected, MockConnector,
    MockTransport,
};

const ME: u64 = 1;

fn config() -> ClientConfig {
    ClientConfig::new(Deployment::default()).with_shutdown_timeout(Duration::from_millis(200))
}

/// Receive events until `pred` matches or the timeout elapses.
async fn wait_for(
    rx: &mut mpsc::Receiver<ClientEvent>,
    pred: impl Fn(&ClientEvent) -> bool,
) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let ev = rx.recv().await.expect("event channel closed");
            if pred(&ev) {
                return ev;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Poll until the transport has recorded `n` outbound messages.
async fn wait_sent(sent: &std::sync::Mutex<Vec<String>>, n: usize) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while sent.lock().unwrap().len() < n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for outbound messages");
}

fn sent_messages(sent: &std::sync::Mutex<Vec<String>>) -> Vec<ClientMessage> {
    sent.lock()
        .unwrap()
        .iter()
        .map(|json| serde_json::from_str(json).unwrap())
        .collect()
}

// ── Lifecycle ───────────────────────────────────────────────────────

#[tokio::test]
async fn connect_uses_identity_url_and_emits_connected() {
    let (transport, _sent, _closed) = MockTransport::new(vec![]);
    let connector = MockConnector::new([transport]);
    let urls = connector.urls.clone();
    let mut client = PongClient::new(connector, config());
    let mut events = client.subscribe(Subscription::Lifecycle);

    client.connect(ME).await.unwrap();

    assert_eq!(urls.lock().unwrap().as_slice(), ["ws://localhost:4001/ws?id=1"]);
    assert_eq!(
        events.recv().await,
        Some(ClientEvent::Connected { identity: ME })
    );
    assert!(client.is_connected());
    assert_eq!(client.identity(), Some(ME));
    client.disconnect().await;
}

#[tokio::test]
async fn failed_connect_leaves_client_closed() {
    let mut client = PongClient::new(MockConnector::default(), config());
    let err = client.connect(ME).await.unwrap_err();
    assert!(matches!(err, RealtimeError::Io(_)));
    assert_eq!(client.connection_state(), ConnectionState::Closed);
    assert!(!client.is_connected());
}

#[tokio::test]
async fn disconnect_closes_transport_and_is_idempotent() {
    let (transport, _sent, closed) = MockTransport::new(vec![]);
    let mut client = PongClient::new(MockConnector::new([transport]), config());
    let mut events = client.subscribe(Subscription::Lifecycle);
    client.connect(ME).await.unwrap();

    client.disconnect().await;
    client.disconnect().await;

    assert!(closed.load(Ordering::Relaxed));
    assert!(!client.is_connected());
    wait_for(&mut events, |e| {
        matches!(e, ClientEvent::Disconnected { reason: Some(_) })
    })
    .await;
}

#[tokio::test]
async fn server_close_without_policy_stays_closed() {
    let (transport, _sent, _closed) = MockTransport::new(vec![None]);
    let connector = MockConnector::new([transport]);
    let urls = connector.urls.clone();
    let mut client = PongClient::new(connector, config());
    let mut events = client.subscribe(Subscription::Lifecycle);
    client.connect(ME).await.unwrap();

    let ev = wait_for(&mut events, |e| matches!(e, ClientEvent::Disconnected { .. })).await;
    assert_eq!(ev, ClientEvent::Disconnected { reason: None });
    assert!(!client.is_connected());
    assert_eq!(urls.lock().unwrap().len(), 1);

    assert!(matches!(
        client.send_chat(2, "anyone?"),
        Err(RealtimeError::NotConnected)
    ));
}

#[tokio::test]
async fn reconnect_policy_reopens_socket() {
    let (first, _s1, _c1) = MockTransport::new(vec![Some(Err(RealtimeError::TransportReceive(
        "reset by peer".into(),
    )))]);
    let (second, _s2, _c2) = MockTransport::with_frames([online_users(&[4])]);
    let connector = MockConnector::new([first, second]);
    let urls = connector.urls.clone();
    let policy = ReconnectPolicy::ExponentialBackoff {
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        max_attempts: 3,
        jitter: 0.0,
    };
    let mut client = PongClient::new(connector, config().with_reconnect(policy));
    let mut events = client.subscribe(Subscription::All);
    client.connect(ME).await.unwrap();

    wait_for(&mut events, |e| matches!(e, ClientEvent::Reconnecting { attempt: 1, .. })).await;
    wait_for(&mut events, |e| matches!(e, ClientEvent::Connected { .. })).await;
    wait_for(&mut events, |e| {
        matches!(e, ClientEvent::Message(ServerMessage::OnlineUsers { .. }))
    })
    .await;

    assert!(client.is_connected());
    assert!(client.is_online(4));
    assert_eq!(urls.lock().unwrap().len(), 2);
    client.disconnect().await;
}

#[tokio::test]
async fn reconnect_gives_up_after_max_attempts() {
    let (first, _s, _c) = MockTransport::new(vec![None]);
    let connector = MockConnector::new([first]);
    let urls = connector.urls.clone();
    let policy = ReconnectPolicy::ExponentialBackoff {
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
        max_attempts: 2,
        jitter: 0.0,
    };
    let mut client = PongClient::new(connector, config().with_reconnect(policy));
    let mut events = client.subscribe(Subscription::Lifecycle);
    client.connect(ME).await.unwrap();

    wait_for(&mut events, |e| matches!(e, ClientEvent::Reconnecting { attempt: 2, .. })).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(client.connection_state(), ConnectionState::Closed);
    assert_eq!(urls.lock().unwrap().len(), 3);
}

// ── Inbound ─────────────────────────────────────────────────────────

#[tokio::test]
async fn batched_frame_updates_presence() {
    let frame = batch(&[online_users(&[1, 2, 3]), new_connection(4), user_disconnected(2)]);
    let (transport, _sent, _closed) = MockTransport::with_frames([frame]);
    let mut client = PongClient::new(MockConnector::new([transport]), config());
    let mut events = client.subscribe(Subscription::Kind(MessageKind::UserDisconnected));
    client.connect(ME).await.unwrap();

    wait_for(&mut events, |_| true).await;
    assert_eq!(client.online_users(), vec![1, 3, 4]);
    client.disconnect().await;
}

#[tokio::test]
async fn unknown_type_leaves_connection_untouched() {
    let frame = batch(&[r#"{"type":"FOO"}"#.to_owned(), new_connection(9)]);
    let (transport, _sent, _closed) = MockTransport::with_frames([frame]);
    let mut client = PongClient::new(MockConnector::new([transport]), config());
    let mut events = client.subscribe(Subscription::All);
    client.connect(ME).await.unwrap();

    wait_for(&mut events, |e| {
        matches!(e, ClientEvent::Message(ServerMessage::NewConnection { user: 9 }))
    })
    .await;
    assert!(client.is_connected());
    client.disconnect().await;
}

#[tokio::test]
async fn unread_counter_follows_chat_traffic() {
    let (transport, _sent, _closed) =
        MockTransport::with_frames([batch(&[chat(2, ME, "a"), chat(2, ME, "b")])]);
    let mut client = PongClient::new(MockConnector::new([transport]), config());
    let mut events = client.subscribe(Subscription::State);
    client.connect(ME).await.unwrap();

    wait_for(&mut events, |e| {
        matches!(e, ClientEvent::UnreadChanged { friend: 2, count: 2 })
    })
    .await;
    assert_eq!(client.unread_count_for(2), 2);
    assert_eq!(client.total_unread(), 2);

    client.select_conversation(Some(2));
    assert_eq!(client.unread_count_for(2), 0);
    let ev = wait_for(&mut events, |_| true).await;
    assert_eq!(ev, ClientEvent::UnreadChanged { friend: 2, count: 0 });

    client.toggle_conversation(2);
    assert_eq!(client.selected_conversation(), None);
    client.disconnect().await;
}

// ── Outbound ────────────────────────────────────────────────────────

#[tokio::test]
async fn lobby_actions_produce_envelopes() {
    let (transport, sent, _closed) = MockTransport::with_frames([lobby_created(ME, 2)]);
    let mut client = PongClient::new(MockConnector::new([transport]), config());
    let mut events = client.subscribe(Subscription::Kind(MessageKind::LobbyCreated));
    client.connect(ME).await.unwrap();
    wait_for(&mut events, |_| true).await;

    assert!(matches!(client.lobby_phase(), LobbyPhase::Active(_)));
    client.set_ready(true).unwrap();
    client.toggle_special_mode(true).unwrap();
    client.leave_lobby().unwrap();
    assert_eq!(client.lobby_phase(), LobbyPhase::Idle);
    assert!(matches!(
        client.press_key(KeyInput::Up),
        Err(RealtimeError::NoActiveMatch)
    ));

    wait_sent(&sent, 3).await;
    client.disconnect().await;
    let tags: Vec<_> = sent_messages(&sent).iter().map(|m| m.tag()).collect();
    assert_eq!(
        tags,
        [
            "LOBBY_PLAYER_READY_STATUS",
            "LOBBY_SPECIAL_MODE_TOGGLED",
            "LOBBY_TERMINATE"
        ]
    );
}

#[tokio::test]
async fn unechoed_invitation_is_withdrawn_locally() {
    let (transport, sent, _closed) = MockTransport::new(vec![]);
    let mut client = PongClient::new(MockConnector::new([transport]), config());
    client.connect(ME).await.unwrap();

    client.invite_friend(2).unwrap();
    client.leave_lobby().unwrap();
    assert_eq!(client.lobby_phase(), LobbyPhase::Idle);
    client.invite_friend(3).unwrap();

    wait_sent(&sent, 2).await;
    client.disconnect().await;
    let tags: Vec<_> = sent_messages(&sent).iter().map(|m| m.tag()).collect();
    assert_eq!(
        tags,
        ["LOBBY_INVITATION_TO_FRIEND", "LOBBY_INVITATION_TO_FRIEND"]
    );
}

#[tokio::test]
async fn reconnecting_same_identity_frees_pending_lobby() {
    let (first, _s1, _c1) = MockTransport::with_frames([online_users(&[2])]);
    let (second, _s2, _c2) = MockTransport::new(vec![]);
    let mut client = PongClient::new(MockConnector::new([first, second]), config());
    let mut events = client.subscribe(Subscription::Kind(MessageKind::OnlineUsers));
    client.connect(ME).await.unwrap();
    wait_for(&mut events, |_| true).await;

    client.invite_friend(2).unwrap();
    assert!(matches!(
        client.lobby_phase(),
        LobbyPhase::InvitationSent { friend: 2, .. }
    ));

    client.connect(ME).await.unwrap();
    assert_eq!(client.lobby_phase(), LobbyPhase::Idle);
    assert!(client.is_online(2));
    client.invite_friend(2).unwrap();
    client.disconnect().await;
}

#[tokio::test]
async fn tournament_create_and_join_are_sent() {
    let (transport, sent, _closed) = MockTransport::new(vec![]);
    let mut client = PongClient::new(MockConnector::new([transport]), config());
    client.connect(ME).await.unwrap();

    client.create_tournament().unwrap();
    client.join_tournament("ab12").unwrap();
    assert!(matches!(
        client.start_tournament(),
        Err(RealtimeError::InvalidTransition { .. })
    ));
    wait_sent(&sent, 2).await;
    client.disconnect().await;

    let messages = sent_messages(&sent);
    assert_eq!(
        messages,
        vec![
            ClientMessage::TournamentCreate { user_id: ME },
            ClientMessage::TournamentJoinWithCode {
                user_id: ME,
                code: "ab12".into()
            },
        ]
    );
}

#[tokio::test]
async fn switching_identity_drops_previous_state() {
    let (first, _s1, _c1) = MockTransport::with_frames([online_users(&[5, 6])]);
    let (second, _s2, _c2) = MockTransport::new(vec![]);
    let mut client = PongClient::new(MockConnector::new([first, second]), config());
    let mut events = client.subscribe(Subscription::Kind(MessageKind::OnlineUsers));

    client.connect(ME).await.unwrap();
    wait_for(&mut events, |_| true).await;
    assert!(client.is_online(5));

    client.connect(2).await.unwrap();
    assert_eq!(client.identity(), Some(2));
    assert!(!client.is_online(5));
    client.disconnect().await;
}
