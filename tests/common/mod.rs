#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for the integration tests.
//!
//! Provides a scripted [`MockTransport`], a [`MockConnector`] that hands out
//! prepared transports, and helpers that build server frames the way the
//! realtime server writes them.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use pong_realtime_client::{Connector, RealtimeError, Transport};

// ── MockTransport ───────────────────────────────────────────────────

/// Scripted server side of one socket.
///
/// `recv()` yields the scripted items in order, then hangs until the client
/// shuts the connection down. Everything the client sends is recorded.
pub struct MockTransport {
    incoming: VecDeque<Option<Result<String, RealtimeError>>>,
    pub sent: Arc<StdMutex<Vec<String>>>,
    pub closed: Arc<AtomicBool>,
}

impl MockTransport {
    pub fn new(
        incoming: Vec<Option<Result<String, RealtimeError>>>,
    ) -> (Self, Arc<StdMutex<Vec<String>>>, Arc<AtomicBool>) {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let transport = Self {
            incoming: VecDeque::from(incoming),
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        };
        (transport, sent, closed)
    }

    /// A transport that delivers `frames` and then stays open.
    pub fn with_frames(
        frames: impl IntoIterator<Item = String>,
    ) -> (Self, Arc<StdMutex<Vec<String>>>, Arc<AtomicBool>) {
        Self::new(frames.into_iter().map(|f| Some(Ok(f))).collect())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), RealtimeError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, RealtimeError>> {
        if let Some(item) = self.incoming.pop_front() {
            item
        } else {
            std::future::pending().await
        }
    }

    async fn close(&mut self) -> Result<(), RealtimeError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

// ── MockConnector ───────────────────────────────────────────────────

/// Hands out prepared transports in order; fails once they run out.
#[derive(Clone, Default)]
pub struct MockConnector {
    transports: Arc<StdMutex<VecDeque<MockTransport>>>,
    pub urls: Arc<StdMutex<Vec<String>>>,
}

impl MockConnector {
    pub fn new(transports: impl IntoIterator<Item = MockTransport>) -> Self {
        Self {
            transports: Arc::new(StdMutex::new(transports.into_iter().collect())),
            urls: Arc::default(),
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn connect(&self, url: &str) -> Result<MockTransport, RealtimeError> {
        self.urls.lock().unwrap().push(url.to_owned());
        self.transports.lock().unwrap().pop_front().ok_or_else(|| {
            RealtimeError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "no scripted transport left",
            ))
        })
    }
}

// ── Server frames ───────────────────────────────────────────────────

pub const LOBBY: &str = "6f1c2a7e-3b7d-4c8e-9d43-0f2b9a6c1d55";

pub fn online_users(ids: &[u64]) -> String {
    serde_json::json!({ "type": "ONLINE_USERS", "usersOnline": ids }).to_string()
}

pub fn new_connection(user: u64) -> String {
    format!(r#"{{"type":"NEW_CONNECTION","user":{user}}}"#)
}

pub fn user_disconnected(user: u64) -> String {
    format!(r#"{{"type":"USER_DISCONNECTED","user":{user}}}"#)
}

pub fn chat(sender: u64, receiver: u64, data: &str) -> String {
    serde_json::json!({
        "type": "CHAT",
        "data": data,
        "senderId": sender,
        "receiverId": receiver,
    })
    .to_string()
}

pub fn lobby_created(sender: u64, receiver: u64) -> String {
    serde_json::json!({
        "type": "LOBBY_CREATED",
        "sender": { "id": sender, "isReady": false },
        "receiver": { "id": receiver, "isReady": false },
        "lobbyId": LOBBY,
    })
    .to_string()
}

pub fn lobby_player_status(sender: (u64, bool), receiver: (u64, bool)) -> String {
    serde_json::json!({
        "type": "LOBBY_PLAYER_STATUS",
        "userId": sender.0,
        "lobbyId": LOBBY,
        "sender": { "id": sender.0, "isReady": sender.1 },
        "receiver": { "id": receiver.0, "isReady": receiver.1 },
    })
    .to_string()
}

pub fn lobby_destroyed() -> String {
    serde_json::json!({ "type": "LOBBY_DESTROYED", "lobbyId": LOBBY }).to_string()
}

pub fn game_event(score: (u32, u32)) -> String {
    serde_json::json!({
        "type": "GAME_EVENT",
        "lobbyId": LOBBY,
        "player1id": 1,
        "player2id": 2,
        "isTournamentGame": false,
        "state": {
            "ball": { "x": 400.0, "y": 300.0 },
            "paddle": {
                "width": 10.0, "height": 100.0,
                "player1X": 20.0, "player1Y": 250.0,
                "player2X": 770.0, "player2Y": 250.0,
                "player1YDirection": 0, "player2YDirection": 1
            },
            "score": { "player1": score.0, "player2": score.1 },
            "isActive": true,
            "isGameMode": false,
            "winner": 0,
            "isPaused": false,
            "player1boost": { "ballhit": 2, "boostReady": false, "isboostactive": false },
            "player2boost": { "ballhit": 0, "boostReady": true, "isboostactive": false },
            "remainingTime": 42
        }
    })
    .to_string()
}

/// Join several documents into one batched frame.
pub fn batch(docs: &[String]) -> String {
    docs.join("\n")
}
