//! # Pong Realtime Client
//!
//! Realtime synchronization core for a multiplayer Pong client: presence,
//! direct messages, 1v1 lobbies, four-player tournaments and live matches,
//! all multiplexed over one socket.
//!
//! ## Features
//!
//! - **Transport-agnostic**: implement [`Transport`] and [`Connector`] for any backend
//! - **Wire-compatible**: [`ServerMessage`] / [`ClientMessage`] match the server's JSON
//! - **Injected state**: every store lives in a [`SyncContext`] owned by the [`SyncEngine`]
//! - **WebSocket built-in**: default `transport-websocket` feature provides [`WebSocketConnector`]
//! - **Event-driven**: subscribe to [`ClientEvent`]s by message kind or category
//!
//! ## Layers
//!
//! ```text
//! socket ─▶ frame (split + validate) ─▶ dispatch ─▶ presence / chat / lobby / tournament / game
//!                                                      │
//!                               Command::Send ◀────────┴────────▶ Command::Emit ─▶ subscribers
//! ```
//!
//! Built-in handlers only emit; `Command::Send` comes from custom handlers
//! registered through [`PongClient::register_handler`].

pub mod chat;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod error_codes;
pub mod event;
pub mod frame;
pub mod game;
pub mod lobby;
pub mod presence;
pub mod protocol;
pub mod session;
pub mod tournament;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use client::{ConnectionState, PongClient};
pub use config::{ClientConfig, Deployment, ReconnectPolicy};
pub use dispatch::{Command, Dispatcher, MessageKind};
pub use error::RealtimeError;
pub use error_codes::ErrorCode;
pub use event::{ClientEvent, Subscription};
pub use protocol::{ClientMessage, KeyInput, ServerMessage, UserId};
pub use session::{SyncContext, SyncEngine};
pub use transport::{Connector, Transport};

#[cfg(feature = "transport-websocket")]
pub use transports::{WebSocketConnector, WebSocketTransport};
