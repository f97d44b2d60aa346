//! Transport abstraction for the realtime socket.
//!
//! The [`Transport`] trait is a bidirectional text channel. One call to
//! [`recv`](Transport::recv) yields one raw frame, which may batch several
//! newline-separated JSON documents; splitting happens in [`crate::frame`].
//!
//! [`Connector`] opens a connected transport from an endpoint URL. The client
//! owns a connector rather than a transport so it can open a fresh socket on
//! every `connect` and on reconnect.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use pong_realtime_client::error::RealtimeError;
//! use pong_realtime_client::transport::{Connector, Transport};
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, message: String) -> Result<(), RealtimeError> {
//!         todo!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, RealtimeError>> {
//!         // Return None when the connection is closed cleanly
//!         todo!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), RealtimeError> {
//!         todo!()
//!     }
//! }
//!
//! struct MyConnector;
//!
//! #[async_trait]
//! impl Connector for MyConnector {
//!     type Transport = MyTransport;
//!
//!     async fn connect(&self, url: &str) -> Result<MyTransport, RealtimeError> {
//!         todo!()
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::RealtimeError;

/// A bidirectional text message transport.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) **MUST** be cancel-safe because it is used inside
/// `tokio::select!`. If `recv` is cancelled before completion, calling it again
/// must not lose data.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send one serialized envelope.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::TransportSend`] if the message could not be sent.
    async fn send(&mut self, message: String) -> Result<(), RealtimeError>;

    /// Receive the next raw frame.
    ///
    /// Returns:
    /// - `Some(Ok(text))` — a frame was received
    /// - `Some(Err(e))` — a transport error occurred
    /// - `None` — the connection was closed cleanly by the server
    async fn recv(&mut self) -> Option<Result<String, RealtimeError>>;

    /// Close the connection gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake fails. Implementations should
    /// still release resources.
    async fn close(&mut self) -> Result<(), RealtimeError>;
}

/// Opens connected transports.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Transport: Transport;

    /// Open a socket to `url`.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the connection cannot be established.
    async fn connect(&self, url: &str) -> Result<Self::Transport, RealtimeError>;
}
