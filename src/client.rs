//! Connection manager for the realtime socket.
//!
//! [`PongClient`] owns at most one socket per authenticated identity. Each
//! connection is driven by a background loop that multiplexes outbound
//! envelopes, the shutdown signal and inbound frames with `tokio::select!`.
//! Inbound frames go through the [`SyncEngine`]; the commands it returns are
//! executed by the loop (socket writes, event emission).
//!
//! # Example
//!
//! ```rust,ignore
//! let mut client = PongClient::websocket(ClientConfig::default());
//! let mut events = client.subscribe(Subscription::All);
//! client.connect(42).await?;
//!
//! client.invite_friend(7)?;
//! while let Some(event) = events.recv().await {
//!     match event {
//!         ClientEvent::LobbyBothReady { lobby_id } => { /* … */ }
//!         ClientEvent::Disconnected { .. } => break,
//!         _ => {}
//!     }
//! }
//! ```

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::config::{ClientConfig, ReconnectPolicy};
use crate::dispatch::{Command, MessageKind};
use crate::error::{RealtimeError, Result};
use crate::event::{ClientEvent, EventBus, Subscription};
use crate::game::MatchResult;
use crate::lobby::{LobbyPhase, LobbySession};
use crate::protocol::{ClientMessage, GameState, KeyInput, ServerMessage, UserId};
use crate::session::{SyncContext, SyncEngine};
use crate::tournament::{Bracket, TournamentPhase};
use crate::transport::{Connector, Transport};

// ── Lifecycle ───────────────────────────────────────────────────────

/// Lifecycle of the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Connecting,
    Open,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Connecting,
            2 => Self::Open,
            _ => Self::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Closed => 0,
            Self::Connecting => 1,
            Self::Open => 2,
        }
    }
}

#[derive(Debug, Default)]
struct Lifecycle(AtomicU8);

impl Lifecycle {
    fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: ConnectionState) {
        self.0.store(state.as_u8(), Ordering::Release);
    }
}

/// State shared between the client handle and the connection loop.
struct Shared {
    engine: Mutex<SyncEngine>,
    bus: EventBus,
    lifecycle: Lifecycle,
}

impl Shared {
    fn engine(&self) -> std::sync::MutexGuard<'_, SyncEngine> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handles of one live connection loop.
struct Connection {
    identity: UserId,
    cmd_tx: mpsc::UnboundedSender<ClientMessage>,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

// ── Client handle ───────────────────────────────────────────────────

/// Realtime client for one identity at a time.
///
/// Outbound helpers validate the action against the local state machines,
/// then queue the envelope for the connection loop. Nothing is queued while
/// the socket is not open: such calls log a warning and return
/// [`RealtimeError::NotConnected`] without touching local state.
pub struct PongClient<C: Connector> {
    connector: Arc<C>,
    config: ClientConfig,
    shared: Arc<Shared>,
    conn: Option<Connection>,
}

#[cfg(feature = "transport-websocket")]
impl PongClient<crate::transports::WebSocketConnector> {
    /// A client that connects over WebSocket using `config.connect_timeout`.
    pub fn websocket(config: ClientConfig) -> Self {
        let connector = crate::transports::WebSocketConnector::new(config.connect_timeout);
        Self::new(connector, config)
    }
}

impl<C: Connector> PongClient<C> {
    /// Create a disconnected client.
    pub fn new(connector: C, config: ClientConfig) -> Self {
        let shared = Arc::new(Shared {
            // 0 is the wire value for "no user"; replaced on the first connect.
            engine: Mutex::new(SyncEngine::new(0)),
            bus: EventBus::new(config.event_channel_capacity),
            lifecycle: Lifecycle::default(),
        });
        Self {
            connector: Arc::new(connector),
            config,
            shared,
            conn: None,
        }
    }

    /// Open the socket for `identity`.
    ///
    /// Any existing connection is closed first. Switching to a different
    /// identity discards all state learned for the previous one; reconnecting
    /// the same identity keeps presence and unread counters but drops lobby,
    /// bracket and match state.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::Timeout`] or a transport error if the socket
    /// cannot be opened. The client is left closed.
    pub async fn connect(&mut self, identity: UserId) -> Result<()> {
        self.disconnect().await;

        {
            let mut engine = self.shared.engine();
            if engine.local_id() != identity {
                engine.reset_identity(identity);
            } else {
                engine.context_mut().reset_pairings();
            }
        }

        let url = self.config.deployment.endpoint_url(identity);
        self.shared.lifecycle.set(ConnectionState::Connecting);
        let transport =
            match open(self.connector.as_ref(), &url, self.config.connect_timeout).await {
                Ok(transport) => transport,
                Err(e) => {
                    error!(url = %url, "failed to open realtime socket: {e}");
                    self.shared.lifecycle.set(ConnectionState::Closed);
                    return Err(e);
                }
            };

        self.shared.lifecycle.set(ConnectionState::Open);
        self.shared.bus.emit(&ClientEvent::Connected { identity });

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(connection_loop(
            LoopParams {
                connector: Arc::clone(&self.connector),
                shared: Arc::clone(&self.shared),
                url,
                identity,
                policy: self.config.reconnect,
                connect_timeout: self.config.connect_timeout,
            },
            transport,
            cmd_rx,
            shutdown_rx,
        ));

        self.conn = Some(Connection {
            identity,
            cmd_tx,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
        });
        Ok(())
    }

    /// Close the socket and stop the connection loop. Idempotent.
    pub async fn disconnect(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            self.shared.lifecycle.set(ConnectionState::Closed);
            return;
        };
        debug!(identity = conn.identity, "disconnect requested");

        if let Some(tx) = conn.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = conn.task.take() {
            match tokio::time::timeout(self.config.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("connection loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("connection loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("connection loop aborted: {join_err}");
                    }
                }
            }
        }

        self.shared.lifecycle.set(ConnectionState::Closed);
    }

    /// Pure read of the lifecycle state.
    pub fn is_connected(&self) -> bool {
        self.shared.lifecycle.get() == ConnectionState::Open
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.lifecycle.get()
    }

    /// Identity of the current connection, if any.
    pub fn identity(&self) -> Option<UserId> {
        self.conn.as_ref().map(|c| c.identity)
    }

    pub fn subscribe(&self, filter: Subscription) -> mpsc::Receiver<ClientEvent> {
        self.shared.bus.subscribe(filter)
    }

    /// Serialize and write `msg` if the socket is open.
    ///
    /// # Errors
    ///
    /// [`RealtimeError::NotConnected`] when the socket is not open. The message
    /// is dropped, not queued.
    pub fn send(&self, msg: ClientMessage) -> Result<()> {
        let conn = match (&self.conn, self.shared.lifecycle.get()) {
            (Some(conn), ConnectionState::Open) => conn,
            (_, state) => {
                warn!(tag = msg.tag(), ?state, "socket not open, dropping message");
                return Err(RealtimeError::NotConnected);
            }
        };
        conn.cmd_tx.send(msg).map_err(|rejected| {
            warn!(tag = rejected.0.tag(), "connection loop gone, dropping message");
            RealtimeError::NotConnected
        })
    }

    /// Run a local state-machine action and send the envelope it produces.
    /// The action's state change is undone if the envelope cannot be queued.
    fn act(&self, action: impl FnOnce(&mut SyncContext) -> Result<ClientMessage>) -> Result<()> {
        if !self.is_connected() {
            warn!("socket not open, local action refused");
            return Err(RealtimeError::NotConnected);
        }
        let mut engine = self.shared.engine();
        let ctx = engine.context_mut();
        let saved = (ctx.lobby.clone(), ctx.tournament.clone(), ctx.game.clone());
        let msg = action(ctx)?;
        self.send(msg).inspect_err(|_| {
            let ctx = engine.context_mut();
            (ctx.lobby, ctx.tournament, ctx.game) = saved;
        })
    }

    /// Install a custom handler for `kind`, replacing the built-in one.
    ///
    /// `Command::Send` results are written to the socket by the connection
    /// loop, `Command::Emit` results go to subscribers.
    pub fn register_handler<F>(&self, kind: MessageKind, handler: F) -> bool
    where
        F: FnMut(&mut SyncContext, &ServerMessage) -> Vec<Command> + Send + 'static,
    {
        self.shared
            .engine()
            .dispatcher_mut()
            .register_handler(kind, handler)
    }

    /// Read the synchronized state under the lock.
    pub fn with_context<R>(&self, read: impl FnOnce(&SyncContext) -> R) -> R {
        read(self.shared.engine().context())
    }

    // ── Chat ────────────────────────────────────────────────────────

    /// Send a direct message to `friend`.
    ///
    /// # Errors
    ///
    /// [`RealtimeError::NotConnected`] when the socket is not open.
    pub fn send_chat(&self, friend: UserId, text: impl Into<String>) -> Result<()> {
        let data = text.into();
        self.act(|ctx| {
            Ok(ClientMessage::Chat {
                data,
                sender_id: ctx.local_id,
                receiver_id: friend,
            })
        })
    }

    /// Open (or with `None`, close) a conversation.
    pub fn select_conversation(&self, friend: Option<UserId>) {
        let cleared = {
            let mut engine = self.shared.engine();
            let chat = &mut engine.context_mut().chat;
            let had_unread = friend.is_some_and(|f| chat.unread_count_for(f) > 0);
            chat.select_conversation(friend);
            friend.filter(|_| had_unread)
        };
        if let Some(friend) = cleared {
            self.shared
                .bus
                .emit(&ClientEvent::UnreadChanged { friend, count: 0 });
        }
    }

    /// Close `friend`'s conversation if open, otherwise open it.
    pub fn toggle_conversation(&self, friend: UserId) {
        let open = self.with_context(|ctx| ctx.chat.selected() == Some(friend));
        self.select_conversation(if open { None } else { Some(friend) });
    }

    // ── Lobby ───────────────────────────────────────────────────────

    /// # Errors
    ///
    /// [`RealtimeError::NotConnected`] or [`RealtimeError::InvalidTransition`].
    pub fn invite_friend(&self, friend: UserId) -> Result<()> {
        self.act(|ctx| ctx.lobby.invite(friend))
    }

    /// # Errors
    ///
    /// [`RealtimeError::NotConnected`] or [`RealtimeError::InvalidTransition`].
    pub fn accept_invitation(&self) -> Result<()> {
        self.act(|ctx| ctx.lobby.accept())
    }

    /// # Errors
    ///
    /// [`RealtimeError::NotConnected`] or [`RealtimeError::InvalidTransition`].
    pub fn deny_invitation(&self) -> Result<()> {
        self.act(|ctx| ctx.lobby.deny())
    }

    /// # Errors
    ///
    /// [`RealtimeError::NotConnected`] or [`RealtimeError::NoActiveLobby`].
    pub fn set_ready(&self, ready: bool) -> Result<()> {
        self.act(|ctx| ctx.lobby.set_ready(ready))
    }

    /// # Errors
    ///
    /// [`RealtimeError::NotConnected`] or [`RealtimeError::NoActiveLobby`].
    pub fn toggle_special_mode(&self, enabled: bool) -> Result<()> {
        self.act(|ctx| ctx.lobby.toggle_special_mode(enabled))
    }

    /// Leave the current lobby. An invitation the server has not echoed yet
    /// is dropped locally without sending anything.
    ///
    /// # Errors
    ///
    /// [`RealtimeError::NotConnected`] or [`RealtimeError::NoActiveLobby`].
    pub fn leave_lobby(&self) -> Result<()> {
        if self
            .shared
            .engine()
            .context_mut()
            .lobby
            .cancel_unconfirmed_invitation()
        {
            return Ok(());
        }
        self.act(|ctx| ctx.lobby.terminate())
    }

    // ── Tournament ──────────────────────────────────────────────────

    /// # Errors
    ///
    /// [`RealtimeError::NotConnected`] or [`RealtimeError::InvalidTransition`].
    pub fn create_tournament(&self) -> Result<()> {
        self.act(|ctx| ctx.tournament.create())
    }

    /// # Errors
    ///
    /// [`RealtimeError::NotConnected`] or [`RealtimeError::InvalidTransition`].
    pub fn join_tournament(&self, code: impl Into<String>) -> Result<()> {
        let code = code.into();
        self.act(|ctx| ctx.tournament.join(code))
    }

    /// # Errors
    ///
    /// [`RealtimeError::NotConnected`] or [`RealtimeError::InvalidTransition`].
    pub fn start_tournament(&self) -> Result<()> {
        self.act(|ctx| ctx.tournament.start())
    }

    /// # Errors
    ///
    /// [`RealtimeError::NotConnected`] or [`RealtimeError::InvalidTransition`].
    pub fn leave_tournament_waiting_room(&self) -> Result<()> {
        self.act(|ctx| ctx.tournament.leave_waiting_room())
    }

    /// # Errors
    ///
    /// [`RealtimeError::NotConnected`] or [`RealtimeError::InvalidTransition`].
    pub fn leave_tournament(&self) -> Result<()> {
        self.act(|ctx| ctx.tournament.leave())
    }

    /// # Errors
    ///
    /// [`RealtimeError::NotConnected`] or [`RealtimeError::InvalidTransition`].
    pub fn terminate_tournament(&self) -> Result<()> {
        self.act(|ctx| ctx.tournament.terminate())
    }

    // ── Match ───────────────────────────────────────────────────────

    /// Forward a key press to the running match.
    ///
    /// # Errors
    ///
    /// [`RealtimeError::NotConnected`] or [`RealtimeError::NoActiveMatch`].
    pub fn press_key(&self, key: KeyInput) -> Result<()> {
        self.act(|ctx| ctx.game.key_input(key))
    }

    // ── Getters ─────────────────────────────────────────────────────

    pub fn is_online(&self, user: UserId) -> bool {
        self.with_context(|ctx| ctx.presence.is_online(user))
    }

    pub fn online_users(&self) -> Vec<UserId> {
        self.with_context(|ctx| ctx.presence.snapshot())
    }

    pub fn unread_count_for(&self, friend: UserId) -> u32 {
        self.with_context(|ctx| ctx.chat.unread_count_for(friend))
    }

    pub fn total_unread(&self) -> u32 {
        self.with_context(|ctx| ctx.chat.total_unread())
    }

    pub fn selected_conversation(&self) -> Option<UserId> {
        self.with_context(|ctx| ctx.chat.selected())
    }

    pub fn lobby_phase(&self) -> LobbyPhase {
        self.with_context(|ctx| ctx.lobby.phase().clone())
    }

    pub fn lobby_session(&self) -> Option<LobbySession> {
        self.with_context(|ctx| ctx.lobby.session().cloned())
    }

    pub fn tournament_phase(&self) -> TournamentPhase {
        self.with_context(|ctx| ctx.tournament.phase())
    }

    pub fn bracket(&self) -> Option<Bracket> {
        self.with_context(|ctx| ctx.tournament.bracket().cloned())
    }

    pub fn game_state(&self) -> Option<GameState> {
        self.with_context(|ctx| ctx.game.state().cloned())
    }

    pub fn match_result(&self) -> Option<MatchResult> {
        self.with_context(|ctx| ctx.game.result().cloned())
    }
}

impl<C: Connector> std::fmt::Debug for PongClient<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PongClient")
            .field("state", &self.connection_state())
            .field("identity", &self.identity())
            .field("subscribers", &self.shared.bus.subscriber_count())
            .finish()
    }
}

impl<C: Connector> Drop for PongClient<C> {
    fn drop(&mut self) {
        // No executor here to drive a graceful close; abort the loop instead.
        if let Some(task) = self.conn.as_mut().and_then(|c| c.task.take()) {
            task.abort();
        }
    }
}

// ── Connection loop ─────────────────────────────────────────────────

struct LoopParams<C: Connector> {
    connector: Arc<C>,
    shared: Arc<Shared>,
    url: String,
    identity: UserId,
    policy: ReconnectPolicy,
    connect_timeout: Duration,
}

async fn open<C: Connector>(connector: &C, url: &str, timeout: Duration) -> Result<C::Transport> {
    tokio::time::timeout(timeout, connector.connect(url))
        .await
        .map_err(|_| RealtimeError::Timeout)?
}

/// Decode and dispatch one frame. Keeps the engine lock out of async code.
fn process_frame(shared: &Shared, frame: &str) -> Vec<Command> {
    shared.engine().handle_frame(frame).commands
}

async fn write(transport: &mut impl Transport, msg: &ClientMessage) -> Result<()> {
    let json = serde_json::to_string(msg)?;
    debug!(tag = msg.tag(), "sending client message");
    transport.send(json).await
}

/// Why one socket session ended.
enum SessionEnd {
    /// `disconnect()` or the handle was dropped.
    Shutdown,
    /// The socket failed or the server closed it.
    Lost(Option<String>),
}

/// Drive one open socket until it ends.
async fn run_session<T: Transport>(
    shared: &Shared,
    transport: &mut T,
    cmd_rx: &mut mpsc::UnboundedReceiver<ClientMessage>,
    shutdown_rx: &mut oneshot::Receiver<()>,
) -> SessionEnd {
    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(msg) = cmd else {
                    debug!("command channel closed");
                    let _ = transport.close().await;
                    return SessionEnd::Shutdown;
                };
                match write(transport, &msg).await {
                    Ok(()) => {}
                    Err(RealtimeError::Serialization(e)) => {
                        error!("failed to serialize ClientMessage: {e}");
                    }
                    Err(e) => {
                        error!("transport send error: {e}");
                        return SessionEnd::Lost(Some(format!("transport send error: {e}")));
                    }
                }
            }

            _ = &mut *shutdown_rx => {
                debug!("shutdown signal received");
                let _ = transport.close().await;
                return SessionEnd::Shutdown;
            }

            incoming = transport.recv() => {
                match incoming {
                    Some(Ok(frame)) => {
                        for command in process_frame(shared, &frame) {
                            match command {
                                Command::Emit(event) => shared.bus.emit(&event),
                                Command::Send(msg) => {
                                    if let Err(e) = write(transport, &msg).await {
                                        error!("transport send error: {e}");
                                        return SessionEnd::Lost(Some(format!(
                                            "transport send error: {e}"
                                        )));
                                    }
                                }
                            }
                        }
                    }
                    Some(Err(e)) => {
                        error!("transport receive error: {e}");
                        return SessionEnd::Lost(Some(format!("transport receive error: {e}")));
                    }
                    None => {
                        debug!("socket closed by server");
                        return SessionEnd::Lost(None);
                    }
                }
            }
        }
    }
}

/// Background loop for one identity: runs sessions and, if the policy allows,
/// reopens the socket after it drops.
async fn connection_loop<C: Connector>(
    params: LoopParams<C>,
    mut transport: C::Transport,
    mut cmd_rx: mpsc::UnboundedReceiver<ClientMessage>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let shared = params.shared.as_ref();
    debug!(identity = params.identity, "connection loop started");

    'sessions: loop {
        let end = run_session(shared, &mut transport, &mut cmd_rx, &mut shutdown_rx).await;
        shared.lifecycle.set(ConnectionState::Closed);

        let reason = match end {
            SessionEnd::Shutdown => {
                shared
                    .bus
                    .emit_reliable(ClientEvent::Disconnected {
                        reason: Some("client disconnected".into()),
                    })
                    .await;
                break 'sessions;
            }
            SessionEnd::Lost(reason) => reason,
        };
        shared
            .bus
            .emit_reliable(ClientEvent::Disconnected { reason })
            .await;

        let mut attempt = 0u32;
        loop {
            attempt = attempt.saturating_add(1);
            let Some(delay) = params.policy.delay_for(attempt) else {
                if params.policy.is_enabled() {
                    warn!(attempts = attempt - 1, "giving up on reconnect");
                }
                break 'sessions;
            };
            info!(attempt, ?delay, "reconnecting");
            shared
                .bus
                .emit(&ClientEvent::Reconnecting { attempt, delay });
            shared.lifecycle.set(ConnectionState::Connecting);

            let reopened = tokio::select! {
                _ = &mut shutdown_rx => {
                    debug!("shutdown during reconnect");
                    shared.lifecycle.set(ConnectionState::Closed);
                    break 'sessions;
                }
                reopened = async {
                    tokio::time::sleep(delay).await;
                    open(params.connector.as_ref(), &params.url, params.connect_timeout).await
                } => reopened,
            };

            match reopened {
                Ok(fresh) => {
                    transport = fresh;
                    shared.lifecycle.set(ConnectionState::Open);
                    shared.bus.emit(&ClientEvent::Connected {
                        identity: params.identity,
                    });
                    continue 'sessions;
                }
                Err(e) => {
                    warn!(attempt, "reconnect failed: {e}");
                    shared.lifecycle.set(ConnectionState::Closed);
                }
            }
        }
    }

    debug!(identity = params.identity, "connection loop exited");
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
    use async_trait::async_trait;

    /// Connector whose sockets are plain channels.
    struct ChannelConnector {
        frames: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
        sent: mpsc::UnboundedSender<String>,
    }

    struct ChannelTransport {
        frames: mpsc::UnboundedReceiver<String>,
        sent: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl Transport for ChannelTransport {
        async fn send(&mut self, message: String) -> Result<()> {
            self.sent
                .send(message)
                .map_err(|e| RealtimeError::TransportSend(e.to_string()))
        }

        async fn recv(&mut self) -> Option<Result<String>> {
            self.frames.recv().await.map(Ok)
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl Connector for ChannelConnector {
        type Transport = ChannelTransport;

        async fn connect(&self, _url: &str) -> Result<ChannelTransport> {
            let frames = self
                .frames
                .lock()
                .unwrap()
                .take()
                .ok_or(RealtimeError::TransportClosed)?;
            Ok(ChannelTransport {
                frames,
                sent: self.sent.clone(),
            })
        }
    }

    fn client() -> (
        PongClient<ChannelConnector>,
        mpsc::UnboundedSender<String>,
        mpsc::UnboundedReceiver<String>,
    ) {
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let connector = ChannelConnector {
            frames: Mutex::new(Some(frame_rx)),
            sent: sent_tx,
        };
        (
            PongClient::new(connector, ClientConfig::default()),
            frame_tx,
            sent_rx,
        )
    }

    #[test]
    fn lifecycle_round_trips_through_u8() {
        for state in [
            ConnectionState::Closed,
            ConnectionState::Connecting,
            ConnectionState::Open,
        ] {
            assert_eq!(ConnectionState::from_u8(state.as_u8()), state);
        }
    }

    #[tokio::test]
    async fn send_before_connect_is_dropped() {
        let (client, _frames, _sent) = client();
        let err = client.send_chat(2, "hi").unwrap_err();
        assert!(matches!(err, RealtimeError::NotConnected));
        assert_eq!(client.connection_state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn outbound_reaches_transport() {
        let (mut client, _frames, mut sent) = client();
        client.connect(1).await.unwrap();
        assert!(client.is_connected());

        client.send_chat(2, "gg").unwrap();
        let json = sent.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "CHAT");
        assert_eq!(value["senderId"], 1);
        assert_eq!(value["receiverId"], 2);

        client.disconnect().await;
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn failed_send_undoes_local_action() {
        let (mut client, _frames, _sent) = client();
        client.connect(1).await.unwrap();

        // Kill the loop behind the handle's back: lifecycle still says Open.
        let task = client.conn.as_mut().unwrap().task.take().unwrap();
        task.abort();
        let _ = task.await;
        assert!(client.is_connected());

        assert!(matches!(
            client.invite_friend(2),
            Err(RealtimeError::NotConnected)
        ));
        assert_eq!(client.lobby_phase(), LobbyPhase::Idle);
    }

    #[tokio::test]
    async fn custom_handler_replies_through_the_socket() {
        let (mut client, frames, mut sent) = client();
        client.register_handler(MessageKind::NewConnection, |ctx, msg| {
            let ServerMessage::NewConnection { user } = msg else {
                return Vec::new();
            };
            vec![Command::Send(ClientMessage::Chat {
                data: "welcome".into(),
                sender_id: ctx.local_id,
                receiver_id: *user,
            })]
        });
        client.connect(1).await.unwrap();

        frames
            .send(r#"{"type":"NEW_CONNECTION","user":5}"#.into())
            .unwrap();
        let json = sent.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "CHAT");
        assert_eq!(value["receiverId"], 5);
        client.disconnect().await;
    }

    #[tokio::test]
    async fn refused_local_action_sends_nothing() {
        let (mut client, _frames, mut sent) = client();
        client.connect(1).await.unwrap();
        assert!(matches!(
            client.set_ready(true),
            Err(RealtimeError::NoActiveLobby)
        ));
        client.disconnect().await;
        assert!(sent.try_recv().is_err());
    }
}
