use std::{
    fmt::{self, Display, Formatter},
    result,
    sync::{
        atomic::{AtomicU32, AtomicU64, Ordering},
        Arc, Mutex, RwLock,
    },
    time::Duration,
};

use async_trait::async_trait;
use base64::{prelude::BASE64_STANDARD, Engine};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use reqwest::header::InvalidHeaderValue;
use tokio::{net::TcpStream, select, spawn, sync::oneshot, time::sleep};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        self,
        http::{self, Request},
        Message,
    },
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, warn};

mod common;
mod filters;
mod health;
mod internal;
mod parser;
mod rest;
mod websocket;

use parser::parse_response;

pub use common::*;
pub use filters::*;
pub use health::*;
pub use rest::*;
pub use websocket::*;

const CLIENT_NAME: &str = "node-link";

/// The taxonomy of error kinds a caller can dispatch recovery policy on,
/// independent of the concrete [`Error`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Transport timeouts, 5xx, 429 — retried internally with backoff+jitter.
    TransientNetwork,
    /// Malformed payload or unexpected op — logged and dropped, connection stands.
    Protocol,
    /// Bad argument from the caller — surfaced synchronously, no state change.
    Validation,
    /// Node reports a load-type error, or a PATCH returns 4xx.
    Contract,
    /// No node reachable, or an operation attempted after teardown.
    Fatal,
}

/// Enum that groups all the errors that can occur in this crate.
#[derive(Debug)]
pub enum Error {
    /// Generic HTTP errors produced by the `http` crate.
    Http(http::Error),
    /// WebSocket errors generated by the `tungstenite` crate.
    WebSocket(tungstenite::Error),
    /// REST client errors generated by the `reqwest` crate.
    Reqwest(reqwest::Error),
    /// Error building REST/WebSocket client headers.
    InvalidHeaderValue(InvalidHeaderValue),
    /// Node error response because of a REST call, and the parsing error, if any.
    RestError(ErrorResponse, Option<serde_json::Error>),
    /// Error parsing a response body, with the fallback `ErrorResponse` parse error.
    InvalidResponse(Option<serde_json::Error>, serde_json::Error),
    /// A request failed after exhausting retries, or a non-retryable status was returned.
    Dedup(String),
    /// Attempted a REST call before the node reported `Ready`.
    NotConnected,
    /// Attempted to connect an already-connected client.
    AlreadyConnected,
    /// Caller-supplied value failed validation.
    Validation(String),
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(e) => e.fmt(f),
            Self::WebSocket(e) => e.fmt(f),
            Self::Reqwest(e) => e.fmt(f),
            Self::InvalidHeaderValue(e) => e.fmt(f),
            Self::RestError(e1, _) => write!(f, "rest error: {}", e1.message),
            Self::InvalidResponse(e1, e2) => match e1 {
                Some(e) => e.fmt(f),
                None => e2.fmt(f),
            },
            Self::Dedup(msg) => write!(f, "request failed: {msg}"),
            Self::NotConnected => write!(f, "node hasn't completed the ready handshake"),
            Self::AlreadyConnected => write!(f, "node client is already connected"),
            Self::Validation(msg) => write!(f, "validation error: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    /// Classifies this error for recovery-policy dispatch, per the taxonomy
    /// table of the error-handling design.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Http(_) | Self::WebSocket(_) | Self::Reqwest(_) | Self::Dedup(_) => {
                ErrorKind::TransientNetwork
            }
            Self::InvalidResponse(..) => ErrorKind::Protocol,
            Self::InvalidHeaderValue(_) | Self::Validation(_) => ErrorKind::Validation,
            Self::RestError(..) => ErrorKind::Contract,
            Self::NotConnected | Self::AlreadyConnected => ErrorKind::Fatal,
        }
    }
}

/// Just a `Result` with the error type set to `node_link::Error`.
pub type Result<T> = result::Result<T, Error>;

/// Connection-parameter configuration for a single audio node.
#[derive(Clone)]
pub struct NodeConfig {
    /// Audio node host (`host:port`, no scheme).
    pub host: String,
    pub password: String,
    pub tls: bool,
    /// Maximum wait time for the session-ready handshake.
    pub connection_timeout: Duration,
    /// Per-request REST deadline.
    pub request_timeout: Duration,
    /// Max REST retry attempts on transient failure.
    pub max_retries: u32,
    /// Max reconnect attempts after an unexpected transport close.
    pub reconnect_tries: u32,
    /// Base reconnect backoff.
    pub reconnect_timeout: Duration,
    /// Seconds the node should hold this session open across a resume.
    pub resume_timeout_secs: u64,
    /// Advisory region list this node advertises, used by `Pool::for_region`.
    pub regions: Vec<String>,
}

impl NodeConfig {
    pub fn new(host: &str, password: &str) -> Self {
        Self {
            host: host.to_owned(),
            password: password.to_owned(),
            tls: false,
            connection_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(15),
            max_retries: 3,
            reconnect_tries: 5,
            reconnect_timeout: Duration::from_millis(500),
            resume_timeout_secs: 60,
            regions: Vec::new(),
        }
    }

    pub fn build_websocket_uri(&self) -> String {
        format!(
            "{}://{}/v4/websocket",
            if self.tls { "wss" } else { "ws" },
            self.host
        )
    }

    pub fn build_rest_uri(&self, api_call: &str) -> String {
        format!(
            "{}://{}/v4{}",
            if self.tls { "https" } else { "http" },
            self.host,
            api_call,
        )
    }
}

/// Lifecycle of a [`NodeClient`]'s transport connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// Transport established, session-ready handshake not completed yet.
    Open,
    /// Node has sent a session id; REST calls are now valid.
    Ready,
}

/// Event handler used by the WebSocket message parser. All methods default
/// to no-ops so implementors only override what they need.
#[async_trait]
pub trait Handler {
    /// The WebSocket connection is established and a session id was received.
    async fn ready(&self, _node: NodeClient, _resumed: bool) {}
    /// The transport dropped; this fires as soon as the message parser loop ends.
    async fn disconnect(&self, _node: NodeClient) {}
    async fn player_update(&self, _node: NodeClient, _update: PlayerUpdate) {}
    async fn stats(&self, _node: NodeClient, _stats: Stats) {}
    async fn track_start_event(&self, _node: NodeClient, _event: TrackStartEvent) {}
    async fn track_end_event(&self, _node: NodeClient, _event: TrackEndEvent) {}
    async fn track_exception_event(&self, _node: NodeClient, _event: TrackExceptionEvent) {}
    async fn track_stuck_event(&self, _node: NodeClient, _event: TrackStuckEvent) {}
    async fn websocket_closed_event(&self, _node: NodeClient, _event: WebSocketClosedEvent) {}
    async fn segments_loaded_event(&self, _node: NodeClient, _event: SegmentsLoadedEvent) {}
    async fn segment_skipped_event(&self, _node: NodeClient, _event: SegmentSkippedEvent) {}
    async fn chapters_loaded_event(&self, _node: NodeClient, _event: ChaptersLoadedEvent) {}
    async fn chapter_started_event(&self, _node: NodeClient, _event: ChapterStartedEvent) {}
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// One persistent event-stream connection plus REST transport to a single
/// audio node.
static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone)]
pub struct NodeClient {
    id: u64,
    rest: RestClient,
    config: Arc<NodeConfig>,
    state: Arc<RwLock<ConnectionState>>,
    session_id: Arc<RwLock<Option<String>>>,
    connection: Arc<tokio::sync::Mutex<Option<WsSink>>>,
    handler: Arc<Box<dyn Handler + Sync + Send>>,
    user_id: u64,
    reconnect_attempts: Arc<AtomicU32>,
    stats: Arc<Mutex<NodeStats>>,
}

impl NodeClient {
    pub fn new<H: Handler + Sync + Send + 'static>(
        config: NodeConfig,
        user_id: u64,
        handler: H,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let rest = RestClient::new(config.clone())?;

        Ok(Self {
            id: NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed),
            rest,
            config,
            handler: Arc::new(Box::new(handler)),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            session_id: Arc::new(RwLock::new(None)),
            connection: Arc::new(tokio::sync::Mutex::new(None)),
            reconnect_attempts: Arc::new(AtomicU32::new(0)),
            stats: Arc::new(Mutex::new(NodeStats::default())),
            user_id,
        })
    }

    /// Stable identity for this node, distinct across every `NodeClient::new`
    /// call even for two nodes pointed at the same host. Clones of the same
    /// node (sharing the same underlying connection) compare equal; used to
    /// fence stale events after a migration (§5: "a migration fence is
    /// explicit").
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The REST transport bound to this node.
    pub fn rest(&self) -> &RestClient {
        &self.rest
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read().unwrap()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().unwrap().clone()
    }

    /// A snapshot of this node's health, for use by a pool's selection logic.
    pub fn health_score(&self) -> HealthScore {
        self.stats.lock().unwrap().health_score()
    }

    /// Opens the transport and waits for the session-ready handshake.
    pub async fn connect(&self) -> Result<()> {
        if self.state() != ConnectionState::Disconnected {
            return Err(Error::AlreadyConnected);
        }

        *self.state.write().unwrap() = ConnectionState::Connecting;

        let websocket_uri = self.config.build_websocket_uri();

        let mut builder = Request::builder()
            .header("Host", websocket_uri.clone())
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header("Sec-WebSocket-Key", generate_key())
            .header("Authorization", self.config.password.clone())
            .header("User-Id", self.user_id)
            .header("Client-Name", CLIENT_NAME);

        if let Some(session_id) = self.session_id() {
            builder = builder.header("Session-Id", session_id);
        }

        let request = builder
            .uri(websocket_uri.clone())
            .body(())
            .map_err(Error::Http)?;

        debug!("connecting to the audio node websocket at '{}'...", websocket_uri);

        let (sink, stream) = connect_async(request).await.map_err(Error::WebSocket)?.0.split();

        debug!("audio node websocket connected.");
        *self.state.write().unwrap() = ConnectionState::Open;
        *self.connection.lock().await = Some(sink);

        let (sender, receiver) = oneshot::channel();

        let parser_node = self.clone();
        spawn(async move {
            debug!("starting the websocket message parser.");
            parser::websocket_message_parser(parser_node, Some(sender), stream).await;
        });

        debug!("waiting for the session confirmation...");
        select! {
            _ = sleep(self.config.connection_timeout) => {
                warn!("session confirmation timeout, closing connection...");
                self.close_transport().await;
                Err(Error::NotConnected)
            }
            msg = receiver => match msg {
                Ok(_) => Ok(()),
                Err(e) => {
                    error!("session confirmation channel has been dropped: {}", e);
                    self.close_transport().await;
                    Err(Error::NotConnected)
                }
            }
        }
    }

    /// Schedules a reconnect attempt with exponential backoff capped at 30s
    /// plus jitter, up to `reconnect_tries`. Called by the parser loop after
    /// the transport closes unexpectedly.
    pub(crate) fn schedule_reconnect(&self) {
        let attempts = self.reconnect_attempts.fetch_add(1, Ordering::AcqRel) + 1;
        if attempts > self.config.reconnect_tries {
            warn!("giving up reconnecting after {} attempts", attempts - 1);
            return;
        }

        let cap = Duration::from_secs(30);
        let base = self.config.reconnect_timeout;
        let exp = base.saturating_mul(1 << attempts.min(8)).min(cap);
        let jitter = Duration::from_millis(rand::random::<u64>() % 250);
        let delay = exp + jitter;

        let node = self.clone();
        spawn(async move {
            sleep(delay).await;
            *node.state.write().unwrap() = ConnectionState::Disconnected;
            if let Err(e) = node.connect().await {
                warn!("reconnect attempt failed: {}", e);
                node.schedule_reconnect();
            }
        });
    }

    pub(crate) fn reset_reconnect_attempts(&self) {
        self.reconnect_attempts.store(0, Ordering::Release);
    }

    async fn close_transport(&self) {
        if let Some(sink) = self.connection.lock().await.as_mut() {
            if let Err(e) = sink.close().await {
                error!("websocket connection can't be closed: {}", e);
            }
        }
        *self.state.write().unwrap() = ConnectionState::Disconnected;
    }

    pub(crate) fn set_session(&self, session_id: String) {
        *self.session_id.write().unwrap() = Some(session_id);
        *self.state.write().unwrap() = ConnectionState::Ready;
    }

    pub(crate) fn mark_disconnected(&self) {
        *self.state.write().unwrap() = ConnectionState::Disconnected;
    }

    pub(crate) fn record_stats(&self, stats: Stats) {
        self.stats.lock().unwrap().record_stats(stats);
    }

    pub(crate) fn record_ping(&self, ping_ms: i32) {
        if ping_ms >= 0 {
            self.stats.lock().unwrap().record_ping(ping_ms as u32);
        }
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.stats.lock().unwrap().connected = connected;
    }

    pub(crate) fn handler(&self) -> &Arc<Box<dyn Handler + Sync + Send>> {
        &self.handler
    }

    /// Sends the resume-configure call after the first `Ready`, so a
    /// reconnect within `resume_timeout_secs` keeps this session's players.
    pub async fn configure_resuming(&self) -> Result<()> {
        let session_id = self.session_id().ok_or(Error::NotConnected)?;
        self.rest
            .configure_resuming(&session_id, self.config.resume_timeout_secs)
            .await
    }

    pub async fn update_player(
        &self,
        guild_id: u64,
        no_replace: bool,
        player: &UpdatePlayer,
    ) -> Result<Player> {
        let session_id = self.session_id().ok_or(Error::NotConnected)?;
        self.rest
            .update_player(&session_id, guild_id, no_replace, player)
            .await
    }

    pub async fn destroy_player(&self, guild_id: u64) -> Result<()> {
        let session_id = self.session_id().ok_or(Error::NotConnected)?;
        self.rest.destroy_player(&session_id, guild_id).await
    }

    pub async fn get_player(&self, guild_id: u64) -> Result<Player> {
        let session_id = self.session_id().ok_or(Error::NotConnected)?;
        self.rest.get_player(&session_id, guild_id).await
    }

    pub async fn get_players(&self) -> Result<Vec<Player>> {
        let session_id = self.session_id().ok_or(Error::NotConnected)?;
        self.rest.get_players(&session_id).await
    }
}

/// Generates a new random key from 16 base64-encoded bytes, for the
/// `Sec-WebSocket-Key` handshake header.
fn generate_key() -> String {
    let r: [u8; 16] = rand::random();
    BASE64_STANDARD.encode(r)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rest_uri_uses_v4_by_default() {
        let config = NodeConfig::new("localhost:2333", "secret");
        assert_eq!(
            config.build_rest_uri("/stats"),
            "http://localhost:2333/v4/stats"
        );
    }

    #[test]
    fn tls_switches_scheme() {
        let mut config = NodeConfig::new("localhost:2333", "secret");
        config.tls = true;
        assert_eq!(
            config.build_websocket_uri(),
            "wss://localhost:2333/v4/websocket"
        );
    }

    #[test]
    fn error_kind_classifies_rest_error_as_contract() {
        let err = Error::RestError(
            ErrorResponse {
                timestamp: 0,
                status: 404,
                error: "Not Found".into(),
                trace: None,
                message: "no player".into(),
                path: "/v4/sessions/a/players/1".into(),
            },
            None,
        );
        assert_eq!(err.kind(), ErrorKind::Contract);
    }
}
