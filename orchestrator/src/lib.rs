//! # node-link // Orchestrator
//!
//! Guild-scoped playback orchestration on top of a pool of [`node_link`]
//! audio nodes: voice binding, queue/history/filter state, stuck and
//! disconnect recovery, and health-based node selection.
use std::{
    collections::HashMap,
    fmt::{self, Display, Formatter},
    result,
    sync::Arc,
};

use async_trait::async_trait;
use node_link::{Handler, NodeClient};
use tokio::sync::RwLock;
use tracing::debug;

pub mod config;
pub mod connection;
pub mod filters;
pub mod model;
pub mod orchestrator;
pub mod player;
pub mod pool;
pub mod queue;
pub mod snapshot;

pub use config::OrchestratorConfig;
pub use connection::ConnectionState;
pub use model::{History, HistoryEntry, Track};
pub use orchestrator::{Orchestrator, ResolveResult};
pub use player::{LoopMode, PlaybackResolver, Player, PlayerEvent, PlayerState};
pub use pool::Pool;
pub use queue::{Queue, QueueStats};

/// Taxonomy of error kinds a caller can dispatch recovery policy on,
/// independent of the concrete [`Error`] variant. A superset of
/// [`node_link::ErrorKind`]; everything that isn't a voice-specific concern
/// maps straight through to the underlying node error's own kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    TransientNetwork,
    Protocol,
    Validation,
    Contract,
    Fatal,
    /// A voice binding did not complete within `voiceReadyTimeout`.
    VoiceTimeout,
}

/// Enum that groups all errors produced by this crate.
#[derive(Debug)]
pub enum Error {
    /// Propagated from the underlying audio node transport/REST client.
    Node(node_link::Error),
    /// Caller-supplied value failed validation (bad filter name, out-of-range
    /// volume, seek past track length, etc.).
    Validation(String),
    /// No player exists for the addressed guild.
    PlayerNotFound,
    /// An operation that requires a bound voice connection was attempted
    /// before one completed.
    NotConnected,
    /// A voice binding did not complete within the configured timeout.
    VoiceTimeout,
    /// The node reported `loadType=error` while resolving a track.
    Contract(String),
    /// Persisted-state file I/O failed.
    Io(std::io::Error),
    /// Persisted-state (de)serialization failed.
    Json(serde_json::Error),
}

impl From<node_link::Error> for Error {
    fn from(e: node_link::Error) -> Self {
        Self::Node(e)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node(e) => e.fmt(f),
            Self::Validation(msg) => write!(f, "validation error: {msg}"),
            Self::PlayerNotFound => write!(f, "no player for this guild"),
            Self::NotConnected => write!(f, "voice connection is not bound yet"),
            Self::VoiceTimeout => write!(f, "voice connection did not complete in time"),
            Self::Contract(msg) => write!(f, "node reported a load error: {msg}"),
            Self::Io(e) => e.fmt(f),
            Self::Json(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Node(e) => match e.kind() {
                node_link::ErrorKind::TransientNetwork => ErrorKind::TransientNetwork,
                node_link::ErrorKind::Protocol => ErrorKind::Protocol,
                node_link::ErrorKind::Validation => ErrorKind::Validation,
                node_link::ErrorKind::Contract => ErrorKind::Contract,
                node_link::ErrorKind::Fatal => ErrorKind::Fatal,
            },
            Self::Validation(_) => ErrorKind::Validation,
            Self::PlayerNotFound => ErrorKind::Fatal,
            Self::NotConnected => ErrorKind::VoiceTimeout,
            Self::VoiceTimeout => ErrorKind::VoiceTimeout,
            Self::Contract(_) => ErrorKind::Contract,
            Self::Io(_) | Self::Json(_) => ErrorKind::Fatal,
        }
    }
}

/// Only [`result::Result`] with the type of [`Err`] set to [`Error`].
pub type Result<T> = result::Result<T, Error>;

/// Bridges node-level events back onto the Player they belong to, keyed by
/// guild id. Events for a guild with no registered player are dropped
/// silently — the node may still be tracking state for a player this
/// orchestrator has already forgotten about.
///
/// Grounded on the teacher's `LavalinkHandler` impl in its manager, which
/// held the same `Arc<RwLock<HashMap<GuildId, HydrogenPlayer>>>` and
/// dispatched node callbacks by guild id lookup.
pub struct NodeHandler {
    players: Arc<RwLock<HashMap<u64, Player>>>,
}

impl NodeHandler {
    pub fn new(players: Arc<RwLock<HashMap<u64, Player>>>) -> Self {
        Self { players }
    }
}

impl NodeHandler {
    /// Looks up the player addressed by `guild_id`, dropping the event
    /// silently if it arrived from a node the player has since migrated off
    /// of — the migration fence §5 requires ("stale events from the old node
    /// for the same guild must be ignored").
    async fn route(&self, node: &NodeClient, guild_id: &str) -> Option<Player> {
        let guild_id: u64 = guild_id.parse().ok()?;
        let players = self.players.read().await;
        let player = players.get(&guild_id)?;
        if player.node().id() != node.id() {
            debug!(
                "dropping stale event for guild {} from a node this player has migrated off of",
                guild_id
            );
            return None;
        }
        Some(player.clone())
    }
}

#[async_trait]
impl Handler for NodeHandler {
    async fn ready(&self, node: NodeClient, resumed: bool) {
        debug!("node ready (resumed={}), session={:?}", resumed, node.session_id());
    }

    async fn disconnect(&self, _node: NodeClient) {
        debug!("node transport disconnected");
    }

    async fn player_update(&self, node: NodeClient, update: node_link::PlayerUpdate) {
        if let Some(player) = self.route(&node, &update.guild_id).await {
            player.on_player_update(update).await;
        }
    }

    async fn track_start_event(&self, node: NodeClient, event: node_link::TrackStartEvent) {
        if let Some(player) = self.route(&node, &event.guild_id).await {
            player.on_track_start(event).await;
        }
    }

    async fn track_end_event(&self, node: NodeClient, event: node_link::TrackEndEvent) {
        if let Some(player) = self.route(&node, &event.guild_id).await {
            player.on_track_end(event).await;
        }
    }

    async fn track_exception_event(&self, node: NodeClient, event: node_link::TrackExceptionEvent) {
        if let Some(player) = self.route(&node, &event.guild_id).await {
            player.on_track_exception(event).await;
        }
    }

    async fn track_stuck_event(&self, node: NodeClient, event: node_link::TrackStuckEvent) {
        if let Some(player) = self.route(&node, &event.guild_id).await {
            player.on_track_stuck(event).await;
        }
    }

    async fn websocket_closed_event(&self, node: NodeClient, event: node_link::WebSocketClosedEvent) {
        if let Some(player) = self.route(&node, &event.guild_id).await {
            player.on_websocket_closed(event).await;
        }
    }

    async fn segments_loaded_event(&self, node: NodeClient, event: node_link::SegmentsLoadedEvent) {
        if let Some(player) = self.route(&node, &event.guild_id).await {
            player.on_segments_loaded(event).await;
        }
    }

    async fn segment_skipped_event(&self, node: NodeClient, event: node_link::SegmentSkippedEvent) {
        if let Some(player) = self.route(&node, &event.guild_id).await {
            player.on_segment_skipped(event).await;
        }
    }

    async fn chapters_loaded_event(&self, node: NodeClient, event: node_link::ChaptersLoadedEvent) {
        if let Some(player) = self.route(&node, &event.guild_id).await {
            player.on_chapters_loaded(event).await;
        }
    }

    async fn chapter_started_event(&self, node: NodeClient, event: node_link::ChapterStartedEvent) {
        if let Some(player) = self.route(&node, &event.guild_id).await {
            player.on_chapter_started(event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_error_kind_maps_through() {
        let err = Error::from(node_link::Error::NotConnected);
        assert_eq!(err.kind(), ErrorKind::Fatal);
    }

    #[test]
    fn voice_timeout_is_its_own_kind() {
        assert_eq!(Error::VoiceTimeout.kind(), ErrorKind::VoiceTimeout);
    }
}
