//! Per-guild playback state machine.
//!
//! Grounded on the teacher's `engine/lavalink::LavalinkPlayer`: the
//! "build one `UpdatePlayer` combining voice state, encoded track and pause
//! flag, then push it once" idiom from `start_playing`/`play` is generalized
//! here into a field-keyed, last-writer-wins batched update (the `UpdatePlayer`
//! struct's `Option` fields already are last-writer-wins, so the pending
//! update doubles as its own batch buffer). `skip`/`prev`/`next`'s index
//! arithmetic becomes the `TrackEnd` advance logic below.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use node_link::{NodeClient, UpdatePlayer};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{Mutex, RwLock},
    time::sleep,
};
use tracing::{debug, warn};

use crate::{
    connection::{self, Connection, ConnectionEvent, ConnectionState},
    filters::FiltersController,
    model::{History, Track},
    queue::{Queue, QueueStats},
    Error, OrchestratorConfig, Result,
};

/// Injectable bridge back to node-backed resolution, so `Player` can resolve
/// an unplayable track or ask for an autoplay follow-up without depending on
/// `Orchestrator` directly — the same inversion used for the `events`
/// callback already threaded through `Player::new`.
#[async_trait::async_trait]
pub trait PlaybackResolver: Send + Sync {
    /// Fills in `track.encoded` if it is not already resolved.
    async fn resolve(&self, track: Track) -> Result<Track>;

    /// The source-specific "next track" lookup (spec's `nextFor`): given the
    /// track that just finished, returns an identifier to queue next, or
    /// `None` if the source has nothing to suggest.
    async fn next_for(&self, last: &Track) -> Option<String>;
}

/// Coarse playback lifecycle, independent of the node's own `connected` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayerState {
    Idle,
    Playing,
    Paused,
    Destroyed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopMode {
    None,
    Track,
    Queue,
}

/// Observable events a host can subscribe to, mirroring the teacher's habit
/// of the manager reacting to `lavalink_track_start`/`lavalink_track_end`.
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    TrackStarted(Track),
    TrackEnded { track: Option<Track>, reason: node_link::TrackEndReason },
    QueueEmpty,
    Stuck(Track),
    Exception { track: Option<Track>, message: String },
    Destroyed,
    ConnectionError(String),
}

struct PlayerInner {
    state: PlayerState,
    queue: Queue,
    history: History,
    filters: FiltersController,
    current: Option<Track>,
    loop_mode: LoopMode,
    autoplay: bool,
    volume: u16,
    paused: bool,
    pending: UpdatePlayer,
    reconnect_attempts: u32,
    last_position_ms: u32,
    last_update_at: i64,
    /// When the reported position was first observed to have stopped
    /// advancing while playing, for stuck-by-position-stall detection.
    position_stall_since: Option<std::time::Instant>,
    /// Guards against dispatching more than one recovery per stall episode.
    stuck_recovery_dispatched: bool,
}

impl PlayerInner {
    fn new(config: &OrchestratorConfig) -> Self {
        Self {
            state: PlayerState::Idle,
            queue: Queue::new(config.queue_limit),
            history: History::new(config.history_limit),
            filters: FiltersController::new(),
            current: None,
            loop_mode: LoopMode::None,
            autoplay: false,
            volume: 100,
            paused: false,
            pending: UpdatePlayer::new(),
            reconnect_attempts: 0,
            last_position_ms: 0,
            last_update_at: 0,
            position_stall_since: None,
            stuck_recovery_dispatched: false,
        }
    }
}

/// Persisted snapshot of a player's state, for `autoResume`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub guild_id: u64,
    pub current: Option<Track>,
    pub position_ms: u32,
    pub volume: u16,
    pub loop_mode: LoopMode,
    pub queue: Vec<Track>,
    pub history: Vec<crate::model::HistoryEntry>,
}

/// A single guild's playback state machine. Cheaply cloneable; every clone
/// shares the same underlying lock, so the whole state machine behaves as a
/// single logical actor regardless of how many handles exist.
#[derive(Clone)]
pub struct Player {
    guild_id: u64,
    node: NodeClient,
    connection: Arc<RwLock<Connection>>,
    inner: Arc<Mutex<PlayerInner>>,
    config: Arc<OrchestratorConfig>,
    batch_scheduled: Arc<AtomicBool>,
    flush_scheduled: Arc<AtomicBool>,
    events: Arc<dyn Fn(u64, PlayerEvent) + Send + Sync>,
    resolver: Option<Arc<dyn PlaybackResolver>>,
}

impl Player {
    pub fn new(
        guild_id: u64,
        node: NodeClient,
        config: Arc<OrchestratorConfig>,
        events: Arc<dyn Fn(u64, PlayerEvent) + Send + Sync>,
        resolver: Option<Arc<dyn PlaybackResolver>>,
    ) -> Self {
        Self {
            guild_id,
            node,
            connection: Arc::new(RwLock::new(Connection::new(100))),
            inner: Arc::new(Mutex::new(PlayerInner::new(&config))),
            config,
            batch_scheduled: Arc::new(AtomicBool::new(false)),
            flush_scheduled: Arc::new(AtomicBool::new(false)),
            events,
            resolver,
        }
    }

    pub fn guild_id(&self) -> u64 {
        self.guild_id
    }

    pub fn node(&self) -> &NodeClient {
        &self.node
    }

    /// Swaps the bound node wholesale, for `Pool::migrate`. Does not restart
    /// playback; call [`Player::restart`] after reassigning the voice state.
    pub fn rebind_node(&mut self, node: NodeClient) {
        self.node = node;
    }

    pub async fn state(&self) -> PlayerState {
        self.inner.lock().await.state
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.connection.read().await.state
    }

    pub async fn current(&self) -> Option<Track> {
        self.inner.lock().await.current.clone()
    }

    pub async fn enqueue(&self, track: Track) -> bool {
        self.inner.lock().await.queue.append(track)
    }

    pub async fn enqueue_many(&self, tracks: Vec<Track>) -> usize {
        self.inner.lock().await.queue.append_many(tracks)
    }

    pub async fn queue_len(&self) -> usize {
        self.inner.lock().await.queue.len()
    }

    pub async fn set_loop(&self, mode: LoopMode) {
        self.inner.lock().await.loop_mode = mode;
    }

    pub async fn set_autoplay(&self, enabled: bool) {
        self.inner.lock().await.autoplay = enabled;
    }

    pub async fn autoplay(&self) -> bool {
        self.inner.lock().await.autoplay
    }

    pub async fn shuffle(&self) {
        self.inner.lock().await.queue.shuffle();
    }

    /// Shuffles the queue, keeping tracks in the owning player's recent
    /// history window toward the back.
    pub async fn smart_shuffle(&self) {
        let mut inner = self.inner.lock().await;
        let recent: Vec<String> = inner
            .history
            .entries()
            .iter()
            .map(|e| e.track.identifier.clone())
            .collect();
        inner.queue.smart_shuffle(&recent);
    }

    pub async fn search(&self, query: &str) -> Vec<Track> {
        self.inner.lock().await.queue.search(query).into_iter().cloned().collect()
    }

    pub async fn remove_matching<F: Fn(&Track) -> bool>(&self, predicate: F) -> usize {
        self.inner.lock().await.queue.remove_matching(predicate)
    }

    pub async fn by_source(&self, source_name: &str) -> Vec<Track> {
        self.inner.lock().await.queue.by_source(source_name).into_iter().cloned().collect()
    }

    pub async fn by_artist(&self, author: &str) -> Vec<Track> {
        self.inner.lock().await.queue.by_artist(author).into_iter().cloned().collect()
    }

    pub async fn by_title(&self, title: &str) -> Vec<Track> {
        self.inner.lock().await.queue.by_title(title).into_iter().cloned().collect()
    }

    pub async fn move_track(&self, from: usize, to: usize) -> bool {
        self.inner.lock().await.queue.move_track(from, to)
    }

    pub async fn swap(&self, a: usize, b: usize) -> bool {
        self.inner.lock().await.queue.swap(a, b)
    }

    pub async fn insert_at(&self, index: usize, track: Track) -> bool {
        self.inner.lock().await.queue.insert_at(index, track)
    }

    pub async fn remove_at(&self, index: usize) -> Option<Track> {
        self.inner.lock().await.queue.remove_at(index)
    }

    pub async fn queue_stats(&self) -> QueueStats {
        self.inner.lock().await.queue.stats()
    }

    pub async fn queue_snapshot(&self) -> Vec<Track> {
        self.inner.lock().await.queue.export()
    }

    /// Applies a voice-server-update fragment to this player's connection,
    /// scheduling a debounced flush once the binding completes or moves.
    pub async fn apply_voice_server(&self, endpoint: String, token: String) {
        let completed = {
            let mut conn = self.connection.write().await;
            conn.apply_server_update(endpoint, token)
        };
        if completed {
            self.schedule_voice_flush().await;
        }
    }

    /// Applies a voice-state-update fragment. Returns `true` if this caused
    /// the player to be torn down (the bot left/was removed from the channel).
    pub async fn apply_voice_state(
        &self,
        session_id: String,
        channel_id: Option<u64>,
        self_deaf: bool,
        self_mute: bool,
    ) -> bool {
        let event = {
            let mut conn = self.connection.write().await;
            conn.apply_state_update(session_id, channel_id, self_deaf, self_mute)
        };

        match event {
            Some(ConnectionEvent::Connected { .. }) | Some(ConnectionEvent::PlayerMoved { .. }) => {
                self.schedule_voice_flush().await;
                false
            }
            Some(ConnectionEvent::Disconnected) => {
                let _ = self.destroy(false).await;
                true
            }
            _ => false,
        }
    }

    async fn schedule_voice_flush(&self) {
        let events = self.events.clone();
        let guild_id = self.guild_id;
        connection::schedule_flush(
            self.connection.clone(),
            self.node.clone(),
            guild_id,
            self.config.voice_flush_delay(),
            self.config.max_reconnect_attempts,
            self.flush_scheduled.clone(),
            Arc::new(move |e| {
                if let ConnectionEvent::FlushFailed { error } = e {
                    events(guild_id, PlayerEvent::ConnectionError(error));
                }
            }),
        );
    }

    /// Starts playback: if nothing is currently playing, pops the queue head,
    /// resolving it first if it has no encoded blob yet, and pushes it
    /// batched with the current voice state and volume. Requires the voice
    /// binding to be complete; an unbound player leaves the track at the
    /// queue head rather than pushing a doomed update to the node.
    pub async fn play(&self) -> Result<()> {
        {
            let inner = self.inner.lock().await;
            if inner.current.is_some() {
                return Ok(());
            }
        }

        if self.connection.read().await.state != ConnectionState::Connected {
            return Err(Error::NotConnected);
        }

        let track = {
            let mut inner = self.inner.lock().await;
            let Some(track) = inner.queue.pop_front() else {
                return Ok(());
            };
            track
        };

        let track = self.resolve_if_needed(track).await?;

        let Some(encoded) = track.encoded.clone() else {
            return Err(Error::Validation("track has not been resolved".into()));
        };

        let mut inner = self.inner.lock().await;
        inner.pending.encoded_track(Some(encoded)).paused(false);
        inner.current = Some(track);
        inner.paused = false;
        drop(inner);

        self.schedule_batch_flush();
        Ok(())
    }

    /// Resolves `track` against the injected [`PlaybackResolver`] if it has
    /// no encoded blob yet. Passes already-resolved tracks through untouched
    /// and errors if no resolver was configured.
    async fn resolve_if_needed(&self, track: Track) -> Result<Track> {
        if track.is_resolved() {
            return Ok(track);
        }
        match &self.resolver {
            Some(resolver) => resolver.resolve(track).await,
            None => Err(Error::Validation("track has not been resolved".into())),
        }
    }

    pub async fn pause(&self, paused: bool) {
        let mut inner = self.inner.lock().await;
        inner.paused = paused;
        inner.state = if paused { PlayerState::Paused } else { PlayerState::Playing };
        inner.pending.paused(paused);
        drop(inner);
        self.schedule_batch_flush();
    }

    pub async fn seek(&self, position_ms: u32) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(current) = &inner.current {
            if !current.is_stream && position_ms > current.length {
                return Err(Error::Validation("seek position past track length".into()));
            }
        }
        inner.pending.position(position_ms);
        drop(inner);
        self.schedule_batch_flush();
        Ok(())
    }

    pub async fn set_volume(&self, volume: u16) -> Result<()> {
        if volume > 1000 {
            return Err(Error::Validation("volume must be in [0, 1000]".into()));
        }
        {
            let mut inner = self.inner.lock().await;
            inner.volume = volume;
            inner.pending.volume(volume);
        }
        {
            let mut conn = self.connection.write().await;
            conn.last_known_volume = volume;
        }
        self.schedule_batch_flush();
        Ok(())
    }

    pub async fn apply_filter_preset(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.filters.apply_preset(name)?;
        let payload = inner.filters.payload();
        inner.pending.filters(payload);
        drop(inner);
        self.schedule_batch_flush();
        Ok(())
    }

    pub async fn set_bassboost(&self, v: Option<f32>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.filters.set_bassboost(v)?;
        let payload = inner.filters.payload();
        inner.pending.filters(payload);
        drop(inner);
        self.schedule_batch_flush();
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.current = None;
        inner.state = PlayerState::Idle;
        inner.pending.encoded_track(None);
        drop(inner);
        self.schedule_batch_flush();
        Ok(())
    }

    /// Idempotent; a second call on an already-destroyed player is a no-op.
    pub async fn destroy(&self, disconnect: bool) -> Result<()> {
        {
            let mut inner = self.inner.lock().await;
            if inner.state == PlayerState::Destroyed {
                return Ok(());
            }
            inner.state = PlayerState::Destroyed;
        }

        if let Err(e) = self.node.destroy_player(self.guild_id).await {
            warn!("destroy_player failed for guild {}: {}", self.guild_id, e);
        }

        if disconnect {
            self.connection.write().await.destroy();
        }

        (self.events)(self.guild_id, PlayerEvent::Destroyed);
        Ok(())
    }

    /// Re-pushes the full player state (voice, track, pause, volume, filters)
    /// in one update. Used after a node migration or a resumed connection.
    pub async fn restart(&self) -> Result<()> {
        let voice = self.connection.read().await.to_voice_state();
        let mut inner = self.inner.lock().await;

        let mut update = UpdatePlayer::new();
        if let Some(voice) = voice {
            update.voice_state(voice);
        }
        if let Some(track) = &inner.current {
            if let Some(encoded) = &track.encoded {
                update.encoded_track(Some(encoded.clone()));
            }
            update.position(inner.last_position_ms);
        }
        update.paused(inner.paused).volume(inner.volume);
        update.filters(inner.filters.payload());
        inner.pending = UpdatePlayer::new();
        drop(inner);

        self.node.update_player(self.guild_id, true, &update).await?;
        Ok(())
    }

    fn schedule_batch_flush(&self) {
        if self.batch_scheduled.swap(true, Ordering::AcqRel) {
            return;
        }

        let player = self.clone();
        tokio::spawn(async move {
            sleep(player.config.player_batch_delay()).await;
            player.batch_scheduled.store(false, Ordering::Release);

            let update = {
                let mut inner = player.inner.lock().await;
                std::mem::replace(&mut inner.pending, UpdatePlayer::new())
            };

            if let Err(e) = player.node.update_player(player.guild_id, true, &update).await {
                warn!("batched update failed for guild {}: {}", player.guild_id, e);
                (player.events)(player.guild_id, PlayerEvent::ConnectionError(e.to_string()));
            }
        });
    }

    /// Tracks whether `position` is advancing while playing. A position that
    /// stays put for `stuckThreshold` while connected and unpaused gets one
    /// voice-recovery attempt, distinct from the node's own `TrackStuckEvent`
    /// (which fires on decode stalls, not on a frozen voice pipe).
    pub async fn on_player_update(&self, update: node_link::PlayerUpdate) {
        let position = update.state.position.unwrap_or(0);
        let mut trigger_recovery = false;

        {
            let mut inner = self.inner.lock().await;
            let playing = update.state.connected && !inner.paused && inner.current.is_some();

            if playing && position == inner.last_position_ms {
                let since = *inner
                    .position_stall_since
                    .get_or_insert_with(std::time::Instant::now);
                if !inner.stuck_recovery_dispatched && since.elapsed() >= self.config.stuck_threshold() {
                    inner.stuck_recovery_dispatched = true;
                    trigger_recovery = true;
                }
            } else {
                inner.position_stall_since = None;
                inner.stuck_recovery_dispatched = false;
            }

            inner.last_position_ms = position;
            inner.last_update_at = update.state.time;
        }

        if trigger_recovery {
            warn!(
                "position stalled at {}ms for guild {}, triggering voice recovery",
                position, self.guild_id
            );
            let player = self.clone();
            tokio::spawn(async move {
                if let Err(e) = player.restart().await {
                    warn!("stuck-recovery restart failed: {}", e);
                }
            });
        }
    }

    pub async fn on_track_start(&self, _event: node_link::TrackStartEvent) {
        let track = {
            let mut inner = self.inner.lock().await;
            inner.reconnect_attempts = 0;
            inner.state = PlayerState::Playing;
            inner.current.clone()
        };
        if let Some(track) = track {
            (self.events)(self.guild_id, PlayerEvent::TrackStarted(track));
        }
    }

    /// Implements the track-end advance order: a client-initiated replace is
    /// ignored, otherwise the finished track is recorded in history and the
    /// next track is chosen by loop mode, falling through to queue advance,
    /// then to queue-empty.
    pub async fn on_track_end(&self, event: node_link::TrackEndEvent) {
        if event.reason == node_link::TrackEndReason::Replaced {
            return;
        }

        self.advance(event.reason).await;
    }

    pub async fn on_track_exception(&self, event: node_link::TrackExceptionEvent) {
        let track = self.inner.lock().await.current.clone();
        (self.events)(
            self.guild_id,
            PlayerEvent::Exception {
                track,
                message: event.exception.message.unwrap_or_default(),
            },
        );
        self.advance(node_link::TrackEndReason::LoadFailed).await;
    }

    pub async fn on_track_stuck(&self, event: node_link::TrackStuckEvent) {
        let track = self.inner.lock().await.current.clone();
        if let Some(track) = track {
            (self.events)(self.guild_id, PlayerEvent::Stuck(track));
        }
        debug!(
            "track stuck for guild {} after {}ms",
            self.guild_id, event.threshold_ms
        );
        self.advance(node_link::TrackEndReason::LoadFailed).await;
    }

    /// `reason != Stopped` is the shared guard for both loop modes: a client-
    /// initiated stop must not replay or re-append, but any other end reason
    /// (finished, load failed, cleanup) does. If the voice binding is down,
    /// the queue is left untouched and the player simply goes idle — there is
    /// no node to push a next track to. Autoplay (§9's `nextFor`) only fires
    /// when the queue is otherwise exhausted and the end wasn't a stop.
    async fn advance(&self, reason: node_link::TrackEndReason) {
        let now_ms = {
            let inner = self.inner.lock().await;
            inner.last_update_at
        };
        let stopped = reason == node_link::TrackEndReason::Stopped;
        let connected = self.connection.read().await.state == ConnectionState::Connected;

        let finished_track;
        let autoplay_enabled;

        {
            let mut inner = self.inner.lock().await;
            finished_track = inner.current.take();

            if let Some(track) = &finished_track {
                inner.history.push(track.clone(), now_ms);
            }

            inner.current = if !connected {
                None
            } else {
                match inner.loop_mode {
                    LoopMode::Track if !stopped => finished_track.clone(),
                    LoopMode::Queue if !stopped => {
                        if let Some(track) = finished_track.clone() {
                            inner.queue.append(track);
                        }
                        inner.queue.pop_front()
                    }
                    _ => inner.queue.pop_front(),
                }
            };

            autoplay_enabled = inner.autoplay;
        }

        if connected && !stopped && autoplay_enabled && self.inner.lock().await.current.is_none() {
            if let (Some(resolver), Some(last)) = (&self.resolver, &finished_track) {
                if let Some(identifier) = resolver.next_for(last).await {
                    let candidate = Track::unresolved(&identifier, &last.source_name, last.requester);
                    match resolver.resolve(candidate).await {
                        Ok(resolved) => self.inner.lock().await.current = Some(resolved),
                        Err(e) => debug!("autoplay resolve failed for guild {}: {}", self.guild_id, e),
                    }
                }
            }
        }

        let emitted_empty = {
            let mut inner = self.inner.lock().await;
            let next_encoded = inner.current.as_ref().and_then(|t| t.encoded.clone());
            let emitted_empty = inner.current.is_none();
            if emitted_empty {
                inner.state = PlayerState::Idle;
            }
            inner.pending.encoded_track(next_encoded);
            emitted_empty
        };

        (self.events)(
            self.guild_id,
            PlayerEvent::TrackEnded {
                track: finished_track,
                reason,
            },
        );

        if emitted_empty {
            (self.events)(self.guild_id, PlayerEvent::QueueEmpty);
        }

        self.schedule_batch_flush();
    }

    pub async fn on_websocket_closed(&self, event: node_link::WebSocketClosedEvent) {
        warn!(
            "voice websocket closed for guild {} (code={}, remote={})",
            self.guild_id, event.code, event.by_remote
        );

        let attempts = {
            let mut inner = self.inner.lock().await;
            inner.reconnect_attempts += 1;
            inner.reconnect_attempts
        };

        if attempts > self.config.max_reconnect_attempts {
            (self.events)(
                self.guild_id,
                PlayerEvent::ConnectionError(format!(
                    "voice connection failed after {attempts} attempts"
                )),
            );
            return;
        }

        let player = self.clone();
        let delay = self.config.reconnect_delay();
        tokio::spawn(async move {
            sleep(delay).await;
            if let Err(e) = player.restart().await {
                warn!("voice recovery restart failed: {}", e);
            }
        });
    }

    pub async fn on_segments_loaded(&self, event: node_link::SegmentsLoadedEvent) {
        debug!(
            "{} sponsorblock segments loaded for guild {}",
            event.segments.len(),
            self.guild_id
        );
    }

    pub async fn on_segment_skipped(&self, event: node_link::SegmentSkippedEvent) {
        debug!(
            "sponsorblock segment '{}' skipped for guild {}",
            event.segment.category, self.guild_id
        );
    }

    pub async fn on_chapters_loaded(&self, event: node_link::ChaptersLoadedEvent) {
        debug!(
            "{} chapters loaded for guild {}",
            event.chapters.len(),
            self.guild_id
        );
    }

    pub async fn on_chapter_started(&self, event: node_link::ChapterStartedEvent) {
        debug!(
            "chapter '{}' started for guild {}",
            event.chapter.name, self.guild_id
        );
    }

    /// Serializes this player's resumable state, clamping position to the
    /// current track's length.
    pub async fn to_snapshot(&self) -> PlayerSnapshot {
        let inner = self.inner.lock().await;
        let position_ms = match &inner.current {
            Some(track) if !track.is_stream => inner.last_position_ms.min(track.length),
            _ => inner.last_position_ms,
        };

        PlayerSnapshot {
            guild_id: self.guild_id,
            current: inner.current.clone(),
            position_ms,
            volume: inner.volume,
            loop_mode: inner.loop_mode,
            queue: inner.queue.export(),
            history: inner.history.entries().to_vec(),
        }
    }

    pub async fn restore_snapshot(&self, snapshot: PlayerSnapshot) {
        let mut inner = self.inner.lock().await;
        inner.current = snapshot.current;
        inner.last_position_ms = snapshot.position_ms;
        inner.volume = snapshot.volume;
        inner.loop_mode = snapshot.loop_mode;
        inner.queue = Queue::from_tracks(snapshot.queue, self.config.queue_limit);
        for entry in snapshot.history {
            inner.history.push(entry.track, entry.played_at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct NoopHandler;

    #[async_trait::async_trait]
    impl node_link::Handler for NoopHandler {}

    fn disconnected_node() -> NodeClient {
        let config = node_link::NodeConfig::new("localhost:1", "secret");
        NodeClient::new(config, 1, NoopHandler).unwrap()
    }

    fn test_player(config: OrchestratorConfig) -> (Player, Arc<StdMutex<Vec<PlayerEvent>>>) {
        test_player_with_resolver(config, None)
    }

    fn test_player_with_resolver(
        config: OrchestratorConfig,
        resolver: Option<Arc<dyn PlaybackResolver>>,
    ) -> (Player, Arc<StdMutex<Vec<PlayerEvent>>>) {
        let events = Arc::new(StdMutex::new(Vec::new()));
        let sink = events.clone();
        let player = Player::new(
            1,
            disconnected_node(),
            Arc::new(config),
            Arc::new(move |_guild_id, event| sink.lock().unwrap().push(event)),
            resolver,
        );
        (player, events)
    }

    /// Marks a test player's voice binding as complete without running the
    /// real gateway handshake, so `play()`/`advance()` don't bail on
    /// `NotConnected`.
    async fn mark_connected(player: &Player) {
        player.connection.write().await.state = ConnectionState::Connected;
    }

    fn resolved_track(id: &str) -> Track {
        let mut track = Track::unresolved(id, "test", None);
        track.encoded = Some(format!("encoded-{id}"));
        track.length = 10_000;
        track
    }

    fn ended(reason: node_link::TrackEndReason) -> node_link::TrackEndEvent {
        node_link::TrackEndEvent {
            guild_id: "1".into(),
            encoded_track: "irrelevant".into(),
            reason,
        }
    }

    #[tokio::test]
    async fn loop_track_replays_the_same_track_on_finished() {
        let (player, events) = test_player(OrchestratorConfig::default());
        player.set_loop(LoopMode::Track).await;
        player.enqueue(resolved_track("a")).await;
        mark_connected(&player).await;
        player.play().await.unwrap();

        player.on_track_end(ended(node_link::TrackEndReason::Finished)).await;

        assert_eq!(player.current().await.unwrap().identifier, "a");
        assert!(events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, PlayerEvent::TrackEnded { .. })));
    }

    #[tokio::test]
    async fn loop_queue_reappends_the_finished_track_behind_the_next_one() {
        let (player, _events) = test_player(OrchestratorConfig::default());
        player.set_loop(LoopMode::Queue).await;
        player.enqueue(resolved_track("a")).await;
        player.enqueue(resolved_track("b")).await;
        mark_connected(&player).await;
        player.play().await.unwrap();
        assert_eq!(player.current().await.unwrap().identifier, "a");

        player.on_track_end(ended(node_link::TrackEndReason::Finished)).await;

        assert_eq!(player.current().await.unwrap().identifier, "b");
        assert_eq!(player.queue_len().await, 1);
    }

    #[tokio::test]
    async fn no_loop_advances_to_the_next_queued_track() {
        let (player, _events) = test_player(OrchestratorConfig::default());
        player.enqueue(resolved_track("a")).await;
        player.enqueue(resolved_track("b")).await;
        mark_connected(&player).await;
        player.play().await.unwrap();

        player.on_track_end(ended(node_link::TrackEndReason::Finished)).await;

        assert_eq!(player.current().await.unwrap().identifier, "b");
        assert_eq!(player.queue_len().await, 0);
    }

    #[tokio::test]
    async fn exhausted_queue_goes_idle_and_emits_queue_empty() {
        let (player, events) = test_player(OrchestratorConfig::default());
        player.enqueue(resolved_track("a")).await;
        mark_connected(&player).await;
        player.play().await.unwrap();

        player.on_track_end(ended(node_link::TrackEndReason::Finished)).await;

        assert!(player.current().await.is_none());
        assert_eq!(player.state().await, PlayerState::Idle);
        assert!(events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, PlayerEvent::QueueEmpty)));
    }

    #[tokio::test]
    async fn a_client_initiated_replace_does_not_advance_the_queue() {
        let (player, _events) = test_player(OrchestratorConfig::default());
        player.enqueue(resolved_track("a")).await;
        player.enqueue(resolved_track("b")).await;
        mark_connected(&player).await;
        player.play().await.unwrap();

        player.on_track_end(ended(node_link::TrackEndReason::Replaced)).await;

        assert_eq!(player.current().await.unwrap().identifier, "a");
        assert_eq!(player.queue_len().await, 2);
    }

    fn position_sample(position: u32) -> node_link::PlayerUpdate {
        node_link::PlayerUpdate {
            guild_id: "1".into(),
            state: node_link::PlayerState {
                time: 0,
                position: Some(position),
                connected: true,
                ping: 10,
            },
        }
    }

    #[tokio::test]
    async fn a_frozen_position_past_the_threshold_arms_recovery_exactly_once() {
        let mut config = OrchestratorConfig::default();
        config.stuck_threshold_ms = 0;
        let (player, _events) = test_player(config);
        player.enqueue(resolved_track("a")).await;
        mark_connected(&player).await;
        player.play().await.unwrap();

        player.on_player_update(position_sample(5_000)).await;
        assert!(!player.inner.lock().await.stuck_recovery_dispatched);

        player.on_player_update(position_sample(5_000)).await;
        assert!(player.inner.lock().await.stuck_recovery_dispatched);

        player.on_player_update(position_sample(5_000)).await;
        assert!(player.inner.lock().await.stuck_recovery_dispatched);
    }

    #[tokio::test]
    async fn an_advancing_position_never_arms_recovery() {
        let mut config = OrchestratorConfig::default();
        config.stuck_threshold_ms = 0;
        let (player, _events) = test_player(config);
        player.enqueue(resolved_track("a")).await;
        mark_connected(&player).await;
        player.play().await.unwrap();

        player.on_player_update(position_sample(1_000)).await;
        player.on_player_update(position_sample(2_000)).await;
        player.on_player_update(position_sample(3_000)).await;

        assert!(!player.inner.lock().await.stuck_recovery_dispatched);
    }

    #[tokio::test]
    async fn a_paused_player_never_arms_recovery() {
        let mut config = OrchestratorConfig::default();
        config.stuck_threshold_ms = 0;
        let (player, _events) = test_player(config);
        player.enqueue(resolved_track("a")).await;
        mark_connected(&player).await;
        player.play().await.unwrap();
        player.pause(true).await;

        player.on_player_update(position_sample(5_000)).await;
        player.on_player_update(position_sample(5_000)).await;

        assert!(!player.inner.lock().await.stuck_recovery_dispatched);
    }

    struct StubResolver {
        next_identifier: Option<String>,
    }

    #[async_trait::async_trait]
    impl PlaybackResolver for StubResolver {
        async fn resolve(&self, mut track: Track) -> Result<Track> {
            track.encoded = Some(format!("encoded-{}", track.identifier));
            Ok(track)
        }

        async fn next_for(&self, _last: &Track) -> Option<String> {
            self.next_identifier.clone()
        }
    }

    #[tokio::test]
    async fn play_errors_when_voice_binding_is_incomplete() {
        let (player, _events) = test_player(OrchestratorConfig::default());
        player.enqueue(resolved_track("a")).await;
        assert!(matches!(player.play().await, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn loop_track_does_not_replay_on_explicit_stop() {
        let (player, _events) = test_player(OrchestratorConfig::default());
        player.set_loop(LoopMode::Track).await;
        player.enqueue(resolved_track("a")).await;
        mark_connected(&player).await;
        player.play().await.unwrap();

        player.on_track_end(ended(node_link::TrackEndReason::Stopped)).await;

        assert!(player.current().await.is_none());
    }

    #[tokio::test]
    async fn loop_queue_does_not_reappend_on_explicit_stop() {
        let (player, _events) = test_player(OrchestratorConfig::default());
        player.set_loop(LoopMode::Queue).await;
        player.enqueue(resolved_track("a")).await;
        player.enqueue(resolved_track("b")).await;
        mark_connected(&player).await;
        player.play().await.unwrap();

        player.on_track_end(ended(node_link::TrackEndReason::Stopped)).await;

        assert_eq!(player.current().await.unwrap().identifier, "b");
        assert_eq!(player.queue_len().await, 0);
    }

    #[tokio::test]
    async fn autoplay_resolves_and_queues_a_suggested_track_when_queue_is_empty() {
        let resolver: Arc<dyn PlaybackResolver> = Arc::new(StubResolver {
            next_identifier: Some("next-track".into()),
        });
        let (player, _events) =
            test_player_with_resolver(OrchestratorConfig::default(), Some(resolver));
        player.set_autoplay(true).await;
        player.enqueue(resolved_track("a")).await;
        mark_connected(&player).await;
        player.play().await.unwrap();

        player.on_track_end(ended(node_link::TrackEndReason::Finished)).await;

        assert_eq!(player.current().await.unwrap().identifier, "next-track");
    }

    #[tokio::test]
    async fn autoplay_does_nothing_without_a_resolver() {
        let (player, events) = test_player(OrchestratorConfig::default());
        player.set_autoplay(true).await;
        player.enqueue(resolved_track("a")).await;
        mark_connected(&player).await;
        player.play().await.unwrap();

        player.on_track_end(ended(node_link::TrackEndReason::Finished)).await;

        assert!(player.current().await.is_none());
        assert!(events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, PlayerEvent::QueueEmpty)));
    }
}
