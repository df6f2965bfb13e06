//! Top-level facade: owns the node pool and the guild-keyed player map, and
//! demultiplexes gateway voice events onto the right player.
//!
//! Grounded on the teacher's `HydrogenManager`: `connect_lavalink`/`init` for
//! node registration and player creation, `update_voice_state`/
//! `update_voice_server` for gateway demultiplexing.

use std::{collections::HashMap, path::Path, sync::Arc};

use node_link::{NodeClient, NodeConfig};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::{
    model::Track,
    player::{Player, PlayerEvent, PlaybackResolver},
    pool::Pool,
    snapshot,
    Error, NodeHandler, OrchestratorConfig, Result,
};

/// Bridges `Player`'s resolve-on-play and autoplay hooks back onto this
/// orchestrator's pool, without `Player` depending on `Orchestrator` itself.
struct OrchestratorResolver {
    pool: Pool,
    autoplay: Option<Arc<dyn Fn(&Track) -> Option<String> + Send + Sync>>,
}

#[async_trait::async_trait]
impl PlaybackResolver for OrchestratorResolver {
    async fn resolve(&self, track: Track) -> Result<Track> {
        if track.is_resolved() {
            return Ok(track);
        }
        let node = self.pool.least_used().await.ok_or(Error::NotConnected)?;
        let identifier = track.uri.clone().unwrap_or_else(|| track.identifier.clone());
        let requester = track.requester;
        let loaded = node.rest().load_tracks(&identifier).await?;
        match loaded.load_type {
            node_link::LoadResultType::Track => loaded
                .tracks
                .into_iter()
                .next()
                .map(|t| Track::from_node_track(t, requester))
                .ok_or_else(|| Error::Contract("track load-type with no track data".into())),
            node_link::LoadResultType::Error => {
                let message = loaded
                    .exception
                    .and_then(|e| e.message)
                    .unwrap_or_else(|| "node reported a load error".to_owned());
                Err(Error::Contract(message))
            }
            _ => Err(Error::Validation(format!("no playable match for '{identifier}'"))),
        }
    }

    async fn next_for(&self, last: &Track) -> Option<String> {
        self.autoplay.as_ref().and_then(|f| f(last))
    }
}

/// The mapped shape of a `loadTracks` response: the load-type distinction
/// callers must be able to observe, per spec rather than a flattened list.
#[derive(Debug, Clone)]
pub enum ResolveResult {
    Track(Track),
    Playlist {
        name: Option<String>,
        selected_track: Option<i32>,
        tracks: Vec<Track>,
    },
    Search(Vec<Track>),
    Empty,
}

pub struct Orchestrator {
    pool: Pool,
    players: Arc<RwLock<HashMap<u64, Player>>>,
    config: Arc<OrchestratorConfig>,
    events: Arc<dyn Fn(u64, PlayerEvent) + Send + Sync>,
    resolver: Arc<dyn PlaybackResolver>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, events: Arc<dyn Fn(u64, PlayerEvent) + Send + Sync>) -> Self {
        let config = Arc::new(config);
        let pool = Pool::new(config.clone());
        Self {
            resolver: Arc::new(OrchestratorResolver {
                pool: pool.clone(),
                autoplay: None,
            }),
            pool,
            players: Arc::new(RwLock::new(HashMap::new())),
            config,
            events,
        }
    }

    /// Installs the source-specific "next track" lookup (spec's `nextFor`)
    /// every player created from this point on will use for autoplay.
    /// Players already created via [`Orchestrator::create_connection`] keep
    /// whatever resolver they were built with.
    pub fn set_autoplay_resolver(&mut self, resolver: Arc<dyn Fn(&Track) -> Option<String> + Send + Sync>) {
        self.resolver = Arc::new(OrchestratorResolver {
            pool: self.pool.clone(),
            autoplay: Some(resolver),
        });
    }

    /// Connects a new audio node and registers it with the pool. The
    /// returned client is already wired to demultiplex events onto whatever
    /// player matches their guild id.
    pub async fn add_node(&self, node_config: NodeConfig, user_id: u64) -> Result<NodeClient> {
        let handler = NodeHandler::new(self.players.clone());
        let node = NodeClient::new(node_config, user_id, handler)?;
        node.connect().await?;
        self.pool.add_node(node.clone()).await;
        Ok(node)
    }

    pub async fn player_count(&self) -> usize {
        self.players.read().await.len()
    }

    pub async fn player(&self, guild_id: u64) -> Option<Player> {
        self.players.read().await.get(&guild_id).cloned()
    }

    /// Creates (or returns the existing) player for a guild, picking a node
    /// via `region` if given, else the least-used node in the pool.
    pub async fn create_connection(&self, guild_id: u64, region: Option<&str>) -> Result<Player> {
        if let Some(player) = self.player(guild_id).await {
            return Ok(player);
        }

        let node = match region {
            Some(r) => self.pool.for_region(r).await,
            None => self.pool.least_used().await,
        }
        .ok_or(Error::NotConnected)?;

        let player = Player::new(
            guild_id,
            node,
            self.config.clone(),
            self.events.clone(),
            Some(self.resolver.clone()),
        );
        self.players.write().await.insert(guild_id, player.clone());
        info!("created player for guild {}", guild_id);
        Ok(player)
    }

    /// Applies a `VOICE_SERVER_UPDATE` to the addressed guild's player, if one exists.
    pub async fn route_voice_server_update(&self, guild_id: u64, endpoint: String, token: String) {
        if let Some(player) = self.player(guild_id).await {
            player.apply_voice_server(endpoint, token).await;
        }
    }

    /// Applies a `VOICE_STATE_UPDATE` for the bot's own user to the addressed
    /// guild's player, if one exists, removing the player on disconnect.
    pub async fn route_voice_state_update(
        &self,
        guild_id: u64,
        session_id: String,
        channel_id: Option<u64>,
        self_deaf: bool,
        self_mute: bool,
    ) {
        let Some(player) = self.player(guild_id).await else {
            return;
        };

        let torn_down = player
            .apply_voice_state(session_id, channel_id, self_deaf, self_mute)
            .await;

        if torn_down {
            self.players.write().await.remove(&guild_id);
        }
    }

    pub async fn destroy(&self, guild_id: u64) -> Result<()> {
        let Some(player) = self.player(guild_id).await else {
            return Ok(());
        };
        player.destroy(true).await?;
        self.players.write().await.remove(&guild_id);
        Ok(())
    }

    /// Runs the pool's periodic rebalance pass once. Callers typically drive
    /// this from a `tokio::time::interval` loop at `rebalanceInterval`.
    pub async fn rebalance(&self) {
        self.pool.rebalance(&self.players).await;
    }

    /// Resolves `query` against `node` (or the least-used pool node if
    /// `node` is `None`). The identifier sent to `loadTracks` is `query`
    /// as-is when it is already a URL, else `source:query`. A raw (non-URL)
    /// query that comes back `empty` is retried twice against platform
    /// track-page URLs — a bare title search's best-effort fallback — and
    /// the first non-empty result wins. The node's load-type distinction
    /// (single track, playlist, search list, empty) is preserved rather than
    /// flattened, so callers can tell a playlist from a bare search.
    pub async fn resolve(
        &self,
        query: &str,
        source: Option<&str>,
        requester: Option<u64>,
        node: Option<&NodeClient>,
    ) -> Result<ResolveResult> {
        let node = match node {
            Some(node) => node.clone(),
            None => self.pool.least_used().await.ok_or(Error::NotConnected)?,
        };

        let is_url = query.starts_with("http://") || query.starts_with("https://");
        let identifier = if is_url {
            query.to_owned()
        } else if let Some(source) = source {
            format!("{source}:{query}")
        } else {
            query.to_owned()
        };

        debug!("resolving '{}'", identifier);
        let mut loaded = node.rest().load_tracks(&identifier).await?;

        if !is_url && matches!(loaded.load_type, node_link::LoadResultType::Empty) {
            for fallback in [
                format!("https://open.spotify.com/track/{query}"),
                format!("https://www.youtube.com/watch?v={query}"),
            ] {
                debug!("resolve fallback: retrying '{}' as '{}'", query, fallback);
                match node.rest().load_tracks(&fallback).await {
                    Ok(result) if !matches!(result.load_type, node_link::LoadResultType::Empty) => {
                        loaded = result;
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        debug!("resolve fallback attempt failed: {}", e);
                        continue;
                    }
                }
            }
        }

        Ok(match loaded.load_type {
            node_link::LoadResultType::Track => {
                let track = loaded
                    .tracks
                    .into_iter()
                    .next()
                    .map(|t| Track::from_node_track(t, requester))
                    .ok_or_else(|| Error::Contract("track load-type with no track data".into()))?;
                ResolveResult::Track(track)
            }
            node_link::LoadResultType::Playlist => ResolveResult::Playlist {
                name: loaded.playlist_info.as_ref().and_then(|p| p.name.clone()),
                selected_track: loaded.playlist_info.as_ref().and_then(|p| p.selected_track),
                tracks: loaded
                    .tracks
                    .into_iter()
                    .map(|t| Track::from_node_track(t, requester))
                    .collect(),
            },
            node_link::LoadResultType::Search => ResolveResult::Search(
                loaded
                    .tracks
                    .into_iter()
                    .map(|t| Track::from_node_track(t, requester))
                    .collect(),
            ),
            node_link::LoadResultType::Empty => ResolveResult::Empty,
            node_link::LoadResultType::Error => {
                let message = loaded
                    .exception
                    .and_then(|e| e.message)
                    .unwrap_or_else(|| "node reported a load error".to_owned());
                return Err(Error::Contract(message));
            }
        })
    }

    /// Persists every player with a current track or non-empty queue.
    pub async fn save_players_state<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let players = self.players.read().await;
        let mut snapshots = HashMap::new();
        for (guild_id, player) in players.iter() {
            let has_current = player.current().await.is_some();
            let has_queue = player.queue_len().await > 0;
            if has_current || has_queue {
                snapshots.insert(*guild_id, player.to_snapshot().await);
            }
        }
        snapshot::save_players_state(path, snapshots).await
    }

    /// Restores previously-persisted players, creating each one on the
    /// least-used node before replaying its snapshot.
    pub async fn load_players_state<P: AsRef<Path>>(&self, path: P) -> Result<usize> {
        let snapshots = snapshot::load_players_state(path).await?;
        let count = snapshots.len();
        for (guild_id, snapshot) in snapshots {
            let player = self.create_connection(guild_id, None).await?;
            player.restore_snapshot(snapshot).await;
        }
        Ok(count)
    }
}
