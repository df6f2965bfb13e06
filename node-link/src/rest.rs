use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use moka::sync::Cache;
use rand::Rng;
use reqwest::{
    header::{HeaderMap, InvalidHeaderValue},
    Client, Method, StatusCode,
};
use serde::{Deserialize, Serialize};
use tokio::{sync::OnceCell, time::sleep};
use tracing::{debug, warn};

use crate::{parse_response, Error, NodeConfig, Result, CLIENT_NAME};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
/// Error response returned by an audio node's REST API.
pub struct ErrorResponse {
    pub timestamp: u64,
    pub status: u16,
    pub error: String,
    pub trace: Option<String>,
    pub message: String,
    pub path: String,
}

#[derive(Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
/// Voice credentials an audio node needs to join a voice channel. Supplied
/// by the host's chat-gateway driver via the orchestrator's `Connection`.
pub struct VoiceState {
    pub token: String,
    pub endpoint: String,
    pub session_id: String,

    #[serde(skip_serializing)]
    pub connected: bool,
    #[serde(skip_serializing)]
    pub ping: i32,
}

impl VoiceState {
    pub fn new(token: &str, endpoint: &str, session_id: &str) -> Self {
        Self {
            token: token.to_owned(),
            endpoint: endpoint.to_owned(),
            session_id: session_id.to_owned(),
            connected: false,
            ping: -1,
        }
    }
}

#[derive(Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
/// Partial update sent to `PATCH /v4/sessions/{id}/players/{guildId}`. Only
/// set fields are serialized.
pub struct UpdatePlayer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoded_track: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<Option<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<crate::Filters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoiceState>,
}

impl UpdatePlayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encoded_track(&mut self, encoded_track: Option<String>) -> &mut Self {
        if self.identifier.is_none() {
            self.encoded_track = Some(encoded_track);
        }
        self
    }

    pub fn identifier(&mut self, identifier: &str) -> &mut Self {
        if self.encoded_track.is_none() {
            self.identifier = Some(identifier.to_owned());
        }
        self
    }

    pub fn position(&mut self, position: u32) -> &mut Self {
        self.position = Some(position);
        self
    }

    pub fn end_time(&mut self, end_time: Option<u32>) -> &mut Self {
        self.end_time = Some(end_time);
        self
    }

    pub fn volume(&mut self, volume: u16) -> &mut Self {
        self.volume = Some(volume);
        self
    }

    pub fn paused(&mut self, paused: bool) -> &mut Self {
        self.paused = Some(paused);
        self
    }

    pub fn filters(&mut self, filters: crate::Filters) -> &mut Self {
        self.filters = Some(filters);
        self
    }

    pub fn voice_state(&mut self, voice_state: VoiceState) -> &mut Self {
        self.voice = Some(voice_state);
        self
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
/// The player for a guild as reported by an audio node.
pub struct Player {
    pub guild_id: String,
    pub track: Option<Track>,
    pub volume: u16,
    pub paused: bool,
    pub voice: VoiceState,
}

#[derive(Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
/// A single audio track as resolved by an audio node.
pub struct Track {
    /// Opaque, node-defined blob. The only field the node needs back to play it.
    pub encoded: String,
    pub info: TrackInfo,
}

#[derive(Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub identifier: String,
    pub is_seekable: bool,
    pub author: String,
    pub length: u32,
    pub is_stream: bool,
    pub position: u32,
    pub title: String,
    pub uri: Option<String>,
    pub source_name: String,
    #[serde(default)]
    pub isrc: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub artwork_url: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
/// Response for a `loadTracks` request.
pub struct TrackLoading {
    pub load_type: LoadResultType,
    #[serde(default)]
    pub tracks: Vec<Track>,
    #[serde(default)]
    pub playlist_info: Option<PlaylistInfo>,
    pub exception: Option<crate::Exception>,
}

#[derive(Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LoadResultType {
    Track,
    Playlist,
    Search,
    Empty,
    Error,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistInfo {
    pub name: Option<String>,
    pub selected_track: Option<i32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
/// Node capability probe returned by `GET /v4/info`.
pub struct NodeInfo {
    pub version: NodeVersion,
    pub source_managers: Vec<String>,
    pub filters: Vec<String>,
    pub plugins: Vec<NodePlugin>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeVersion {
    pub semver: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePlugin {
    pub name: String,
    pub version: String,
}

const GET_CACHE_TTL: Duration = Duration::from_secs(10);
const TRACK_CACHE_TTL: Duration = Duration::from_secs(300);

type Dedup = DashMap<String, Arc<OnceCell<std::result::Result<Vec<u8>, String>>>>;

/// Per-node REST transport: retries, timeouts, GET/track-load caching, and
/// in-flight request deduplication. Stateless beyond its caches — session
/// identity is supplied by the owning [`crate::NodeClient`] per call.
#[derive(Clone)]
pub struct RestClient {
    http: Client,
    config: Arc<NodeConfig>,
    get_cache: Cache<String, Vec<u8>>,
    track_cache: Cache<String, Vec<u8>>,
    inflight: Arc<Dedup>,
}

impl RestClient {
    pub fn new(config: Arc<NodeConfig>) -> Result<Self> {
        let http = Client::builder()
            .default_headers({
                let mut headers = HeaderMap::new();
                headers.insert(
                    "Authorization",
                    config.password.parse().map_err(Error::InvalidHeaderValue)?,
                );
                headers
            })
            .user_agent(CLIENT_NAME)
            .build()
            .map_err(Error::Reqwest)?;

        Ok(Self {
            http,
            config,
            get_cache: Cache::builder().time_to_live(GET_CACHE_TTL).build(),
            track_cache: Cache::builder().time_to_live(TRACK_CACHE_TTL).build(),
            inflight: Arc::new(DashMap::new()),
        })
    }

    /// Clears both response caches. Used by hosts that need a hard
    /// invalidation point (e.g. after reconnecting to a different node
    /// build).
    pub fn clear_caches(&self) {
        self.get_cache.invalidate_all();
        self.track_cache.invalidate_all();
    }

    /// Generic request used by callers that need REST routes this client
    /// doesn't wrap directly (e.g. SponsorBlock passthroughs).
    pub async fn request<B: Serialize + Sync>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Vec<u8>> {
        let key = dedup_key(&method, path, body);
        let cell = self
            .inflight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let result = cell
            .get_or_init(|| async { self.execute_with_retry(method, path, body).await })
            .await
            .clone();

        self.inflight.remove(&key);

        result.map_err(Error::Dedup)
    }

    async fn execute_with_retry<B: Serialize + Sync>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> std::result::Result<Vec<u8>, String> {
        let max_retries = self.config.max_retries;
        let mut attempt = 0u32;

        loop {
            let outcome = self.execute_once(method.clone(), path, body).await;

            match outcome {
                Ok(bytes) => return Ok(bytes),
                Err(RetryableError::Retryable(msg)) if attempt < max_retries => {
                    attempt += 1;
                    let backoff = backoff_with_jitter(attempt);
                    warn!(
                        "request to '{}' failed (attempt {}/{}): {}; retrying in {:?}",
                        path, attempt, max_retries, msg, backoff
                    );
                    sleep(backoff).await;
                }
                Err(RetryableError::Retryable(msg)) | Err(RetryableError::Fatal(msg)) => {
                    return Err(msg)
                }
            }
        }
    }

    async fn execute_once<B: Serialize + Sync>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> std::result::Result<Vec<u8>, RetryableError> {
        let uri = self.config.build_rest_uri(path);
        debug!("calling '{} {}'...", method, uri);

        let mut request = self.http.request(method, uri).timeout(self.config.request_timeout);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                RetryableError::Retryable(e.to_string())
            } else {
                RetryableError::Fatal(e.to_string())
            }
        })?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| RetryableError::Fatal(e.to_string()))?;

        if status.is_success() {
            return Ok(bytes.to_vec());
        }

        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(RetryableError::Retryable(format!(
                "status {status}"
            )));
        }

        Err(RetryableError::Fatal(format!("status {status}")))
    }

    pub async fn update_player(
        &self,
        session_id: &str,
        guild_id: u64,
        no_replace: bool,
        player: &UpdatePlayer,
    ) -> Result<Player> {
        let path = format!(
            "/sessions/{}/players/{}?noReplace={}",
            session_id, guild_id, no_replace
        );
        let bytes = self.request(Method::PATCH, &path, Some(player)).await?;
        parse_response(&bytes)
    }

    pub async fn get_player(&self, session_id: &str, guild_id: u64) -> Result<Player> {
        let path = format!("/sessions/{}/players/{}", session_id, guild_id);
        let bytes = self
            .request::<()>(Method::GET, &path, None)
            .await?;
        parse_response(&bytes)
    }

    pub async fn get_players(&self, session_id: &str) -> Result<Vec<Player>> {
        let path = format!("/sessions/{}/players", session_id);
        let bytes = self.request::<()>(Method::GET, &path, None).await?;
        parse_response(&bytes)
    }

    pub async fn destroy_player(&self, session_id: &str, guild_id: u64) -> Result<()> {
        let path = format!("/sessions/{}/players/{}", session_id, guild_id);
        self.request::<()>(Method::DELETE, &path, None).await?;
        Ok(())
    }

    pub async fn configure_resuming(&self, session_id: &str, timeout_secs: u64) -> Result<()> {
        #[derive(Serialize)]
        struct Body {
            resuming: bool,
            timeout: u64,
        }

        let path = format!("/sessions/{}", session_id);
        self.request(
            Method::PATCH,
            &path,
            Some(&Body {
                resuming: true,
                timeout: timeout_secs,
            }),
        )
        .await?;
        Ok(())
    }

    /// Resolves a query or URL into tracks, caching the result by identifier
    /// for [`TRACK_CACHE_TTL`].
    pub async fn load_tracks(&self, identifier: &str) -> Result<TrackLoading> {
        if let Some(cached) = self.track_cache.get(identifier) {
            return parse_response(&cached);
        }

        let path = format!("/loadtracks?identifier={}", urlencode(identifier));
        let bytes = self.request::<()>(Method::GET, &path, None).await?;
        self.track_cache
            .insert(identifier.to_owned(), bytes.clone());
        parse_response(&bytes)
    }

    pub async fn decode_track(&self, encoded: &str) -> Result<Track> {
        let path = format!("/decodetrack?encodedTrack={}", urlencode(encoded));
        let bytes = self.request::<()>(Method::GET, &path, None).await?;
        parse_response(&bytes)
    }

    pub async fn decode_tracks(&self, encoded: &[String]) -> Result<Vec<Track>> {
        let bytes = self
            .request(Method::POST, "/decodetracks", Some(&encoded))
            .await?;
        parse_response(&bytes)
    }

    pub async fn get_stats(&self) -> Result<crate::Stats> {
        let key = "GET:/stats".to_owned();
        if let Some(cached) = self.get_cache.get(&key) {
            return parse_response(&cached);
        }

        let bytes = self.request::<()>(Method::GET, "/stats", None).await?;
        self.get_cache.insert(key, bytes.clone());
        parse_response(&bytes)
    }

    /// Non-fatal node capability probe. Called opportunistically by a pool
    /// on `Ready`; callers should tolerate a timeout.
    pub async fn get_info(&self) -> Result<NodeInfo> {
        let bytes = self.request::<()>(Method::GET, "/info", None).await?;
        parse_response(&bytes)
    }

    pub async fn sponsorblock_categories(
        &self,
        session_id: &str,
        guild_id: u64,
    ) -> Result<Vec<String>> {
        let path = format!(
            "/sessions/{}/players/{}/sponsorblock/categories",
            session_id, guild_id
        );
        let bytes = self.request::<()>(Method::GET, &path, None).await?;
        parse_response(&bytes)
    }

    pub async fn set_sponsorblock_categories(
        &self,
        session_id: &str,
        guild_id: u64,
        categories: &[String],
    ) -> Result<()> {
        let path = format!(
            "/sessions/{}/players/{}/sponsorblock/categories",
            session_id, guild_id
        );
        self.request(Method::PUT, &path, Some(&categories)).await?;
        Ok(())
    }

    pub async fn clear_sponsorblock_categories(
        &self,
        session_id: &str,
        guild_id: u64,
    ) -> Result<()> {
        let path = format!(
            "/sessions/{}/players/{}/sponsorblock/categories",
            session_id, guild_id
        );
        self.request::<()>(Method::DELETE, &path, None).await?;
        Ok(())
    }
}

enum RetryableError {
    Retryable(String),
    Fatal(String),
}

fn backoff_with_jitter(attempt: u32) -> Duration {
    let base = 250u64;
    let cap = 5_000u64;
    let exp = base.saturating_mul(1 << attempt.min(8)).min(cap);
    let jitter = rand::thread_rng().gen_range(0..=100);
    Duration::from_millis(exp + jitter)
}

fn dedup_key<B: Serialize>(method: &Method, path: &str, body: Option<&B>) -> String {
    let body_repr = body
        .map(|b| serde_json::to_string(b).unwrap_or_default())
        .unwrap_or_default();
    format!("{}:{}:{}", method, path, body_repr)
}

fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for b in value.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_capped() {
        let d = backoff_with_jitter(20);
        assert!(d.as_millis() <= 5_100);
    }

    #[test]
    fn urlencode_escapes_reserved_chars() {
        assert_eq!(urlencode("a b"), "a%20b");
        assert_eq!(urlencode("abc123"), "abc123");
    }
}
