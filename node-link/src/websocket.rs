use serde::Deserialize;

/// Sent once, right after a successful handshake or resume.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyOP {
    /// Whether an existing session was resumed.
    pub resumed: bool,
    /// The node's session id for this connection, not to be confused with
    /// the Discord voice session id.
    pub session_id: String,
}

/// Per-guild player state, sent every few seconds while a player exists.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdate {
    pub guild_id: String,
    pub state: PlayerState,
}

/// The state payload nested in a [`PlayerUpdate`].
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    /// Unix timestamp in milliseconds.
    pub time: i64,
    /// Track position in milliseconds.
    pub position: Option<u32>,
    /// Whether the node's voice connection is up.
    pub connected: bool,
    /// Round-trip ping to the voice gateway in milliseconds, -1 if unknown.
    pub ping: i32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackStartEvent {
    pub guild_id: String,
    pub encoded_track: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackEndEvent {
    pub guild_id: String,
    pub encoded_track: String,
    pub reason: TrackEndReason,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackEndReason {
    /// The track finished playing on its own. May advance the queue.
    Finished,
    /// The track failed to load or decode. May advance the queue.
    LoadFailed,
    /// The track was stopped by a client call. Does not advance the queue.
    Stopped,
    /// The track was replaced by another client call. Does not advance the queue.
    Replaced,
    /// The track was cleaned up because the player was removed. Does not advance the queue.
    Cleanup,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackExceptionEvent {
    pub guild_id: String,
    pub encoded_track: String,
    pub exception: crate::Exception,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackStuckEvent {
    pub guild_id: String,
    pub encoded_track: String,
    /// How long the track has been stuck, in milliseconds.
    pub threshold_ms: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSocketClosedEvent {
    pub guild_id: String,
    /// Discord voice gateway close code.
    pub code: u16,
    pub reason: String,
    pub by_remote: bool,
}

/// SponsorBlock plugin: segments loaded for the current track.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentsLoadedEvent {
    pub guild_id: String,
    pub segments: Vec<Segment>,
}

/// SponsorBlock plugin: a single segment was skipped.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentSkippedEvent {
    pub guild_id: String,
    pub segment: Segment,
}

#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub category: String,
    pub start: u32,
    pub end: u32,
}

/// Chapters plugin: chapters loaded for the current track.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChaptersLoadedEvent {
    pub guild_id: String,
    pub chapters: Vec<Chapter>,
}

/// Chapters plugin: a new chapter started.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterStartedEvent {
    pub guild_id: String,
    pub chapter: Chapter,
}

#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub name: String,
    pub start: u32,
    pub end: u32,
}
