use serde::Deserialize;

/// Top-level operation types emitted by an audio node over its event socket.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OPType {
    /// Emitted once, right after a successful handshake.
    Ready,
    /// Emitted every few seconds with the latest player state.
    PlayerUpdate,
    /// Emitted once a minute with node-wide stats.
    Stats,
    /// Emitted for per-guild playback events (track start/end/etc).
    Event,
}

/// Used by the websocket message parser to peek at `op` before picking a
/// concrete type to deserialize into.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebsocketMessage {
    pub op: OPType,
}

/// Per-guild event types nested under the `event` op.
#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum EventType {
    TrackStartEvent,
    TrackEndEvent,
    TrackExceptionEvent,
    TrackStuckEvent,
    WebSocketClosedEvent,
    /// SponsorBlock plugin: segments for the current track have been loaded.
    #[serde(rename = "SegmentsLoaded")]
    SegmentsLoaded,
    /// SponsorBlock plugin: a segment has been skipped.
    #[serde(rename = "SegmentSkipped")]
    SegmentSkipped,
    /// Chapters plugin: chapters for the current track have been loaded.
    #[serde(rename = "ChaptersLoaded")]
    ChaptersLoaded,
    /// Chapters plugin: a new chapter has started.
    #[serde(rename = "ChapterStarted")]
    ChapterStarted,
}

/// Used by the websocket message parser to peek at the nested `type` field
/// of an `event` op before picking a concrete type to deserialize into.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventOP {
    #[serde(rename = "type")]
    pub event_type: EventType,
}
