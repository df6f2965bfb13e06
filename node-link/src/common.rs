use serde::Deserialize;

/// Stats snapshot reported by an audio node, either from the `stats` op or a
/// direct `GET /v4/stats` call.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    /// The amount of players connected to the node.
    pub players: u64,
    /// The amount of players actively playing a track.
    pub playing_players: u64,
    /// The uptime of the node in milliseconds.
    pub uptime: u64,
    /// The memory stats of the node.
    pub memory: Memory,
    /// The cpu stats of the node.
    pub cpu: CPU,
    /// The frame stats of the node. `None` if the node has no players, or
    /// when retrieved via `RestClient::get_stats()`.
    pub frame_stats: Option<FrameStats>,
}

/// Statistics related to an audio node's RAM usage.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    pub free: i64,
    pub used: i64,
    pub allocated: i64,
    pub reservable: i64,
}

/// Statistics related to an audio node's CPU usage.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CPU {
    pub cores: i32,
    pub system_load: f32,
    pub lavalink_load: f32,
}

/// Statistics related to the connection between an audio node and the voice
/// servers it streams into.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameStats {
    pub sent: i32,
    pub nulled: i32,
    pub deficit: i32,
}

/// An exception/error produced by an audio node while handling a track.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exception {
    pub message: Option<String>,
    pub severity: Severity,
    pub cause: String,
}

/// The severity level of a node-reported [`Exception`].
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// The cause is known and expected; nothing is wrong with the node itself.
    Common,
    /// The cause might not be exactly known, possibly caused by outside factors.
    Suspicious,
    /// The probable cause is an issue with the node, or no cause could be told.
    Fault,
}
