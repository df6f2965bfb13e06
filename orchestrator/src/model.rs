//! Guild-facing data model: tracks, history, and the observation events a
//! Player emits for a host to act on.

use serde::{Deserialize, Serialize};

/// A track as seen by the orchestrator. Metadata is always present; `encoded`
/// is absent when the track has not yet been resolved against a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub encoded: Option<String>,
    pub identifier: String,
    pub title: String,
    pub author: String,
    pub length: u32,
    pub is_stream: bool,
    pub is_seekable: bool,
    pub source_name: String,
    pub uri: Option<String>,
    pub isrc: Option<String>,
    pub album: Option<String>,
    pub artwork_url: Option<String>,
    /// Opaque id of whoever queued this track, if the host supplies one.
    pub requester: Option<u64>,
}

impl Track {
    /// A track with only an identifier and source, to be resolved before playback.
    pub fn unresolved(identifier: &str, source_name: &str, requester: Option<u64>) -> Self {
        Self {
            encoded: None,
            identifier: identifier.to_owned(),
            title: identifier.to_owned(),
            author: String::new(),
            length: 0,
            is_stream: false,
            is_seekable: false,
            source_name: source_name.to_owned(),
            uri: None,
            isrc: None,
            album: None,
            artwork_url: None,
            requester,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.encoded.is_some()
    }

    pub fn from_node_track(track: node_link::Track, requester: Option<u64>) -> Self {
        Self {
            encoded: Some(track.encoded),
            identifier: track.info.identifier,
            title: track.info.title,
            author: track.info.author,
            length: track.info.length,
            is_stream: track.info.is_stream,
            is_seekable: track.info.is_seekable,
            source_name: track.info.source_name,
            uri: track.info.uri,
            isrc: track.info.isrc,
            album: track.info.album,
            artwork_url: track.info.artwork_url,
            requester,
        }
    }
}

/// A played track with replay bookkeeping. The history is deduplicated by
/// consecutive identifier: repeated plays of the same track bump
/// `replay_count` on the head entry instead of growing the list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub track: Track,
    pub played_at: i64,
    pub replay_count: u32,
}

/// Bounded, newest-first play history for a single Player.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct History {
    entries: Vec<HistoryEntry>,
    limit: usize,
}

impl History {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: Vec::new(),
            limit,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Appends `track`, played at `played_at_ms`. Consecutive identical
    /// identifiers at the head increment `replay_count` instead of
    /// prepending a new entry.
    pub fn push(&mut self, track: Track, played_at_ms: i64) {
        if let Some(head) = self.entries.first_mut() {
            if head.track.identifier == track.identifier {
                head.replay_count += 1;
                head.played_at = played_at_ms;
                return;
            }
        }

        self.entries.insert(
            0,
            HistoryEntry {
                track,
                played_at: played_at_ms,
                replay_count: 1,
            },
        );

        if self.entries.len() > self.limit {
            self.entries.truncate(self.limit);
        }
    }

    /// Identifiers of the most recent `window` entries, used by smart shuffle.
    pub fn recent_identifiers(&self, window: usize) -> Vec<String> {
        self.entries
            .iter()
            .take(window)
            .map(|e| e.track.identifier.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(id: &str) -> Track {
        Track::unresolved(id, "test", None)
    }

    #[test]
    fn consecutive_plays_bump_replay_count_not_length() {
        let mut history = History::new(10);
        history.push(track("a"), 1);
        history.push(track("a"), 2);
        assert_eq!(history.len(), 1);
        assert_eq!(history.entries()[0].replay_count, 2);
    }

    #[test]
    fn distinct_plays_prepend_and_respect_limit() {
        let mut history = History::new(2);
        history.push(track("a"), 1);
        history.push(track("b"), 2);
        history.push(track("c"), 3);
        assert_eq!(history.len(), 2);
        assert_eq!(history.entries()[0].track.identifier, "c");
        assert_eq!(history.entries()[1].track.identifier, "b");
    }
}
