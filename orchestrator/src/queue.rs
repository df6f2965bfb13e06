//! Per-player ordered track queue.
//!
//! Unlike the teacher's [`crate`]-predecessor `Queue<T: ToTrack>`, which owned
//! its own locking and playback index because it was shared directly with a
//! backend, this `Queue` is plain data: the owning [`crate::Player`] already
//! serializes all access to its state, so no interior mutability is needed
//! here.

use rand::{seq::SliceRandom, thread_rng, Rng};

use crate::model::Track;

/// Ordered sequence of tracks waiting to be played.
#[derive(Debug, Clone, Default)]
pub struct Queue {
    tracks: Vec<Track>,
    limit: usize,
}

/// Aggregate stats over a queue's contents.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueStats {
    pub total: usize,
    pub unique_artists: usize,
    pub unique_sources: usize,
    pub average_duration_ms: f64,
}

impl Queue {
    pub fn new(limit: usize) -> Self {
        Self {
            tracks: Vec::new(),
            limit,
        }
    }

    pub fn from_tracks(tracks: Vec<Track>, limit: usize) -> Self {
        Self { tracks, limit }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn as_slice(&self) -> &[Track] {
        &self.tracks
    }

    /// O(1) amortized. Returns `false` (no-op) if the queue is at `limit`.
    pub fn append(&mut self, track: Track) -> bool {
        if self.tracks.len() >= self.limit {
            return false;
        }
        self.tracks.push(track);
        true
    }

    /// Appends as many of `tracks` as fit under `limit`, returning how many
    /// were accepted.
    pub fn append_many(&mut self, tracks: Vec<Track>) -> usize {
        let room = self.limit.saturating_sub(self.tracks.len());
        let accepted = tracks.len().min(room);
        self.tracks.extend(tracks.into_iter().take(accepted));
        accepted
    }

    /// Inserts at `index`, clamping to the queue's current length.
    pub fn insert_at(&mut self, index: usize, track: Track) -> bool {
        if self.tracks.len() >= self.limit {
            return false;
        }
        let index = index.min(self.tracks.len());
        self.tracks.insert(index, track);
        true
    }

    pub fn remove_at(&mut self, index: usize) -> Option<Track> {
        if index >= self.tracks.len() {
            return None;
        }
        Some(self.tracks.remove(index))
    }

    /// Dequeues the head of the queue, if any.
    pub fn pop_front(&mut self) -> Option<Track> {
        if self.tracks.is_empty() {
            None
        } else {
            Some(self.tracks.remove(0))
        }
    }

    pub fn push_front(&mut self, track: Track) {
        self.tracks.insert(0, track);
    }

    pub fn move_track(&mut self, from: usize, to: usize) -> bool {
        if from >= self.tracks.len() || to >= self.tracks.len() {
            return false;
        }
        let track = self.tracks.remove(from);
        self.tracks.insert(to, track);
        true
    }

    pub fn swap(&mut self, a: usize, b: usize) -> bool {
        if a >= self.tracks.len() || b >= self.tracks.len() {
            return false;
        }
        self.tracks.swap(a, b);
        true
    }

    /// Case-insensitive substring search over title and author.
    pub fn search(&self, query: &str) -> Vec<&Track> {
        let needle = query.to_lowercase();
        self.tracks
            .iter()
            .filter(|t| {
                t.title.to_lowercase().contains(&needle) || t.author.to_lowercase().contains(&needle)
            })
            .collect()
    }

    pub fn find_matching<F: Fn(&Track) -> bool>(&self, predicate: F) -> Vec<&Track> {
        self.tracks.iter().filter(|t| predicate(t)).collect()
    }

    /// Removes every track matching `predicate`, returning how many were removed.
    pub fn remove_matching<F: Fn(&Track) -> bool>(&mut self, predicate: F) -> usize {
        let before = self.tracks.len();
        self.tracks.retain(|t| !predicate(t));
        before - self.tracks.len()
    }

    pub fn by_source<'a>(&'a self, source_name: &str) -> Vec<&'a Track> {
        self.tracks
            .iter()
            .filter(|t| t.source_name.eq_ignore_ascii_case(source_name))
            .collect()
    }

    pub fn by_artist<'a>(&'a self, author: &str) -> Vec<&'a Track> {
        self.tracks
            .iter()
            .filter(|t| t.author.eq_ignore_ascii_case(author))
            .collect()
    }

    pub fn by_title<'a>(&'a self, title: &str) -> Vec<&'a Track> {
        self.tracks
            .iter()
            .filter(|t| t.title.eq_ignore_ascii_case(title))
            .collect()
    }

    /// Fisher-Yates shuffle of the whole queue, in place.
    pub fn shuffle(&mut self) {
        self.tracks.shuffle(&mut thread_rng());
    }

    /// Partitions tracks by whether their identifier is in `recent_identifiers`
    /// (typically the owning Player's last-N history), placing non-recent
    /// tracks first; each partition is independently Fisher-Yates shuffled.
    pub fn smart_shuffle(&mut self, recent_identifiers: &[String]) {
        let (mut stale, mut recent): (Vec<Track>, Vec<Track>) = self
            .tracks
            .drain(..)
            .partition(|t| !recent_identifiers.contains(&t.identifier));

        let mut rng = thread_rng();
        stale.shuffle(&mut rng);
        recent.shuffle(&mut rng);

        stale.extend(recent);
        self.tracks = stale;
    }

    pub fn stats(&self) -> QueueStats {
        let total = self.tracks.len();
        if total == 0 {
            return QueueStats {
                total: 0,
                unique_artists: 0,
                unique_sources: 0,
                average_duration_ms: 0.0,
            };
        }

        let mut artists: Vec<&str> = self.tracks.iter().map(|t| t.author.as_str()).collect();
        artists.sort_unstable();
        artists.dedup();

        let mut sources: Vec<&str> = self.tracks.iter().map(|t| t.source_name.as_str()).collect();
        sources.sort_unstable();
        sources.dedup();

        let total_duration: u64 = self.tracks.iter().map(|t| t.length as u64).sum();

        QueueStats {
            total,
            unique_artists: artists.len(),
            unique_sources: sources.len(),
            average_duration_ms: total_duration as f64 / total as f64,
        }
    }

    /// Plain-data snapshot of the queue's current contents, in order.
    pub fn export(&self) -> Vec<Track> {
        self.tracks.clone()
    }

    /// Picks a uniformly random index, for callers implementing "random next"
    /// semantics on top of this queue.
    pub fn random_index(&self) -> Option<usize> {
        if self.tracks.is_empty() {
            None
        } else {
            Some(thread_rng().gen_range(0..self.tracks.len()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(id: &str) -> Track {
        Track::unresolved(id, "test", None)
    }

    #[test]
    fn shuffle_of_short_queue_is_identity_in_multiset() {
        let mut q = Queue::new(10);
        q.append(track("a"));
        let before = q.export();
        q.shuffle();
        assert_eq!(q.export(), before);
    }

    #[test]
    fn shuffle_preserves_multiset() {
        let mut q = Queue::new(10);
        for id in ["a", "b", "c", "d", "e"] {
            q.append(track(id));
        }
        let mut before: Vec<String> = q.export().into_iter().map(|t| t.identifier).collect();
        q.shuffle();
        let mut after: Vec<String> = q.export().into_iter().map(|t| t.identifier).collect();
        before.sort();
        after.sort();
        assert_eq!(before, after);
    }

    #[test]
    fn smart_shuffle_places_recent_tracks_after_stale_ones() {
        let mut q = Queue::new(10);
        for id in ["a", "b", "c"] {
            q.append(track(id));
        }
        let recent = vec!["a".to_owned()];
        q.smart_shuffle(&recent);
        let ids: Vec<String> = q.export().into_iter().map(|t| t.identifier).collect();
        assert_eq!(ids.last().unwrap(), "a");
    }

    #[test]
    fn append_respects_limit() {
        let mut q = Queue::new(1);
        assert!(q.append(track("a")));
        assert!(!q.append(track("b")));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn stats_aggregate_correctly() {
        let mut q = Queue::new(10);
        let mut a = track("a");
        a.author = "Author".into();
        a.source_name = "youtube".into();
        a.length = 1000;
        let mut b = track("b");
        b.author = "Author".into();
        b.source_name = "soundcloud".into();
        b.length = 3000;
        q.append(a);
        q.append(b);

        let stats = q.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.unique_artists, 1);
        assert_eq!(stats.unique_sources, 2);
        assert_eq!(stats.average_duration_ms, 2000.0);
    }
}
