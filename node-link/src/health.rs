use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use crate::Stats;

/// Maximum number of ping samples kept in the rolling window.
pub const MAX_PING_SAMPLES: usize = 10;

/// Point-in-time view of a node's reported stats plus the ping/freshness
/// bookkeeping [`crate::NodeClient`] layers on top of the raw `stats` op.
#[derive(Clone, Debug)]
pub struct NodeStats {
    pub connected: bool,
    pub stats: Option<Stats>,
    ping_window: VecDeque<u32>,
    /// When `stats` was last refreshed.
    pub updated_at: Option<Instant>,
}

impl Default for NodeStats {
    fn default() -> Self {
        Self {
            connected: false,
            stats: None,
            ping_window: VecDeque::with_capacity(MAX_PING_SAMPLES),
            updated_at: None,
        }
    }
}

impl NodeStats {
    pub fn record_stats(&mut self, stats: Stats) {
        self.stats = Some(stats);
        self.updated_at = Some(Instant::now());
    }

    pub fn record_ping(&mut self, ping_ms: u32) {
        if self.ping_window.len() == MAX_PING_SAMPLES {
            self.ping_window.pop_front();
        }
        self.ping_window.push_back(ping_ms);
    }

    pub fn average_ping(&self) -> f32 {
        if self.ping_window.is_empty() {
            return 0.0;
        }
        self.ping_window.iter().sum::<u32>() as f32 / self.ping_window.len() as f32
    }

    pub fn is_stale(&self, max_age: Duration) -> bool {
        match self.updated_at {
            Some(t) => t.elapsed() > max_age,
            None => true,
        }
    }

    /// Derives a [`HealthScore`] from the current stats. Returns the worst
    /// possible score (unusable) when the node has never reported stats or
    /// is disconnected.
    pub fn health_score(&self) -> HealthScore {
        if !self.connected {
            return HealthScore::unusable();
        }

        let Some(stats) = &self.stats else {
            return HealthScore::unusable();
        };

        let cpu_cores = stats.cpu.cores.max(1) as f32;
        let frame_deficit = stats
            .frame_stats
            .as_ref()
            .map(|f| f.deficit as f32)
            .unwrap_or(0.0);

        let penalties = stats.playing_players as f32
            + (stats.cpu.system_load / cpu_cores) * 10.0
            + frame_deficit.max(0.0) * 2.5
            + stats.players as f32;

        let score = penalties * 10.0
            + stats.cpu.lavalink_load * 100.0
            + mem_usage_ratio(stats) * 0.5
            + self.average_ping() * 0.1
            + stats.players as f32 * 2.0
            + stats.playing_players as f32 * 5.0;

        HealthScore { penalties, score }
    }
}

fn mem_usage_ratio(stats: &Stats) -> f32 {
    let total = stats.memory.allocated.max(1) as f32;
    stats.memory.used as f32 / total * 100.0
}

/// Composite, lower-is-better scalar used by a node pool to rank nodes for
/// selection and migration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HealthScore {
    pub penalties: f32,
    pub score: f32,
}

impl HealthScore {
    /// A score worse than anything a connected node can produce, used to
    /// sort disconnected/unreported nodes to the back of a selection.
    pub fn unusable() -> Self {
        Self {
            penalties: f32::INFINITY,
            score: f32::INFINITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Memory, CPU};

    fn sample_stats(playing: u64, players: u64, load: f32) -> Stats {
        Stats {
            players,
            playing_players: playing,
            uptime: 1000,
            memory: Memory {
                free: 100,
                used: 50,
                allocated: 200,
                reservable: 200,
            },
            cpu: CPU {
                cores: 4,
                system_load: load,
                lavalink_load: load,
            },
            frame_stats: None,
        }
    }

    #[test]
    fn disconnected_node_is_unusable() {
        let stats = NodeStats::default();
        assert_eq!(stats.health_score(), HealthScore::unusable());
    }

    #[test]
    fn busier_node_scores_worse() {
        let mut idle = NodeStats {
            connected: true,
            ..Default::default()
        };
        idle.record_stats(sample_stats(0, 1, 0.1));

        let mut busy = NodeStats {
            connected: true,
            ..Default::default()
        };
        busy.record_stats(sample_stats(8, 10, 0.9));

        assert!(busy.health_score().score > idle.health_score().score);
    }

    #[test]
    fn ping_window_caps_at_max_samples() {
        let mut stats = NodeStats::default();
        for i in 0..20 {
            stats.record_ping(i);
        }
        assert_eq!(stats.ping_window.len(), MAX_PING_SAMPLES);
    }
}
