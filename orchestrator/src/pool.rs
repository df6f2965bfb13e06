//! Health-based node selection and migration.
//!
//! Grounded on the teacher's `HydrogenManager`'s round-robin
//! `load_balancer: AtomicUsize` / `increment_load_balancer()`, generalized
//! from "next node in rotation" to "lowest-scoring connected node" using
//! [`node_link::HealthScore`], and its `timed_destroy`/`cancel_destroy`
//! spawn+sleep+abort pattern, generalized into the periodic rebalance loop.

use std::{collections::HashMap, sync::Arc};

use node_link::NodeClient;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::{player::Player, OrchestratorConfig};

/// A registered audio node plus the advisory regions it was configured with.
#[derive(Clone)]
struct PoolNode {
    client: NodeClient,
    regions: Vec<String>,
}

/// Owns the set of audio nodes available to an [`crate::Orchestrator`] and
/// picks one for new players, migrating existing ones off of degraded nodes.
#[derive(Clone)]
pub struct Pool {
    nodes: Arc<RwLock<Vec<PoolNode>>>,
    config: Arc<OrchestratorConfig>,
}

impl Pool {
    pub fn new(config: Arc<OrchestratorConfig>) -> Self {
        Self {
            nodes: Arc::new(RwLock::new(Vec::new())),
            config,
        }
    }

    pub async fn add_node(&self, client: NodeClient) {
        let regions = client.config().regions.clone();
        self.nodes.write().await.push(PoolNode { client, regions });
    }

    pub async fn len(&self) -> usize {
        self.nodes.read().await.len()
    }

    /// Lowest-scoring connected node, or `None` if the pool is empty or every
    /// node is disconnected.
    pub async fn least_used(&self) -> Option<NodeClient> {
        let nodes = self.nodes.read().await;
        nodes
            .iter()
            .filter(|n| n.client.is_ready())
            .min_by(|a, b| {
                a.client
                    .health_score()
                    .score
                    .partial_cmp(&b.client.health_score().score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|n| n.client.clone())
    }

    /// The lowest-scoring connected node advertising `region`, falling back
    /// to [`Pool::least_used`] if none advertise it.
    pub async fn for_region(&self, region: &str) -> Option<NodeClient> {
        let nodes = self.nodes.read().await;
        let candidate = nodes
            .iter()
            .filter(|n| n.client.is_ready() && n.regions.iter().any(|r| r == region))
            .min_by(|a, b| {
                a.client
                    .health_score()
                    .score
                    .partial_cmp(&b.client.health_score().score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|n| n.client.clone());
        drop(nodes);

        match candidate {
            Some(node) => Some(node),
            None => self.least_used().await,
        }
    }

    /// Migrates every player whose current node's score trails the pool's
    /// best score by more than `migrationThreshold * 100`, rebinding each
    /// onto the best node and replaying its state. Never holds the `players`
    /// write lock across a node call: the candidate list is collected under
    /// a short read lock, each migration (including the `restart()` network
    /// round-trip) runs lock-free, and only the final rebind is written back
    /// under its own short write lock — so gateway routing, which only ever
    /// needs a read lock on `players`, is never blocked behind node I/O.
    pub async fn rebalance(&self, players: &Arc<RwLock<HashMap<u64, Player>>>) {
        let Some(best) = self.least_used().await else {
            return;
        };
        let best_score = best.health_score().score;

        let candidates: Vec<u64> = {
            let guard = players.read().await;
            guard
                .iter()
                .filter(|(_, player)| {
                    let current_score = player.node().health_score().score;
                    current_score - best_score > self.config.migration_threshold * 100.0
                })
                .map(|(guild_id, _)| *guild_id)
                .collect()
        };

        for guild_id in candidates {
            let Some(mut player) = players.read().await.get(&guild_id).cloned() else {
                continue;
            };

            info!("migrating guild {} off a degraded node", guild_id);
            match self.migrate(&mut player, best.clone()).await {
                Ok(()) => {
                    players.write().await.insert(guild_id, player);
                }
                Err(e) => warn!("migration failed for guild {}: {}", guild_id, e),
            }
        }
    }

    /// Rebinds `player` onto `node` and replays its current state. Best
    /// effort: a failed replay leaves the player rebound but silent, to be
    /// recovered by the next voice or player update.
    pub async fn migrate(&self, player: &mut Player, node: NodeClient) -> crate::Result<()> {
        player.rebind_node(node);
        player.restart().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_pool_has_no_least_used_node() {
        let pool = Pool::new(Arc::new(OrchestratorConfig::default()));
        assert!(pool.least_used().await.is_none());
    }
}
