//! Persisted-state file I/O for `autoResume`: atomic write-then-rename of a
//! JSON document listing every player with a current track or non-empty
//! queue, keyed by guild id.

use std::{collections::HashMap, path::Path};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};

use crate::{player::PlayerSnapshot, Error, Result};

#[derive(Debug, Serialize, Deserialize)]
struct PersistedState {
    players: HashMap<u64, PlayerSnapshot>,
}

/// Writes `snapshots` to `path` atomically: serialize to a sibling `.tmp`
/// file, then rename over the destination, so a crash mid-write never leaves
/// a truncated state file behind.
pub async fn save_players_state<P: AsRef<Path>>(
    path: P,
    snapshots: HashMap<u64, PlayerSnapshot>,
) -> Result<()> {
    let path = path.as_ref();
    let state = PersistedState { players: snapshots };
    let body = serde_json::to_vec_pretty(&state).map_err(Error::Json)?;

    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, &body).await.map_err(Error::Io)?;
    fs::rename(&tmp_path, path).await.map_err(Error::Io)?;

    debug!(
        "persisted {} player snapshot(s) to {}",
        state.players.len(),
        path.display()
    );
    Ok(())
}

/// Loads player snapshots from `path`. Returns an empty map if the file does
/// not exist yet (first run, or nothing was ever playing at shutdown).
pub async fn load_players_state<P: AsRef<Path>>(path: P) -> Result<HashMap<u64, PlayerSnapshot>> {
    let path = path.as_ref();
    match fs::read(path).await {
        Ok(body) => {
            let state: PersistedState = serde_json::from_slice(&body).map_err(Error::Json)?;
            Ok(state.players)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("no persisted state file at {}", path.display());
            Ok(HashMap::new())
        }
        Err(e) => {
            warn!("failed to read persisted state at {}: {}", path.display(), e);
            Err(Error::Io(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::LoopMode;

    fn sample(guild_id: u64) -> PlayerSnapshot {
        PlayerSnapshot {
            guild_id,
            current: None,
            position_ms: 0,
            volume: 100,
            loop_mode: LoopMode::None,
            queue: Vec::new(),
            history: Vec::new(),
        }
    }

    #[tokio::test]
    async fn round_trips_through_a_temp_file() {
        let dir = std::env::temp_dir().join(format!("node-link-orchestrator-test-{}", std::process::id()));
        fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("state.json");

        let mut snapshots = HashMap::new();
        snapshots.insert(42, sample(42));
        save_players_state(&path, snapshots).await.unwrap();

        let loaded = load_players_state(&path).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[&42].guild_id, 42);

        let _ = fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn missing_file_loads_as_empty() {
        let loaded = load_players_state("/tmp/node-link-orchestrator-missing-state.json")
            .await
            .unwrap();
        assert!(loaded.is_empty());
    }
}
