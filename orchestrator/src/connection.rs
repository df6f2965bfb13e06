//! Per-player voice binding.
//!
//! Grounded on the teacher's `HydrogenManager::update_voice_state` /
//! `update_voice_server` handlers, which collate two independent gateway
//! messages into one connection object behind `Arc<RwLock<Connection>>`.
//! Generalized here into an explicit state machine plus the batched
//! voice+volume flush spec.md's Connection owns.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use node_link::{NodeClient, UpdatePlayer, VoiceState};
use tokio::{sync::RwLock, time::sleep};
use tracing::{debug, warn};

/// Lifecycle of a single player's voice binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal; set by `Player::destroy`.
    Destroyed,
}

/// Observable events a [`Connection`] emits for a host/Player to act on.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Connected { region: String },
    PlayerMoved { channel_id: u64 },
    Disconnected,
    FlushFailed { error: String },
}

/// Per-player accumulated voice credentials and binding state. Two
/// independent gateway messages (state update, server update) must both
/// arrive before the binding is complete.
#[derive(Debug, Clone)]
pub struct Connection {
    pub state: ConnectionState,
    pub session_id: Option<String>,
    pub endpoint: Option<String>,
    pub token: Option<String>,
    pub channel_id: Option<u64>,
    pub self_deaf: bool,
    pub self_mute: bool,
    pub region: Option<String>,
    /// Volume to carry on the next voice flush; kept in sync by the owning
    /// Player whenever `setVolume` changes it.
    pub last_known_volume: u16,
}

impl Default for Connection {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            session_id: None,
            endpoint: None,
            token: None,
            channel_id: None,
            self_deaf: false,
            self_mute: false,
            region: None,
            last_known_volume: 100,
        }
    }
}

impl Connection {
    pub fn new(initial_volume: u16) -> Self {
        Self {
            last_known_volume: initial_volume,
            ..Default::default()
        }
    }

    /// Applies a `VOICE_SERVER_UPDATE` (`endpoint`, `token`). Returns `true`
    /// if the binding just became complete.
    pub fn apply_server_update(&mut self, endpoint: String, token: String) -> bool {
        if self.state == ConnectionState::Disconnected {
            self.state = ConnectionState::Connecting;
        }

        self.region = Some(extract_region(&endpoint));
        self.endpoint = Some(endpoint);
        self.token = Some(token);

        self.try_complete()
    }

    /// Applies a `VOICE_STATE_UPDATE` for the bot's own user. Returns
    /// `Some(event)` describing what changed (channel move, completion,
    /// disconnect), or `None` if nothing observable happened yet.
    pub fn apply_state_update(
        &mut self,
        session_id: String,
        channel_id: Option<u64>,
        self_deaf: bool,
        self_mute: bool,
    ) -> Option<ConnectionEvent> {
        self.self_deaf = self_deaf;
        self.self_mute = self_mute;

        let Some(channel_id) = channel_id else {
            let was_connected = self.channel_id.is_some();
            self.channel_id = None;
            self.session_id = Some(session_id);
            if was_connected {
                return Some(ConnectionEvent::Disconnected);
            }
            return None;
        };

        let previous_channel = self.channel_id;
        self.session_id = Some(session_id);

        if self.state == ConnectionState::Connected && previous_channel != Some(channel_id) {
            self.channel_id = Some(channel_id);
            return Some(ConnectionEvent::PlayerMoved { channel_id });
        }

        self.channel_id = Some(channel_id);

        if self.state == ConnectionState::Disconnected {
            self.state = ConnectionState::Connecting;
        }

        if self.try_complete() {
            return Some(ConnectionEvent::Connected {
                region: self.region.clone().unwrap_or_else(|| "unknown".to_owned()),
            });
        }

        None
    }

    fn try_complete(&mut self) -> bool {
        if self.state == ConnectionState::Connected {
            return false;
        }
        if self.session_id.is_some()
            && self.endpoint.is_some()
            && self.token.is_some()
            && self.channel_id.is_some()
        {
            self.state = ConnectionState::Connected;
            true
        } else {
            false
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn to_voice_state(&self) -> Option<VoiceState> {
        Some(VoiceState::new(
            self.token.as_ref()?,
            self.endpoint.as_ref()?,
            self.session_id.as_ref()?,
        ))
    }

    pub fn destroy(&mut self) {
        self.state = ConnectionState::Destroyed;
    }
}

/// Parses the advisory region out of a voice endpoint hostname: the leading
/// alphabetic-or-hyphen run (stopping at the first digit, so `us-east42`
/// yields `us-east`), else the first dot-segment, else `"unknown"`.
pub fn extract_region(endpoint: &str) -> String {
    let host = endpoint.split(':').next().unwrap_or(endpoint);

    let alpha_run: String = host
        .chars()
        .take_while(|c| c.is_ascii_alphabetic() || *c == '-')
        .collect();
    if !alpha_run.is_empty() {
        return alpha_run;
    }

    if let Some(segment) = host.split('.').next() {
        if !segment.is_empty() {
            return segment.to_owned();
        }
    }

    "unknown".to_owned()
}

/// Schedules a debounced voice+volume flush to `node` for `guild_id`, reading
/// the latest connection state at flush time rather than at schedule time.
/// At most one flush is ever in flight per connection (`flush_scheduled`
/// guards re-entrancy); failures are retried with backoff up to
/// `max_attempts`, surfaced via `on_event` on exhaustion.
pub fn schedule_flush(
    connection: Arc<RwLock<Connection>>,
    node: NodeClient,
    guild_id: u64,
    flush_delay: Duration,
    max_attempts: u32,
    flush_scheduled: Arc<AtomicBool>,
    on_event: Arc<dyn Fn(ConnectionEvent) + Send + Sync>,
) {
    if flush_scheduled.swap(true, Ordering::AcqRel) {
        return;
    }

    tokio::spawn(async move {
        sleep(flush_delay).await;
        flush_scheduled.store(false, Ordering::Release);

        let (voice, volume) = {
            let guard = connection.read().await;
            if guard.state == ConnectionState::Destroyed {
                return;
            }
            (guard.to_voice_state(), guard.last_known_volume)
        };

        let Some(voice) = voice else {
            debug!("voice flush skipped for guild {}: binding incomplete", guild_id);
            return;
        };

        let mut attempt = 0u32;
        loop {
            let mut update = UpdatePlayer::new();
            update.voice_state(voice.clone()).volume(volume);

            match node.update_player(guild_id, true, &update).await {
                Ok(_) => {
                    debug!("voice flush succeeded for guild {}", guild_id);
                    return;
                }
                Err(e) if attempt < max_attempts => {
                    attempt += 1;
                    let backoff = Duration::from_millis(250 * (1u64 << attempt.min(6)));
                    warn!(
                        "voice flush failed for guild {} (attempt {}/{}): {}; retrying in {:?}",
                        guild_id, attempt, max_attempts, e, backoff
                    );
                    sleep(backoff).await;
                }
                Err(e) => {
                    warn!(
                        "voice flush exhausted retries for guild {}: {}",
                        guild_id, e
                    );
                    on_event(ConnectionEvent::FlushFailed {
                        error: e.to_string(),
                    });
                    return;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_extraction_prefers_leading_alpha_or_hyphen_run() {
        assert_eq!(extract_region("us-east42.example:443"), "us-east");
    }

    #[test]
    fn region_extraction_falls_back_to_dot_segment() {
        assert_eq!(extract_region("42.example.com"), "42");
    }

    #[test]
    fn region_extraction_unknown_for_empty() {
        assert_eq!(extract_region(""), "unknown");
    }

    #[test]
    fn binding_completes_only_once_both_updates_arrive() {
        let mut c = Connection::new(100);
        assert!(!c.apply_server_update("us-east.example:443".into(), "T".into()));
        let event = c.apply_state_update("S".into(), Some(42), false, false);
        assert!(matches!(event, Some(ConnectionEvent::Connected { .. })));
        assert!(c.is_complete());
    }

    #[test]
    fn channel_move_while_connected_emits_player_moved() {
        let mut c = Connection::new(100);
        c.apply_server_update("us-east.example:443".into(), "T".into());
        c.apply_state_update("S".into(), Some(1), false, false);
        assert!(c.is_complete());

        let event = c.apply_state_update("S".into(), Some(2), false, false);
        assert!(matches!(
            event,
            Some(ConnectionEvent::PlayerMoved { channel_id: 2 })
        ));
    }

    #[test]
    fn null_channel_after_connected_reports_disconnect() {
        let mut c = Connection::new(100);
        c.apply_server_update("us-east.example:443".into(), "T".into());
        c.apply_state_update("S".into(), Some(1), false, false);

        let event = c.apply_state_update("S".into(), None, false, false);
        assert!(matches!(event, Some(ConnectionEvent::Disconnected)));
    }
}
