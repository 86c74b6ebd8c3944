//! Configuration system.
//!
//! Loads movement configuration from JSON strings (file IO left to the app).
//! Every field has a default so partial documents are accepted.

use serde::{Deserialize, Serialize};

/// Root configuration shared by client and server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionConfig {
    /// Server listen address, e.g. `127.0.0.1:40000`.
    #[serde(default = "default_server_addr")]
    pub server_addr: String,
    /// Frame rate for `update` calls.
    #[serde(default = "default_tick_hz")]
    pub tick_hz: u32,
    /// Player name (client only).
    #[serde(default = "default_player_name")]
    pub player_name: String,
    #[serde(default)]
    pub walker: WalkerConfig,
    #[serde(default)]
    pub boats: BoatConfig,
}

/// Player step sequencer limits and timings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkerConfig {
    /// Capacity of the speculative step buffer.
    pub max_steps: usize,
    /// Slots in the fast-walk key pool.
    pub fast_walk_slots: usize,
    pub walk_step_ms: u64,
    pub run_step_ms: u64,
    pub turn_ms: u64,
}

impl Default for WalkerConfig {
    fn default() -> Self {
        Self {
            max_steps: 5,
            fast_walk_slots: 5,
            walk_step_ms: 400,
            run_step_ms: 200,
            turn_ms: 100,
        }
    }
}

/// Boat tracker limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoatConfig {
    /// Most server steps kept per vehicle; older ones are dropped first.
    pub max_queued_steps: usize,
}

impl Default for BoatConfig {
    fn default() -> Self {
        Self { max_queued_steps: 6 }
    }
}

fn default_server_addr() -> String {
    "127.0.0.1:40000".to_string()
}

fn default_tick_hz() -> u32 {
    60
}

fn default_player_name() -> String {
    "Player".to_string()
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            server_addr: default_server_addr(),
            tick_hz: default_tick_hz(),
            player_name: default_player_name(),
            walker: WalkerConfig::default(),
            boats: BoatConfig::default(),
        }
    }
}

impl MotionConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = MotionConfig::from_json_str(r#"{"tick_hz": 30, "walker": {"max_steps": 3}}"#)
            .unwrap();
        assert_eq!(cfg.tick_hz, 30);
        assert_eq!(cfg.walker.max_steps, 3);
        assert_eq!(cfg.walker.walk_step_ms, 400);
        assert_eq!(cfg.boats.max_queued_steps, 6);
        assert_eq!(cfg.server_addr, "127.0.0.1:40000");
    }

    #[test]
    fn empty_object_is_default() {
        let cfg = MotionConfig::from_json_str("{}").unwrap();
        assert_eq!(cfg.walker, WalkerConfig::default());
        assert_eq!(cfg.player_name, "Player");
    }
}
