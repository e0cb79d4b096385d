//! Application-level configuration loading: lobby limits, lifecycle timings and the
//! direct-join switch.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use serde_with::{DurationMilliSeconds, DurationSeconds, serde_as};
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "TUNEQUIZ_CONFIG_PATH";
/// Environment variable that overrides [`AppConfig::allow_direct_join`].
const DIRECT_JOIN_ENV: &str = "TUNEQUIZ_ALLOW_DIRECT_JOIN";

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Members required before the host may start a game. `1` enables solo play.
    pub min_players: usize,
    /// Capacity applied to rooms created without an explicit limit.
    pub default_max_players: u32,
    /// Questions per game.
    pub total_questions: u32,
    /// Flat points awarded for each correct answer.
    pub points_per_correct_answer: i64,
    /// Pause between announcing a start and creating the game, letting clients load content.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "start_settle_delay_ms")]
    pub start_settle_delay: Duration,
    /// Load time advertised to clients in `game-start-initiated`.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "estimated_load_time_ms")]
    pub estimated_load_time: Duration,
    /// How long after its last activity a membership may still be resumed.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "reconnect_window_secs")]
    pub reconnect_window: Duration,
    /// Bound on room-code regeneration after collisions.
    pub code_generation_attempts: u32,
    /// Rooms untouched for longer than this are hard-deleted.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "room_inactivity_ttl_secs")]
    pub room_inactivity_ttl: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "expiry_sweep_interval_secs")]
    pub expiry_sweep_interval: Duration,
    /// Let the live connection create memberships for identities that never joined through
    /// the REST API. Meant for tests and degraded setups only.
    pub allow_direct_join: bool,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        let config = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<Self>(&contents) {
                Ok(config) => {
                    info!(path = %path.display(), "loaded configuration");
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        };

        config.with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        if let Some(value) = env::var(DIRECT_JOIN_ENV).ok().and_then(|raw| parse_flag(&raw)) {
            self.allow_direct_join = value;
        }
        if self.allow_direct_join {
            warn!("direct join over the live connection is enabled; do not use in production");
        }
        self
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            min_players: 2,
            default_max_players: 8,
            total_questions: 10,
            points_per_correct_answer: 100,
            start_settle_delay: Duration::from_millis(3_000),
            estimated_load_time: Duration::from_millis(3_000),
            reconnect_window: Duration::from_secs(30 * 60),
            code_generation_attempts: 50,
            room_inactivity_ttl: Duration::from_secs(24 * 60 * 60),
            expiry_sweep_interval: Duration::from_secs(5 * 60),
            allow_direct_join: false,
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"min_players": 1, "start_settle_delay_ms": 0}"#).unwrap();
        assert_eq!(config.min_players, 1);
        assert_eq!(config.start_settle_delay, Duration::ZERO);
        assert_eq!(config.reconnect_window, Duration::from_secs(1800));
        assert_eq!(config.code_generation_attempts, 50);
        assert!(!config.allow_direct_join);
    }

    #[test]
    fn flag_parsing() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag(" 0 "), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}
