//! Application-level configuration loading: realtime cadence, paging limits,
//! join-code retries, host policy and music-catalog credentials.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "FLICKZY_SYNC_CONFIG_PATH";
const SPOTIFY_CLIENT_ID_ENV: &str = "SPOTIFY_CLIENT_ID";
const SPOTIFY_CLIENT_SECRET_ENV: &str = "SPOTIFY_CLIENT_SECRET";

/// Who may change a room's content and playback fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostPolicy {
    /// The core does not check; the store's access policy is authoritative.
    #[default]
    Delegate,
    /// The core rejects content/playback updates from anyone but the host.
    Enforce,
}

/// Client credentials for the music catalog.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SpotifyCredentials {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Interval of the reconciliation poll backing the push channel.
    pub poll_interval: Duration,
    /// Default number of chat messages returned by a page.
    pub message_page_size: usize,
    /// Upper bound accepted for an explicit page size.
    pub max_message_page_size: usize,
    /// Join-code candidates tried before giving up.
    pub code_attempts: u32,
    /// First delay before re-establishing a dropped change feed.
    pub reconnect_initial: Duration,
    /// Cap of the exponential reconnect backoff.
    pub reconnect_max: Duration,
    /// Capacity of the per-subscription signal channel.
    pub feed_capacity: usize,
    pub host_policy: HostPolicy,
    pub spotify: Option<SpotifyCredentials>,
}

impl AppConfig {
    /// Load the configuration from disk, falling back to built-in defaults, then apply
    /// environment overrides for the music-catalog credentials.
    pub fn load() -> Self {
        let path = resolve_config_path();
        let config = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    info!(path = %path.display(), "loaded configuration");
                    raw.into()
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

        config.with_env_credentials()
    }

    fn with_env_credentials(mut self) -> Self {
        if let (Ok(client_id), Ok(client_secret)) = (
            env::var(SPOTIFY_CLIENT_ID_ENV),
            env::var(SPOTIFY_CLIENT_SECRET_ENV),
        ) {
            self.spotify = Some(SpotifyCredentials {
                client_id,
                client_secret,
            });
        }
        self
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    poll_interval_ms: u64,
    message_page_size: usize,
    max_message_page_size: usize,
    code_attempts: u32,
    reconnect_initial_ms: u64,
    reconnect_max_ms: u64,
    feed_capacity: usize,
    host_policy: HostPolicy,
    spotify: Option<SpotifyCredentials>,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            message_page_size: 50,
            max_message_page_size: 200,
            code_attempts: 8,
            reconnect_initial_ms: 1_000,
            reconnect_max_ms: 10_000,
            feed_capacity: 64,
            host_policy: HostPolicy::Delegate,
            spotify: None,
        }
    }
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(value.poll_interval_ms.max(1)),
            message_page_size: value.message_page_size.max(1),
            max_message_page_size: value.max_message_page_size.max(1),
            code_attempts: value.code_attempts.max(1),
            reconnect_initial: Duration::from_millis(value.reconnect_initial_ms.max(1)),
            reconnect_max: Duration::from_millis(
                value.reconnect_max_ms.max(value.reconnect_initial_ms),
            ),
            feed_capacity: value.feed_capacity.max(1),
            host_policy: value.host_policy,
            spotify: value.spotify,
        }
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
    fn partial_file_keeps_defaults_for_missing_keys() {
        let raw: RawConfig =
            serde_json::from_str(r#"{ "poll_interval_ms": 500, "host_policy": "enforce" }"#)
                .unwrap();
        let config: AppConfig = raw.into();
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.host_policy, HostPolicy::Enforce);
        assert_eq!(config.message_page_size, 50);
        assert_eq!(config.code_attempts, 8);
    }
}
