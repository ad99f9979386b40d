//! Configuration for the `SchoolChat` client core.
//!
//! The core is embedded in a host application, so there is no CLI layer
//! here; configuration is layered as TOML config file
//! (`~/.config/schoolchat/config.toml`) over compiled defaults, with the
//! host free to override any field programmatically afterwards. A missing
//! config file is not an error; an explicit path that doesn't exist is.

use std::path::PathBuf;
use std::time::Duration;

use schoolchat_proto::message::SenderRole;

/// Errors that can occur when loading client configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// The configured base URL is not a valid URL.
    #[error("invalid base URL '{0}'")]
    InvalidBaseUrl(String),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    server: ServerFileConfig,
    user: UserFileConfig,
    timing: TimingFileConfig,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    base_url: Option<String>,
    history_limit: Option<usize>,
    event_capacity: Option<usize>,
}

/// `[user]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct UserFileConfig {
    user_id: Option<String>,
    display_name: Option<String>,
    role: Option<SenderRole>,
}

/// `[timing]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct TimingFileConfig {
    reconnect_initial_ms: Option<u64>,
    reconnect_max_ms: Option<u64>,
    optimistic_expiry_ms: Option<u64>,
    simulate_sent_ms: Option<u64>,
    simulate_delivered_ms: Option<u64>,
    typing_quiet_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Identity of the local user, carried on the socket URL and used to tell
/// own messages from everyone else's.
#[derive(Debug, Clone)]
pub struct UserIdentity {
    /// The local user's id.
    pub user_id: String,
    /// The local user's display name.
    pub display_name: String,
    /// The local user's platform role.
    pub role: SenderRole,
}

/// Reconnect backoff tuning for the connection manager.
///
/// The delay starts at `initial_delay`, doubles after each failed attempt
/// up to `max_delay`, and resets to `initial_delay` after any successful
/// open.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Upper bound on the backoff delay.
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl ReconnectConfig {
    /// Returns the delay to use after the attempt that slept `current`.
    #[must_use]
    pub fn next_delay(&self, current: Duration) -> Duration {
        (current * 2).min(self.max_delay)
    }
}

/// Timer windows used by the thread state machine.
#[derive(Debug, Clone, Copy)]
pub struct ThreadTimings {
    /// How long an optimistic entry lives before it is dropped if no
    /// server echo replaced it.
    pub optimistic_expiry: Duration,
    /// Offline simulation: delay before a local send shows as `sent`.
    pub simulate_sent: Duration,
    /// Offline simulation: delay before a local send shows as `delivered`.
    pub simulate_delivered: Duration,
    /// Quiet period after which a typing indicator expires.
    pub typing_quiet: Duration,
}

impl Default for ThreadTimings {
    fn default() -> Self {
        Self {
            optimistic_expiry: Duration::from_secs(2),
            simulate_sent: Duration::from_millis(500),
            simulate_delivered: Duration::from_millis(1200),
            typing_quiet: Duration::from_secs(3),
        }
    }
}

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// HTTP(S) origin of the chat backend, e.g. `http://127.0.0.1:8080`.
    pub base_url: String,
    /// Local user identity.
    pub user: UserIdentity,
    /// Reconnect backoff tuning.
    pub reconnect: ReconnectConfig,
    /// Thread timer windows.
    pub timings: ThreadTimings,
    /// Default page size for history fetches.
    pub history_limit: usize,
    /// Capacity of the broadcast event channel.
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            user: UserIdentity {
                user_id: String::new(),
                display_name: String::new(),
                role: SenderRole::Student,
            },
            reconnect: ReconnectConfig::default(),
            timings: ThreadTimings::default(),
            history_limit: 50,
            event_capacity: 256,
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file merged over defaults.
    ///
    /// If `path` is `None`, the default location
    /// (`~/.config/schoolchat/config.toml`) is tried and a missing file is
    /// treated as empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if an explicit config file cannot be read
    /// or any file fails to parse.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let file = load_config_file(path)?;
        Ok(Self::resolve(&file))
    }

    /// Derives the chat WebSocket URL from the base URL, carrying the
    /// user identity as query parameters. `http` maps to `ws`, `https`
    /// to `wss`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBaseUrl`] if the base URL cannot be
    /// parsed.
    pub fn ws_url(&self) -> Result<String, ConfigError> {
        let mut url = url::Url::parse(&self.base_url)
            .map_err(|_| ConfigError::InvalidBaseUrl(self.base_url.clone()))?;
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|()| ConfigError::InvalidBaseUrl(self.base_url.clone()))?;
        url.set_path("/ws/chat");
        url.query_pairs_mut()
            .clear()
            .append_pair("userId", &self.user.user_id)
            .append_pair("username", &self.user.display_name);
        Ok(url.into())
    }

    /// Resolve a `ClientConfig` from a parsed config file over defaults.
    fn resolve(file: &ConfigFile) -> Self {
        let defaults = Self::default();
        let millis = |v: Option<u64>, d: Duration| v.map_or(d, Duration::from_millis);

        Self {
            base_url: file
                .server
                .base_url
                .clone()
                .unwrap_or(defaults.base_url),
            user: UserIdentity {
                user_id: file.user.user_id.clone().unwrap_or_default(),
                display_name: file.user.display_name.clone().unwrap_or_default(),
                role: file.user.role.unwrap_or(SenderRole::Student),
            },
            reconnect: ReconnectConfig {
                initial_delay: millis(
                    file.timing.reconnect_initial_ms,
                    defaults.reconnect.initial_delay,
                ),
                max_delay: millis(file.timing.reconnect_max_ms, defaults.reconnect.max_delay),
            },
            timings: ThreadTimings {
                optimistic_expiry: millis(
                    file.timing.optimistic_expiry_ms,
                    defaults.timings.optimistic_expiry,
                ),
                simulate_sent: millis(
                    file.timing.simulate_sent_ms,
                    defaults.timings.simulate_sent,
                ),
                simulate_delivered: millis(
                    file.timing.simulate_delivered_ms,
                    defaults.timings.simulate_delivered,
                ),
                typing_quiet: millis(file.timing.typing_quiet_ms, defaults.timings.typing_quiet),
            },
            history_limit: file.server.history_limit.unwrap_or(defaults.history_limit),
            event_capacity: file
                .server
                .event_capacity
                .unwrap_or(defaults.event_capacity),
        }
    }
}

/// Load and parse a TOML config file for the client.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("schoolchat").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
