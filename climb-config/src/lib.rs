//! Configuration schema and loading for climb-hub.
//!
//! Loading hierarchy mirrors the teacher's own config crate: defaults, then
//! an optional TOML file, then environment variable overrides, then
//! validation. Call [`load_config`] once at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration, matching the enumerated fields in spec.md §6.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClimbConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub timer: TimerSection,
    #[serde(default)]
    pub heartbeat: HeartbeatSection,
    #[serde(default)]
    pub hub: HubSection,
    #[serde(default)]
    pub rate_limit: RateLimitSection,
    #[serde(default)]
    pub spectator_token: SpectatorTokenSection,
}

impl Default for ClimbConfig {
    fn default() -> Self {
        Self {
            server: ServerSection::default(),
            timer: TimerSection::default(),
            heartbeat: HeartbeatSection::default(),
            hub: HubSection::default(),
            rate_limit: RateLimitSection::default(),
            spectator_token: SpectatorTokenSection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimerSection {
    /// `MM:SS`, e.g. "05:00".
    #[serde(default = "default_preset")]
    pub default_preset: String,
    #[serde(default = "default_true")]
    pub allow_negative: bool,
}

impl Default for TimerSection {
    fn default() -> Self {
        Self {
            default_preset: default_preset(),
            allow_negative: true,
        }
    }
}

fn default_preset() -> String {
    "05:00".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeartbeatSection {
    #[serde(default = "default_ping_interval")]
    pub ping_interval_sec: u64,
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout_sec: u64,
}

impl Default for HeartbeatSection {
    fn default() -> Self {
        Self {
            ping_interval_sec: default_ping_interval(),
            pong_timeout_sec: default_pong_timeout(),
        }
    }
}

fn default_ping_interval() -> u64 {
    30
}
fn default_pong_timeout() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HubSection {
    #[serde(default = "default_queue_depth")]
    pub subscriber_queue_depth: usize,
}

impl Default for HubSection {
    fn default() -> Self {
        Self {
            subscriber_queue_depth: default_queue_depth(),
        }
    }
}

fn default_queue_depth() -> usize {
    64
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitSection {
    #[serde(default = "default_progress_per_min")]
    pub progress_per_min: u32,
    #[serde(default = "default_other_per_min")]
    pub other_per_min: u32,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            progress_per_min: default_progress_per_min(),
            other_per_min: default_other_per_min(),
        }
    }
}

fn default_progress_per_min() -> u32 {
    120
}
fn default_other_per_min() -> u32 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpectatorTokenSection {
    #[serde(default = "default_ttl")]
    pub ttl_sec: u64,
}

impl Default for SpectatorTokenSection {
    fn default() -> Self {
        Self {
            ttl_sec: default_ttl(),
        }
    }
}

fn default_ttl() -> u64 {
    86_400
}

fn default_true() -> bool {
    true
}

/// Env var -> config path overrides, applied after the file load.
const ENV_OVERRIDES: &[(&str, fn(&mut ClimbConfig, &str))] = &[
    ("CLIMB_BIND_ADDR", |c, v| c.server.bind_addr = v.to_string()),
    ("CLIMB_TIMER_DEFAULT_PRESET", |c, v| {
        c.timer.default_preset = v.to_string()
    }),
    ("CLIMB_TIMER_ALLOW_NEGATIVE", |c, v| {
        if let Ok(b) = v.parse() {
            c.timer.allow_negative = b;
        }
    }),
    ("CLIMB_HEARTBEAT_PING_INTERVAL_SEC", |c, v| {
        if let Ok(n) = v.parse() {
            c.heartbeat.ping_interval_sec = n;
        }
    }),
    ("CLIMB_HEARTBEAT_PONG_TIMEOUT_SEC", |c, v| {
        if let Ok(n) = v.parse() {
            c.heartbeat.pong_timeout_sec = n;
        }
    }),
    ("CLIMB_HUB_SUBSCRIBER_QUEUE_DEPTH", |c, v| {
        if let Ok(n) = v.parse() {
            c.hub.subscriber_queue_depth = n;
        }
    }),
    ("CLIMB_RATE_LIMIT_PROGRESS_PER_MIN", |c, v| {
        if let Ok(n) = v.parse() {
            c.rate_limit.progress_per_min = n;
        }
    }),
    ("CLIMB_RATE_LIMIT_OTHER_PER_MIN", |c, v| {
        if let Ok(n) = v.parse() {
            c.rate_limit.other_per_min = n;
        }
    }),
    ("CLIMB_SPECTATOR_TOKEN_TTL_SEC", |c, v| {
        if let Ok(n) = v.parse() {
            c.spectator_token.ttl_sec = n;
        }
    }),
];

/// Load configuration: defaults -> optional file (`CLIMB_CONFIG_PATH`, else
/// `./climb.toml` if present) -> environment overrides -> validation.
pub fn load_config() -> Result<ClimbConfig, ConfigError> {
    let mut config = match config_file_path() {
        Some(path) if path.exists() => load_from_file(&path)?,
        _ => ClimbConfig::default(),
    };

    apply_env_overrides(&mut config);
    validate_config(&config)?;
    Ok(config)
}

fn config_file_path() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("CLIMB_CONFIG_PATH") {
        return Some(PathBuf::from(p));
    }
    let default = PathBuf::from("climb.toml");
    default.exists().then_some(default)
}

pub fn load_from_file(path: &Path) -> Result<ClimbConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn apply_env_overrides(config: &mut ClimbConfig) {
    for (name, apply) in ENV_OVERRIDES {
        if let Ok(value) = std::env::var(name) {
            apply(config, &value);
        }
    }
}

fn validate_config(config: &ClimbConfig) -> Result<(), ConfigError> {
    if config.server.bind_addr.trim().is_empty() {
        return Err(ConfigError::Invalid("server.bind_addr must not be empty".into()));
    }
    if parse_mmss(&config.timer.default_preset).is_none() {
        return Err(ConfigError::Invalid(format!(
            "timer.default_preset {:?} is not MM:SS",
            config.timer.default_preset
        )));
    }
    if config.heartbeat.ping_interval_sec == 0 || config.heartbeat.pong_timeout_sec == 0 {
        return Err(ConfigError::Invalid(
            "heartbeat intervals must be greater than zero".into(),
        ));
    }
    if config.hub.subscriber_queue_depth == 0 {
        return Err(ConfigError::Invalid(
            "hub.subscriber_queue_depth must be greater than zero".into(),
        ));
    }
    if config.rate_limit.progress_per_min == 0 || config.rate_limit.other_per_min == 0 {
        return Err(ConfigError::Invalid(
            "rate_limit quotas must be greater than zero".into(),
        ));
    }
    if config.spectator_token.ttl_sec == 0 {
        return Err(ConfigError::Invalid(
            "spectator_token.ttl_sec must be greater than zero".into(),
        ));
    }
    Ok(())
}

/// Parse a `MM:SS` string into total seconds. Shared with `climb_hub::clock`.
pub fn parse_mmss(s: &str) -> Option<u32> {
    let (m, s_) = s.split_once(':')?;
    let m: u32 = m.parse().ok()?;
    let s_: u32 = s_.parse().ok()?;
    if s_ >= 60 {
        return None;
    }
    Some(m * 60 + s_)
}
