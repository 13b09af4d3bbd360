//! Configuration loading and typed config structures for the Beacon broker.
//!
//! The canonical configuration lives in `beacon-config.yaml` at the project
//! root. Every field has a default, so an empty file (or no file at all)
//! yields a working development broker. Deployment-specific values are
//! overridden from the environment after the YAML is parsed.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// An environment override held a value of the wrong shape.
    #[error("invalid value for {var}: {value}")]
    Env {
        /// Name of the offending variable.
        var: &'static str,
        /// The value that failed to parse.
        value: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level broker configuration.
///
/// Mirrors the structure of `beacon-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BrokerConfig {
    /// Listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Credential verification and API keys.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Connection and event rate limits.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Liveness probing.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Best-effort snapshot cache.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Responder location search.
    #[serde(default)]
    pub location: LocationConfig,

    /// Session admission and delivery.
    #[serde(default)]
    pub session: SessionConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl BrokerConfig {
    /// Load configuration from a YAML file and apply environment overrides.
    ///
    /// Recognised variables: `BEACON_HOST`, `BEACON_PORT`, `BEACON_AUTH_MODE`,
    /// `JWT_SECRET`, `BEACON_API_KEYS`, `DRAGONFLY_URL`, `CACHE_ENABLED`,
    /// `RATE_LIMIT_ENABLED`, `EMERGENCY_MODE`, `LOG_LEVEL`, `LOG_JSON`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Env`] if an override cannot be parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&contents)?;
        config.apply_env_overrides(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    /// Parse configuration from a YAML string. No environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yml::from_str(yaml)?)
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// production, a map in tests).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Env`] for a value that does not parse.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(val) = lookup("BEACON_HOST") {
            self.server.host = val;
        }
        if let Some(val) = lookup("BEACON_PORT") {
            let Ok(port) = val.parse() else {
                return Err(ConfigError::Env {
                    var: "BEACON_PORT",
                    value: val,
                });
            };
            self.server.port = port;
        }
        if let Some(val) = lookup("BEACON_AUTH_MODE") {
            self.auth.mode = match val.to_ascii_lowercase().as_str() {
                "jwt" => AuthMode::Jwt,
                "open" => AuthMode::Open,
                _ => {
                    return Err(ConfigError::Env {
                        var: "BEACON_AUTH_MODE",
                        value: val,
                    });
                }
            };
        }
        if let Some(val) = lookup("JWT_SECRET") {
            self.auth.jwt_secret = val;
        }
        if let Some(val) = lookup("BEACON_API_KEYS") {
            self.auth.api_keys = val
                .split(',')
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(str::to_owned)
                .collect();
        }
        if let Some(val) = lookup("DRAGONFLY_URL") {
            self.cache.url = val;
        }
        if let Some(val) = lookup("CACHE_ENABLED") {
            self.cache.enabled = parse_flag("CACHE_ENABLED", val)?;
        }
        if let Some(val) = lookup("RATE_LIMIT_ENABLED") {
            self.rate_limit.enabled = parse_flag("RATE_LIMIT_ENABLED", val)?;
        }
        if let Some(val) = lookup("EMERGENCY_MODE") {
            self.session.emergency_mode = parse_flag("EMERGENCY_MODE", val)?;
        }
        if let Some(val) = lookup("LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Some(val) = lookup("LOG_JSON") {
            self.logging.json = parse_flag("LOG_JSON", val)?;
        }
        Ok(())
    }
}

fn parse_flag(var: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Env { var, value }),
    }
}

/// Listener configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port to bind.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Allowed CORS origins; `*` allows any.
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Seconds to let in-flight work drain on shutdown.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: default_cors_origins(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

/// How connection credentials are checked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Require a valid HS256 token.
    #[default]
    Jwt,
    /// Local development: every connection is an anonymous citizen.
    Open,
}

/// Authentication configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthConfig {
    /// Credential checking mode.
    #[serde(default)]
    pub mode: AuthMode,

    /// HMAC secret for signing and verifying tokens.
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,

    /// Lifetime of tokens minted by the broker, in seconds.
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,

    /// Lifetime of guest citizen tokens, in seconds.
    #[serde(default = "default_guest_token_ttl_secs")]
    pub guest_token_ttl_secs: u64,

    /// Static keys accepted in the `x-api-key` header of the REST surface.
    #[serde(default)]
    pub api_keys: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::default(),
            jwt_secret: default_jwt_secret(),
            token_ttl_secs: default_token_ttl_secs(),
            guest_token_ttl_secs: default_guest_token_ttl_secs(),
            api_keys: Vec::new(),
        }
    }
}

/// Sliding-window rate limits.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RateLimitConfig {
    /// Master switch; when off every check passes.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Connection attempts allowed per source address per window.
    #[serde(default = "default_connection_max")]
    pub connection_max: u32,

    /// Connection window length in seconds.
    #[serde(default = "default_window_secs")]
    pub connection_window_secs: u64,

    /// Events allowed per session per event name per window.
    #[serde(default = "default_event_max")]
    pub event_max: u32,

    /// Event window length in seconds.
    #[serde(default = "default_window_secs")]
    pub event_window_secs: u64,
}

impl RateLimitConfig {
    /// Connection window as a [`Duration`].
    pub const fn connection_window(&self) -> Duration {
        Duration::from_secs(self.connection_window_secs)
    }

    /// Event window as a [`Duration`].
    pub const fn event_window(&self) -> Duration {
        Duration::from_secs(self.event_window_secs)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            connection_max: default_connection_max(),
            connection_window_secs: default_window_secs(),
            event_max: default_event_max(),
            event_window_secs: default_window_secs(),
        }
    }
}

/// Liveness probing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HeartbeatConfig {
    /// Seconds between probe sweeps.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub interval_secs: u64,
}

impl HeartbeatConfig {
    /// Sweep interval as a [`Duration`], at least one second.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_heartbeat_interval_secs(),
        }
    }
}

/// Snapshot cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CacheConfig {
    /// Whether to connect to the cache at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Dragonfly / Redis connection URL.
    #[serde(default = "default_cache_url")]
    pub url: String,

    /// TTL of `responder_location:<id>` entries, in seconds.
    #[serde(default = "default_responder_ttl_secs")]
    pub responder_ttl_secs: u64,

    /// TTL of the `active_incidents` and `responder_status` snapshots.
    #[serde(default = "default_incident_snapshot_ttl_secs")]
    pub incident_snapshot_ttl_secs: u64,

    /// TTL of the `system_statistics` snapshot.
    #[serde(default = "default_statistics_ttl_secs")]
    pub statistics_ttl_secs: u64,

    /// Pending writes held before new ones are dropped.
    #[serde(default = "default_cache_queue")]
    pub queue_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: default_cache_url(),
            responder_ttl_secs: default_responder_ttl_secs(),
            incident_snapshot_ttl_secs: default_incident_snapshot_ttl_secs(),
            statistics_ttl_secs: default_statistics_ttl_secs(),
            queue_capacity: default_cache_queue(),
        }
    }
}

/// Responder location search.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LocationConfig {
    /// Radius used when a query names none, in meters.
    #[serde(default = "default_radius_m")]
    pub default_radius_m: f64,

    /// Largest radius a query may ask for, in meters.
    #[serde(default = "default_max_radius_m")]
    pub max_radius_m: f64,

    /// Seconds after which a position no longer counts as live.
    #[serde(default = "default_responder_ttl_secs")]
    pub stale_after_secs: u64,
}

impl LocationConfig {
    /// Staleness threshold as a [`Duration`].
    pub const fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            default_radius_m: default_radius_m(),
            max_radius_m: default_max_radius_m(),
            stale_after_secs: default_responder_ttl_secs(),
        }
    }
}

/// Session admission and delivery.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionConfig {
    /// Live sessions allowed at once.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Frames buffered per session before it counts as a slow consumer.
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,

    /// Refuse citizen connections while an emergency is declared.
    #[serde(default)]
    pub emergency_mode: bool,

    /// Seconds between housekeeping passes.
    #[serde(default = "default_housekeeping_interval_secs")]
    pub housekeeping_interval_secs: u64,
}

impl SessionConfig {
    /// Housekeeping interval as a [`Duration`], at least one second.
    pub fn housekeeping_interval(&self) -> Duration {
        Duration::from_secs(self.housekeeping_interval_secs.max(1))
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            outbound_queue: default_outbound_queue(),
            emergency_mode: false,
            housekeeping_interval_secs: default_housekeeping_interval_secs(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error), used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

const fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_owned()
}

const fn default_port() -> u16 {
    8081
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_owned()]
}

const fn default_shutdown_grace_secs() -> u64 {
    10
}

fn default_jwt_secret() -> String {
    "beacon-development-secret".to_owned()
}

const fn default_token_ttl_secs() -> u64 {
    86_400
}

const fn default_guest_token_ttl_secs() -> u64 {
    3_600
}

const fn default_connection_max() -> u32 {
    10
}

const fn default_event_max() -> u32 {
    60
}

const fn default_window_secs() -> u64 {
    60
}

const fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_cache_url() -> String {
    "redis://localhost:6379".to_owned()
}

const fn default_responder_ttl_secs() -> u64 {
    300
}

const fn default_incident_snapshot_ttl_secs() -> u64 {
    3_600
}

const fn default_statistics_ttl_secs() -> u64 {
    300
}

const fn default_cache_queue() -> usize {
    1_024
}

const fn default_radius_m() -> f64 {
    5_000.0
}

const fn default_max_radius_m() -> f64 {
    50_000.0
}

const fn default_max_connections() -> usize {
    1_000
}

const fn default_outbound_queue() -> usize {
    256
}

const fn default_housekeeping_interval_secs() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_owned()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::collections::HashMap;

    use super::*;

    #[test]
    fn default_config_matches_documented_values() {
        let config = BrokerConfig::default();
        assert_eq!(config.server.port, 8081);
        assert_eq!(config.rate_limit.connection_max, 10);
        assert_eq!(config.rate_limit.event_max, 60);
        assert_eq!(config.heartbeat.interval_secs, 30);
        assert_eq!(config.cache.responder_ttl_secs, 300);
        assert_eq!(config.session.max_connections, 1000);
        assert_eq!(config.auth.mode, AuthMode::Jwt);
    }

    #[test]
    fn empty_yaml_yields_defaults() {
        assert_eq!(BrokerConfig::parse("").unwrap(), BrokerConfig::default());
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let yaml = r"
server:
  port: 9090
auth:
  mode: open
rate_limit:
  event_max: 5
location:
  default_radius_m: 2500.0
";
        let config = BrokerConfig::parse(yaml).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.auth.mode, AuthMode::Open);
        assert_eq!(config.rate_limit.event_max, 5);
        assert_eq!(config.rate_limit.connection_max, 10);
        assert!((config.location.default_radius_m - 2500.0).abs() < f64::EPSILON);
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("BEACON_PORT", "7000"),
            ("BEACON_API_KEYS", "alpha, beta,,"),
            ("EMERGENCY_MODE", "true"),
            ("RATE_LIMIT_ENABLED", "0"),
        ]
        .into_iter()
        .collect();
        let mut config = BrokerConfig::default();
        config
            .apply_env_overrides(|var| env.get(var).map(|v| (*v).to_owned()))
            .unwrap();
        assert_eq!(config.server.port, 7000);
        assert_eq!(config.auth.api_keys, vec!["alpha", "beta"]);
        assert!(config.session.emergency_mode);
        assert!(!config.rate_limit.enabled);
    }

    #[test]
    fn malformed_env_override_is_reported() {
        let mut config = BrokerConfig::default();
        let result = config.apply_env_overrides(|var| {
            (var == "BEACON_PORT").then(|| "eighty".to_owned())
        });
        assert!(matches!(result, Err(ConfigError::Env { var: "BEACON_PORT", .. })));
    }
}
