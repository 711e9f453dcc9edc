//! Session Sync Service configuration.
//!
//! Configuration is loaded from environment variables. The Redis URL may
//! carry credentials and is redacted in Debug output.

use secrecy::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default WebSocket bind address.
pub const DEFAULT_WS_BIND_ADDRESS: &str = "0.0.0.0:8090";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8091";

/// Default ring-buffer size per session, in transitions.
pub const DEFAULT_HISTORY_CAPACITY: usize = 256;

/// Default per-connection outbound queue bound, in frames.
pub const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 64;

/// Default cap on transitions waiting for the durable log, per session.
pub const DEFAULT_DURABLE_BACKLOG_CAPACITY: usize = 4096;

/// Default wait for final acks after a session ends.
pub const DEFAULT_DRAIN_TIMEOUT_SECONDS: u64 = 10;

/// Default teardown delay for a session nobody is connected to.
pub const DEFAULT_IDLE_TIMEOUT_SECONDS: u64 = 300;

/// Default cap on concurrently live sessions.
pub const DEFAULT_MAX_SESSIONS: usize = 1000;

/// Default service instance ID prefix.
pub const DEFAULT_SERVICE_ID_PREFIX: &str = "sync";

/// Where accepted transitions are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurableBackend {
    /// Process-local log; history is lost on restart.
    Memory,
    /// Redis sorted sets keyed by session.
    Redis,
}

impl FromStr for DurableBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            other => Err(ConfigError::InvalidValue(format!(
                "SYNC_DURABLE_LOG must be 'memory' or 'redis', got '{other}'"
            ))),
        }
    }
}

/// Per-session tunables handed to every session actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub history_capacity: usize,
    pub outbound_queue_capacity: usize,
    /// Transitions a session's durable writer may hold while the log is
    /// failing. Past it the session's history is truncated.
    pub durable_backlog_capacity: usize,
    pub drain_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            outbound_queue_capacity: DEFAULT_OUTBOUND_QUEUE_CAPACITY,
            durable_backlog_capacity: DEFAULT_DURABLE_BACKLOG_CAPACITY,
            drain_timeout: Duration::from_secs(DEFAULT_DRAIN_TIMEOUT_SECONDS),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECONDS),
        }
    }
}

/// Session Sync Service configuration.
#[derive(Clone)]
pub struct Config {
    /// Instance identifier used in logs.
    pub service_id: String,

    /// WebSocket transport bind address (default: "0.0.0.0:8090").
    pub ws_bind_address: String,

    /// Health and metrics bind address (default: "0.0.0.0:8091").
    pub health_bind_address: String,

    /// Path to the scenario library JSON.
    pub scenario_path: String,

    pub durable_backend: DurableBackend,

    /// Redis connection URL, present when `durable_backend` is Redis.
    /// Protected by `SecretString` to prevent accidental logging.
    pub redis_url: Option<SecretString>,

    pub history_capacity: usize,
    pub outbound_queue_capacity: usize,
    pub durable_backlog_capacity: usize,
    pub drain_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,

    /// Load shedding: `SESSION_INIT` beyond this many live sessions fails.
    pub max_sessions: usize,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("service_id", &self.service_id)
            .field("ws_bind_address", &self.ws_bind_address)
            .field("health_bind_address", &self.health_bind_address)
            .field("scenario_path", &self.scenario_path)
            .field("durable_backend", &self.durable_backend)
            .field(
                "redis_url",
                &self.redis_url.as_ref().map(|_| "[REDACTED]"),
            )
            .field("history_capacity", &self.history_capacity)
            .field("outbound_queue_capacity", &self.outbound_queue_capacity)
            .field("durable_backlog_capacity", &self.durable_backlog_capacity)
            .field("drain_timeout_seconds", &self.drain_timeout_seconds)
            .field("idle_timeout_seconds", &self.idle_timeout_seconds)
            .field("max_sessions", &self.max_sessions)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// See [`Config::from_vars`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// `MissingEnvVar` when `SYNC_SCENARIO_PATH` is unset, or `REDIS_URL` is
    /// unset with the Redis backend selected. `InvalidValue` for unparsable
    /// numbers, zero capacities and unknown backends.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let scenario_path = vars
            .get("SYNC_SCENARIO_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnvVar("SYNC_SCENARIO_PATH".to_string()))?;

        let durable_backend = match vars.get("SYNC_DURABLE_LOG") {
            Some(value) => value.parse()?,
            None => DurableBackend::Memory,
        };

        let redis_url = match (durable_backend, vars.get("REDIS_URL")) {
            (DurableBackend::Redis, None) => {
                return Err(ConfigError::MissingEnvVar("REDIS_URL".to_string()));
            }
            (_, url) => url.map(|url| SecretString::from(url.clone())),
        };

        let ws_bind_address = vars
            .get("SYNC_WS_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_WS_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("SYNC_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let history_capacity =
            parse_positive(vars, "SYNC_HISTORY_CAPACITY", DEFAULT_HISTORY_CAPACITY)?;
        let outbound_queue_capacity = parse_positive(
            vars,
            "SYNC_OUTBOUND_QUEUE_CAPACITY",
            DEFAULT_OUTBOUND_QUEUE_CAPACITY,
        )?;
        let durable_backlog_capacity = parse_positive(
            vars,
            "SYNC_DURABLE_BACKLOG_CAPACITY",
            DEFAULT_DURABLE_BACKLOG_CAPACITY,
        )?;
        let drain_timeout_seconds =
            parse_var(vars, "SYNC_DRAIN_TIMEOUT_SECONDS", DEFAULT_DRAIN_TIMEOUT_SECONDS)?;
        let idle_timeout_seconds =
            parse_positive(vars, "SYNC_IDLE_TIMEOUT_SECONDS", DEFAULT_IDLE_TIMEOUT_SECONDS)?;
        let max_sessions = parse_positive(vars, "SYNC_MAX_SESSIONS", DEFAULT_MAX_SESSIONS)?;

        let service_id = vars.get("SYNC_SERVICE_ID").cloned().unwrap_or_else(|| {
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_SERVICE_ID_PREFIX}-{short_suffix}")
        });

        Ok(Config {
            service_id,
            ws_bind_address,
            health_bind_address,
            scenario_path,
            durable_backend,
            redis_url,
            history_capacity,
            outbound_queue_capacity,
            durable_backlog_capacity,
            drain_timeout_seconds,
            idle_timeout_seconds,
            max_sessions,
        })
    }

    /// Tunables for each session actor.
    #[must_use]
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            history_capacity: self.history_capacity,
            outbound_queue_capacity: self.outbound_queue_capacity,
            durable_backlog_capacity: self.durable_backlog_capacity,
            drain_timeout: Duration::from_secs(self.drain_timeout_seconds),
            idle_timeout: Duration::from_secs(self.idle_timeout_seconds),
        }
    }
}

fn parse_var<T: FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{key} must be a number, got '{raw}'"))),
        None => Ok(default),
    }
}

fn parse_positive<T>(vars: &HashMap<String, String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialEq + Default,
{
    let value = parse_var(vars, key, default)?;
    if value == T::default() {
        return Err(ConfigError::InvalidValue(format!("{key} must be greater than zero")));
    }
    Ok(value)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([(
            "SYNC_SCENARIO_PATH".to_string(),
            "/etc/sync/scenarios.json".to_string(),
        )])
    }

    #[test]
    fn test_from_vars_success_with_defaults() {
        let config = Config::from_vars(&base_vars()).expect("Config should load successfully");

        assert_eq!(config.scenario_path, "/etc/sync/scenarios.json");
        assert_eq!(config.ws_bind_address, DEFAULT_WS_BIND_ADDRESS);
        assert_eq!(config.health_bind_address, DEFAULT_HEALTH_BIND_ADDRESS);
        assert_eq!(config.durable_backend, DurableBackend::Memory);
        assert!(config.redis_url.is_none());
        assert_eq!(config.history_capacity, DEFAULT_HISTORY_CAPACITY);
        assert_eq!(config.outbound_queue_capacity, DEFAULT_OUTBOUND_QUEUE_CAPACITY);
        assert_eq!(config.max_sessions, DEFAULT_MAX_SESSIONS);
        assert!(config.service_id.starts_with("sync-"));
        assert_eq!(config.session_settings(), SessionSettings::default());
    }

    #[test]
    fn test_from_vars_with_overrides() {
        let mut vars = base_vars();
        vars.insert("SYNC_SERVICE_ID".to_string(), "sync-test".to_string());
        vars.insert("SYNC_DURABLE_LOG".to_string(), "Redis".to_string());
        vars.insert("REDIS_URL".to_string(), "redis://localhost:6379".to_string());
        vars.insert("SYNC_HISTORY_CAPACITY".to_string(), "16".to_string());
        vars.insert("SYNC_DURABLE_BACKLOG_CAPACITY".to_string(), "128".to_string());
        vars.insert("SYNC_DRAIN_TIMEOUT_SECONDS".to_string(), "0".to_string());
        vars.insert("SYNC_IDLE_TIMEOUT_SECONDS".to_string(), "30".to_string());

        let config = Config::from_vars(&vars).unwrap();

        assert_eq!(config.service_id, "sync-test");
        assert_eq!(config.durable_backend, DurableBackend::Redis);
        assert_eq!(
            config.redis_url.as_ref().unwrap().expose_secret(),
            "redis://localhost:6379"
        );
        let settings = config.session_settings();
        assert_eq!(settings.history_capacity, 16);
        assert_eq!(settings.durable_backlog_capacity, 128);
        assert_eq!(settings.drain_timeout, Duration::ZERO);
        assert_eq!(settings.idle_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_missing_scenario_path() {
        let result = Config::from_vars(&HashMap::new());
        assert!(
            matches!(result, Err(ConfigError::MissingEnvVar(ref v)) if v == "SYNC_SCENARIO_PATH")
        );
    }

    #[test]
    fn test_redis_backend_requires_url() {
        let mut vars = base_vars();
        vars.insert("SYNC_DURABLE_LOG".to_string(), "redis".to_string());

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(ref v)) if v == "REDIS_URL"));
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let mut vars = base_vars();
        vars.insert("SYNC_DURABLE_LOG".to_string(), "postgres".to_string());

        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_zero_and_garbage_capacities_rejected() {
        for (key, value) in [
            ("SYNC_HISTORY_CAPACITY", "0"),
            ("SYNC_OUTBOUND_QUEUE_CAPACITY", "0"),
            ("SYNC_MAX_SESSIONS", "0"),
            ("SYNC_HISTORY_CAPACITY", "lots"),
            ("SYNC_DRAIN_TIMEOUT_SECONDS", "-1"),
        ] {
            let mut vars = base_vars();
            vars.insert(key.to_string(), value.to_string());
            assert!(
                matches!(Config::from_vars(&vars), Err(ConfigError::InvalidValue(_))),
                "{key}={value} should be rejected"
            );
        }
    }

    #[test]
    fn test_debug_redacts_redis_url() {
        let mut vars = base_vars();
        vars.insert(
            "REDIS_URL".to_string(),
            "redis://:hunter2@localhost:6379".to_string(),
        );

        let config = Config::from_vars(&vars).unwrap();
        let debug_output = format!("{config:?}");

        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("hunter2"));
    }
}
