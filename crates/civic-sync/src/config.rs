//! # Client Configuration
//!
//! Settings for the connection manager, fetch cache and error reporter.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     CIVIC_ENDPOINT=wss://data.example.org/ws                           │
//! │     CIVIC_TIER=1                                                       │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/link/client.toml (Linux)                                 │
//! │     ~/Library/Application Support/org.civic.link/client.toml (macOS)   │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     dev endpoint, tier 0, generated client_id                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # client.toml
//! [connection]
//! origin = "https://dashboard.example.org"
//! tier = 1
//! subscriptions = ["alerts", "clusters"]
//! heartbeat_interval_secs = 30
//!
//! [fetch]
//! base_url = "https://dashboard.example.org/data/"
//! ttl_secs = 300
//!
//! [[fetch.prefetch]]
//! key = "summary"
//! source = "stats/summary.json"
//!
//! [errors]
//! max_errors = 50
//! database_path = "/var/lib/civic/errors.db"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use civic_core::validation::{validate_cache_key, validate_endpoint, validate_tier, validate_topics};
use civic_core::BackoffPolicy;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::connection::ConnectionOptions;
use crate::error::{ClientError, ClientResult};
use crate::fetch::{FetchCacheConfig, FetchOptions};
use crate::reporter::ReporterConfig;

// =============================================================================
// Connection Settings
// =============================================================================

/// Push connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Explicit WebSocket endpoint. Wins over `origin`.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Origin the dashboard is served from, used to derive the endpoint.
    #[serde(default)]
    pub origin: Option<String>,

    /// Endpoint used when the origin is a local address.
    #[serde(default = "default_dev_endpoint")]
    pub dev_endpoint: String,

    /// Access tier (0 = public, 1 = registered, 2 = partner).
    #[serde(default)]
    pub tier: u8,

    /// Optional credential sent with the auth message.
    #[serde(default)]
    pub credential: Option<String>,

    /// Client identifier. Generated on first run if not provided.
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Topics to subscribe on connect.
    #[serde(default)]
    pub subscriptions: Vec<String>,

    /// Connection timeout (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Delay before the first reconnect attempt (milliseconds).
    #[serde(default = "default_base_backoff")]
    pub base_backoff_ms: u64,

    /// Maximum reconnect delay before jitter (seconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// Jitter fraction applied to reconnect delays (0.0 - 1.0).
    #[serde(default = "default_jitter")]
    pub jitter: f64,

    /// Interval between pings (seconds).
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Drop the link when a ping goes unanswered this long (seconds).
    /// Unset disables the check.
    #[serde(default)]
    pub heartbeat_timeout_secs: Option<u64>,

    /// Maximum consecutive reconnect attempts.
    /// Set to 0 for infinite retries.
    #[serde(default)]
    pub max_reconnect_attempts: u32,

    /// Report unknown message types.
    #[serde(default)]
    pub debug: bool,
}

fn default_dev_endpoint() -> String {
    "ws://localhost:8080/ws".to_string()
}

fn default_client_id() -> String {
    Uuid::new_v4().to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_base_backoff() -> u64 {
    1000
}

fn default_max_backoff() -> u64 {
    30
}

fn default_jitter() -> f64 {
    0.2
}

fn default_heartbeat_interval() -> u64 {
    30
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        ConnectionSettings {
            endpoint: None,
            origin: None,
            dev_endpoint: default_dev_endpoint(),
            tier: 0,
            credential: None,
            client_id: default_client_id(),
            subscriptions: Vec::new(),
            connect_timeout_secs: default_connect_timeout(),
            base_backoff_ms: default_base_backoff(),
            max_backoff_secs: default_max_backoff(),
            jitter: default_jitter(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            heartbeat_timeout_secs: None,
            max_reconnect_attempts: 0,
            debug: false,
        }
    }
}

impl ConnectionSettings {
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.base_backoff_ms),
            Duration::from_secs(self.max_backoff_secs),
            self.jitter,
        )
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Resolves the endpoint to connect to.
    ///
    /// ## Resolution Order
    /// 1. `endpoint` if set
    /// 2. `dev_endpoint` when `origin` is localhost, 127.0.0.1 or ::1
    /// 3. `wss://<origin host[:port]>/ws`
    /// 4. `dev_endpoint` when nothing else is configured
    pub fn resolve_endpoint(&self) -> ClientResult<Url> {
        if let Some(endpoint) = &self.endpoint {
            return Ok(validate_endpoint(endpoint)?);
        }

        let Some(origin) = &self.origin else {
            return Ok(validate_endpoint(&self.dev_endpoint)?);
        };

        let origin = Url::parse(origin)?;
        let host = origin
            .host_str()
            .ok_or_else(|| ClientError::InvalidUrl(format!("Origin has no host: {}", origin)))?;

        if matches!(host, "localhost" | "127.0.0.1" | "[::1]" | "::1") {
            debug!(host, "Local origin, using dev endpoint");
            return Ok(validate_endpoint(&self.dev_endpoint)?);
        }

        let authority = match origin.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        Ok(validate_endpoint(&format!("wss://{}/ws", authority))?)
    }
}

impl From<&ConnectionSettings> for ConnectionOptions {
    fn from(settings: &ConnectionSettings) -> Self {
        ConnectionOptions {
            client_id: settings.client_id.clone(),
            backoff: settings.backoff_policy(),
            heartbeat_interval: Duration::from_secs(settings.heartbeat_interval_secs),
            heartbeat_timeout: settings.heartbeat_timeout_secs.map(Duration::from_secs),
            max_reconnect_attempts: settings.max_reconnect_attempts,
            debug: settings.debug,
        }
    }
}

// =============================================================================
// Fetch Settings
// =============================================================================

/// A resource to warm the cache with at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefetchEntry {
    pub key: String,
    pub source: String,
}

/// Pull cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchSettings {
    /// Base URL relative sources are resolved against.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Retries after the first failed attempt.
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Entry lifetime (seconds).
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,

    /// Linear retry step (milliseconds). Attempt n waits (n-1) steps.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    /// Cache capacity. Set to 0 for unbounded.
    #[serde(default)]
    pub max_entries: usize,

    /// Per-request timeout (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Resources loaded at startup.
    #[serde(default)]
    pub prefetch: Vec<PrefetchEntry>,
}

fn default_base_url() -> String {
    "http://localhost:8080/".to_string()
}

fn default_retries() -> u32 {
    3
}

fn default_ttl() -> u64 {
    300
}

fn default_retry_delay() -> u64 {
    1000
}

fn default_request_timeout() -> u64 {
    15
}

impl Default for FetchSettings {
    fn default() -> Self {
        FetchSettings {
            base_url: default_base_url(),
            retries: default_retries(),
            ttl_secs: default_ttl(),
            retry_delay_ms: default_retry_delay(),
            max_entries: 0,
            request_timeout_secs: default_request_timeout(),
            prefetch: Vec::new(),
        }
    }
}

impl FetchSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Per-call defaults derived from these settings.
    pub fn default_options(&self) -> FetchOptions {
        FetchOptions::default()
            .retries(self.retries)
            .ttl(Duration::from_secs(self.ttl_secs))
    }
}

impl From<&FetchSettings> for FetchCacheConfig {
    fn from(settings: &FetchSettings) -> Self {
        FetchCacheConfig {
            retry_base_delay: Duration::from_millis(settings.retry_delay_ms),
            max_entries: settings.max_entries,
        }
    }
}

// =============================================================================
// Error Settings
// =============================================================================

/// Error reporter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorSettings {
    /// Records kept in memory.
    #[serde(default = "default_max_errors")]
    pub max_errors: usize,

    /// Records persisted (most recent).
    #[serde(default = "default_persist_limit")]
    pub persist_limit: usize,

    /// SQLite file for the persisted log. Unset keeps the log in memory only.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

fn default_max_errors() -> usize {
    50
}

fn default_persist_limit() -> usize {
    20
}

impl Default for ErrorSettings {
    fn default() -> Self {
        ErrorSettings {
            max_errors: default_max_errors(),
            persist_limit: default_persist_limit(),
            database_path: None,
        }
    }
}

impl From<&ErrorSettings> for ReporterConfig {
    fn from(settings: &ErrorSettings) -> Self {
        ReporterConfig {
            max_errors: settings.max_errors,
            persist_limit: settings.persist_limit,
        }
    }
}

// =============================================================================
// Main Client Configuration
// =============================================================================

/// Complete client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub connection: ConnectionSettings,

    #[serde(default)]
    pub fetch: FetchSettings,

    #[serde(default)]
    pub errors: ErrorSettings,
}

impl ClientConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (client.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> ClientResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading client config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load client config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> ClientResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| ClientError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Client config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> ClientResult<()> {
        let connection = &self.connection;

        if connection.client_id.trim().is_empty() {
            return Err(ClientError::InvalidConfig("client_id must not be empty".into()));
        }
        validate_tier(i64::from(connection.tier))?;
        validate_topics(&connection.subscriptions)?;
        connection.backoff_policy().validate()?;
        connection.resolve_endpoint()?;

        if connection.heartbeat_interval_secs == 0 {
            return Err(ClientError::InvalidConfig(
                "heartbeat_interval_secs must be greater than 0".into(),
            ));
        }
        if connection.heartbeat_timeout_secs == Some(0) {
            return Err(ClientError::InvalidConfig(
                "heartbeat_timeout_secs must be greater than 0 when set".into(),
            ));
        }

        let base = Url::parse(&self.fetch.base_url)?;
        if base.scheme() != "http" && base.scheme() != "https" {
            return Err(ClientError::InvalidUrl(format!(
                "API base must start with http:// or https://, got: {}",
                self.fetch.base_url
            )));
        }
        for entry in &self.fetch.prefetch {
            validate_cache_key(&entry.key)?;
        }

        if self.errors.max_errors == 0 {
            return Err(ClientError::InvalidConfig("max_errors must be greater than 0".into()));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(endpoint) = var("CIVIC_ENDPOINT") {
            debug!(endpoint = %endpoint, "Overriding endpoint from environment");
            self.connection.endpoint = Some(endpoint);
        }

        if let Some(origin) = var("CIVIC_ORIGIN") {
            self.connection.origin = Some(origin);
        }

        if let Some(tier) = var("CIVIC_TIER") {
            match tier.parse::<u8>() {
                Ok(t) => self.connection.tier = t,
                Err(_) => warn!(tier = %tier, "Invalid tier in environment"),
            }
        }

        if let Some(credential) = var("CIVIC_CREDENTIAL") {
            self.connection.credential = Some(credential);
        }

        if let Some(id) = var("CIVIC_CLIENT_ID") {
            debug!(client_id = %id, "Overriding client ID from environment");
            self.connection.client_id = id;
        }

        if let Some(topics) = var("CIVIC_SUBSCRIPTIONS") {
            self.connection.subscriptions = topics
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect();
        }

        if let Some(base) = var("CIVIC_API_BASE") {
            debug!(base_url = %base, "Overriding API base from environment");
            self.fetch.base_url = base;
        }

        if let Some(flag) = var("CIVIC_DEBUG") {
            self.connection.debug = matches!(flag.to_lowercase().as_str(), "1" | "true" | "yes");
        }

        if let Some(path) = var("CIVIC_ERROR_DB") {
            self.errors.database_path = Some(PathBuf::from(path));
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "civic", "link")
            .map(|dirs| dirs.config_dir().join("client.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions::from(&self.connection)
    }

    pub fn fetch_cache_config(&self) -> FetchCacheConfig {
        FetchCacheConfig::from(&self.fetch)
    }

    pub fn reporter_config(&self) -> ReporterConfig {
        ReporterConfig::from(&self.errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert!(!config.connection.client_id.is_empty());
        assert_eq!(config.connection.tier, 0);
        assert_eq!(config.fetch.retries, 3);
        assert_eq!(config.errors.max_errors, 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_resolve_endpoint() {
        let mut settings = ConnectionSettings::default();
        assert_eq!(settings.resolve_endpoint().unwrap().as_str(), "ws://localhost:8080/ws");

        settings.origin = Some("https://dashboard.example.org/app".into());
        assert_eq!(
            settings.resolve_endpoint().unwrap().as_str(),
            "wss://dashboard.example.org/ws"
        );

        settings.origin = Some("https://dashboard.example.org:8443".into());
        assert_eq!(
            settings.resolve_endpoint().unwrap().as_str(),
            "wss://dashboard.example.org:8443/ws"
        );

        settings.origin = Some("http://127.0.0.1:3000".into());
        assert_eq!(settings.resolve_endpoint().unwrap().as_str(), "ws://localhost:8080/ws");

        settings.endpoint = Some("wss://push.example.org/live".into());
        assert_eq!(settings.resolve_endpoint().unwrap().as_str(), "wss://push.example.org/live");
    }

    #[test]
    fn test_config_validation() {
        let mut config = ClientConfig::default();
        assert!(config.validate().is_ok());

        config.connection.tier = 3;
        assert!(config.validate().is_err());
        config.connection.tier = 2;

        config.connection.endpoint = Some("http://invalid".into());
        assert!(config.validate().is_err());
        config.connection.endpoint = None;

        config.connection.jitter = 1.5;
        assert!(config.validate().is_err());
        config.connection.jitter = 0.2;

        config.fetch.base_url = "ftp://example.org".into();
        assert!(config.validate().is_err());
        config.fetch.base_url = "https://example.org/data/".into();

        config.fetch.prefetch.push(PrefetchEntry {
            key: String::new(),
            source: "x".into(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("CIVIC_ENDPOINT", "wss://push.example.org/ws"),
            ("CIVIC_TIER", "2"),
            ("CIVIC_SUBSCRIPTIONS", "alerts, clusters,,"),
            ("CIVIC_DEBUG", "true"),
            ("CIVIC_ERROR_DB", "/tmp/errors.db"),
        ]
        .into_iter()
        .collect();

        let mut config = ClientConfig::default();
        config.apply_overrides(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.connection.endpoint.as_deref(), Some("wss://push.example.org/ws"));
        assert_eq!(config.connection.tier, 2);
        assert_eq!(config.connection.subscriptions, vec!["alerts", "clusters"]);
        assert!(config.connection.debug);
        assert_eq!(config.errors.database_path, Some(PathBuf::from("/tmp/errors.db")));
    }

    #[test]
    fn test_conversions() {
        let mut config = ClientConfig::default();
        config.connection.heartbeat_timeout_secs = Some(10);
        config.fetch.retry_delay_ms = 250;

        let options = config.connection_options();
        assert_eq!(options.backoff.base, Duration::from_secs(1));
        assert_eq!(options.heartbeat_timeout, Some(Duration::from_secs(10)));
        assert_eq!(options.client_id, config.connection.client_id);

        assert_eq!(config.fetch_cache_config().retry_base_delay, Duration::from_millis(250));
        assert_eq!(config.reporter_config().persist_limit, 20);
        assert_eq!(config.fetch.default_options().ttl, Duration::from_secs(300));
    }

    #[test]
    fn test_toml_roundtrip_with_prefetch() {
        let toml_str = r#"
            [connection]
            tier = 1
            subscriptions = ["alerts"]

            [[fetch.prefetch]]
            key = "summary"
            source = "stats/summary.json"
        "#;
        let config: ClientConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.connection.tier, 1);
        assert_eq!(config.fetch.prefetch.len(), 1);
        assert_eq!(config.fetch.ttl_secs, 300);

        let out = toml::to_string_pretty(&config).unwrap();
        assert!(out.contains("[connection]"));
        assert!(out.contains("[[fetch.prefetch]]"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("civic-config-{}", Uuid::new_v4()));
        let path = dir.join("client.toml");

        let mut config = ClientConfig::default();
        config.connection.tier = 1;
        config.save(Some(path.clone())).unwrap();

        let loaded: ClientConfig = toml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.connection.tier, 1);
        assert_eq!(loaded.connection.client_id, config.connection.client_id);

        std::fs::remove_dir_all(dir).ok();
    }
}
