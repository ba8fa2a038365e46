//! Configuration schema definitions.
//!
//! This module defines the server configuration read from `devhost.toml`.
//! All types derive Serde traits and every field has a default, so an empty file is valid.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Environment variable overriding the default home directory.
pub const HOME_ENV: &str = "DEVHOST_HOME";

/// Root configuration for the server.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Home directory holding the registry, links and custom drivers.
    pub home: HomeConfig,

    /// Front controller execution.
    pub runtime: RuntimeConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address for plain HTTP (e.g., "127.0.0.1:8080").
    pub bind_address: String,

    /// Optional TLS listener.
    pub tls: Option<TlsConfig>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
            tls: None,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Bind address for HTTPS.
    #[serde(default = "default_tls_bind")]
    pub bind_address: String,

    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

fn default_tls_bind() -> String {
    "127.0.0.1:8443".to_string()
}

/// Home directory configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HomeConfig {
    /// Explicit home directory. Falls back to `$DEVHOST_HOME`, then `<config dir>/devhost`.
    pub path: Option<PathBuf>,
}

impl HomeConfig {
    /// The effective home directory, if one can be determined.
    pub fn resolve(&self) -> Option<PathBuf> {
        if let Some(path) = &self.path {
            return Some(path.clone());
        }
        if let Some(path) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
            return Some(PathBuf::from(path));
        }
        dirs::config_dir().map(|dir| dir.join("devhost"))
    }
}

/// Front controller execution settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// CGI binary used when a site has no pinned runtime version.
    pub default_binary: String,

    /// Pinned runtime version → CGI binary.
    pub versions: BTreeMap<String, String>,

    /// Maximum request body forwarded to a front controller.
    pub max_body_bytes: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_binary: "php-cgi".to_string(),
            versions: BTreeMap::new(),
            max_body_bytes: 64 * 1024 * 1024,
        }
    }
}

impl RuntimeConfig {
    /// Binary for a site pinned to `version` (or unpinned). Unknown versions fall back to
    /// the default binary.
    pub fn binary_for(&self, version: Option<&str>) -> &str {
        version
            .and_then(|v| self.versions.get(v))
            .map(String::as_str)
            .unwrap_or(&self.default_binary)
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,

    /// Connection establishment timeout for proxied upstreams in seconds.
    pub proxy_connect_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 60,
            proxy_connect_secs: 5,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
