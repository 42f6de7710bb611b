//! Bridge and per-server configuration
//!
//! ```yaml
//! servers:
//!   - name: home
//!     base_url: https://openhab.local:8443
//!     allow_self_signed: true
//!     token: !secret openhab_token
//!     retry_max_ms: 60000
//!     event_filter: "openhab/items/*,openhab/things/*"
//! ```

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};
use crate::loader::load_yaml;

/// Credential attached to authenticated requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    None,
    Bearer(String),
    Basic { username: String, password: String },
}

impl Credentials {
    pub fn is_some(&self) -> bool {
        !matches!(self, Credentials::None)
    }
}

/// When an error-free 404 is double-checked with a health probe
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotFoundProbe {
    /// Only a 404 without a body is ambiguous (server mid-restart)
    #[default]
    EmptyBody,
    /// Every 404 is probed
    Always,
}

/// Configuration of one openHAB server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Name used in logs
    pub name: String,

    /// Base URL, e.g. `http://openhab.local:8080`
    pub base_url: String,

    /// Accept self-signed / invalid TLS certificates
    #[serde(default)]
    pub allow_self_signed: bool,

    /// API token (bearer)
    #[serde(default)]
    pub token: Option<String>,

    /// Basic auth user name
    #[serde(default)]
    pub username: Option<String>,

    /// Basic auth password
    #[serde(default)]
    pub password: Option<String>,

    /// First reconnect delay in milliseconds
    #[serde(default = "default_retry_initial_ms")]
    pub retry_initial_ms: u64,

    /// Reconnect delay ceiling in milliseconds
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,

    /// Resource collection cache lifetime in milliseconds
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,

    /// Per request timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Topic filter for the event stream subscription
    #[serde(default)]
    pub event_filter: Option<String>,

    #[serde(default)]
    pub not_found_probe: NotFoundProbe,
}

fn default_retry_initial_ms() -> u64 {
    2_500
}

fn default_retry_max_ms() -> u64 {
    60_000
}

fn default_cache_ttl_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl ServerConfig {
    /// Minimal configuration with defaults, no credentials
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            allow_self_signed: false,
            token: None,
            username: None,
            password: None,
            retry_initial_ms: default_retry_initial_ms(),
            retry_max_ms: default_retry_max_ms(),
            cache_ttl_ms: default_cache_ttl_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            event_filter: None,
            not_found_probe: NotFoundProbe::default(),
        }
    }

    /// Base URL without trailing slashes
    pub fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    pub fn credentials(&self) -> Credentials {
        match (&self.token, &self.username, &self.password) {
            (Some(token), _, _) if !token.is_empty() => Credentials::Bearer(token.clone()),
            (_, Some(username), Some(password)) if !username.is_empty() => Credentials::Basic {
                username: username.clone(),
                password: password.clone(),
            },
            _ => Credentials::None,
        }
    }

    pub fn retry_initial(&self) -> Duration {
        Duration::from_millis(self.retry_initial_ms)
    }

    pub fn retry_max(&self) -> Duration {
        Duration::from_millis(self.retry_max_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Check field combinations serde cannot express
    pub fn validate(&self) -> ConfigResult<()> {
        let fail = |message: &str| ConfigError::ValidationFailed {
            server: self.name.clone(),
            message: message.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(fail("name must not be empty"));
        }

        let url = self.base_url();
        let rest = url
            .strip_prefix("http://")
            .or_else(|| url.strip_prefix("https://"))
            .ok_or_else(|| fail("base_url must start with http:// or https://"))?;
        if rest.is_empty() || rest.starts_with('/') {
            return Err(fail("base_url has no host"));
        }

        let has_token = self.token.as_deref().is_some_and(|t| !t.is_empty());
        let has_user = self.username.as_deref().is_some_and(|u| !u.is_empty());
        if has_token && (has_user || self.password.is_some()) {
            return Err(fail("token and username/password are mutually exclusive"));
        }
        if has_user && self.password.is_none() {
            return Err(fail("username requires a password"));
        }
        if !has_user && self.password.is_some() {
            return Err(fail("password requires a username"));
        }

        if self.retry_initial_ms == 0 {
            return Err(fail("retry_initial_ms must be positive"));
        }
        if self.retry_max_ms < self.retry_initial_ms {
            return Err(fail("retry_max_ms must not be below retry_initial_ms"));
        }

        Ok(())
    }
}

/// Top-level bridge configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
}

impl BridgeConfig {
    /// Load and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let yaml = load_yaml(path)?;
        let config = Self::from_yaml(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse from an already tag-processed YAML value
    pub fn from_yaml(yaml: Value) -> ConfigResult<Self> {
        if !yaml.is_mapping() {
            return Err(ConfigError::InvalidValue {
                key: "root".to_string(),
                reason: "configuration must be a mapping".to_string(),
            });
        }

        serde_yaml::from_value(yaml).map_err(|e| ConfigError::InvalidValue {
            key: "servers".to_string(),
            reason: e.to_string(),
        })
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let mut names = HashSet::new();
        for server in &self.servers {
            server.validate()?;
            if !names.insert(server.name.as_str()) {
                return Err(ConfigError::DuplicateServer {
                    name: server.name.clone(),
                });
            }
        }
        Ok(())
    }
}
