//! YAML configuration loading for the openHAB bridge
//!
//! The configuration lists the openHAB servers to connect to. Values may
//! use two custom tags:
//!
//! - `!secret key` - Substitute from secrets.yaml
//! - `!env_var VAR [default]` - Environment variable substitution
//!
//! # Example
//!
//! ```ignore
//! use oh_config::BridgeConfig;
//!
//! let config = BridgeConfig::load("/etc/oh-bridge/bridge.yaml")?;
//! for server in &config.servers {
//!     println!("{} -> {}", server.name, server.base_url());
//! }
//! ```

mod error;
mod loader;
mod server;

pub use error::{ConfigError, ConfigResult};
pub use loader::{load_yaml, YamlLoader};
pub use server::{BridgeConfig, Credentials, NotFoundProbe, ServerConfig};

// Re-export serde_yaml::Value for convenience
pub use serde_yaml::Value;
