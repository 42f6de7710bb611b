//! Tag-aware YAML loading
//!
//! Supported tags:
//! - `!secret key` - Substitute from `secrets.yaml` next to the loaded file
//! - `!env_var VAR` / `!env_var VAR default` - Environment variable substitution

use crate::error::{ConfigError, ConfigResult};
use serde_yaml::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

const SECRETS_FILE: &str = "secrets.yaml";

/// YAML loader resolving `!secret` and `!env_var` tags
pub struct YamlLoader {
    /// Directory holding `secrets.yaml`
    config_dir: PathBuf,
    /// Loaded on first `!secret`
    secrets: Option<HashMap<String, String>>,
}

impl YamlLoader {
    /// `config_dir` is where `secrets.yaml` is looked up
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            secrets: None,
        }
    }

    /// Skip `secrets.yaml` and resolve `!secret` from `secrets`
    pub fn with_secrets(config_dir: impl Into<PathBuf>, secrets: HashMap<String, String>) -> Self {
        Self {
            config_dir: config_dir.into(),
            secrets: Some(secrets),
        }
    }

    /// Relative paths resolve against the config directory
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> ConfigResult<Value> {
        let path = path.as_ref();
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config_dir.join(path)
        };
        debug!(path = %path.display(), "Loading configuration");

        let content = fs::read_to_string(&path).map_err(|e| ConfigError::ReadFile {
            path: path.clone(),
            source: e,
        })?;

        self.load_string(&content, &path)
    }

    /// `source_path` only labels parse errors
    pub fn load_string(&mut self, content: &str, source_path: &Path) -> ConfigResult<Value> {
        let value: Value = serde_yaml::from_str(content).map_err(|e| ConfigError::ParseYaml {
            path: source_path.to_path_buf(),
            source: e,
        })?;

        self.process_value(value)
    }

    /// Resolve tags depth-first
    fn process_value(&mut self, value: Value) -> ConfigResult<Value> {
        match value {
            Value::Tagged(tagged) => {
                let tag = tagged.tag.to_string();
                trace!("Processing tag '{}' with value {:?}", tag, tagged.value);
                match tag.as_str() {
                    "!secret" => self.process_secret(tagged.value),
                    "!env_var" => process_env_var(tagged.value),
                    _ => Err(ConfigError::InvalidValue {
                        key: tag,
                        reason: "unsupported YAML tag".to_string(),
                    }),
                }
            }
            Value::Mapping(map) => {
                let mut result = serde_yaml::Mapping::new();
                for (k, v) in map {
                    result.insert(k, self.process_value(v)?);
                }
                Ok(Value::Mapping(result))
            }
            Value::Sequence(seq) => seq
                .into_iter()
                .map(|v| self.process_value(v))
                .collect::<ConfigResult<Vec<_>>>()
                .map(Value::Sequence),
            _ => Ok(value),
        }
    }

    fn process_secret(&mut self, value: Value) -> ConfigResult<Value> {
        let Value::String(key) = value else {
            return Err(ConfigError::InvalidValue {
                key: "!secret".to_string(),
                reason: "secret key must be a string".to_string(),
            });
        };

        if self.secrets.is_none() {
            self.secrets = Some(load_secrets(&self.config_dir.join(SECRETS_FILE))?);
        }

        let secret = self
            .secrets
            .as_ref()
            .and_then(|s| s.get(&key))
            .ok_or_else(|| ConfigError::SecretNotFound { key: key.clone() })?;

        trace!(key = %key, "Resolved secret");
        Ok(Value::String(secret.clone()))
    }
}

/// `VAR` or `VAR default`
fn process_env_var(value: Value) -> ConfigResult<Value> {
    let Value::String(spec) = value else {
        return Err(ConfigError::InvalidValue {
            key: "!env_var".to_string(),
            reason: "environment variable name must be a string".to_string(),
        });
    };

    let (var_name, default) = match spec.trim().split_once(char::is_whitespace) {
        Some((name, default)) => (name.to_string(), Some(default.trim().to_string())),
        None => (spec.trim().to_string(), None),
    };

    match (std::env::var(&var_name), default) {
        (Ok(value), _) => {
            trace!(var = %var_name, "Resolved environment variable");
            Ok(Value::String(value))
        }
        (Err(_), Some(default)) => Ok(Value::String(default)),
        (Err(_), None) => Err(ConfigError::EnvVarNotFound { var: var_name }),
    }
}

/// Load `secrets.yaml`; a missing file is an empty secret store
fn load_secrets(path: &Path) -> ConfigResult<HashMap<String, String>> {
    if !path.exists() {
        debug!("No secrets.yaml found at {:?}, using empty secrets", path);
        return Ok(HashMap::new());
    }

    let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    let raw: HashMap<String, Value> =
        serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseYaml {
            path: path.to_path_buf(),
            source: e,
        })?;

    let secrets = raw
        .into_iter()
        .map(|(k, v)| {
            let value = match v {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                Value::Null => String::new(),
                other => serde_yaml::to_string(&other)
                    .unwrap_or_default()
                    .trim()
                    .to_string(),
            };
            (k, value)
        })
        .collect::<HashMap<_, _>>();

    debug!("Loaded {} secrets from {:?}", secrets.len(), path);
    Ok(secrets)
}

/// Load a YAML file with tag processing; secrets are looked up next to it
pub fn load_yaml(path: impl AsRef<Path>) -> ConfigResult<Value> {
    let path = path.as_ref();
    let dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    YamlLoader::new(dir).load_file(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, content: &str) {
        let mut file = fs::File::create(dir.join(name)).unwrap();
        file.write_all(content.as_bytes()).unwrap();
    }

    #[test]
    fn test_secret_substitution() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "secrets.yaml", "oh_token: abc123\nport: 8080\n");
        write_file(dir.path(), "bridge.yaml", "token: !secret oh_token\nport: !secret port\n");

        let value = load_yaml(dir.path().join("bridge.yaml")).unwrap();
        assert_eq!(value["token"].as_str(), Some("abc123"));
        assert_eq!(value["port"].as_str(), Some("8080"));
    }

    #[test]
    fn test_missing_secret() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "bridge.yaml", "token: !secret nope\n");

        let err = load_yaml(dir.path().join("bridge.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::SecretNotFound { key } if key == "nope"));
    }

    #[test]
    fn test_env_var_default() {
        let mut loader = YamlLoader::new(".");
        let value = loader
            .load_string(
                "url: !env_var OH_BRIDGE_TEST_SURELY_UNSET http://localhost:8080\n",
                Path::new("inline.yaml"),
            )
            .unwrap();
        assert_eq!(value["url"].as_str(), Some("http://localhost:8080"));
    }

    #[test]
    fn test_env_var_missing() {
        let mut loader = YamlLoader::new(".");
        let err = loader
            .load_string(
                "url: !env_var OH_BRIDGE_TEST_SURELY_UNSET\n",
                Path::new("inline.yaml"),
            )
            .unwrap_err();
        assert!(matches!(err, ConfigError::EnvVarNotFound { .. }));
    }

    #[test]
    fn test_nested_tags_in_sequences() {
        let secrets = HashMap::from([("pw".to_string(), "hunter2".to_string())]);
        let mut loader = YamlLoader::with_secrets(".", secrets);
        let value = loader
            .load_string(
                "servers:\n  - name: a\n    password: !secret pw\n",
                Path::new("inline.yaml"),
            )
            .unwrap();
        assert_eq!(value["servers"][0]["password"].as_str(), Some("hunter2"));
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let mut loader = YamlLoader::new(".");
        let err = loader
            .load_string("a: !include other.yaml\n", Path::new("inline.yaml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
