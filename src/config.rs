//! # Configuration Module
//!
//! The lifecycle engine never reads files itself. It asks a [`Config`]
//! collaborator for `get(key, path)` and gets back a JSON value (or nothing).
//! Keys are flat dotted strings (`server.max_request_body_size`,
//! `access_log.on`); `path` is the request's object path so sections can
//! override settings per URL subtree.
//!
//! [`SectionConfig`] is the stock implementation. It holds one map of keys
//! per section name, where a section is either `global` or a URL path:
//!
//! ```yaml
//! global:
//!   server.socket_port: 8080
//!   server:
//!     thread_pool: 16        # nested maps flatten to "server.thread_pool"
//!   access_log.on: true
//! "/admin":
//!   auth.on: true
//!   auth.token: s3cret
//! ```
//!
//! Lookups walk from the most specific path to its parents, then `/`, then
//! `global`. Any closure `Fn(&str, Option<&str>) -> Option<Value>` is also a
//! [`Config`].

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Name of the section consulted last, and the only one consulted when no
/// path is supplied.
pub const GLOBAL_SECTION: &str = "global";

/// Errors raised while loading configuration files.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid TOML config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid config shape: {0}")]
    Shape(String),
    #[error("invalid value for {key}: {message}")]
    Value { key: String, message: String },
}

/// Configuration lookup consumed by the engine.
pub trait Config: Send + Sync {
    /// Value of `key` for `path` (or for the global section when `path` is `None`).
    fn get(&self, key: &str, path: Option<&str>) -> Option<Value>;

    fn get_bool(&self, key: &str, path: Option<&str>, default: bool) -> bool {
        match self.get(key, path) {
            Some(Value::Bool(b)) => b,
            Some(Value::Number(n)) => n.as_i64().map_or(default, |n| n != 0),
            Some(Value::String(s)) => match s.to_ascii_lowercase().as_str() {
                "true" | "on" | "yes" | "1" => true,
                "false" | "off" | "no" | "0" => false,
                _ => default,
            },
            _ => default,
        }
    }

    fn get_u64(&self, key: &str, path: Option<&str>, default: u64) -> u64 {
        match self.get(key, path) {
            Some(Value::Number(n)) => n.as_u64().unwrap_or(default),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    fn get_str(&self, key: &str, path: Option<&str>) -> Option<String> {
        match self.get(key, path)? {
            Value::String(s) => Some(s),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

impl<F> Config for F
where
    F: Fn(&str, Option<&str>) -> Option<Value> + Send + Sync,
{
    fn get(&self, key: &str, path: Option<&str>) -> Option<Value> {
        self(key, path)
    }
}

/// Section-per-path configuration with path inheritance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SectionConfig {
    sections: BTreeMap<String, Map<String, Value>>,
}

impl SectionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` in `section`, returning `self` for chaining.
    pub fn set(&mut self, section: &str, key: &str, value: impl Into<Value>) -> &mut Self {
        self.sections
            .entry(normalize_section(section))
            .or_default()
            .insert(key.to_string(), value.into());
        self
    }

    /// Builder form of [`SectionConfig::set`].
    #[must_use]
    pub fn with(mut self, section: &str, key: &str, value: impl Into<Value>) -> Self {
        self.set(section, key, value);
        self
    }

    /// Turn on the hook named `name` for every path.
    #[must_use]
    pub fn enable_hook(self, name: &str) -> Self {
        self.with(GLOBAL_SECTION, &format!("{name}.on"), true)
    }

    #[must_use]
    pub fn section(&self, name: &str) -> Option<&Map<String, Value>> {
        self.sections.get(&normalize_section(name))
    }

    pub fn sections(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    /// Merge `other` over `self`; keys in `other` win.
    pub fn merge(&mut self, other: SectionConfig) {
        for (section, keys) in other.sections {
            self.sections.entry(section).or_default().extend(keys);
        }
    }

    /// Parse a YAML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] for syntax errors and
    /// [`ConfigError::Shape`] when the top level is not a map of maps.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let value: Value = serde_yaml::from_str(text)?;
        Self::from_value(value)
    }

    /// Parse a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Toml`] for syntax errors and
    /// [`ConfigError::Shape`] when the top level is not a table of tables.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let value: Value = toml::from_str(text)?;
        Self::from_value(value)
    }

    /// Load a `.yaml`/`.yml` or `.toml` file, picked by extension.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when the file cannot be read, plus any
    /// parse error of the selected format.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&text)?,
            _ => Self::from_yaml_str(&text)?,
        };
        debug!(
            path = %path.display(),
            sections = config.sections.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    fn from_value(value: Value) -> Result<Self, ConfigError> {
        let top = match value {
            Value::Object(map) => map,
            Value::Null => return Ok(Self::default()),
            other => {
                return Err(ConfigError::Shape(format!(
                    "expected a map of sections, found {other}"
                )))
            }
        };
        let mut config = SectionConfig::new();
        for (section, body) in top {
            let Value::Object(body) = body else {
                return Err(ConfigError::Shape(format!(
                    "section {section:?} must be a map"
                )));
            };
            let flat = config.sections.entry(normalize_section(&section)).or_default();
            flatten_into(flat, None, body);
        }
        Ok(config)
    }
}

impl Config for SectionConfig {
    fn get(&self, key: &str, path: Option<&str>) -> Option<Value> {
        if let Some(path) = path {
            for section in path_ancestors(path) {
                if let Some(v) = self.sections.get(section).and_then(|s| s.get(key)) {
                    return Some(v.clone());
                }
            }
        }
        self.sections
            .get(GLOBAL_SECTION)
            .and_then(|s| s.get(key))
            .cloned()
    }
}

fn flatten_into(out: &mut Map<String, Value>, prefix: Option<&str>, map: Map<String, Value>) {
    for (key, value) in map {
        let full = match prefix {
            Some(p) => format!("{p}.{key}"),
            None => key,
        };
        match value {
            Value::Object(inner) => flatten_into(out, Some(&full), inner),
            leaf => {
                out.insert(full, leaf);
            }
        }
    }
}

fn normalize_section(name: &str) -> String {
    if name == GLOBAL_SECTION || name == "/" {
        return name.to_string();
    }
    if name.starts_with('/') {
        name.trim_end_matches('/').to_string()
    } else {
        name.to_string()
    }
}

/// `/a/b/c` yields `/a/b/c`, `/a/b`, `/a`, `/`.
fn path_ancestors(path: &str) -> impl Iterator<Item = &str> {
    let trimmed = path.trim_end_matches('/');
    let mut next = Some(trimmed);
    std::iter::from_fn(move || {
        let current = next?;
        if current.is_empty() {
            next = None;
            return Some("/");
        }
        next = current.rfind('/').map(|i| &current[..i]);
        if next.is_none() {
            next = Some("");
        }
        Some(current)
    })
}
