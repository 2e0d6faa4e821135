//! Configuration types for passkit.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Top-level configuration, usually read from `passkit.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Driver settings.
    #[serde(default)]
    pub driver: DriverConfig,

    /// Per-analyzer settings, keyed by analyzer name.
    #[serde(default)]
    pub analyzers: BTreeMap<String, AnalyzerConfig>,
}

impl Config {
    /// Creates a new default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&content)
    }

    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })
    }

    /// Returns the configured enablement of an analyzer, if any.
    #[must_use]
    pub fn analyzer_enabled(&self, name: &str) -> Option<bool> {
        self.analyzers.get(name).and_then(|c| c.enabled)
    }

    /// Returns the flag values configured for an analyzer, rendered the way
    /// they would be written on the command line.
    #[must_use]
    pub fn flag_values(&self, name: &str) -> BTreeMap<String, String> {
        self.analyzers
            .get(name)
            .map(|c| {
                c.options
                    .iter()
                    .filter_map(|(k, v)| render_value(v).map(|v| (k.clone(), v)))
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn render_value(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Float(f) => Some(f.to_string()),
        toml::Value::Boolean(b) => Some(b.to_string()),
        toml::Value::Array(items) => {
            let parts: Option<Vec<String>> = items.iter().map(render_value).collect();
            parts.map(|p| p.join(","))
        }
        toml::Value::Datetime(_) | toml::Value::Table(_) => None,
    }
}

/// Driver-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Maximum number of actions running at once (default: logical CPUs).
    #[serde(default)]
    pub parallelism: Option<usize>,

    /// Extra files analyzers may read through `Pass::read_file`.
    #[serde(default)]
    pub read_allow: Vec<PathBuf>,

    /// Emit JSON instead of text.
    #[serde(default)]
    pub json: bool,

    /// Abort the analysis after this many seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Per-analyzer configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Whether this analyzer is enabled.
    #[serde(default)]
    pub enabled: Option<bool>,

    /// Analyzer flag values as key-value pairs.
    #[serde(flatten)]
    pub options: BTreeMap<String, toml::Value>,
}

impl AnalyzerConfig {
    /// Gets a boolean option with a default value.
    #[must_use]
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.options
            .get(key)
            .and_then(toml::Value::as_bool)
            .unwrap_or(default)
    }

    /// Gets a string option with a default value.
    #[must_use]
    pub fn get_str<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.options
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or(default)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error reading config file.
    #[error("Failed to read config file {path}: {source}")]
    Io {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// Parse error in config file.
    #[error("Failed to parse config: {message}")]
    Parse {
        /// Parse error message.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.driver.parallelism.is_none());
        assert!(!config.driver.json);
        assert!(config.analyzers.is_empty());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[driver]
parallelism = 4
read_allow = ["docs/README.md"]

[analyzers.printf]
enabled = false
funcs = ["log", "warn"]
strict = true
"#;

        let config = Config::parse(toml).expect("Failed to parse");
        assert_eq!(config.driver.parallelism, Some(4));
        assert_eq!(config.driver.read_allow, [PathBuf::from("docs/README.md")]);
        assert_eq!(config.analyzer_enabled("printf"), Some(false));
        assert_eq!(config.analyzer_enabled("shadow"), None);

        let flags = config.flag_values("printf");
        assert_eq!(flags.get("funcs").map(String::as_str), Some("log,warn"));
        assert_eq!(flags.get("strict").map(String::as_str), Some("true"));
        assert!(!flags.contains_key("enabled"));

        let printf = &config.analyzers["printf"];
        assert!(printf.get_bool("strict", false));
        assert_eq!(printf.get_str("missing", "x"), "x");
    }

    #[test]
    fn test_parse_error() {
        let err = Config::parse("[driver\n").unwrap_err();
        assert!(err.to_string().starts_with("Failed to parse config"));
    }
}
