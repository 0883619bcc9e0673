//! KDL schema for config.kdl.
//!
//! ```kdl
//! server "https://dash.example.com"
//! socket-path "/ws"
//! graphql-path "/graphql"
//! realtime #true
//! poll-interval 30
//! reconnect-base-ms 1000
//! reconnect-max-ms 30000
//! reconnect-max-attempts 10
//! debounce-ms 100
//! tags "media" "dev"
//! output-format "human"
//! ```
//!
//! Every node is optional. Nodes with a value of the wrong type are ignored.

use std::path::Path;

use kdl::{KdlDocument, KdlEntry, KdlNode, KdlValue};
use serde::{Deserialize, Serialize};
use url::Url;

pub use crate::live::polling::MAX_POLL_INTERVAL_SECS;
use crate::{Error, Result};

/// Largest accepted debounce window.
pub const MAX_DEBOUNCE_MS: u64 = 60_000;

/// Output format preference for CLI commands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// JSON output (default, machine-readable)
    #[default]
    Json,
    /// Human-readable output
    Human,
}

impl OutputFormat {
    /// Parse from string, case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(OutputFormat::Json),
            "human" => Some(OutputFormat::Human),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Human => "human",
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Contents of config.kdl. `None` means "not set in the file".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkdeckConfig {
    /// Dashboard base URL (http or https)
    pub server: Option<String>,
    pub socket_path: Option<String>,
    pub graphql_path: Option<String>,
    /// Real-time updates on or off
    pub realtime: Option<bool>,
    /// Polling interval in seconds; 0 disables polling
    pub poll_interval: Option<u64>,
    pub reconnect_base_ms: Option<u64>,
    pub reconnect_max_ms: Option<u64>,
    pub reconnect_max_attempts: Option<u32>,
    pub debounce_ms: Option<u64>,
    /// Tag filter for applications
    pub tags: Option<Vec<String>>,
    pub output_format: Option<OutputFormat>,
}

fn first_string(doc: &KdlDocument, name: &str) -> Option<String> {
    doc.get(name)?
        .entries()
        .first()?
        .value()
        .as_string()
        .map(str::to_string)
}

fn first_integer(doc: &KdlDocument, name: &str) -> Option<i128> {
    doc.get(name)?.entries().first()?.value().as_integer()
}

fn first_bool(doc: &KdlDocument, name: &str) -> Option<bool> {
    doc.get(name)?.entries().first()?.value().as_bool()
}

fn string_node(name: &str, value: &str) -> KdlNode {
    let mut node = KdlNode::new(name);
    node.push(KdlEntry::new(KdlValue::String(value.to_string())));
    node
}

fn integer_node(name: &str, value: i128) -> KdlNode {
    let mut node = KdlNode::new(name);
    node.push(KdlEntry::new(KdlValue::Integer(value)));
    node
}

fn check_path(name: &str, path: &Option<String>) -> std::result::Result<(), String> {
    match path {
        Some(p) if !p.starts_with('/') => Err(format!("{} must start with '/', got '{}'", name, p)),
        _ => Ok(()),
    }
}

impl LinkdeckConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the config values.
    ///
    /// Returns an error message naming the first invalid node.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let Some(ref server) = self.server {
            let url = Url::parse(server).map_err(|e| format!("server '{}': {}", server, e))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(format!(
                    "server must be an http or https URL, got '{}'",
                    server
                ));
            }
        }
        check_path("socket-path", &self.socket_path)?;
        check_path("graphql-path", &self.graphql_path)?;

        if let Some(secs) = self.poll_interval {
            if secs > MAX_POLL_INTERVAL_SECS {
                return Err(format!(
                    "poll-interval must be 0-{}, got {}",
                    MAX_POLL_INTERVAL_SECS, secs
                ));
            }
        }
        if self.reconnect_base_ms == Some(0) {
            return Err("reconnect-base-ms must be greater than 0".to_string());
        }
        if let (Some(base), Some(max)) = (self.reconnect_base_ms, self.reconnect_max_ms) {
            if max < base {
                return Err(format!(
                    "reconnect-max-ms ({}) must not be below reconnect-base-ms ({})",
                    max, base
                ));
            }
        }
        if let Some(ms) = self.debounce_ms {
            if ms > MAX_DEBOUNCE_MS {
                return Err(format!("debounce-ms must be 0-{}, got {}", MAX_DEBOUNCE_MS, ms));
            }
        }
        Ok(())
    }

    /// Parse config from a KDL document.
    pub fn from_kdl(doc: &KdlDocument) -> Self {
        let mut config = Self::new();

        config.server = first_string(doc, "server");
        config.socket_path = first_string(doc, "socket-path");
        config.graphql_path = first_string(doc, "graphql-path");
        config.realtime = first_bool(doc, "realtime");
        config.poll_interval = first_integer(doc, "poll-interval").and_then(|i| u64::try_from(i).ok());
        config.reconnect_base_ms =
            first_integer(doc, "reconnect-base-ms").and_then(|i| u64::try_from(i).ok());
        config.reconnect_max_ms =
            first_integer(doc, "reconnect-max-ms").and_then(|i| u64::try_from(i).ok());
        config.reconnect_max_attempts =
            first_integer(doc, "reconnect-max-attempts").and_then(|i| u32::try_from(i).ok());
        config.debounce_ms = first_integer(doc, "debounce-ms").and_then(|i| u64::try_from(i).ok());
        config.output_format = first_string(doc, "output-format").and_then(|s| OutputFormat::parse(&s));

        if let Some(node) = doc.get("tags") {
            let tags: Vec<String> = node
                .entries()
                .iter()
                .filter_map(|entry| entry.value().as_string())
                .map(str::to_string)
                .collect();
            if !tags.is_empty() {
                config.tags = Some(tags);
            }
        }

        config
    }

    /// Convert config to a KDL document.
    pub fn to_kdl(&self) -> KdlDocument {
        let mut doc = KdlDocument::new();
        let nodes = doc.nodes_mut();

        if let Some(ref server) = self.server {
            nodes.push(string_node("server", server));
        }
        if let Some(ref path) = self.socket_path {
            nodes.push(string_node("socket-path", path));
        }
        if let Some(ref path) = self.graphql_path {
            nodes.push(string_node("graphql-path", path));
        }
        if let Some(realtime) = self.realtime {
            let mut node = KdlNode::new("realtime");
            node.push(KdlEntry::new(KdlValue::Bool(realtime)));
            nodes.push(node);
        }
        if let Some(secs) = self.poll_interval {
            nodes.push(integer_node("poll-interval", secs as i128));
        }
        if let Some(ms) = self.reconnect_base_ms {
            nodes.push(integer_node("reconnect-base-ms", ms as i128));
        }
        if let Some(ms) = self.reconnect_max_ms {
            nodes.push(integer_node("reconnect-max-ms", ms as i128));
        }
        if let Some(limit) = self.reconnect_max_attempts {
            nodes.push(integer_node("reconnect-max-attempts", limit as i128));
        }
        if let Some(ms) = self.debounce_ms {
            nodes.push(integer_node("debounce-ms", ms as i128));
        }
        if let Some(ref tags) = self.tags {
            let mut node = KdlNode::new("tags");
            for tag in tags {
                node.push(KdlEntry::new(KdlValue::String(tag.clone())));
            }
            nodes.push(node);
        }
        if let Some(ref format) = self.output_format {
            nodes.push(string_node("output-format", format.as_str()));
        }

        doc
    }

    /// Merge another config into this one.
    /// Values from `other` override values in `self` if they are Some.
    pub fn merge(&mut self, other: &LinkdeckConfig) {
        if other.server.is_some() {
            self.server = other.server.clone();
        }
        if other.socket_path.is_some() {
            self.socket_path = other.socket_path.clone();
        }
        if other.graphql_path.is_some() {
            self.graphql_path = other.graphql_path.clone();
        }
        if other.realtime.is_some() {
            self.realtime = other.realtime;
        }
        if other.poll_interval.is_some() {
            self.poll_interval = other.poll_interval;
        }
        if other.reconnect_base_ms.is_some() {
            self.reconnect_base_ms = other.reconnect_base_ms;
        }
        if other.reconnect_max_ms.is_some() {
            self.reconnect_max_ms = other.reconnect_max_ms;
        }
        if other.reconnect_max_attempts.is_some() {
            self.reconnect_max_attempts = other.reconnect_max_attempts;
        }
        if other.debounce_ms.is_some() {
            self.debounce_ms = other.debounce_ms;
        }
        if other.tags.is_some() {
            self.tags = other.tags.clone();
        }
        if other.output_format.is_some() {
            self.output_format = other.output_format.clone();
        }
    }

    /// Load and validate config.kdl. A missing file is an empty config.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let content = std::fs::read_to_string(path)?;
        let doc: KdlDocument = content.parse().map_err(|e| {
            Error::InvalidConfig(format!("failed to parse {}: {}", path.display(), e))
        })?;

        let config = Self::from_kdl(&doc);
        config
            .validate()
            .map_err(|msg| Error::InvalidConfig(format!("{}: {}", path.display(), msg)))?;
        Ok(config)
    }

    /// Write config.kdl, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_kdl().to_string())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_output_format_parse() {
        assert_eq!(OutputFormat::parse("json"), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::parse("HUMAN"), Some(OutputFormat::Human));
        assert_eq!(OutputFormat::parse("yaml"), None);
        assert_eq!(OutputFormat::Human.to_string(), "human");
    }

    #[test]
    fn test_config_from_kdl_empty() {
        let config = LinkdeckConfig::from_kdl(&KdlDocument::new());
        assert_eq!(config, LinkdeckConfig::default());
    }

    #[test]
    fn test_config_from_kdl_full() {
        let kdl = r#"
            server "https://dash.example.com"
            socket-path "/live"
            graphql-path "/api/graphql"
            realtime #false
            poll-interval 45
            reconnect-base-ms 500
            reconnect-max-ms 10000
            reconnect-max-attempts 8
            debounce-ms 250
            tags "media" "dev"
            output-format "human"
        "#;
        let doc: KdlDocument = kdl.parse().unwrap();
        let config = LinkdeckConfig::from_kdl(&doc);

        assert_eq!(config.server.as_deref(), Some("https://dash.example.com"));
        assert_eq!(config.socket_path.as_deref(), Some("/live"));
        assert_eq!(config.graphql_path.as_deref(), Some("/api/graphql"));
        assert_eq!(config.realtime, Some(false));
        assert_eq!(config.poll_interval, Some(45));
        assert_eq!(config.reconnect_base_ms, Some(500));
        assert_eq!(config.reconnect_max_ms, Some(10_000));
        assert_eq!(config.reconnect_max_attempts, Some(8));
        assert_eq!(config.debounce_ms, Some(250));
        assert_eq!(config.tags, Some(vec!["media".to_string(), "dev".to_string()]));
        assert_eq!(config.output_format, Some(OutputFormat::Human));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_ignores_wrong_types() {
        let kdl = r#"
            poll-interval "often"
            realtime "yes"
            reconnect-max-attempts -3
        "#;
        let doc: KdlDocument = kdl.parse().unwrap();
        let config = LinkdeckConfig::from_kdl(&doc);
        assert_eq!(config, LinkdeckConfig::default());
    }

    #[test]
    fn test_config_to_kdl_roundtrip() {
        let config = LinkdeckConfig {
            server: Some("http://dash.local:8080".to_string()),
            realtime: Some(true),
            poll_interval: Some(0),
            tags: Some(vec!["ops".to_string()]),
            ..Default::default()
        };
        let doc = config.to_kdl();
        assert_eq!(LinkdeckConfig::from_kdl(&doc), config);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let cases = [
            (
                LinkdeckConfig {
                    server: Some("ftp://dash.local".to_string()),
                    ..Default::default()
                },
                "http or https",
            ),
            (
                LinkdeckConfig {
                    server: Some("not a url".to_string()),
                    ..Default::default()
                },
                "server",
            ),
            (
                LinkdeckConfig {
                    socket_path: Some("ws".to_string()),
                    ..Default::default()
                },
                "socket-path",
            ),
            (
                LinkdeckConfig {
                    reconnect_base_ms: Some(0),
                    ..Default::default()
                },
                "reconnect-base-ms",
            ),
            (
                LinkdeckConfig {
                    reconnect_base_ms: Some(5000),
                    reconnect_max_ms: Some(1000),
                    ..Default::default()
                },
                "reconnect-max-ms",
            ),
            (
                LinkdeckConfig {
                    poll_interval: Some(MAX_POLL_INTERVAL_SECS + 1),
                    ..Default::default()
                },
                "poll-interval",
            ),
        ];
        for (config, needle) in cases {
            let err = config.validate().unwrap_err();
            assert!(err.contains(needle), "'{}' should mention '{}'", err, needle);
        }
    }

    #[test]
    fn test_merge_prefers_other() {
        let mut base = LinkdeckConfig {
            server: Some("http://a".to_string()),
            poll_interval: Some(10),
            ..Default::default()
        };
        let other = LinkdeckConfig {
            poll_interval: Some(60),
            realtime: Some(false),
            ..Default::default()
        };
        base.merge(&other);
        assert_eq!(base.server.as_deref(), Some("http://a"));
        assert_eq!(base.poll_interval, Some(60));
        assert_eq!(base.realtime, Some(false));
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let config = LinkdeckConfig::load(&dir.path().join("config.kdl")).unwrap();
        assert_eq!(config, LinkdeckConfig::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.kdl");
        let config = LinkdeckConfig {
            server: Some("https://dash.example.com".to_string()),
            debounce_ms: Some(200),
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(LinkdeckConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_load_invalid_kdl_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.kdl");
        std::fs::write(&path, "server \"unterminated").unwrap();
        assert!(matches!(
            LinkdeckConfig::load(&path),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_load_invalid_value_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.kdl");
        std::fs::write(&path, "debounce-ms 999999\n").unwrap();
        match LinkdeckConfig::load(&path) {
            Err(Error::InvalidConfig(msg)) => assert!(msg.contains("debounce-ms")),
            other => panic!("expected invalid config, got {:?}", other),
        }
    }
}
