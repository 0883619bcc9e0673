//! Precedence resolution for configuration.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. CLI flags (passed at runtime)
//! 2. Environment (`LINKDECK_SERVER`, server URL only)
//! 3. config.kdl (`~/.config/linkdeck/config.kdl`, or `LINKDECK_CONFIG`)
//! 4. Built-in defaults

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use url::Url;

use super::schema::{LinkdeckConfig, OutputFormat};
use crate::live::backoff::{DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_DELAY_MS};
use crate::live::protocol::socket_url;
use crate::live::{DEFAULT_DEBOUNCE, DEFAULT_POLL_INTERVAL_SECS, LiveOptions, ReconnectPolicy};
use crate::{Error, Result};

/// Environment variable overriding the config file location.
pub const CONFIG_PATH_ENV: &str = "LINKDECK_CONFIG";

/// Environment variable overriding the server URL.
pub const SERVER_ENV: &str = "LINKDECK_SERVER";

pub const DEFAULT_SERVER: &str = "http://localhost:8080";
pub const DEFAULT_SOCKET_PATH: &str = "/ws";
pub const DEFAULT_GRAPHQL_PATH: &str = "/graphql";

/// Tracks where a resolved value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    /// Value from environment variable
    EnvVar(String),
    /// Value from config.kdl
    File,
    /// Value from CLI flag
    CliFlag,
    /// Built-in default value
    Default,
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::EnvVar(name) => write!(f, "env:{}", name),
            ValueSource::File => write!(f, "file"),
            ValueSource::CliFlag => write!(f, "cli"),
            ValueSource::Default => write!(f, "default"),
        }
    }
}

impl Serialize for ValueSource {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A resolved value with its source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolved<T> {
    pub value: T,
    pub source: ValueSource,
}

impl<T> Resolved<T> {
    pub fn new(value: T, source: ValueSource) -> Self {
        Self { value, source }
    }

    fn default_value(value: T) -> Self {
        Self::new(value, ValueSource::Default)
    }
}

/// Pick the first value present, highest precedence first.
fn pick<T>(candidates: Vec<(Option<T>, ValueSource)>, default: T) -> Resolved<T> {
    candidates
        .into_iter()
        .find_map(|(value, source)| value.map(|v| Resolved::new(v, source)))
        .unwrap_or_else(|| Resolved::default_value(default))
}

/// Fully resolved configuration with source tracking.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    /// config.kdl location (may not exist)
    pub config_path: Option<PathBuf>,
    pub server: Resolved<Url>,
    pub socket_path: Resolved<String>,
    pub graphql_path: Resolved<String>,
    pub realtime: Resolved<bool>,
    pub poll_interval_secs: Resolved<u64>,
    pub reconnect_base_ms: Resolved<u64>,
    pub reconnect_max_ms: Resolved<u64>,
    pub reconnect_max_attempts: Option<Resolved<u32>>,
    pub debounce_ms: Resolved<u64>,
    pub tags: Option<Resolved<Vec<String>>>,
    pub output_format: Resolved<OutputFormat>,
}

impl ResolvedConfig {
    /// Socket endpoint derived from the server URL.
    pub fn socket_url(&self) -> Result<Url> {
        socket_url(&self.server.value, &self.socket_path.value)
    }

    /// GraphQL endpoint derived from the server URL.
    pub fn graphql_url(&self) -> Result<Url> {
        Ok(self.server.value.join(&self.graphql_path.value)?)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(
            Duration::from_millis(self.reconnect_base_ms.value),
            Duration::from_millis(self.reconnect_max_ms.value),
        )
        .with_max_attempts(self.reconnect_max_attempts.as_ref().map(|r| r.value))
    }

    pub fn live_options(&self) -> LiveOptions {
        LiveOptions {
            enabled: self.realtime.value,
            poll_interval_secs: self.poll_interval_secs.value,
            policy: self.reconnect_policy(),
            debounce: Duration::from_millis(self.debounce_ms.value),
            tags: self.tags.as_ref().map(|r| r.value.clone()),
        }
    }

    pub fn output_format(&self) -> &OutputFormat {
        &self.output_format.value
    }
}

/// CLI overrides for configuration resolution.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub server: Option<String>,
    pub realtime: Option<bool>,
    pub poll_interval_secs: Option<u64>,
    pub tags: Option<Vec<String>>,
    pub output_format: Option<OutputFormat>,
}

impl ConfigOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    pub fn with_realtime(mut self, enabled: bool) -> Self {
        self.realtime = Some(enabled);
        self
    }

    pub fn with_poll_interval(mut self, secs: u64) -> Self {
        self.poll_interval_secs = Some(secs);
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = Some(tags);
        self
    }

    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = Some(format);
        self
    }
}

/// Default config.kdl location: `<config dir>/linkdeck/config.kdl`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("linkdeck").join("config.kdl"))
}

/// Config file location, honouring `LINKDECK_CONFIG`.
pub fn config_path() -> Option<PathBuf> {
    match std::env::var_os(CONFIG_PATH_ENV) {
        Some(path) if !path.is_empty() => Some(PathBuf::from(path)),
        _ => default_config_path(),
    }
}

fn parse_server(raw: &str, source: &ValueSource) -> Result<Url> {
    let url = Url::parse(raw)
        .map_err(|e| Error::InvalidConfig(format!("server '{}' ({}): {}", raw, source, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::InvalidConfig(format!(
            "server '{}' ({}) must be an http or https URL",
            raw, source
        )));
    }
    Ok(url)
}

/// Resolve configuration from the environment, config.kdl and `overrides`.
pub fn resolve_config(overrides: &ConfigOverrides) -> Result<ResolvedConfig> {
    let path = config_path();
    let file = match path {
        Some(ref path) => LinkdeckConfig::load(path)?,
        None => LinkdeckConfig::new(),
    };
    let env_server = std::env::var(SERVER_ENV).ok().filter(|s| !s.is_empty());
    resolve_with(&file, env_server, overrides, path.as_deref())
}

/// Resolve from already-loaded inputs.
pub fn resolve_with(
    file: &LinkdeckConfig,
    env_server: Option<String>,
    overrides: &ConfigOverrides,
    path: Option<&Path>,
) -> Result<ResolvedConfig> {
    let server = pick(
        vec![
            (overrides.server.clone(), ValueSource::CliFlag),
            (env_server, ValueSource::EnvVar(SERVER_ENV.to_string())),
            (file.server.clone(), ValueSource::File),
        ],
        DEFAULT_SERVER.to_string(),
    );
    let server = Resolved::new(parse_server(&server.value, &server.source)?, server.source);

    let realtime = pick(
        vec![
            (overrides.realtime, ValueSource::CliFlag),
            (file.realtime, ValueSource::File),
        ],
        true,
    );
    let poll_interval_secs = pick(
        vec![
            (overrides.poll_interval_secs, ValueSource::CliFlag),
            (file.poll_interval, ValueSource::File),
        ],
        DEFAULT_POLL_INTERVAL_SECS,
    );
    let tags = overrides
        .tags
        .clone()
        .map(|t| Resolved::new(t, ValueSource::CliFlag))
        .or_else(|| file.tags.clone().map(|t| Resolved::new(t, ValueSource::File)));
    let output_format = pick(
        vec![
            (overrides.output_format.clone(), ValueSource::CliFlag),
            (file.output_format.clone(), ValueSource::File),
        ],
        OutputFormat::Json,
    );

    let from_file = |value: Option<u64>, default: u64| {
        pick(vec![(value, ValueSource::File)], default)
    };

    let resolved = ResolvedConfig {
        config_path: path.map(Path::to_path_buf),
        server,
        socket_path: pick(
            vec![(file.socket_path.clone(), ValueSource::File)],
            DEFAULT_SOCKET_PATH.to_string(),
        ),
        graphql_path: pick(
            vec![(file.graphql_path.clone(), ValueSource::File)],
            DEFAULT_GRAPHQL_PATH.to_string(),
        ),
        realtime,
        poll_interval_secs,
        reconnect_base_ms: from_file(file.reconnect_base_ms, DEFAULT_BASE_DELAY_MS),
        reconnect_max_ms: from_file(file.reconnect_max_ms, DEFAULT_MAX_DELAY_MS),
        reconnect_max_attempts: file
            .reconnect_max_attempts
            .map(|n| Resolved::new(n, ValueSource::File)),
        debounce_ms: from_file(file.debounce_ms, DEFAULT_DEBOUNCE.as_millis() as u64),
        tags,
        output_format,
    };

    tracing::debug!(
        server = %resolved.server.value,
        source = %resolved.server.source,
        "configuration resolved"
    );
    Ok(resolved)
}
