//! Command implementations for the linkdeck CLI.
//!
//! - `watch` - Run live updates against a dashboard until interrupted
//! - `config` - Show, locate and initialize config.kdl
//! - `backoff` - Print the reconnect schedule

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{self, ConfigOverrides, LinkdeckConfig, ResolvedConfig};
use crate::data::{
    ApplicationGroup, BookmarkGroup, DashboardSettings, GraphqlSource, RenderSink,
};
use crate::live::{ConnectionState, ConnectionStatus, LiveUpdates, TungsteniteConnector};
use crate::{Error, Result};

/// Command results that can be serialized to JSON or formatted for humans.
pub trait Output {
    /// Serialize to JSON string.
    fn to_json(&self) -> String;

    /// Format for human-readable output.
    fn to_human(&self) -> String;
}

fn json_line<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!(r#"{{"error":"{}"}}"#, e))
}

/// Print a result in the selected format.
pub fn print<T: Output>(result: &T, human: bool) {
    if human {
        println!("{}", result.to_human());
    } else {
        println!("{}", result.to_json());
    }
}

// === config path ===

#[derive(Debug, Serialize)]
pub struct ConfigPathResult {
    pub path: Option<PathBuf>,
    pub exists: bool,
    pub from_env: bool,
}

impl Output for ConfigPathResult {
    fn to_json(&self) -> String {
        json_line(self)
    }

    fn to_human(&self) -> String {
        match self.path {
            Some(ref path) => {
                let mut line = path.display().to_string();
                if self.from_env {
                    line.push_str(&format!(" (from {})", config::CONFIG_PATH_ENV));
                }
                if !self.exists {
                    line.push_str(" (not created)");
                }
                line
            }
            None => "No config directory available on this platform".to_string(),
        }
    }
}

pub fn config_path() -> ConfigPathResult {
    let path = config::config_path();
    ConfigPathResult {
        exists: path.as_ref().is_some_and(|p| p.exists()),
        from_env: std::env::var_os(config::CONFIG_PATH_ENV).is_some_and(|v| !v.is_empty()),
        path,
    }
}

// === config show ===

#[derive(Debug, Serialize)]
pub struct ConfigShowResult {
    #[serde(flatten)]
    pub config: ResolvedConfig,
    pub socket_url: String,
    pub graphql_url: String,
}

impl Output for ConfigShowResult {
    fn to_json(&self) -> String {
        json_line(self)
    }

    fn to_human(&self) -> String {
        let c = &self.config;
        let mut lines = Vec::new();
        match c.config_path {
            Some(ref path) => lines.push(format!("Config file: {}", path.display())),
            None => lines.push("Config file: (none)".to_string()),
        }
        lines.push(String::new());
        lines.push(format!("  server:                 {} [{}]", c.server.value, c.server.source));
        lines.push(format!("  socket-path:            {} [{}]", c.socket_path.value, c.socket_path.source));
        lines.push(format!("  graphql-path:           {} [{}]", c.graphql_path.value, c.graphql_path.source));
        lines.push(format!("  realtime:               {} [{}]", c.realtime.value, c.realtime.source));
        lines.push(format!(
            "  poll-interval:          {}s [{}]",
            c.poll_interval_secs.value, c.poll_interval_secs.source
        ));
        lines.push(format!(
            "  reconnect-base-ms:      {} [{}]",
            c.reconnect_base_ms.value, c.reconnect_base_ms.source
        ));
        lines.push(format!(
            "  reconnect-max-ms:       {} [{}]",
            c.reconnect_max_ms.value, c.reconnect_max_ms.source
        ));
        match c.reconnect_max_attempts {
            Some(ref limit) => lines.push(format!(
                "  reconnect-max-attempts: {} [{}]",
                limit.value, limit.source
            )),
            None => lines.push("  reconnect-max-attempts: unlimited [default]".to_string()),
        }
        lines.push(format!("  debounce-ms:            {} [{}]", c.debounce_ms.value, c.debounce_ms.source));
        match c.tags {
            Some(ref tags) => lines.push(format!("  tags:                   {} [{}]", tags.value.join(", "), tags.source)),
            None => lines.push("  tags:                   (all) [default]".to_string()),
        }
        lines.push(String::new());
        lines.push(format!("  socket url:   {}", self.socket_url));
        lines.push(format!("  graphql url:  {}", self.graphql_url));
        lines.join("\n")
    }
}

pub fn config_show(config: ResolvedConfig) -> Result<ConfigShowResult> {
    Ok(ConfigShowResult {
        socket_url: config.socket_url()?.to_string(),
        graphql_url: config.graphql_url()?.to_string(),
        config,
    })
}

// === config init ===

#[derive(Debug, Serialize)]
pub struct ConfigInitResult {
    pub path: PathBuf,
    pub created: bool,
}

impl Output for ConfigInitResult {
    fn to_json(&self) -> String {
        json_line(self)
    }

    fn to_human(&self) -> String {
        if self.created {
            format!("Wrote {}", self.path.display())
        } else {
            format!("{} already exists (use --force to overwrite)", self.path.display())
        }
    }
}

/// Write a config.kdl spelling out every default.
pub fn config_init(server: Option<String>, force: bool) -> Result<ConfigInitResult> {
    let path = config::config_path()
        .ok_or_else(|| Error::Other("no config directory available".to_string()))?;
    if path.exists() && !force {
        return Ok(ConfigInitResult {
            path,
            created: false,
        });
    }

    let resolved = config::resolve_with(
        &LinkdeckConfig::new(),
        None,
        &ConfigOverrides {
            server,
            ..Default::default()
        },
        Some(&path),
    )?;
    let file = LinkdeckConfig {
        server: Some(resolved.server.value.to_string()),
        socket_path: Some(resolved.socket_path.value),
        graphql_path: Some(resolved.graphql_path.value),
        realtime: Some(resolved.realtime.value),
        poll_interval: Some(resolved.poll_interval_secs.value),
        reconnect_base_ms: Some(resolved.reconnect_base_ms.value),
        reconnect_max_ms: Some(resolved.reconnect_max_ms.value),
        debounce_ms: Some(resolved.debounce_ms.value),
        ..Default::default()
    };
    file.save(&path)?;
    tracing::info!(path = %path.display(), "config written");

    Ok(ConfigInitResult {
        path,
        created: true,
    })
}

// === backoff ===

#[derive(Debug, Serialize)]
pub struct BackoffResult {
    pub base_ms: u64,
    pub max_ms: u64,
    pub max_attempts: Option<u32>,
    pub delays_ms: Vec<u64>,
}

impl Output for BackoffResult {
    fn to_json(&self) -> String {
        json_line(self)
    }

    fn to_human(&self) -> String {
        let mut lines = vec![format!(
            "Reconnect backoff: base {}ms, max {}ms, {}",
            self.base_ms,
            self.max_ms,
            match self.max_attempts {
                Some(limit) => format!("gives up after {} attempts", limit),
                None => "retries forever".to_string(),
            }
        )];
        for (attempt, delay) in self.delays_ms.iter().enumerate() {
            lines.push(format!("  attempt {:>2}: {}ms", attempt + 1, delay));
        }
        lines.join("\n")
    }
}

pub fn backoff(config: &ResolvedConfig, attempts: u32) -> BackoffResult {
    let policy = config.reconnect_policy();
    let shown = match policy.max_attempts() {
        Some(limit) => attempts.min(limit),
        None => attempts,
    };
    BackoffResult {
        base_ms: policy.base().as_millis() as u64,
        max_ms: policy.max().as_millis() as u64,
        max_attempts: policy.max_attempts(),
        delays_ms: policy
            .schedule(shown)
            .iter()
            .map(|d| d.as_millis() as u64)
            .collect(),
    }
}

// === watch ===

/// One line of `watch` output.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WatchEvent {
    Status {
        status: ConnectionStatus,
        attempt_count: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        next_retry_at: Option<DateTime<Utc>>,
    },
    Applications {
        groups: usize,
        applications: usize,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        names: Vec<String>,
    },
    Bookmarks {
        groups: usize,
        bookmarks: usize,
    },
    Settings {
        #[serde(flatten)]
        settings: DashboardSettings,
    },
}

/// The part of a connection snapshot that earns a `status` line.
/// Heartbeat and message timestamps move on every frame and are left out.
type StatusKey = (ConnectionStatus, u32, Option<DateTime<Utc>>);

fn status_key(state: &ConnectionState) -> StatusKey {
    (state.status, state.attempt_count, state.next_retry_at)
}

impl WatchEvent {
    fn status(state: &ConnectionState) -> Self {
        WatchEvent::Status {
            status: state.status,
            attempt_count: state.attempt_count,
            next_retry_at: state.next_retry_at,
        }
    }
}

impl Output for WatchEvent {
    fn to_json(&self) -> String {
        json_line(self)
    }

    fn to_human(&self) -> String {
        let now = Utc::now().format("%H:%M:%S");
        match self {
            WatchEvent::Status {
                status,
                attempt_count,
                next_retry_at,
            } => match next_retry_at {
                Some(at) => format!(
                    "[{}] {} (retry #{} at {})",
                    now,
                    status,
                    attempt_count,
                    at.format("%H:%M:%S")
                ),
                None => format!("[{}] {}", now, status),
            },
            WatchEvent::Applications {
                groups,
                applications,
                names,
            } => {
                let mut line = format!("[{}] applications: {} in {} groups", now, applications, groups);
                if !names.is_empty() {
                    line.push_str(&format!(" ({})", names.join(", ")));
                }
                line
            }
            WatchEvent::Bookmarks { groups, bookmarks } => {
                format!("[{}] bookmarks: {} in {} groups", now, bookmarks, groups)
            }
            WatchEvent::Settings { settings } => format!(
                "[{}] settings: title={} realtime={} poll={}",
                now,
                settings.title.as_deref().unwrap_or("-"),
                settings
                    .realtime_enabled
                    .map(|b| b.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                settings
                    .poll_interval_secs
                    .map(|s| format!("{}s", s))
                    .unwrap_or_else(|| "-".to_string()),
            ),
        }
    }
}

/// Render sink that prints one line per refresh.
pub struct PrintSink {
    human: bool,
}

impl PrintSink {
    pub fn new(human: bool) -> Self {
        Self { human }
    }
}

impl RenderSink for PrintSink {
    fn on_applications_refreshed(&self, groups: &[ApplicationGroup]) {
        let event = WatchEvent::Applications {
            groups: groups.len(),
            applications: ApplicationGroup::count(groups),
            names: groups.iter().map(|g| g.name.clone()).collect(),
        };
        print(&event, self.human);
    }

    fn on_bookmarks_refreshed(&self, groups: &[BookmarkGroup]) {
        let event = WatchEvent::Bookmarks {
            groups: groups.len(),
            bookmarks: BookmarkGroup::count(groups),
        };
        print(&event, self.human);
    }

    fn on_settings_refreshed(&self, settings: &DashboardSettings) {
        let event = WatchEvent::Settings {
            settings: settings.clone(),
        };
        print(&event, self.human);
    }
}

/// Run live updates until Ctrl+C, printing refreshes and status changes.
///
/// # Errors
/// Fails if the endpoints cannot be derived, or with [`Error::Transport`]
/// once the reconnect limit (if any) is exhausted.
pub async fn watch(config: &ResolvedConfig, human: bool) -> Result<()> {
    let socket_url = config.socket_url()?;
    let source = GraphqlSource::new(config.graphql_url()?)?;
    let options = config.live_options();
    let policy = options.policy;

    tracing::info!(%socket_url, graphql = %source.endpoint(), "watching dashboard");
    let live = LiveUpdates::spawn(
        socket_url,
        options,
        source,
        TungsteniteConnector,
        Arc::new(PrintSink::new(human)),
    );
    let mut status = live.subscribe_status();
    let mut printed: Option<StatusKey> = None;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let outcome = loop {
        tokio::select! {
            result = &mut ctrl_c => {
                tracing::info!("interrupted; shutting down");
                break result.map_err(Error::from);
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let state = status.borrow_and_update().clone();
                let key = status_key(&state);
                if printed.as_ref() == Some(&key) {
                    continue;
                }
                printed = Some(key);
                print(&WatchEvent::status(&state), human);
                if state.status == ConnectionStatus::Error && policy.is_exhausted(state.attempt_count) {
                    break Err(Error::Transport(format!(
                        "gave up after {} reconnect attempts",
                        state.attempt_count
                    )));
                }
            }
        }
    };

    live.shutdown().await;
    outcome
}
