//! Configuration for linkdeck.
//!
//! ## config.kdl - User preferences
//!
//! Located at `~/.config/linkdeck/config.kdl` (platform config dir), or at
//! the path in `LINKDECK_CONFIG`.
//!
//! Contains:
//! - `server` - Dashboard base URL
//! - `socket-path`, `graphql-path` - Endpoint paths on the server
//! - `realtime` - Real-time updates on or off
//! - `poll-interval` - Polling interval in seconds while disconnected
//! - `reconnect-base-ms`, `reconnect-max-ms`, `reconnect-max-attempts` - Backoff
//! - `debounce-ms` - Quiet period before a message-triggered refresh
//! - `tags` - Application tag filter
//! - `output-format` - "json" or "human"
//!
//! ## Precedence
//!
//! CLI flag > environment > config.kdl > defaults
//!
//! Use the [`resolver`] module for precedence resolution.

pub mod resolver;
pub mod schema;

pub use resolver::{
    CONFIG_PATH_ENV, ConfigOverrides, Resolved, ResolvedConfig, SERVER_ENV, ValueSource,
    config_path, default_config_path, resolve_config, resolve_with,
};
pub use schema::{LinkdeckConfig, OutputFormat};
