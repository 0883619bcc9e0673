//! linkdeck - real-time update client for the linkdeck dashboard.
//!
//! This library keeps a dashboard's applications and bookmarks fresh. It
//! holds a WebSocket connection to the dashboard server, turns change
//! notifications into debounced data refreshes, and falls back to polling
//! while the socket is down.
//!
//! The entry point is [`live::LiveUpdates`], which wires together:
//! - [`live::ConnectionManager`] - socket lifecycle, backoff, liveness
//! - [`live::MessageRouter`] - message classification and debouncing
//! - [`live::RefreshCoordinator`] - at-most-one fetch per dataset
//! - [`live::PollingFallback`] - timer-driven refresh while disconnected

pub mod cli;
pub mod commands;
pub mod config;
pub mod data;
pub mod live;

/// Library-level error type for linkdeck operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Fetch(err.to_string())
    }
}

/// Result type alias for linkdeck operations.
pub type Result<T> = std::result::Result<T, Error>;
