//! CLI argument definitions for linkdeck.

use clap::{Parser, Subcommand};

use crate::config::{ConfigOverrides, OutputFormat};

/// Version line with the commit and build time baked in by build.rs.
const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("LINKDECK_GIT_COMMIT"),
    ", built ",
    env!("LINKDECK_BUILD_TIMESTAMP"),
    ")"
);

/// linkdeck - keep a dashboard's applications and bookmarks live.
#[derive(Parser, Debug)]
#[command(name = "linkdeck")]
#[command(author, version, long_version = LONG_VERSION, about = "Real-time update client for the linkdeck dashboard", long_about = None)]
pub struct Cli {
    /// Output in human-readable format instead of JSON
    #[arg(short = 'H', long = "human", global = true)]
    pub human_readable: bool,

    /// Write logs to stderr as JSON
    #[arg(long = "log-json", global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by commands that resolve the full configuration.
#[derive(clap::Args, Debug, Default, Clone)]
pub struct ServerArgs {
    /// Dashboard base URL (overrides LINKDECK_SERVER and config.kdl)
    #[arg(long)]
    pub server: Option<String>,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Follow live updates from a dashboard until Ctrl+C
    ///
    /// Prints one line per refresh and per connection status change.
    Watch {
        #[command(flatten)]
        server: ServerArgs,

        /// Polling interval in seconds while disconnected (0 disables)
        #[arg(long, value_name = "SECS")]
        poll: Option<u64>,

        /// Do not open the live socket; initial load only
        #[arg(long)]
        no_realtime: bool,

        /// Only fetch applications carrying this tag (repeatable)
        #[arg(long = "tag", value_name = "TAG")]
        tags: Vec<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Print the reconnect backoff schedule
    Backoff {
        #[command(flatten)]
        server: ServerArgs,

        /// Number of attempts to show
        #[arg(long, default_value_t = 8)]
        attempts: u32,
    },
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show the resolved configuration and where each value came from
    Show {
        #[command(flatten)]
        server: ServerArgs,
    },

    /// Print the config.kdl location
    Path,

    /// Write a config.kdl with every default spelled out
    Init {
        /// Server URL to record
        #[arg(long)]
        server: Option<String>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

impl Cli {
    /// Overrides implied by the global flags.
    pub fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if self.human_readable {
            overrides = overrides.with_output_format(OutputFormat::Human);
        }
        overrides
    }
}

impl ServerArgs {
    /// Apply to `overrides`.
    pub fn apply(&self, mut overrides: ConfigOverrides) -> ConfigOverrides {
        if let Some(ref server) = self.server {
            overrides = overrides.with_server(server.clone());
        }
        overrides
    }
}
