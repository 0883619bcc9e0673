//! Common test utilities for linkdeck integration tests.
//!
//! Provides `TestEnv` for isolated test environments that don't touch the
//! user's `~/.config/linkdeck/` directory.

#![allow(dead_code)]

use assert_cmd::Command;
use std::path::{Path, PathBuf};
pub use tempfile::TempDir;

/// A test environment with an isolated config directory.
///
/// The `linkdeck()` method returns a `Command` that sets `LINKDECK_CONFIG`
/// per-invocation, making tests parallel-safe.
pub struct TestEnv {
    pub config_dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            config_dir: TempDir::new().unwrap(),
        }
    }

    /// Get a Command for the linkdeck binary pointed at this environment.
    ///
    /// Clears `LINKDECK_SERVER` so the caller's shell can't leak in, and
    /// silences logging so stderr only carries errors.
    pub fn linkdeck(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_linkdeck"));
        cmd.env("LINKDECK_CONFIG", self.config_path());
        cmd.env_remove("LINKDECK_SERVER");
        cmd.env("LINKDECK_LOG", "off");
        cmd
    }

    /// Path of the config.kdl used by `linkdeck()`.
    pub fn config_path(&self) -> PathBuf {
        self.config_dir.path().join("config.kdl")
    }

    /// Write `content` as this environment's config.kdl.
    pub fn write_config(&self, content: &str) {
        std::fs::write(self.config_path(), content).expect("Failed to write config file");
    }

    pub fn config_dir_path(&self) -> &Path {
        self.config_dir.path()
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a command's stdout as a single JSON value.
pub fn parse_json(stdout: &[u8]) -> serde_json::Value {
    serde_json::from_slice(stdout).expect("stdout is not valid JSON")
}
