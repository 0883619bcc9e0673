//! Data sets refreshed by the live-update client.
//!
//! These mirror the dashboard's GraphQL types. Field names are camelCase on
//! the wire.

use serde::{Deserialize, Serialize};

/// A single application link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Health status reported by the server (e.g. "up", "down").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// A named group of applications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationGroup {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub applications: Vec<Application>,
}

/// A single bookmark link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bookmark {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// A named group of bookmarks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkGroup {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub bookmarks: Vec<Bookmark>,
}

/// Server-side dashboard settings (the `config` data set).
///
/// Unset fields leave the locally configured value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realtime_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_secs: Option<u64>,
}

impl ApplicationGroup {
    /// Total number of applications across `groups`.
    pub fn count(groups: &[ApplicationGroup]) -> usize {
        groups.iter().map(|g| g.applications.len()).sum()
    }
}

impl BookmarkGroup {
    /// Total number of bookmarks across `groups`.
    pub fn count(groups: &[BookmarkGroup]) -> usize {
        groups.iter().map(|g| g.bookmarks.len()).sum()
    }
}
