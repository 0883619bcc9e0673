//! GraphQL-backed [`DataSource`].
//!
//! Queries are POSTed as `{"query": ..., "variables": ...}`; responses follow
//! the standard `{"data": ..., "errors": [...]}` shape. Any entry in
//! `errors` fails the whole fetch.

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use url::Url;

use super::{ApplicationGroup, BookmarkGroup, DashboardSettings, DataSource};
use crate::{Error, Result};

/// Per-request timeout for data fetches.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

const APPLICATIONS_QUERY: &str = "query Applications($tags: [String!]) {
  applications(tags: $tags) {
    id name
    applications { id name url icon description tags status }
  }
}";

const BOOKMARKS_QUERY: &str = "query Bookmarks {
  bookmarks {
    id name
    bookmarks { id name url icon }
  }
}";

const SETTINGS_QUERY: &str = "query Settings {
  config { title realtimeEnabled pollIntervalSecs }
}";

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct GraphqlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

impl<T> GraphqlResponse<T> {
    fn into_result(self) -> Result<T> {
        if !self.errors.is_empty() {
            let messages: Vec<&str> = self.errors.iter().map(|e| e.message.as_str()).collect();
            return Err(Error::Fetch(messages.join("; ")));
        }
        self.data
            .ok_or_else(|| Error::Fetch("response contained no data".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct ApplicationsData {
    applications: Vec<ApplicationGroup>,
}

#[derive(Debug, Deserialize)]
struct BookmarksData {
    bookmarks: Vec<BookmarkGroup>,
}

#[derive(Debug, Deserialize)]
struct SettingsData {
    config: DashboardSettings,
}

/// Fetches data sets from the dashboard's GraphQL endpoint.
#[derive(Debug, Clone)]
pub struct GraphqlSource {
    client: reqwest::Client,
    endpoint: Url,
}

impl GraphqlSource {
    /// Create a source for `endpoint` (e.g. `https://dash.example/graphql`).
    pub fn new(endpoint: Url) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("linkdeck/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn query<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<T> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&serde_json::json!({ "query": query, "variables": variables }))
            .send()
            .await?
            .error_for_status()?;
        let body: GraphqlResponse<T> = response.json().await?;
        body.into_result()
    }
}

impl DataSource for GraphqlSource {
    fn fetch_applications(
        &self,
        tags: Option<Vec<String>>,
    ) -> impl Future<Output = Result<Vec<ApplicationGroup>>> + Send {
        async move {
            let data: ApplicationsData = self
                .query(APPLICATIONS_QUERY, serde_json::json!({ "tags": tags }))
                .await?;
            Ok(data.applications)
        }
    }

    fn fetch_bookmarks(&self) -> impl Future<Output = Result<Vec<BookmarkGroup>>> + Send {
        async move {
            let data: BookmarksData = self.query(BOOKMARKS_QUERY, serde_json::json!({})).await?;
            Ok(data.bookmarks)
        }
    }

    fn fetch_settings(&self) -> impl Future<Output = Result<DashboardSettings>> + Send {
        async move {
            let data: SettingsData = self.query(SETTINGS_QUERY, serde_json::json!({})).await?;
            Ok(data.config)
        }
    }
}
