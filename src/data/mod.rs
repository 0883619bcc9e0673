//! External collaborators of the live-update client.
//!
//! [`DataSource`] is the data layer the client pulls fresh data sets from;
//! [`RenderSink`] is the rendering layer it pushes them to. The crate ships
//! a GraphQL-backed source ([`GraphqlSource`]); sinks are supplied by the
//! embedding application.

mod graphql;
pub mod models;

use std::future::Future;
use std::sync::Arc;

pub use graphql::GraphqlSource;
pub use models::{Application, ApplicationGroup, Bookmark, BookmarkGroup, DashboardSettings};

use crate::Result;

/// Fetches data sets from the dashboard backend.
///
/// Every fetch may fail with a transport error; callers never see a panic
/// or a partial result.
pub trait DataSource: Send + Sync + 'static {
    /// Fetch application groups, optionally filtered by tag.
    fn fetch_applications(
        &self,
        tags: Option<Vec<String>>,
    ) -> impl Future<Output = Result<Vec<ApplicationGroup>>> + Send;

    /// Fetch bookmark groups.
    fn fetch_bookmarks(&self) -> impl Future<Output = Result<Vec<BookmarkGroup>>> + Send;

    /// Fetch dashboard settings.
    fn fetch_settings(&self) -> impl Future<Output = Result<DashboardSettings>> + Send;
}

impl<S: DataSource> DataSource for Arc<S> {
    fn fetch_applications(
        &self,
        tags: Option<Vec<String>>,
    ) -> impl Future<Output = Result<Vec<ApplicationGroup>>> + Send {
        self.as_ref().fetch_applications(tags)
    }

    fn fetch_bookmarks(&self) -> impl Future<Output = Result<Vec<BookmarkGroup>>> + Send {
        self.as_ref().fetch_bookmarks()
    }

    fn fetch_settings(&self) -> impl Future<Output = Result<DashboardSettings>> + Send {
        self.as_ref().fetch_settings()
    }
}

/// Receives refreshed data sets.
///
/// Callbacks run on the refresh task and must not block.
pub trait RenderSink: Send + Sync + 'static {
    fn on_applications_refreshed(&self, groups: &[ApplicationGroup]);

    fn on_bookmarks_refreshed(&self, groups: &[BookmarkGroup]);

    /// Settings changed; the renderer resets its UI state.
    fn on_settings_refreshed(&self, _settings: &DashboardSettings) {}
}
