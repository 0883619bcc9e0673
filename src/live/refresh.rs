//! Refresh coordination.
//!
//! The [`RefreshCoordinator`] owns every fetch from the [`DataSource`]. It
//! keeps at most one fetch in flight per [`Dataset`]; a request that arrives
//! while one is running is remembered as owed and runs exactly once after
//! the in-flight fetch settles, however many requests piled up.
//!
//! Failure handling:
//! - the first fetch of a data set publishes an empty result on failure so
//!   the renderer can leave its loading state
//! - every later failure keeps the last published value and logs a warning

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};

use super::protocol::MessageKind;
use crate::data::{ApplicationGroup, BookmarkGroup, DashboardSettings, DataSource, RenderSink};
use crate::{Error, Result};

/// A data set the renderer displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Dataset {
    Applications,
    Bookmarks,
    Config,
}

impl Dataset {
    pub const ALL: [Dataset; 3] = [Dataset::Applications, Dataset::Bookmarks, Dataset::Config];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dataset::Applications => "applications",
            Dataset::Bookmarks => "bookmarks",
            Dataset::Config => "config",
        }
    }

    fn index(self) -> usize {
        match self {
            Dataset::Applications => 0,
            Dataset::Bookmarks => 1,
            Dataset::Config => 2,
        }
    }
}

impl std::fmt::Display for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a refresh was requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshReason {
    /// A live message invalidated the data set.
    Message(MessageKind),
    /// The polling fallback ticked.
    Poll,
    /// First load after startup.
    Initial,
    /// Explicitly requested by the embedding application.
    Manual,
}

impl std::fmt::Display for RefreshReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefreshReason::Message(kind) => write!(f, "message {}", kind),
            RefreshReason::Poll => write!(f, "poll"),
            RefreshReason::Initial => write!(f, "initial"),
            RefreshReason::Manual => write!(f, "manual"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshRequest {
    pub dataset: Dataset,
    pub reason: RefreshReason,
}

impl RefreshRequest {
    pub fn new(dataset: Dataset, reason: RefreshReason) -> Self {
        Self { dataset, reason }
    }
}

/// Anything that accepts refresh requests.
///
/// Implemented by [`RefreshCoordinator`]; the router and the polling
/// fallback are generic over it.
pub trait RefreshTarget: Send + Sync + 'static {
    fn refresh(&self, request: RefreshRequest);
}

impl RefreshTarget for mpsc::UnboundedSender<RefreshRequest> {
    fn refresh(&self, request: RefreshRequest) {
        let _ = self.send(request);
    }
}

/// Which data sets have a fetch in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InFlight([bool; 3]);

impl InFlight {
    pub fn contains(&self, dataset: Dataset) -> bool {
        self.0[dataset.index()]
    }
}

#[derive(Debug)]
enum Command {
    Refresh(RefreshRequest),
    Shutdown,
}

/// Handle to the refresh task.
#[derive(Debug, Clone)]
pub struct RefreshCoordinator {
    commands: mpsc::UnboundedSender<Command>,
    in_flight: watch::Receiver<InFlight>,
}

impl RefreshCoordinator {
    /// Spawn the refresh task.
    ///
    /// `tags` filters every applications fetch.
    pub fn spawn<S: DataSource>(
        source: Arc<S>,
        sink: Arc<dyn RenderSink>,
        tags: Option<Vec<String>>,
    ) -> (Self, JoinHandle<()>) {
        let (commands, rx) = mpsc::unbounded_channel();
        let (in_flight_tx, in_flight) = watch::channel(InFlight::default());
        let worker = Worker {
            source,
            sink,
            tags,
            slots: Default::default(),
            fetches: JoinSet::new(),
            in_flight: in_flight_tx,
        };
        let handle = tokio::spawn(worker.run(rx));
        (Self { commands, in_flight }, handle)
    }

    /// Request a refresh. Never blocks.
    pub fn refresh(&self, request: RefreshRequest) {
        if self.commands.send(Command::Refresh(request)).is_err() {
            tracing::debug!("refresh requested after shutdown");
        }
    }

    /// Request a refresh of every data set.
    pub fn refresh_all(&self, reason: RefreshReason) {
        for dataset in Dataset::ALL {
            self.refresh(RefreshRequest::new(dataset, reason.clone()));
        }
    }

    /// Whether a fetch for `dataset` is currently in flight.
    pub fn is_refreshing(&self, dataset: Dataset) -> bool {
        self.in_flight.borrow().contains(dataset)
    }

    /// Stop the task. In-flight fetches are dropped and never publish.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

impl RefreshTarget for RefreshCoordinator {
    fn refresh(&self, request: RefreshRequest) {
        RefreshCoordinator::refresh(self, request);
    }
}

/// Result of one fetch.
enum Fetched {
    Applications(Vec<ApplicationGroup>),
    Bookmarks(Vec<BookmarkGroup>),
    Config(DashboardSettings),
}

impl Fetched {
    /// Substitute for a failed first load.
    fn empty(dataset: Dataset) -> Self {
        match dataset {
            Dataset::Applications => Fetched::Applications(Vec::new()),
            Dataset::Bookmarks => Fetched::Bookmarks(Vec::new()),
            Dataset::Config => Fetched::Config(DashboardSettings::default()),
        }
    }
}

#[derive(Debug, Default)]
struct Slot {
    in_flight: bool,
    /// Reason of the latest request that arrived while in flight.
    owed: Option<RefreshReason>,
    /// A fetch has settled at least once.
    attempted: bool,
}

struct Worker<S> {
    source: Arc<S>,
    sink: Arc<dyn RenderSink>,
    tags: Option<Vec<String>>,
    slots: [Slot; 3],
    fetches: JoinSet<(Dataset, Result<Fetched>)>,
    in_flight: watch::Sender<InFlight>,
}

impl<S: DataSource> Worker<S> {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Refresh(request)) => self.request(request),
                    Some(Command::Shutdown) | None => break,
                },
                Some(joined) = self.fetches.join_next(), if !self.fetches.is_empty() => {
                    match joined {
                        Ok((dataset, result)) => self.settle(dataset, result),
                        Err(e) => tracing::warn!(error = %e, "refresh task failed"),
                    }
                }
            }
        }
        // Abort whatever is still running; nothing publishes past this point
        self.fetches.shutdown().await;
        tracing::debug!("refresh coordinator stopped");
    }

    fn request(&mut self, request: RefreshRequest) {
        let slot = &mut self.slots[request.dataset.index()];
        if slot.in_flight {
            tracing::debug!(
                dataset = %request.dataset,
                reason = %request.reason,
                "refresh already in flight; one more owed"
            );
            slot.owed = Some(request.reason);
            return;
        }
        self.begin(request.dataset, request.reason);
    }

    fn begin(&mut self, dataset: Dataset, reason: RefreshReason) {
        tracing::debug!(%dataset, %reason, "refreshing");
        self.slots[dataset.index()].in_flight = true;
        self.publish_in_flight();

        let source = Arc::clone(&self.source);
        let tags = self.tags.clone();
        self.fetches.spawn(async move {
            let result = AssertUnwindSafe(fetch(source.as_ref(), dataset, tags))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(Error::Fetch("fetch panicked".to_string())));
            (dataset, result)
        });
    }

    fn settle(&mut self, dataset: Dataset, result: Result<Fetched>) {
        let slot = &mut self.slots[dataset.index()];
        slot.in_flight = false;
        let first = !slot.attempted;
        slot.attempted = true;

        match result {
            Ok(fetched) => self.publish(fetched),
            Err(e) if first => {
                tracing::warn!(%dataset, error = %e, "initial fetch failed; showing empty data");
                self.publish(Fetched::empty(dataset));
            }
            Err(e) => {
                tracing::warn!(%dataset, error = %e, "refresh failed; keeping last data");
            }
        }

        match self.slots[dataset.index()].owed.take() {
            Some(reason) => self.begin(dataset, reason),
            None => self.publish_in_flight(),
        }
    }

    fn publish(&self, fetched: Fetched) {
        match fetched {
            Fetched::Applications(groups) => {
                tracing::debug!(groups = groups.len(), "applications refreshed");
                self.sink.on_applications_refreshed(&groups);
            }
            Fetched::Bookmarks(groups) => {
                tracing::debug!(groups = groups.len(), "bookmarks refreshed");
                self.sink.on_bookmarks_refreshed(&groups);
            }
            Fetched::Config(settings) => {
                tracing::debug!("settings refreshed");
                self.sink.on_settings_refreshed(&settings);
            }
        }
    }

    fn publish_in_flight(&self) {
        let mut flags = [false; 3];
        for dataset in Dataset::ALL {
            flags[dataset.index()] = self.slots[dataset.index()].in_flight;
        }
        self.in_flight.send_if_modified(|current| {
            let next = InFlight(flags);
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

async fn fetch<S: DataSource>(
    source: &S,
    dataset: Dataset,
    tags: Option<Vec<String>>,
) -> Result<Fetched> {
    match dataset {
        Dataset::Applications => source.fetch_applications(tags).await.map(Fetched::Applications),
        Dataset::Bookmarks => source.fetch_bookmarks().await.map(Fetched::Bookmarks),
        Dataset::Config => source.fetch_settings().await.map(Fetched::Config),
    }
}
