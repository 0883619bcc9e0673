//! Live updates for the dashboard.
//!
//! [`LiveUpdates`] wires the components together:
//!
//! ```text
//! socket --> ConnectionManager --> MessageRouter --(debounced)--> RefreshCoordinator --> RenderSink
//!                  |                                                   ^
//!                  +--(status)--> PollingFallback --(while down)-------+
//! ```
//!
//! Each component runs as its own task and is reached through a cloneable
//! handle. Settings fetched from the server feed back in: they can switch
//! real-time updates off and change the polling interval at runtime.

pub mod backoff;
pub mod debounce;
pub mod lifecycle;
pub mod manager;
pub mod polling;
pub mod protocol;
pub mod refresh;
pub mod router;
pub mod socket;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use url::Url;

pub use backoff::ReconnectPolicy;
pub use lifecycle::{ConnectionState, ConnectionStatus};
pub use manager::ConnectionManager;
pub use polling::{DEFAULT_POLL_INTERVAL_SECS, MAX_POLL_INTERVAL_SECS, PollingFallback};
pub use protocol::{InboundMessage, MessageKind};
pub use refresh::{Dataset, RefreshCoordinator, RefreshReason, RefreshRequest, RefreshTarget};
pub use router::{DEFAULT_DEBOUNCE, MessageRouter, MessageSink};
pub use socket::{ConnectionSocket, Connector, TungsteniteConnector};

use crate::data::{ApplicationGroup, BookmarkGroup, DashboardSettings, DataSource, RenderSink};

/// Startup options for [`LiveUpdates`].
#[derive(Debug, Clone, PartialEq)]
pub struct LiveOptions {
    /// Real-time updates on. When off, nothing connects and nothing polls.
    pub enabled: bool,
    /// Polling interval while disconnected; `0` disables polling.
    pub poll_interval_secs: u64,
    pub policy: ReconnectPolicy,
    /// Per-dataset debounce window for live messages.
    pub debounce: Duration,
    /// Tag filter for the applications data set.
    pub tags: Option<Vec<String>>,
}

impl Default for LiveOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            policy: ReconnectPolicy::default(),
            debounce: DEFAULT_DEBOUNCE,
            tags: None,
        }
    }
}

/// Passes every refresh to the renderer and copies settings to the
/// subsystem's own settings listener.
struct SettingsTap {
    inner: Arc<dyn RenderSink>,
    settings: mpsc::UnboundedSender<DashboardSettings>,
}

impl RenderSink for SettingsTap {
    fn on_applications_refreshed(&self, groups: &[ApplicationGroup]) {
        self.inner.on_applications_refreshed(groups);
    }

    fn on_bookmarks_refreshed(&self, groups: &[BookmarkGroup]) {
        self.inner.on_bookmarks_refreshed(groups);
    }

    fn on_settings_refreshed(&self, settings: &DashboardSettings) {
        self.inner.on_settings_refreshed(settings);
        let _ = self.settings.send(settings.clone());
    }
}

fn switch_realtime(manager: &ConnectionManager, polling: &PollingFallback, enabled: bool) {
    if enabled {
        manager.start();
    } else {
        manager.stop();
    }
    polling.set_enabled(enabled);
}

async fn apply_settings(
    mut settings: mpsc::UnboundedReceiver<DashboardSettings>,
    local_enabled: Arc<AtomicBool>,
    manager: ConnectionManager,
    polling: PollingFallback,
) {
    while let Some(update) = settings.recv().await {
        if let Some(server_enabled) = update.realtime_enabled {
            // The server can switch real-time off, never on against the local choice
            let enabled = server_enabled && local_enabled.load(Ordering::SeqCst);
            tracing::info!(server_enabled, enabled, "real-time updates set by server settings");
            switch_realtime(&manager, &polling, enabled);
        }
        match update.poll_interval_secs {
            Some(secs) if secs > MAX_POLL_INTERVAL_SECS => {
                tracing::warn!(
                    secs,
                    "ignoring out-of-range polling interval from server settings"
                );
            }
            Some(secs) => {
                tracing::debug!(secs, "polling interval from server settings");
                polling.configure(secs);
            }
            None => {}
        }
    }
}

/// The running real-time update subsystem.
///
/// Dropping it stops every component; [`LiveUpdates::shutdown`] does the
/// same and waits for the tasks to finish.
pub struct LiveUpdates {
    manager: ConnectionManager,
    router: MessageRouter,
    coordinator: RefreshCoordinator,
    polling: PollingFallback,
    /// Local real-time choice; server settings can only narrow it.
    local_enabled: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl LiveUpdates {
    /// Spawn every component, load all data sets once and, if enabled,
    /// start connecting.
    pub fn spawn<S: DataSource, C: Connector>(
        socket_url: Url,
        options: LiveOptions,
        source: S,
        connector: C,
        sink: Arc<dyn RenderSink>,
    ) -> Self {
        let (settings_tx, settings_rx) = mpsc::unbounded_channel();
        let tap = Arc::new(SettingsTap {
            inner: sink,
            settings: settings_tx,
        });

        let (coordinator, coordinator_task) =
            RefreshCoordinator::spawn(Arc::new(source), tap, options.tags.clone());
        let (router, router_task) = MessageRouter::spawn(options.debounce, coordinator.clone());
        let (manager, manager_task) =
            ConnectionManager::spawn(socket_url, options.policy, connector, router.clone());
        let (polling, polling_task) = PollingFallback::spawn(
            options.poll_interval_secs,
            options.enabled,
            manager.subscribe(),
            coordinator.clone(),
        );
        let local_enabled = Arc::new(AtomicBool::new(options.enabled));
        let settings_task = tokio::spawn(apply_settings(
            settings_rx,
            Arc::clone(&local_enabled),
            manager.clone(),
            polling.clone(),
        ));

        tracing::info!(
            enabled = options.enabled,
            poll_interval_secs = options.poll_interval_secs,
            "live updates starting"
        );
        coordinator.refresh_all(RefreshReason::Initial);
        if options.enabled {
            manager.start();
        }

        Self {
            manager,
            router,
            coordinator,
            polling,
            local_enabled,
            tasks: vec![
                coordinator_task,
                router_task,
                manager_task,
                polling_task,
                settings_task,
            ],
        }
    }

    pub fn start(&self) {
        self.manager.start();
    }

    pub fn stop(&self) {
        self.manager.stop();
    }

    /// Turn real-time updates (socket and polling) on or off.
    pub fn set_enabled(&self, enabled: bool) {
        self.local_enabled.store(enabled, Ordering::SeqCst);
        switch_realtime(&self.manager, &self.polling, enabled);
    }

    pub fn configure_polling(&self, interval_secs: u64) {
        self.polling.configure(interval_secs);
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.manager.status()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionState> {
        self.manager.subscribe()
    }

    /// Best-effort send over the live socket.
    pub async fn send(&self, data: impl Into<String>) -> bool {
        self.manager.send(data).await
    }

    pub fn refresh(&self, dataset: Dataset) {
        self.coordinator
            .refresh(RefreshRequest::new(dataset, RefreshReason::Manual));
    }

    pub fn refresh_all(&self) {
        self.coordinator.refresh_all(RefreshReason::Manual);
    }

    pub fn is_refreshing(&self, dataset: Dataset) -> bool {
        self.coordinator.is_refreshing(dataset)
    }

    /// Stop every component and wait for their tasks.
    pub async fn shutdown(mut self) {
        self.signal_shutdown();
        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "live update task ended abnormally");
            }
        }
        tracing::info!("live updates stopped");
    }

    fn signal_shutdown(&self) {
        self.polling.shutdown();
        self.router.shutdown();
        self.coordinator.shutdown();
        self.manager.shutdown();
    }
}

impl Drop for LiveUpdates {
    fn drop(&mut self) {
        self.signal_shutdown();
    }
}
