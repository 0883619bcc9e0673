//! Message routing.
//!
//! Maps each inbound message to the data sets it invalidates and forwards
//! a debounced refresh request per data set.
//!
//! | message                                       | refreshes                       |
//! |-----------------------------------------------|---------------------------------|
//! | APPLICATION_ADDED/REMOVED/UPDATED, STATUS_CHANGED | applications                |
//! | BOOKMARK_ADDED/REMOVED/UPDATED                | bookmarks                       |
//! | CONFIG_CHANGED                                | config, applications, bookmarks |
//! | HEARTBEAT, unknown                            | nothing                         |

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};

use super::debounce::Debouncer;
use super::protocol::{InboundMessage, MessageKind};
use super::refresh::{Dataset, RefreshReason, RefreshRequest, RefreshTarget};

/// Quiet period after the last message for a data set before it refreshes.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

/// Data sets invalidated by a message of `kind`.
pub fn datasets_for(kind: &MessageKind) -> &'static [Dataset] {
    match kind {
        MessageKind::ApplicationAdded
        | MessageKind::ApplicationRemoved
        | MessageKind::ApplicationUpdated
        | MessageKind::StatusChanged => &[Dataset::Applications],
        MessageKind::BookmarkAdded | MessageKind::BookmarkRemoved | MessageKind::BookmarkUpdated => {
            &[Dataset::Bookmarks]
        }
        MessageKind::ConfigChanged => &[Dataset::Config, Dataset::Applications, Dataset::Bookmarks],
        MessageKind::Heartbeat | MessageKind::Unknown(_) => &[],
    }
}

/// Receives messages from the connection manager.
pub trait MessageSink: Send + Sync + 'static {
    fn route(&self, message: InboundMessage);
}

impl MessageSink for mpsc::UnboundedSender<InboundMessage> {
    fn route(&self, message: InboundMessage) {
        let _ = self.send(message);
    }
}

#[derive(Debug)]
enum Command {
    Route(InboundMessage),
    Shutdown,
}

/// Handle to the routing task.
#[derive(Debug, Clone)]
pub struct MessageRouter {
    commands: mpsc::UnboundedSender<Command>,
}

impl MessageRouter {
    /// Spawn the routing task, debouncing each data set over `window`.
    pub fn spawn<T: RefreshTarget>(window: Duration, target: T) -> (Self, JoinHandle<()>) {
        let (commands, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run(window, target, rx));
        (Self { commands }, handle)
    }

    pub fn route(&self, message: InboundMessage) {
        let _ = self.commands.send(Command::Route(message));
    }

    /// Stop the task. Refreshes still inside their window are dropped.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

impl MessageSink for MessageRouter {
    fn route(&self, message: InboundMessage) {
        MessageRouter::route(self, message);
    }
}

async fn run<T: RefreshTarget>(
    window: Duration,
    target: T,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let mut pending: Debouncer<Dataset, MessageKind> = Debouncer::new(window);

    loop {
        let deadline = pending.next_deadline();

        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Route(message)) => {
                    let datasets = datasets_for(&message.kind);
                    if datasets.is_empty() {
                        tracing::debug!(kind = %message.kind, "ignoring message with no data set");
                        continue;
                    }
                    let now = Instant::now();
                    for dataset in datasets {
                        pending.trigger(*dataset, message.kind.clone(), now);
                    }
                }
                Some(Command::Shutdown) | None => break,
            },
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                for (dataset, kind) in pending.take_due(Instant::now()) {
                    tracing::debug!(%dataset, %kind, "debounce window elapsed");
                    target.refresh(RefreshRequest::new(dataset, RefreshReason::Message(kind)));
                }
            }
        }
    }

    tracing::debug!(dropped = pending.len(), "message router stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(kind: MessageKind) -> InboundMessage {
        InboundMessage::new(kind)
    }

    #[test]
    fn test_classification_table() {
        assert_eq!(datasets_for(&MessageKind::ApplicationAdded), &[Dataset::Applications]);
        assert_eq!(datasets_for(&MessageKind::StatusChanged), &[Dataset::Applications]);
        assert_eq!(datasets_for(&MessageKind::BookmarkRemoved), &[Dataset::Bookmarks]);
        assert_eq!(datasets_for(&MessageKind::ConfigChanged).len(), 3);
        assert!(datasets_for(&MessageKind::Heartbeat).is_empty());
        assert!(datasets_for(&MessageKind::Unknown("THEME_CHANGED".into())).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_refreshes_once_after_last_message() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (router, _task) = MessageRouter::spawn(DEFAULT_DEBOUNCE, tx);
        let start = Instant::now();

        for _ in 0..5 {
            router.route(message(MessageKind::ApplicationUpdated));
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        // Last message went in at +80ms
        let request = rx.recv().await.unwrap();
        assert_eq!(Instant::now() - start, Duration::from_millis(180));
        assert_eq!(
            request,
            RefreshRequest::new(
                Dataset::Applications,
                RefreshReason::Message(MessageKind::ApplicationUpdated)
            )
        );

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_datasets_debounce_independently() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (router, _task) = MessageRouter::spawn(DEFAULT_DEBOUNCE, tx);

        router.route(message(MessageKind::ApplicationAdded));
        tokio::time::sleep(Duration::from_millis(50)).await;
        router.route(message(MessageKind::BookmarkAdded));

        assert_eq!(rx.recv().await.unwrap().dataset, Dataset::Applications);
        assert_eq!(rx.recv().await.unwrap().dataset, Dataset::Bookmarks);
    }

    #[tokio::test(start_paused = true)]
    async fn test_config_changed_refreshes_everything() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (router, _task) = MessageRouter::spawn(DEFAULT_DEBOUNCE, tx);

        router.route(message(MessageKind::ApplicationUpdated));
        router.route(message(MessageKind::ConfigChanged));
        tokio::time::sleep(Duration::from_millis(200)).await;

        let mut datasets = Vec::new();
        while let Ok(request) = rx.try_recv() {
            assert_eq!(request.reason, RefreshReason::Message(MessageKind::ConfigChanged));
            datasets.push(request.dataset);
        }
        datasets.sort();
        assert_eq!(
            datasets,
            vec![Dataset::Applications, Dataset::Bookmarks, Dataset::Config]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_and_heartbeat_are_ignored() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (router, _task) = MessageRouter::spawn(DEFAULT_DEBOUNCE, tx);

        router.route(message(MessageKind::Unknown("THEME_CHANGED".into())));
        router.route(message(MessageKind::Heartbeat));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drops_pending_refresh() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (router, task) = MessageRouter::spawn(DEFAULT_DEBOUNCE, tx);

        router.route(message(MessageKind::BookmarkUpdated));
        router.shutdown();
        task.await.unwrap();
        assert!(rx.recv().await.is_none());
    }
}
