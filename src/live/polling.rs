//! Polling fallback.
//!
//! While the live connection is down, refresh applications and bookmarks on
//! a fixed interval. Ticks that find the connection up are skipped.

use std::future::pending;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};

use super::lifecycle::ConnectionState;
use super::refresh::{Dataset, RefreshReason, RefreshRequest, RefreshTarget};

/// Default polling interval (seconds).
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

/// Largest accepted polling interval (one day).
pub const MAX_POLL_INTERVAL_SECS: u64 = 86_400;

/// Requests one tick produces for the given connection snapshot.
pub fn tick_requests(state: &ConnectionState) -> Vec<RefreshRequest> {
    if state.is_connected() {
        return Vec::new();
    }
    vec![
        RefreshRequest::new(Dataset::Applications, RefreshReason::Poll),
        RefreshRequest::new(Dataset::Bookmarks, RefreshReason::Poll),
    ]
}

#[derive(Debug)]
enum Command {
    Configure(u64),
    SetEnabled(bool),
    Shutdown,
}

/// Handle to the polling task.
#[derive(Debug, Clone)]
pub struct PollingFallback {
    commands: mpsc::UnboundedSender<Command>,
}

impl PollingFallback {
    /// Spawn the polling task.
    ///
    /// The timer runs only while `enabled` and `interval_secs > 0`.
    pub fn spawn<T: RefreshTarget>(
        interval_secs: u64,
        enabled: bool,
        status: watch::Receiver<ConnectionState>,
        target: T,
    ) -> (Self, JoinHandle<()>) {
        let (commands, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run(interval_secs, enabled, status, target, rx));
        (Self { commands }, handle)
    }

    /// Change the interval. `0` disables polling, and so does anything above
    /// [`MAX_POLL_INTERVAL_SECS`].
    pub fn configure(&self, interval_secs: u64) {
        let _ = self.commands.send(Command::Configure(interval_secs));
    }

    pub fn set_enabled(&self, enabled: bool) {
        let _ = self.commands.send(Command::SetEnabled(enabled));
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

fn arm(interval_secs: u64, enabled: bool) -> Option<Interval> {
    if !enabled || interval_secs == 0 {
        tracing::debug!(interval_secs, enabled, "polling off");
        return None;
    }
    let period = Duration::from_secs(interval_secs);
    let start = match Instant::now().checked_add(period) {
        Some(start) if interval_secs <= MAX_POLL_INTERVAL_SECS => start,
        _ => {
            tracing::warn!(
                interval_secs,
                max = MAX_POLL_INTERVAL_SECS,
                "polling interval out of range; polling off"
            );
            return None;
        }
    };
    let mut ticker = interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::debug!(interval_secs, "polling armed");
    Some(ticker)
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => pending().await,
    }
}

async fn run<T: RefreshTarget>(
    mut interval_secs: u64,
    mut enabled: bool,
    status: watch::Receiver<ConnectionState>,
    target: T,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let mut ticker = arm(interval_secs, enabled);

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Configure(secs)) if secs != interval_secs => {
                    interval_secs = secs;
                    ticker = arm(interval_secs, enabled);
                }
                Some(Command::SetEnabled(on)) if on != enabled => {
                    enabled = on;
                    ticker = arm(interval_secs, enabled);
                }
                Some(Command::Configure(_)) | Some(Command::SetEnabled(_)) => {}
                Some(Command::Shutdown) | None => break,
            },
            _ = tick(&mut ticker) => {
                let requests = tick_requests(&status.borrow());
                if requests.is_empty() {
                    tracing::trace!("poll skipped; live connection is up");
                    continue;
                }
                tracing::debug!("polling for changes");
                for request in requests {
                    target.refresh(request);
                }
            }
        }
    }

    tracing::debug!("polling stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::lifecycle::ConnectionStatus;

    fn state(status: ConnectionStatus) -> ConnectionState {
        ConnectionState {
            status,
            ..Default::default()
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<RefreshRequest>) -> Vec<RefreshRequest> {
        let mut requests = Vec::new();
        while let Ok(request) = rx.try_recv() {
            requests.push(request);
        }
        requests
    }

    #[test]
    fn test_tick_skipped_while_connected() {
        assert!(tick_requests(&state(ConnectionStatus::Connected)).is_empty());
    }

    #[test]
    fn test_tick_refreshes_each_dataset_otherwise() {
        for status in [
            ConnectionStatus::Disconnected,
            ConnectionStatus::Connecting,
            ConnectionStatus::Error,
        ] {
            let datasets: Vec<Dataset> = tick_requests(&state(status))
                .into_iter()
                .map(|r| r.dataset)
                .collect();
            assert_eq!(datasets, vec![Dataset::Applications, Dataset::Bookmarks]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_while_disconnected() {
        let (status_tx, status) = watch::channel(ConnectionState::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (_polling, _task) = PollingFallback::spawn(10, true, status, tx);

        tokio::time::sleep(Duration::from_millis(9_999)).await;
        assert!(drain(&mut rx).is_empty());
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(drain(&mut rx).len(), 2);

        status_tx.send_replace(state(ConnectionStatus::Connected));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_disables() {
        let (_status_tx, status) = watch::channel(ConnectionState::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (_polling, _task) = PollingFallback::spawn(0, true, status, tx);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_configure_rearms_timer() {
        let (_status_tx, status) = watch::channel(ConnectionState::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (polling, _task) = PollingFallback::spawn(0, true, status, tx);

        polling.configure(5);
        tokio::time::sleep(Duration::from_millis(5_001)).await;
        assert_eq!(drain(&mut rx).len(), 2);

        polling.configure(0);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_tears_down_timer() {
        let (_status_tx, status) = watch::channel(ConnectionState::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (polling, _task) = PollingFallback::spawn(5, true, status, tx);

        polling.set_enabled(false);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(drain(&mut rx).is_empty());

        polling.set_enabled(true);
        tokio::time::sleep(Duration::from_millis(5_001)).await;
        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_arm_rejects_out_of_range_interval() {
        assert!(arm(MAX_POLL_INTERVAL_SECS + 1, true).is_none());
        assert!(arm(u64::MAX, true).is_none());
        assert!(arm(MAX_POLL_INTERVAL_SECS, true).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_interval_turns_polling_off_without_panic() {
        let (_status_tx, status) = watch::channel(ConnectionState::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (polling, task) = PollingFallback::spawn(30, true, status, tx);

        polling.configure(u64::MAX);
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(drain(&mut rx).is_empty());

        // Still alive: a sane interval brings polling back
        polling.configure(5);
        tokio::time::sleep(Duration::from_millis(5_001)).await;
        assert_eq!(drain(&mut rx).len(), 2);

        polling.shutdown();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_ends_task() {
        let (_status_tx, status) = watch::channel(ConnectionState::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let (polling, task) = PollingFallback::spawn(5, true, status, tx);
        polling.shutdown();
        task.await.unwrap();
    }
}
