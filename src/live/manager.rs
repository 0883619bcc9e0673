//! Connection manager.
//!
//! Owns the single live socket. A spawned task feeds lifecycle commands,
//! socket events and the reconnect timer into a [`Lifecycle`], carries out
//! the resulting effects, and publishes every state change on a `watch`
//! channel.

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use url::Url;

use super::backoff::ReconnectPolicy;
use super::lifecycle::{ConnectionState, ConnectionStatus, Effect, Lifecycle};
use super::router::MessageSink;
use super::socket::{ConnectionSocket, Connector, SocketEvent, SocketEventKind};

#[derive(Debug)]
enum Command {
    Start,
    Stop,
    Send {
        data: String,
        reply: oneshot::Sender<bool>,
    },
    Shutdown,
}

/// Handle to the connection task.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
}

impl ConnectionManager {
    /// Spawn the connection task for `url`. Nothing connects until
    /// [`start`](Self::start).
    pub fn spawn<C: Connector, M: MessageSink>(
        url: Url,
        policy: ReconnectPolicy,
        connector: C,
        sink: M,
    ) -> (Self, JoinHandle<()>) {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::default());

        let driver = Driver {
            url,
            connector,
            sink,
            lifecycle: Lifecycle::new(policy),
            socket: None,
            reconnect_at: None,
            events,
            state: state_tx,
        };
        let handle = tokio::spawn(driver.run(commands_rx, events_rx));
        (Self { commands, state }, handle)
    }

    /// Begin connecting. No effect while connecting, connected or waiting
    /// to reconnect.
    pub fn start(&self) {
        let _ = self.commands.send(Command::Start);
    }

    /// Close the socket with a normal closure and cancel any pending
    /// reconnect. Nothing reconnects until the next `start()`.
    pub fn stop(&self) {
        let _ = self.commands.send(Command::Stop);
    }

    /// Send a text frame. Returns `false` unless connected.
    pub async fn send(&self, data: impl Into<String>) -> bool {
        let (reply, rx) = oneshot::channel();
        let command = Command::Send {
            data: data.into(),
            reply,
        };
        if self.commands.send(command).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Latest connection snapshot.
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.borrow().status
    }

    /// A receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Stop and end the task.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

struct Driver<C, M> {
    url: Url,
    connector: C,
    sink: M,
    lifecycle: Lifecycle,
    socket: Option<ConnectionSocket>,
    reconnect_at: Option<Instant>,
    /// Kept so the event channel never closes while the task runs.
    events: mpsc::UnboundedSender<SocketEvent>,
    state: watch::Sender<ConnectionState>,
}

impl<C: Connector, M: MessageSink> Driver<C, M> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<SocketEvent>,
    ) {
        loop {
            let reconnect_at = self.reconnect_at;

            // Commands first: a queued stop() must beat an expired reconnect timer
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(Command::Start) => {
                        let effects = self.lifecycle.start();
                        self.apply(effects);
                    }
                    Some(Command::Stop) => {
                        let effects = self.lifecycle.stop();
                        self.apply(effects);
                    }
                    Some(Command::Send { data, reply }) => {
                        let _ = reply.send(self.send(data));
                    }
                    Some(Command::Shutdown) | None => {
                        let effects = self.lifecycle.stop();
                        self.apply(effects);
                        self.publish();
                        break;
                    }
                },
                Some(event) = events.recv() => self.handle_event(event),
                _ = sleep_until(reconnect_at.unwrap_or_else(Instant::now)), if reconnect_at.is_some() => {
                    self.reconnect_at = None;
                    let effects = self.lifecycle.reconnect_due();
                    self.apply(effects);
                }
            }

            self.publish();
        }

        tracing::debug!("connection manager stopped");
    }

    fn handle_event(&mut self, event: SocketEvent) {
        let SocketEvent { generation, kind } = event;
        let now = chrono::Utc::now();

        let effects = match kind {
            SocketEventKind::Opened => self.lifecycle.opened(generation),
            SocketEventKind::Frame(text) => self.lifecycle.frame(generation, &text, now),
            SocketEventKind::Error(reason) => self.lifecycle.errored(generation, &reason),
            SocketEventKind::Closed { code, reason } => {
                tracing::debug!(generation, code, %reason, "socket closed");
                if self
                    .socket
                    .as_ref()
                    .is_some_and(|socket| socket.generation() == generation)
                {
                    self.socket = None;
                }
                self.lifecycle.closed(generation, code, now)
            }
        };
        self.apply(effects);
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Open { generation } => {
                    tracing::debug!(generation, url = %self.url, "connecting");
                    let socket = self
                        .connector
                        .connect(&self.url, generation, self.events.clone());
                    // A leftover socket from an older generation closes on drop
                    self.socket = Some(socket);
                }
                Effect::Close { generation, code } => {
                    match self.socket.take() {
                        Some(socket) if socket.generation() == generation => socket.close(code),
                        other => self.socket = other,
                    }
                }
                Effect::ArmReconnect { delay } => {
                    self.reconnect_at = Some(Instant::now() + delay);
                }
                Effect::CancelReconnect => {
                    self.reconnect_at = None;
                }
                Effect::Route(message) => self.sink.route(message),
            }
        }
    }

    fn send(&self, data: String) -> bool {
        let socket = match (self.lifecycle.sendable_generation(), self.socket.as_ref()) {
            (Some(generation), Some(socket)) if socket.generation() == generation => socket,
            _ => {
                tracing::debug!(status = %self.lifecycle.state().status, "send dropped; not connected");
                return false;
            }
        };
        if !socket.send(data) {
            tracing::warn!("send failed; socket task is gone");
            return false;
        }
        true
    }

    fn publish(&self) {
        let next = self.lifecycle.state();
        self.state.send_if_modified(|current| {
            if current == next {
                return false;
            }
            *current = next.clone();
            true
        });
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::live::protocol::{ABNORMAL_CLOSURE, InboundMessage, MessageKind, NORMAL_CLOSURE};
    use crate::live::socket::{Outbound, SocketEvents};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct Attempt {
        generation: u64,
        events: SocketEvents,
        outbound: mpsc::UnboundedReceiver<Outbound>,
    }

    /// Connector that records every attempt and lets the test play the server.
    #[derive(Clone, Default)]
    pub(crate) struct ScriptedConnector {
        attempts: Arc<Mutex<Vec<Attempt>>>,
    }

    impl ScriptedConnector {
        pub fn attempts(&self) -> usize {
            self.attempts.lock().unwrap().len()
        }

        /// Deliver `kind` as if the socket of attempt `index` produced it.
        pub fn emit(&self, index: usize, kind: SocketEventKind) {
            let attempts = self.attempts.lock().unwrap();
            let attempt = &attempts[index];
            attempt
                .events
                .send(SocketEvent {
                    generation: attempt.generation,
                    kind,
                })
                .unwrap();
        }

        /// Next outbound request written to the socket of attempt `index`.
        pub fn outbound(&self, index: usize) -> Option<Outbound> {
            self.attempts.lock().unwrap()[index].outbound.try_recv().ok()
        }
    }

    impl Connector for ScriptedConnector {
        fn connect(&self, _url: &Url, generation: u64, events: SocketEvents) -> ConnectionSocket {
            let (tx, outbound) = mpsc::unbounded_channel();
            self.attempts.lock().unwrap().push(Attempt {
                generation,
                events,
                outbound,
            });
            ConnectionSocket::new(generation, tx)
        }
    }

    pub(crate) async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    fn closed(code: u16) -> SocketEventKind {
        SocketEventKind::Closed {
            code,
            reason: String::new(),
        }
    }

    fn spawn_manager() -> (
        ConnectionManager,
        ScriptedConnector,
        mpsc::UnboundedReceiver<InboundMessage>,
    ) {
        let connector = ScriptedConnector::default();
        let (sink, routed) = mpsc::unbounded_channel();
        let url = Url::parse("ws://dash.local/ws").unwrap();
        let (manager, _task) =
            ConnectionManager::spawn(url, ReconnectPolicy::default(), connector.clone(), sink);
        (manager, connector, routed)
    }

    async fn connected() -> (
        ConnectionManager,
        ScriptedConnector,
        mpsc::UnboundedReceiver<InboundMessage>,
    ) {
        let (manager, connector, routed) = spawn_manager();
        manager.start();
        settle().await;
        connector.emit(0, SocketEventKind::Opened);
        manager
            .subscribe()
            .wait_for(|s| s.status == ConnectionStatus::Connected)
            .await
            .unwrap();
        (manager, connector, routed)
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_connects() {
        let (manager, connector, _routed) = spawn_manager();
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);

        manager.start();
        manager.start();
        settle().await;
        assert_eq!(connector.attempts(), 1);
        assert_eq!(manager.status(), ConnectionStatus::Connecting);

        connector.emit(0, SocketEventKind::Opened);
        settle().await;
        let state = manager.state();
        assert_eq!(state.status, ConnectionStatus::Connected);
        assert_eq!(state.attempt_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abnormal_close_reconnects_after_base_delay() {
        let (manager, connector, _routed) = connected().await;

        connector.emit(0, closed(ABNORMAL_CLOSURE));
        settle().await;
        let state = manager.state();
        assert_eq!(state.status, ConnectionStatus::Disconnected);
        assert_eq!(state.attempt_count, 1);
        assert!(state.is_reconnect_pending());

        tokio::time::sleep(Duration::from_millis(999)).await;
        settle().await;
        assert_eq!(connector.attempts(), 1);

        tokio::time::sleep(Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(connector.attempts(), 2);
        let state = manager.state();
        assert_eq!(state.status, ConnectionStatus::Connecting);
        assert_eq!(state.attempt_count, 1);
        assert!(!state.is_reconnect_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reopen_resets_attempt_count() {
        let (manager, connector, _routed) = connected().await;

        connector.emit(0, closed(ABNORMAL_CLOSURE));
        tokio::time::sleep(Duration::from_millis(1000)).await;
        settle().await;
        connector.emit(1, closed(ABNORMAL_CLOSURE));
        tokio::time::sleep(Duration::from_millis(2000)).await;
        settle().await;
        assert_eq!(connector.attempts(), 3);
        assert_eq!(manager.state().attempt_count, 2);

        connector.emit(2, SocketEventKind::Opened);
        settle().await;
        assert_eq!(manager.status(), ConnectionStatus::Connected);
        assert_eq!(manager.state().attempt_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_connecting_never_reconnects() {
        let (manager, connector, _routed) = spawn_manager();
        manager.start();
        settle().await;

        manager.stop();
        settle().await;
        assert_eq!(connector.outbound(0), Some(Outbound::Close(NORMAL_CLOSURE)));

        // Late close echo from the abandoned socket
        connector.emit(0, closed(ABNORMAL_CLOSURE));
        settle().await;
        let state = manager.state();
        assert_eq!(state.status, ConnectionStatus::Disconnected);
        assert!(!state.is_reconnect_pending());

        tokio::time::sleep(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_backoff_cancels_timer() {
        let (manager, connector, _routed) = connected().await;
        connector.emit(0, closed(ABNORMAL_CLOSURE));
        settle().await;
        assert!(manager.state().is_reconnect_pending());

        manager.stop();
        manager.stop();
        settle().await;
        assert!(!manager.state().is_reconnect_pending());

        tokio::time::sleep(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(connector.attempts(), 1);

        // start() brings it back
        manager.start();
        settle().await;
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_beats_expired_reconnect_timer() {
        for _ in 0..40 {
            let (manager, connector, _routed) = connected().await;
            connector.emit(0, closed(ABNORMAL_CLOSURE));
            settle().await;
            assert!(manager.state().is_reconnect_pending());

            // Stop is queued when the deadline passes; both are ready in one poll
            manager.stop();
            tokio::time::advance(Duration::from_millis(1000)).await;
            settle().await;

            assert_eq!(connector.attempts(), 1);
            let state = manager.state();
            assert_eq!(state.status, ConnectionStatus::Disconnected);
            assert!(!state.is_reconnect_pending());
            manager.shutdown();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_is_not_routed() {
        let (manager, connector, mut routed) = connected().await;

        connector.emit(0, SocketEventKind::Frame(r#"{"type":"HEARTBEAT"}"#.to_string()));
        settle().await;
        let state = manager.state();
        assert!(state.last_heartbeat_at.is_some());
        assert!(state.last_message_at.is_none());
        assert!(routed.try_recv().is_err());

        connector.emit(
            0,
            SocketEventKind::Frame(r#"{"type":"BOOKMARK_ADDED","data":{"id":"b1"}}"#.to_string()),
        );
        let message = routed.recv().await.unwrap();
        assert_eq!(message.kind, MessageKind::BookmarkAdded);
        assert!(manager.state().last_message_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_frame_is_dropped() {
        let (manager, connector, mut routed) = connected().await;
        let before = manager.state();

        connector.emit(0, SocketEventKind::Frame("not valid json".to_string()));
        settle().await;
        assert_eq!(manager.state(), before);
        assert!(routed.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_route_in_arrival_order() {
        let (_manager, connector, mut routed) = connected().await;
        for tag in ["APPLICATION_ADDED", "BOOKMARK_REMOVED", "STATUS_CHANGED"] {
            connector.emit(0, SocketEventKind::Frame(format!(r#"{{"type":"{}"}}"#, tag)));
        }
        let mut tags = Vec::new();
        for _ in 0..3 {
            tags.push(routed.recv().await.unwrap().kind.to_string());
        }
        assert_eq!(tags, vec!["APPLICATION_ADDED", "BOOKMARK_REMOVED", "STATUS_CHANGED"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_only_when_connected() {
        let (manager, connector, _routed) = spawn_manager();
        assert!(!manager.send("early").await);

        manager.start();
        settle().await;
        assert!(!manager.send("still connecting").await);

        connector.emit(0, SocketEventKind::Opened);
        settle().await;
        assert!(manager.send("hello").await);
        assert_eq!(connector.outbound(0), Some(Outbound::Text("hello".to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_connect_schedules_reconnect() {
        let (manager, connector, _routed) = spawn_manager();
        manager.start();
        settle().await;

        connector.emit(0, SocketEventKind::Error("connection refused".to_string()));
        connector.emit(0, closed(ABNORMAL_CLOSURE));
        settle().await;
        let state = manager.state();
        assert_eq!(state.status, ConnectionStatus::Disconnected);
        assert_eq!(state.attempt_count, 1);
        assert!(state.is_reconnect_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_closes_socket_and_ends_task() {
        let connector = ScriptedConnector::default();
        let (sink, _routed) = mpsc::unbounded_channel::<InboundMessage>();
        let url = Url::parse("ws://dash.local/ws").unwrap();
        let (manager, task) =
            ConnectionManager::spawn(url, ReconnectPolicy::default(), connector.clone(), sink);

        manager.start();
        settle().await;
        connector.emit(0, SocketEventKind::Opened);
        settle().await;

        manager.shutdown();
        task.await.unwrap();
        assert_eq!(connector.outbound(0), Some(Outbound::Close(NORMAL_CLOSURE)));
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        assert!(!manager.send("too late").await);
    }
}
