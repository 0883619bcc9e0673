//! Socket transport for the live-update connection.
//!
//! A [`Connector`] opens one socket per generation and reports everything
//! that happens to it as [`SocketEvent`]s on the manager's event channel.
//! The returned [`ConnectionSocket`] is the only way to write to or close
//! that socket; dropping it closes the socket with a normal closure.

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use url::Url;

use super::protocol::{ABNORMAL_CLOSURE, NO_STATUS_RECEIVED, NORMAL_CLOSURE};

/// What happened to a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEventKind {
    /// Handshake completed.
    Opened,
    /// A text frame arrived.
    Frame(String),
    /// The socket failed. A `Closed` event always follows.
    Error(String),
    /// The socket is gone.
    Closed { code: u16, reason: String },
}

/// A socket event tagged with the generation of the socket that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketEvent {
    pub generation: u64,
    pub kind: SocketEventKind,
}

/// Sender half of the manager's socket event channel.
pub type SocketEvents = mpsc::UnboundedSender<SocketEvent>;

/// A request written to the socket task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close(u16),
}

/// Owned handle to one open (or opening) socket.
#[derive(Debug)]
pub struct ConnectionSocket {
    generation: u64,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl ConnectionSocket {
    pub fn new(generation: u64, outbound: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            generation,
            outbound,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Queue a text frame. Returns `false` if the socket task is gone.
    pub fn send(&self, text: String) -> bool {
        self.outbound.send(Outbound::Text(text)).is_ok()
    }

    /// Ask the socket to close with `code`.
    pub fn close(self, code: u16) {
        let _ = self.outbound.send(Outbound::Close(code));
    }
}

/// Opens sockets on behalf of the connection manager.
pub trait Connector: Send + Sync + 'static {
    /// Start opening a socket to `url`. Must not block; progress is reported
    /// through `events`, every event tagged with `generation`.
    fn connect(&self, url: &Url, generation: u64, events: SocketEvents) -> ConnectionSocket;
}

/// Production connector backed by tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

impl Connector for TungsteniteConnector {
    fn connect(&self, url: &Url, generation: u64, events: SocketEvents) -> ConnectionSocket {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_socket(url.to_string(), generation, rx, events));
        ConnectionSocket::new(generation, tx)
    }
}

fn close_message(code: u16) -> Message {
    Message::Close(Some(CloseFrame {
        code: CloseCode::from(code),
        reason: "".into(),
    }))
}

/// Drive one socket from handshake to close.
async fn run_socket(
    url: String,
    generation: u64,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: SocketEvents,
) {
    let emit = |kind: SocketEventKind| {
        let _ = events.send(SocketEvent { generation, kind });
    };

    tracing::debug!(generation, %url, "opening live socket");

    let connect = connect_async(url.as_str());
    tokio::pin!(connect);

    let ws_stream = loop {
        tokio::select! {
            result = &mut connect => match result {
                Ok((stream, response)) => {
                    tracing::debug!(generation, status = %response.status(), "handshake complete");
                    break stream;
                }
                Err(e) => {
                    emit(SocketEventKind::Error(e.to_string()));
                    emit(SocketEventKind::Closed {
                        code: ABNORMAL_CLOSURE,
                        reason: "connection failed".to_string(),
                    });
                    return;
                }
            },
            request = outbound.recv() => match request {
                Some(Outbound::Text(_)) => {
                    tracing::debug!(generation, "dropping frame queued before open");
                }
                Some(Outbound::Close(code)) => {
                    emit(SocketEventKind::Closed {
                        code,
                        reason: "closed before open".to_string(),
                    });
                    return;
                }
                None => return,
            },
        }
    };

    emit(SocketEventKind::Opened);
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            request = outbound.recv() => match request {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        emit(SocketEventKind::Error(e.to_string()));
                        emit(SocketEventKind::Closed {
                            code: ABNORMAL_CLOSURE,
                            reason: "send failed".to_string(),
                        });
                        return;
                    }
                }
                Some(Outbound::Close(code)) => {
                    let _ = write.send(close_message(code)).await;
                    emit(SocketEventKind::Closed {
                        code,
                        reason: "closed by client".to_string(),
                    });
                    return;
                }
                None => {
                    // Handle dropped
                    let _ = write.send(close_message(NORMAL_CLOSURE)).await;
                    return;
                }
            },
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => emit(SocketEventKind::Frame(text)),
                Some(Ok(Message::Ping(data))) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Binary(data))) => {
                    tracing::debug!(generation, bytes = data.len(), "ignoring binary frame");
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.to_string()))
                        .unwrap_or((NO_STATUS_RECEIVED, String::new()));
                    emit(SocketEventKind::Closed { code, reason });
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    emit(SocketEventKind::Error(e.to_string()));
                    emit(SocketEventKind::Closed {
                        code: ABNORMAL_CLOSURE,
                        reason: "connection error".to_string(),
                    });
                    return;
                }
                None => {
                    emit(SocketEventKind::Closed {
                        code: ABNORMAL_CLOSURE,
                        reason: "stream ended".to_string(),
                    });
                    return;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_send_and_close_reach_outbound() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let socket = ConnectionSocket::new(7, tx);
        assert_eq!(socket.generation(), 7);
        assert!(socket.send("hello".to_string()));
        socket.close(NORMAL_CLOSURE);

        assert_eq!(rx.try_recv().unwrap(), Outbound::Text("hello".to_string()));
        assert_eq!(rx.try_recv().unwrap(), Outbound::Close(NORMAL_CLOSURE));
    }

    #[test]
    fn test_send_fails_when_task_gone() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let socket = ConnectionSocket::new(1, tx);
        assert!(!socket.send("lost".to_string()));
    }

    #[test]
    fn test_close_message_carries_code() {
        match close_message(NORMAL_CLOSURE) {
            Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), 1000),
            other => panic!("expected close frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreachable_server_reports_error_then_close() {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        // Port 9 (discard) on localhost is closed in test environments
        let url = Url::parse("ws://127.0.0.1:9/ws").unwrap();
        let _socket = TungsteniteConnector.connect(&url, 3, events_tx);

        let first = events_rx.recv().await.unwrap();
        assert_eq!(first.generation, 3);
        assert!(matches!(first.kind, SocketEventKind::Error(_)));

        let second = events_rx.recv().await.unwrap();
        assert_eq!(
            second.kind,
            SocketEventKind::Closed {
                code: ABNORMAL_CLOSURE,
                reason: "connection failed".to_string()
            }
        );
    }
}
