//! Connection actor.
//!
//! Owns one duplex transport through two supervised tasks:
//!
//! - the **writer** drains a queue of outbound frames and is the only code
//!   that touches the sink, so frames never interleave
//! - the **reader** forwards inbound frames to the single [`Inbound`]
//!   consumer (the session loop)
//!
//! Either task failing cancels the connection token, which stops the other.
//! The inbound side then ends, which is how the session learns the
//! transport is gone.

use crate::error::{SendError, TransportError};
use crate::supervisor::TaskSupervisor;
use crate::transport::{InboundStream, OutboundSink};
use futures_util::{SinkExt, StreamExt};
use herald_protocol::ServerMessage;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

const OUTBOUND_QUEUE: usize = 64;
const INBOUND_QUEUE: usize = 64;

/// Bound on flushing a close frame once the writer is stopping.
const CLOSE_FRAME_TIMEOUT: Duration = Duration::from_secs(1);

struct Outgoing {
    text: String,
    reply: oneshot::Sender<Result<(), SendError>>,
}

/// Cloneable handle to a connection actor.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: Arc<str>,
    outbound: mpsc::Sender<Outgoing>,
    token: CancellationToken,
    tasks: Arc<Mutex<Option<TaskSupervisor>>>,
    grace: Duration,
}

/// Receiving side of a connection. There is exactly one per connection.
pub struct Inbound {
    frames: mpsc::Receiver<String>,
}

impl Inbound {
    /// Next raw frame, or `None` once the transport is gone or closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.frames.recv().await
    }
}

/// Start the actor on a transport.
///
/// `grace` bounds how long [`ConnectionHandle::close`] waits for each task.
pub fn spawn(sink: OutboundSink, stream: InboundStream, grace: Duration) -> (ConnectionHandle, Inbound) {
    let id: Arc<str> = Uuid::new_v4().to_string().into();
    let token = CancellationToken::new();
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);

    let mut tasks = TaskSupervisor::with_token(format!("connection:{id}"), token.clone());
    tasks.spawn("writer", write_loop(sink, outbound_rx, token.clone(), id.clone()));
    tasks.spawn("reader", read_loop(stream, inbound_tx, token.clone(), id.clone()));

    debug!(connection_id = %id, "connection opened");

    let handle = ConnectionHandle {
        id,
        outbound: outbound_tx,
        token,
        tasks: Arc::new(Mutex::new(Some(tasks))),
        grace,
    };
    (handle, Inbound { frames: inbound_rx })
}

impl ConnectionHandle {
    /// Unique id of this physical connection.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether the connection has been closed or lost.
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the connection is closed or lost.
    pub async fn closed(&self) {
        self.token.cancelled().await
    }

    /// Serialize and send a message, waiting until it is written.
    pub async fn send(&self, message: ServerMessage) -> Result<(), SendError> {
        let action = message.action();
        let text = message
            .to_json()
            .map_err(|e| SendError::Encode(e.to_string()))?;
        let result = self.send_text(text).await;
        if let Err(e) = &result {
            debug!(connection_id = %self.id, action, error = %e, "send failed");
        }
        result
    }

    /// Send an already-encoded frame, waiting until it is written.
    pub async fn send_text(&self, text: String) -> Result<(), SendError> {
        if self.token.is_cancelled() {
            return Err(SendError::Closed);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let outgoing = Outgoing {
            text,
            reply: reply_tx,
        };
        tokio::select! {
            _ = self.token.cancelled() => return Err(SendError::Closed),
            queued = self.outbound.send(outgoing) => queued.map_err(|_| SendError::Closed)?,
        }

        // The writer answers before it cancels, so its verdict wins.
        tokio::select! {
            biased;
            // A dropped reply means the writer went away with the frame queued.
            written = reply_rx => written.unwrap_or(Err(SendError::Closed)),
            _ = self.token.cancelled() => Err(SendError::Closed),
        }
    }

    /// Stop both tasks and wait for them, at most the grace period each.
    ///
    /// Idempotent: later calls return immediately.
    pub async fn close(&self) {
        self.token.cancel();

        let Some(mut tasks) = self.tasks.lock().await.take() else {
            return;
        };
        let report = tasks.shutdown(self.grace).await;
        info!(
            connection_id = %self.id,
            stopped = report.stopped,
            aborted = report.aborted.len(),
            "connection closed"
        );
    }
}

async fn write_loop(
    mut sink: OutboundSink,
    mut queue: mpsc::Receiver<Outgoing>,
    token: CancellationToken,
    connection_id: Arc<str>,
) {
    loop {
        let outgoing = tokio::select! {
            _ = token.cancelled() => break,
            next = queue.recv() => match next {
                Some(outgoing) => outgoing,
                None => break,
            },
        };

        match sink.send(outgoing.text).await {
            Ok(()) => {
                let _ = outgoing.reply.send(Ok(()));
            }
            Err(e) => {
                warn!(connection_id = %connection_id, error = %e, "transport write failed");
                let _ = outgoing.reply.send(Err(SendError::Transport(e.to_string())));
                token.cancel();
                break;
            }
        }
    }

    // Fail whatever is still queued rather than leaving callers waiting.
    queue.close();
    while let Ok(outgoing) = queue.try_recv() {
        let _ = outgoing.reply.send(Err(SendError::Closed));
    }

    let _ = tokio::time::timeout(CLOSE_FRAME_TIMEOUT, sink.close()).await;
    debug!(connection_id = %connection_id, "writer stopped");
}

async fn read_loop(
    mut stream: InboundStream,
    frames: mpsc::Sender<String>,
    token: CancellationToken,
    connection_id: Arc<str>,
) {
    loop {
        let next = tokio::select! {
            _ = token.cancelled() => break,
            next = stream.next() => next,
        };

        match next {
            Some(Ok(text)) => {
                tokio::select! {
                    _ = token.cancelled() => break,
                    sent = frames.send(text) => if sent.is_err() {
                        // Nobody is reading any more.
                        token.cancel();
                        break;
                    },
                }
            }
            Some(Err(TransportError::Closed)) | None => {
                debug!(connection_id = %connection_id, "peer disconnected");
                token.cancel();
                break;
            }
            Some(Err(e)) => {
                warn!(connection_id = %connection_id, error = %e, "transport read failed");
                token.cancel();
                break;
            }
        }
    }
    debug!(connection_id = %connection_id, "reader stopped");
}
