//! Outbound command dispatch.
//!
//! The Elko server has no multiplexing and assumes serialized interaction,
//! so every send funnels through a single worker task draining a FIFO
//! queue: at most one command is in flight at any time, and the next one
//! is not dequeued until the current one has resolved or rejected. Each
//! command gets name resolution and template substitution applied at
//! dequeue time, against the session state current at that moment.

use crate::client::ClientInner;
use crate::message::Message;
use crate::template;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Pacing delay applied when the caller does not pick one. Legacy clients
/// rate-limit hard; this keeps us under it.
pub const DEFAULT_SEND_DELAY: Duration = Duration::from_millis(500);

/// Errors that can reject a submitted command.
#[derive(Debug, Error)]
pub enum SendError {
    /// The connection was not established when the command came up for
    /// dispatch. Not retried here; retry is the caller's call.
    #[error("not connected to {host}:{port}")]
    NotConnected { host: String, port: u16 },

    #[error("failed to encode command: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to write command: {0}")]
    Write(#[source] std::io::Error),

    /// The dispatcher task is gone (client dropped).
    #[error("command queue closed")]
    QueueClosed,
}

/// A submitted command waiting its turn in the queue.
pub(crate) struct PendingCommand {
    pub(crate) msg: Message,
    pub(crate) delay: Duration,
    pub(crate) done: oneshot::Sender<Result<(), SendError>>,
}

/// Future returned by command submission.
///
/// The command is enqueued at submission time; this future resolves once
/// its wire write is acknowledged, or with the rejection that dropped it.
/// Dropping the future does not cancel the command.
pub struct PendingSend {
    rx: oneshot::Receiver<Result<(), SendError>>,
}

impl PendingSend {
    pub(crate) fn new(rx: oneshot::Receiver<Result<(), SendError>>) -> Self {
        Self { rx }
    }
}

impl Future for PendingSend {
    type Output = Result<(), SendError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(SendError::QueueClosed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Drain the command queue, one entry at a time, until the client drops.
pub(crate) async fn run(
    inner: Arc<ClientInner>,
    mut queue: mpsc::UnboundedReceiver<PendingCommand>,
) {
    while let Some(command) = queue.recv().await {
        let result = dispatch(&inner, command.msg, command.delay).await;
        // The submitter may have dropped its PendingSend; that is fine.
        let _ = command.done.send(result);
    }
}

async fn dispatch(
    inner: &ClientInner,
    mut msg: Message,
    delay: Duration,
) -> Result<(), SendError> {
    if !inner.connected.load(Ordering::SeqCst) {
        return Err(SendError::NotConnected {
            host: inner.host.clone(),
            port: inner.port,
        });
    }

    {
        let session = inner.session();
        if let Some(to) = msg.to().map(str::to_string) {
            msg.set("to", session.resolve(&to));
        }
        template::substitute_state(&session, &mut msg);
    }

    let mut wire = serde_json::to_string(&msg).map_err(SendError::Encode)?;
    wire.push_str("\n\n");

    tokio::time::sleep(delay).await;

    let mut writer = inner.writer.lock().await;
    let Some(stream) = writer.as_mut() else {
        return Err(SendError::NotConnected {
            host: inner.host.clone(),
            port: inner.port,
        });
    };
    debug!("{}:{}->: {}", inner.host, inner.port, wire.trim_end());
    stream
        .write_all(wire.as_bytes())
        .await
        .map_err(SendError::Write)?;
    Ok(())
}
