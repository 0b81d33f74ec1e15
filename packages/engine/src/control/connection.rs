// packages/engine/src/control/connection.rs
//! One control connection
//!
//! Reads newline-delimited commands, forwards them to a [`SessionController`]
//! and writes every snapshot and error reply back on the same stream. The
//! connection task is the only place that touches the socket.
//!
//! Writes never outlast `server.write_timeout_ms` and always yield to the
//! cancellation token, so a viewer that stops reading cannot keep its session
//! alive or hold up server shutdown.

use crate::broadcast::snapshot::StateSnapshot;
use crate::control::controller::SessionController;
use crate::control::protocol::{Command, ServerMessage};
use crate::observability::metrics;
use crate::runtime::session::SessionSettings;
use crate::utils::config::ServerConfig;
use crate::utils::errors::{EngineError, Result};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type Frame = std::result::Result<String, LinesCodecError>;

/// Serve a single viewer until it disconnects or `cancel` fires
///
/// Any running session is stopped before this returns.
pub async fn serve_connection<S>(
    stream: S,
    server: &ServerConfig,
    settings: SessionSettings,
    cancel: CancellationToken,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut connection = Connection::new(stream, server, settings, cancel);
    let closed = connection.run(server.greet_with_snapshot).await;
    connection.finish(closed).await
}

/// Why the read/write loop ended
#[derive(Debug)]
enum Closed {
    /// The cancellation token fired
    Shutdown,

    /// The viewer hung up, or was hung up on after a reply
    Hangup,

    /// The stream broke, stalled or fell too far behind
    Failed(EngineError),
}

struct Connection<S> {
    transport: Framed<S, LinesCodec>,
    controller: SessionController,
    snapshots: mpsc::UnboundedReceiver<StateSnapshot>,
    cancel: CancellationToken,
    max_frame_bytes: usize,
    write_timeout: Duration,
    max_pending: usize,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn new(
        stream: S,
        server: &ServerConfig,
        settings: SessionSettings,
        cancel: CancellationToken,
    ) -> Self {
        let (controller, snapshots) = SessionController::new(settings);
        Self {
            transport: Framed::new(
                stream,
                LinesCodec::new_with_max_length(server.max_frame_bytes),
            ),
            controller,
            snapshots,
            cancel,
            max_frame_bytes: server.max_frame_bytes,
            write_timeout: server.write_timeout(),
            max_pending: server.max_pending_snapshots,
        }
    }

    async fn run(&mut self, greet: bool) -> Closed {
        if greet {
            if let Err(closed) = self.write(ServerMessage::from(StateSnapshot::idle())).await {
                debug!("Greeting failed: {:?}", closed);
                return closed;
            }
        }

        loop {
            let step = tokio::select! {
                biased;

                _ = self.cancel.cancelled() => Err(Closed::Shutdown),
                Some(snapshot) = self.snapshots.recv() => self.forward(snapshot).await,
                frame = self.transport.next() => self.on_frame(frame).await,
            };

            if let Err(closed) = step {
                return closed;
            }
        }
    }

    /// Stop the session and, on shutdown, deliver what is left
    async fn finish(mut self, closed: Closed) -> Result<()> {
        match closed {
            Closed::Shutdown => {
                // The session goes first so the final snapshot is queued
                self.controller.shutdown().await;
                match tokio::time::timeout(self.write_timeout, self.flush_pending()).await {
                    Ok(Ok(())) => info!("Control connection closed by server shutdown"),
                    Ok(Err(e)) => debug!("Final snapshots not delivered: {}", e),
                    Err(_) => warn!(
                        "Final snapshots not delivered within {:?}, dropping them",
                        self.write_timeout
                    ),
                }
                Ok(())
            }
            Closed::Hangup => {
                self.controller.connection_lost().await;
                Ok(())
            }
            Closed::Failed(e) => {
                self.controller.connection_lost().await;
                Err(e)
            }
        }
    }

    async fn forward(&mut self, snapshot: StateSnapshot) -> std::result::Result<(), Closed> {
        let backlog = self.snapshots.len();
        if backlog >= self.max_pending {
            warn!("Viewer is {} snapshots behind, dropping it", backlog);
            return Err(Closed::Failed(EngineError::ConnectionLost(format!(
                "{} snapshots pending",
                backlog
            ))));
        }
        self.write(ServerMessage::from(snapshot)).await
    }

    async fn on_frame(&mut self, frame: Option<Frame>) -> std::result::Result<(), Closed> {
        match frame {
            Some(Ok(line)) => self.on_line(&line).await,
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                let e = EngineError::MalformedCommand(format!(
                    "Line longer than {} bytes",
                    self.max_frame_bytes
                ));
                // The codec cannot resynchronise, so the connection ends here
                self.reject(&e).await?;
                warn!("Closing control connection after oversized line");
                Err(Closed::Hangup)
            }
            Some(Err(LinesCodecError::Io(e))) => {
                warn!("Control connection read failed: {}", e);
                Err(Closed::Failed(EngineError::ConnectionLost(e.to_string())))
            }
            None => {
                debug!("Control connection closed by peer");
                Err(Closed::Hangup)
            }
        }
    }

    async fn on_line(&mut self, line: &str) -> std::result::Result<(), Closed> {
        if line.trim().is_empty() {
            return Ok(());
        }

        let outcome = match Command::parse(line) {
            Ok(command) => {
                debug!("Command: {:?}", command);
                self.controller.handle(command).await
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => Ok(()),
            Err(e) if e.is_client_error() => self.reject(&e).await,
            Err(e) => Err(Closed::Failed(e)),
        }
    }

    async fn reject(&mut self, error: &EngineError) -> std::result::Result<(), Closed> {
        debug!("Rejecting command: {}", error);
        metrics::command_rejected(error.code());
        self.write(ServerMessage::error(error)).await
    }

    /// Write one message, giving up on cancellation or after the write timeout
    async fn write(&mut self, message: ServerMessage) -> std::result::Result<(), Closed> {
        let line = message.to_line().map_err(Closed::Failed)?;

        let sent = tokio::select! {
            biased;

            _ = self.cancel.cancelled() => return Err(Closed::Shutdown),
            sent = tokio::time::timeout(self.write_timeout, self.transport.send(line)) => sent,
        };

        match sent {
            Ok(Ok(())) => {
                if matches!(message, ServerMessage::Snapshot(_)) {
                    metrics::snapshot_sent();
                }
                Ok(())
            }
            Ok(Err(e)) => Err(Closed::Failed(connection_lost(e))),
            Err(_) => {
                warn!("Viewer accepted nothing for {:?}", self.write_timeout);
                Err(Closed::Failed(EngineError::ConnectionLost(format!(
                    "write stalled for {:?}",
                    self.write_timeout
                ))))
            }
        }
    }

    async fn flush_pending(&mut self) -> Result<()> {
        while let Ok(snapshot) = self.snapshots.try_recv() {
            let line = ServerMessage::from(snapshot).to_line()?;
            self.transport.feed(line).await.map_err(connection_lost)?;
            metrics::snapshot_sent();
        }
        SinkExt::<String>::flush(&mut self.transport).await.map_err(connection_lost)
    }
}

fn connection_lost(e: LinesCodecError) -> EngineError {
    match e {
        LinesCodecError::Io(e) => EngineError::ConnectionLost(e.to_string()),
        other => EngineError::ConnectionLost(other.to_string()),
    }
}
