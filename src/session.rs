//! Session handler: the thin DAP endpoint the client talks to before the
//! backend takes over.
//!
//! The handler answers `initialize`, starts the backend on `launch` or
//! `attach`, and raises [`SessionEvent::Launched`] / [`SessionEvent::Attached`]
//! so the relay can splice the client onto the backend. It never answers
//! `launch`/`attach` itself; the backend does, when the relay replays them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, error, info, warn};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::BoxFuture;
use crate::backend::{BackendConnection, BackendKind, BackendLauncher, BackendProcess};
use crate::error::RelayResult;
use crate::protocol::{
    MessageReader, MessageWriter, ProtocolMessage, Request, Response, SequenceCounter,
};
use crate::relay::{BoxedReader, BoxedWriter};

/// Raised by a session handler once the backend is obtainable.
#[derive(Debug)]
pub enum SessionEvent {
    Launched(BackendConnection),
    Attached(BackendConnection),
}

/// Private streams between the relay and the session handler.
pub struct SessionIo {
    pub input: BoxedReader,
    pub output: BoxedWriter,
}

/// Endpoint serving the client until the backend is spliced in.
pub trait SessionHandler: Send + Sync {
    /// Serve DAP on `io` until the input ends or [`shutdown`] is called.
    ///
    /// [`shutdown`]: SessionHandler::shutdown
    fn serve(
        &self,
        io: SessionIo,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> BoxFuture<'static, RelayResult<()>>;

    /// Stop serving and release anything the handler started.
    fn shutdown(&self);
}

/// Default [`SessionHandler`].
#[derive(Clone)]
pub struct DebugSession {
    inner: Arc<DebugSessionInner>,
}

struct DebugSessionInner {
    launcher: Arc<dyn BackendLauncher>,
    capabilities: Value,
    process: Mutex<BackendProcess>,
    /// Set once a backend was started; a session drives at most one.
    started: AtomicBool,
    cancel: CancellationToken,
    seq: SequenceCounter,
}

impl DebugSession {
    pub fn new(launcher: Arc<dyn BackendLauncher>) -> Self {
        Self::with_capabilities(launcher, default_capabilities())
    }

    /// Use `capabilities` as the body of the `initialize` response.
    pub fn with_capabilities(launcher: Arc<dyn BackendLauncher>, capabilities: Value) -> Self {
        Self {
            inner: Arc::new(DebugSessionInner {
                launcher,
                capabilities,
                process: Mutex::new(BackendProcess::none()),
                started: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                seq: SequenceCounter::new(),
            }),
        }
    }
}

fn default_capabilities() -> Value {
    json!({
        "supportsConfigurationDoneRequest": true,
        "supportsRestartRequest": false,
    })
}

impl SessionHandler for DebugSession {
    fn serve(
        &self,
        io: SessionIo,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> BoxFuture<'static, RelayResult<()>> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move { inner.serve(io, events).await })
    }

    fn shutdown(&self) {
        debug!(target: "debug_relay::session", "Session handler shutting down");
        self.inner.cancel.cancel();
        self.inner
            .process
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .stop();
    }
}

impl DebugSessionInner {
    async fn serve(
        &self,
        io: SessionIo,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> RelayResult<()> {
        let mut reader = MessageReader::new(io.input);
        let mut writer = MessageWriter::new(io.output);

        loop {
            let message = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                result = reader.read_message() => match result? {
                    Some(message) => message,
                    None => return Ok(()),
                },
            };

            let ProtocolMessage::Request(request) = message else {
                continue;
            };

            if let Some(reply) = self.handle_request(request, &events) {
                writer.write(&self.seq.stamp(reply)).await?;
            }
        }
    }

    /// Returns the message to send back, if any.
    fn handle_request(
        &self,
        request: Request,
        events: &mpsc::UnboundedSender<SessionEvent>,
    ) -> Option<ProtocolMessage> {
        match request.command.as_str() {
            "initialize" => {
                Some(Response::success_for(&request).with_body(self.capabilities.clone()).into())
            }
            "launch" => self.start_backend(BackendKind::Launch, &request, events),
            "attach" => self.start_backend(BackendKind::Attach, &request, events),
            "disconnect" => Some(Response::success_for(&request).into()),
            other => {
                debug!(
                    target: "debug_relay::session",
                    "Rejecting '{}' before the backend is connected",
                    other
                );
                Some(
                    Response::error_for(&request, "debug backend is not connected yet").into(),
                )
            }
        }
    }

    fn start_backend(
        &self,
        kind: BackendKind,
        request: &Request,
        events: &mpsc::UnboundedSender<SessionEvent>,
    ) -> Option<ProtocolMessage> {
        if self.started.load(Ordering::Acquire) {
            warn!(
                target: "debug_relay::session",
                "Rejecting {} #{}, a backend was already started",
                kind.command(),
                request.seq
            );
            return Some(Response::error_for(request, "debug backend already started").into());
        }
        match self.launcher.start(kind, request) {
            Ok(handle) => {
                self.started.store(true, Ordering::Release);
                let (connection, process) = handle.split();
                *self.process.lock().unwrap_or_else(|e| e.into_inner()) = process;

                info!(
                    target: "debug_relay::session",
                    "Backend started for {} (pid {:?})",
                    kind.command(),
                    connection.process_id
                );

                let event = match kind {
                    BackendKind::Launch => SessionEvent::Launched(connection),
                    BackendKind::Attach => SessionEvent::Attached(connection),
                };
                if events.send(event).is_err() {
                    warn!(
                        target: "debug_relay::session",
                        "Relay is gone, dropping backend connection"
                    );
                }
                None
            }
            Err(e) => {
                error!(
                    target: "debug_relay::session",
                    "Failed to {} backend: {}",
                    kind.command(),
                    e
                );
                Some(Response::error_for(request, e.to_string()).into())
            }
        }
    }
}
