//! Recording fakes for the relay's side effects.
//!
//! Every fake appends to one shared [`EffectLog`], so tests can assert the
//! relative order of effects produced by different components.

// Shared across test binaries; not every binary uses every helper.
#![allow(dead_code)]

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use debug_relay::BoxFuture;
use debug_relay::disposable::Disposable;
use debug_relay::error::RelayResult;
use debug_relay::process::ProcessTerminator;
use debug_relay::protocol::ProtocolMessage;
use debug_relay::session::{SessionEvent, SessionHandler, SessionIo};
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;

/// Ordered log of observable effects.
#[derive(Clone, Default)]
pub struct EffectLog(Arc<Mutex<Vec<String>>>);

impl EffectLog {
    pub fn record(&self, effect: impl Into<String>) {
        self.0.lock().unwrap().push(effect.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, effect: &str) -> usize {
        self.entries().iter().filter(|e| *e == effect).count()
    }

    /// Effects of the shutdown procedure, in order.
    ///
    /// Client frames other than `terminated` events and `disconnect`
    /// responses are left out.
    pub fn shutdown_effects(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|e| {
                !e.starts_with("client:")
                    || e == "client:event_terminated"
                    || e == "client:response_disconnect"
            })
            .collect()
    }
}

/// Client output that logs every complete frame written through it as
/// `client:<event name>`.
pub struct RecordingWriter<W> {
    inner: W,
    pending: Vec<u8>,
    effects: EffectLog,
}

impl<W> RecordingWriter<W> {
    pub fn new(inner: W, effects: EffectLog) -> Self {
        Self {
            inner,
            pending: Vec::new(),
            effects,
        }
    }

    fn drain_frames(&mut self) {
        loop {
            let Some(header_end) = self
                .pending
                .windows(4)
                .position(|w| w == b"\r\n\r\n")
            else {
                return;
            };
            let header = String::from_utf8_lossy(&self.pending[..header_end]).to_string();
            let Some(length) = header.lines().find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.trim()
                    .eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            }) else {
                return;
            };
            let body_start = header_end + 4;
            if self.pending.len() < body_start + length {
                return;
            }
            let body: Vec<u8> = self.pending.drain(..body_start + length).skip(body_start).collect();
            match serde_json::from_slice::<ProtocolMessage>(&body) {
                Ok(message) => self.effects.record(format!("client:{}", message.event_name())),
                Err(_) => self.effects.record("client:<malformed>"),
            }
        }
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for RecordingWriter<W> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(Ok(n)) => {
                this.pending.extend_from_slice(&buf[..n]);
                this.drain_frames();
                Poll::Ready(Ok(n))
            }
            other => other,
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Session handler whose shutdown is recorded as `session_shutdown`.
pub struct RecordingHandler {
    inner: Box<dyn SessionHandler>,
    effects: EffectLog,
}

impl RecordingHandler {
    pub fn new(inner: impl SessionHandler + 'static, effects: EffectLog) -> Self {
        Self {
            inner: Box::new(inner),
            effects,
        }
    }
}

impl SessionHandler for RecordingHandler {
    fn serve(
        &self,
        io: SessionIo,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> BoxFuture<'static, RelayResult<()>> {
        self.inner.serve(io, events)
    }

    fn shutdown(&self) {
        self.effects.record("session_shutdown");
        self.inner.shutdown();
    }
}

/// Records `kill:<pid>` instead of killing anything.
pub struct RecordingTerminator(pub EffectLog);

impl ProcessTerminator for RecordingTerminator {
    fn kill_tree(&self, pid: u32) -> BoxFuture<'_, io::Result<()>> {
        self.0.record(format!("kill:{}", pid));
        Box::pin(async { Ok(()) })
    }
}

/// Records `dispose` when the relay disposes its components.
pub struct RecordingDisposable(pub EffectLog);

impl Disposable for RecordingDisposable {
    fn dispose(&self) {
        self.0.record("dispose");
    }
}
