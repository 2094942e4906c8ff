//! Byte routers for both relay directions.
//!
//! Each direction has exactly one route slot, so a source can never feed two
//! destinations (input) and a destination can never take two sources
//! (output). Every forwarded chunk is also copied to the direction's shadow
//! writer, which feeds a dispatcher for observation only.

use std::io;

use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

const CHUNK_SIZE: usize = 16 * 1024;

/// Destination of client input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputRoute {
    SessionHandler,
    Backend,
}

/// Source of client output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputRoute {
    SessionHandler,
    Backend,
}

struct InputState {
    route: InputRoute,
    sink: BoxedWriter,
    shadow: BoxedWriter,
}

/// Routes client input to the session handler or the backend.
pub struct InputRouter {
    state: Mutex<InputState>,
}

impl InputRouter {
    pub fn new(sink: BoxedWriter, shadow: BoxedWriter) -> Self {
        Self {
            state: Mutex::new(InputState {
                route: InputRoute::SessionHandler,
                sink,
                shadow,
            }),
        }
    }

    pub async fn route(&self) -> InputRoute {
        self.state.lock().await.route
    }

    /// Forward one chunk of client input to the current destination.
    pub async fn forward(&self, chunk: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock().await;
        let _ = write_chunk(&mut state.shadow, chunk).await;
        write_chunk(&mut state.sink, chunk).await
    }

    /// Replace the destination with `sink`.
    ///
    /// `preamble` frames are written to the new sink before it becomes
    /// visible, so no forwarded chunk can overtake them. On failure the old
    /// route stays in place. Returns the previous sink.
    pub async fn splice(
        &self,
        route: InputRoute,
        mut sink: BoxedWriter,
        preamble: &[Vec<u8>],
    ) -> io::Result<BoxedWriter> {
        let mut state = self.state.lock().await;
        for frame in preamble {
            write_chunk(&mut sink, frame).await?;
        }
        state.route = route;
        Ok(std::mem::replace(&mut state.sink, sink))
    }
}

struct OutputState {
    active: OutputRoute,
    client: BoxedWriter,
    shadow: BoxedWriter,
}

/// Routes one active source to client output.
///
/// Chunks from the inactive source are read and discarded so its producer
/// never stalls.
pub struct OutputRouter {
    state: Mutex<OutputState>,
}

impl OutputRouter {
    pub fn new(client: BoxedWriter, shadow: BoxedWriter) -> Self {
        Self {
            state: Mutex::new(OutputState {
                active: OutputRoute::SessionHandler,
                client,
                shadow,
            }),
        }
    }

    pub async fn active(&self) -> OutputRoute {
        self.state.lock().await.active
    }

    pub async fn activate(&self, source: OutputRoute) {
        self.state.lock().await.active = source;
    }

    /// Forward a chunk produced by `source`.
    ///
    /// Returns `Ok(false)` when `source` is not the active one and the chunk
    /// was dropped.
    pub async fn forward(&self, source: OutputRoute, chunk: &[u8]) -> io::Result<bool> {
        let mut state = self.state.lock().await;
        if state.active != source {
            return Ok(false);
        }
        let _ = write_chunk(&mut state.shadow, chunk).await;
        write_chunk(&mut state.client, chunk).await?;
        Ok(true)
    }

    /// Write a relay-generated frame to the client.
    pub async fn inject(&self, frame: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock().await;
        write_chunk(&mut state.client, frame).await
    }
}

async fn write_chunk(writer: &mut BoxedWriter, chunk: &[u8]) -> io::Result<()> {
    writer.write_all(chunk).await?;
    writer.flush().await
}

/// Copy client input into `router` until end of stream or `stop`.
///
/// `stop` is checked before every read, so input not yet read stays in
/// `reader` for whoever reads it next.
pub(crate) async fn pump_input<R>(
    mut reader: R,
    router: &InputRouter,
    stop: &CancellationToken,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = tokio::select! {
            biased;
            _ = stop.cancelled() => {
                debug!(target: "debug_relay::relay", "Client input released");
                return Ok(());
            }
            read = reader.read(&mut buf) => read?,
        };
        if n == 0 {
            debug!(target: "debug_relay::relay", "Client input reached end of stream");
            return Ok(());
        }
        if let Err(e) = router.forward(&buf[..n]).await {
            warn!(
                target: "debug_relay::relay",
                "Failed to forward client input: {}",
                e
            );
        }
    }
}

/// Copy `reader` into `router` as `source` until end of stream.
///
/// Only read errors end the pump; client write failures are logged.
pub(crate) async fn pump_output<R>(
    mut reader: R,
    source: OutputRoute,
    router: &OutputRouter,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        if let Err(e) = router.forward(source, &buf[..n]).await {
            warn!(
                target: "debug_relay::relay",
                "Failed to write {:?} output to client: {}",
                source,
                e
            );
        }
    }
}
