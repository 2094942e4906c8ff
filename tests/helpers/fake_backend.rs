//! In-memory debug backend.

#![allow(dead_code)]

use std::io;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};
use std::time::Duration;

use debug_relay::BoxFuture;
use debug_relay::backend::{
    BackendHandle, BackendKind, BackendLauncher, BackendProcess, BackendSocket,
};
use debug_relay::error::{RelayError, RelayResult};
use debug_relay::protocol::{MessageReader, MessageWriter, ProtocolMessage, Request};
use debug_relay::session::{SessionEvent, SessionHandler, SessionIo};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf, ReadHalf, WriteHalf};
use tokio::sync::mpsc;

const TIMEOUT: Duration = Duration::from_secs(5);

/// How the fake launcher behaves.
#[derive(Clone, Copy, Debug, Default)]
pub struct BackendBehavior {
    /// Process id reported by the handle.
    pub process_id: Option<u32>,
    /// Turn end of stream on the backend socket into a read error.
    pub reset_on_close: bool,
    /// Socket future fails instead of connecting.
    pub unreachable: bool,
}

/// Launcher handing out in-memory sockets; the test gets the far end.
pub struct FakeLauncher {
    behavior: BackendBehavior,
    peers: mpsc::UnboundedSender<(BackendKind, DuplexStream)>,
}

impl FakeLauncher {
    pub fn new(
        behavior: BackendBehavior,
    ) -> (Self, mpsc::UnboundedReceiver<(BackendKind, DuplexStream)>) {
        let (peers, rx) = mpsc::unbounded_channel();
        (Self { behavior, peers }, rx)
    }

    /// Launcher reporting its sockets to an existing channel, so several
    /// launchers can feed one test.
    pub fn with_peers(
        behavior: BackendBehavior,
        peers: mpsc::UnboundedSender<(BackendKind, DuplexStream)>,
    ) -> Self {
        Self { behavior, peers }
    }
}

impl BackendLauncher for FakeLauncher {
    fn start(&self, kind: BackendKind, _request: &Request) -> RelayResult<BackendHandle> {
        if self.behavior.unreachable {
            let refused = async { Err::<BackendSocket, _>(RelayError::launch("connection refused")) };
            return Ok(BackendHandle::new(
                Box::pin(refused),
                self.behavior.process_id,
                BackendProcess::none(),
            ));
        }

        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let _ = self.peers.send((kind, theirs));
        let socket: BackendSocket = if self.behavior.reset_on_close {
            Box::new(ResetOnEof(ours))
        } else {
            Box::new(ours)
        };
        Ok(BackendHandle::new(
            Box::pin(async move { Ok(socket) }),
            self.behavior.process_id,
            BackendProcess::none(),
        ))
    }
}

/// Socket whose end of stream surfaces as `ConnectionReset`.
struct ResetOnEof(DuplexStream);

impl AsyncRead for ResetOnEof {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        match Pin::new(&mut self.0).poll_read(cx, buf) {
            Poll::Ready(Ok(())) if buf.filled().len() == before && buf.remaining() > 0 => {
                Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "backend reset the connection",
                )))
            }
            other => other,
        }
    }
}

impl AsyncWrite for ResetOnEof {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.0).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_shutdown(cx)
    }
}

/// The backend's end of a spliced connection.
pub struct BackendPeer {
    pub kind: BackendKind,
    reader: MessageReader<ReadHalf<DuplexStream>>,
    writer: MessageWriter<WriteHalf<DuplexStream>>,
}

impl BackendPeer {
    pub fn new(kind: BackendKind, stream: DuplexStream) -> Self {
        let (read, write) = tokio::io::split(stream);
        Self {
            kind,
            reader: MessageReader::new(read),
            writer: MessageWriter::new(write),
        }
    }

    /// Next message the relay wrote to the backend.
    pub async fn next_message(&mut self) -> ProtocolMessage {
        tokio::time::timeout(TIMEOUT, self.reader.read_message())
            .await
            .expect("timed out waiting for a message on the backend socket")
            .expect("backend socket should carry valid frames")
            .expect("backend socket closed unexpectedly")
    }

    pub async fn next_request(&mut self) -> Request {
        match self.next_message().await {
            ProtocolMessage::Request(request) => request,
            other => panic!("expected a request on the backend socket, got {:?}", other),
        }
    }

    pub async fn send(&mut self, message: impl Into<ProtocolMessage>) {
        self.writer
            .write(&message.into())
            .await
            .expect("backend write should succeed");
    }
}

/// Session handler that reports two launched backends as soon as it runs.
pub struct DoubleLaunchHandler {
    sockets: Mutex<Vec<DuplexStream>>,
}

impl DoubleLaunchHandler {
    /// Returns the handler and the far ends of both backend sockets.
    pub fn new() -> (Self, [DuplexStream; 2]) {
        let (first, first_peer) = tokio::io::duplex(64 * 1024);
        let (second, second_peer) = tokio::io::duplex(64 * 1024);
        let handler = Self {
            sockets: Mutex::new(vec![first, second]),
        };
        (handler, [first_peer, second_peer])
    }
}

impl SessionHandler for DoubleLaunchHandler {
    fn serve(
        &self,
        io: SessionIo,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> BoxFuture<'static, RelayResult<()>> {
        let sockets: Vec<DuplexStream> = self.sockets.lock().unwrap().drain(..).collect();
        Box::pin(async move {
            let SessionIo { mut input, output } = io;
            for socket in sockets {
                let (connection, _process) = BackendHandle::connected(Box::new(socket)).split();
                let _ = events.send(SessionEvent::Launched(connection));
            }
            tokio::io::copy(&mut input, &mut tokio::io::sink()).await?;
            drop(output);
            Ok(())
        })
    }

    fn shutdown(&self) {}
}
