//! Client stream providers.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

use crate::relay::{BoxedReader, BoxedWriter};

/// The two directions of the IDE connection, as handed to one controller.
pub struct ClientStreams {
    pub input: BoxedReader,
    pub output: BoxedWriter,
    /// `true` when serving a TCP connection rather than stdio.
    pub is_server_mode: bool,
}

impl ClientStreams {
    pub fn new(input: BoxedReader, output: BoxedWriter, is_server_mode: bool) -> Self {
        Self {
            input,
            output,
            is_server_mode,
        }
    }
}

/// An IDE connection that outlives the controllers serving it.
///
/// Every call to [`ClientConnection::streams`] hands out handles on the same
/// underlying streams, so a restart can attach a fresh controller without
/// reopening stdio or the socket. A read left pending by the previous
/// controller keeps its place in the shared reader.
pub struct ClientConnection {
    reader: SharedReader,
    writer: SharedWriter,
    is_server_mode: bool,
}

impl ClientConnection {
    pub fn new(input: BoxedReader, output: BoxedWriter, is_server_mode: bool) -> Self {
        Self {
            reader: SharedReader(Arc::new(Mutex::new(input))),
            writer: SharedWriter(Arc::new(Mutex::new(output))),
            is_server_mode,
        }
    }

    /// The process's stdin/stdout.
    pub fn stdio() -> Self {
        Self::new(
            Box::new(tokio::io::stdin()),
            Box::new(tokio::io::stdout()),
            false,
        )
    }

    /// One accepted TCP connection.
    pub fn from_tcp(stream: TcpStream) -> Self {
        let (read, write) = stream.into_split();
        Self::new(Box::new(read), Box::new(write), true)
    }

    /// Streams for the next controller.
    pub fn streams(&self) -> ClientStreams {
        ClientStreams::new(
            Box::new(self.reader.clone()),
            Box::new(self.writer.clone()),
            self.is_server_mode,
        )
    }
}

fn poisoned() -> io::Error {
    io::Error::other("client stream lock poisoned")
}

#[derive(Clone)]
struct SharedReader(Arc<Mutex<BoxedReader>>);

impl AsyncRead for SharedReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.0.lock() {
            Ok(mut inner) => Pin::new(&mut *inner).poll_read(cx, buf),
            Err(_) => Poll::Ready(Err(poisoned())),
        }
    }
}

#[derive(Clone)]
struct SharedWriter(Arc<Mutex<BoxedWriter>>);

impl AsyncWrite for SharedWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.0.lock() {
            Ok(mut inner) => Pin::new(&mut *inner).poll_write(cx, buf),
            Err(_) => Poll::Ready(Err(poisoned())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.0.lock() {
            Ok(mut inner) => Pin::new(&mut *inner).poll_flush(cx),
            Err(_) => Poll::Ready(Err(poisoned())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.0.lock() {
            Ok(mut inner) => Pin::new(&mut *inner).poll_shutdown(cx),
            Err(_) => Poll::Ready(Err(poisoned())),
        }
    }
}
