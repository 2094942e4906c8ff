//! Backend session launcher.
//!
//! A [`BackendLauncher`] turns a client `launch`/`attach` request into a
//! [`BackendHandle`]: a future resolving to the backend's debug socket, the
//! OS process id of a locally spawned backend, and a way to stop it.

mod process_launcher;

use std::future::Future;
use std::pin::Pin;

use log::debug;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Child;

use crate::error::RelayResult;
use crate::protocol::Request;

pub use process_launcher::ProcessLauncher;

/// Byte stream to a debug backend.
pub trait DuplexStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> DuplexStream for T {}

pub type BackendSocket = Box<dyn DuplexStream>;

/// Future resolving to the connected backend socket.
pub type SocketFuture = Pin<Box<dyn Future<Output = RelayResult<BackendSocket>> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Launch,
    Attach,
}

impl BackendKind {
    pub fn command(self) -> &'static str {
        match self {
            BackendKind::Launch => "launch",
            BackendKind::Attach => "attach",
        }
    }
}

/// Starts backends on behalf of the session handler.
pub trait BackendLauncher: Send + Sync {
    /// Start (launch) or locate (attach) the backend for `request`.
    ///
    /// Returns as soon as the backend is started; connecting happens when the
    /// handle's socket future is polled.
    fn start(&self, kind: BackendKind, request: &Request) -> RelayResult<BackendHandle>;
}

/// A started backend.
pub struct BackendHandle {
    socket: SocketFuture,
    process_id: Option<u32>,
    process: BackendProcess,
}

impl BackendHandle {
    pub fn new(socket: SocketFuture, process_id: Option<u32>, process: BackendProcess) -> Self {
        Self {
            socket,
            process_id,
            process,
        }
    }

    /// Handle for an already connected socket with no local process.
    pub fn connected(socket: BackendSocket) -> Self {
        Self::new(
            Box::pin(async move { Ok(socket) }),
            None,
            BackendProcess::none(),
        )
    }

    pub fn process_id(&self) -> Option<u32> {
        self.process_id
    }

    /// Separate the part handed to the relay from the part that owns the
    /// process.
    pub fn split(self) -> (BackendConnection, BackendProcess) {
        (
            BackendConnection {
                socket: self.socket,
                process_id: self.process_id,
            },
            self.process,
        )
    }
}

/// What the relay needs to splice onto a backend.
pub struct BackendConnection {
    pub socket: SocketFuture,
    pub process_id: Option<u32>,
}

impl std::fmt::Debug for BackendConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConnection")
            .field("process_id", &self.process_id)
            .finish_non_exhaustive()
    }
}

/// Locally spawned backend process, if any.
#[derive(Debug, Default)]
pub struct BackendProcess {
    child: Option<Child>,
}

impl BackendProcess {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn from_child(child: Child) -> Self {
        Self { child: Some(child) }
    }

    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    /// Kill the spawned process. Safe to call more than once.
    pub fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.start_kill() {
                debug!(
                    target: "debug_relay::backend",
                    "Backend process already gone: {}",
                    e
                );
            }
        }
    }
}
