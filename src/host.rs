//! Process-level orchestration of relay epochs.
//!
//! An epoch is the lifetime of one [`RelayController`]: activate it on a
//! pair of client streams, wait for its outcome, then deactivate it. A
//! restart ends the epoch and the next one starts on the same client
//! connection.

use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::net::TcpListener;

use crate::backend::ProcessLauncher;
use crate::config::RelayConfig;
use crate::error::RelayResult;
use crate::process::{ProcessTerminator, TreeKiller};
use crate::relay::{RelayController, SessionOutcome};
use crate::session::{DebugSession, SessionHandler};
use crate::transport::{ClientConnection, ClientStreams};

/// Builds a fresh session handler for each epoch.
pub type HandlerFactory = Arc<dyn Fn() -> Arc<dyn SessionHandler> + Send + Sync>;

#[derive(Clone)]
pub struct RelayHost {
    config: RelayConfig,
    handlers: HandlerFactory,
    terminator: Arc<dyn ProcessTerminator>,
}

impl RelayHost {
    /// Host using [`DebugSession`] with the configured [`ProcessLauncher`].
    pub fn new(config: RelayConfig) -> Self {
        let backend = config.backend.clone();
        let handlers: HandlerFactory = Arc::new(move || {
            let launcher = Arc::new(ProcessLauncher::new(backend.clone()));
            Arc::new(DebugSession::new(launcher)) as Arc<dyn SessionHandler>
        });
        Self {
            config,
            handlers,
            terminator: Arc::new(TreeKiller),
        }
    }

    pub fn with_handlers(mut self, handlers: HandlerFactory) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn with_terminator(mut self, terminator: Arc<dyn ProcessTerminator>) -> Self {
        self.terminator = terminator;
        self
    }

    /// Relay stdin/stdout until a session ends without a restart.
    ///
    /// SIGTERM or Ctrl-C shuts the session down.
    pub async fn run_stdio(&self) -> SessionOutcome {
        info!(target: "debug_relay::host", "Relaying over stdio");
        self.run_connection(ClientConnection::stdio(), true).await
    }

    /// Run epochs on `connection` until one ends without a restart.
    pub async fn run_connection(
        &self,
        connection: ClientConnection,
        watch_signals: bool,
    ) -> SessionOutcome {
        let mut epoch = 1u32;
        loop {
            debug!(target: "debug_relay::host", "Starting epoch {}", epoch);
            let outcome = self.run_epoch(connection.streams(), watch_signals).await;
            if outcome != SessionOutcome::Restart {
                return outcome;
            }
            epoch += 1;
            info!(
                target: "debug_relay::host",
                "Client requested a restart, starting a fresh session"
            );
        }
    }

    /// Accept connections on `listener`, one epoch per connection.
    ///
    /// Returns when a termination signal arrives.
    pub async fn serve(&self, listener: TcpListener) -> RelayResult<()> {
        info!(
            target: "debug_relay::host",
            "Listening for debug clients on {}",
            listener.local_addr()?
        );
        loop {
            let (stream, peer) = tokio::select! {
                accepted = listener.accept() => accepted?,
                _ = shutdown_signal() => {
                    info!(target: "debug_relay::host", "Termination requested, no longer accepting");
                    return Ok(());
                }
            };
            let host = self.clone();
            tokio::spawn(async move {
                let outcome = host.serve_connection(stream, peer).await;
                info!(
                    target: "debug_relay::host",
                    "Session from {} ended: {:?}",
                    peer,
                    outcome
                );
            });
        }
    }

    async fn serve_connection(
        &self,
        stream: tokio::net::TcpStream,
        peer: SocketAddr,
    ) -> SessionOutcome {
        info!(target: "debug_relay::host", "Debug client connected from {}", peer);
        if let Err(e) = stream.set_nodelay(true) {
            warn!(target: "debug_relay::host", "Failed to set TCP_NODELAY: {}", e);
        }
        self.run_connection(ClientConnection::from_tcp(stream), false)
            .await
    }

    /// Activate a controller on `client`, await its outcome, deactivate it.
    pub async fn run_epoch(&self, client: ClientStreams, watch_signals: bool) -> SessionOutcome {
        let controller = RelayController::new(
            client,
            (self.handlers)(),
            Arc::clone(&self.terminator),
            self.config.shutdown,
        );
        let handle = controller.start();

        let outcome = if watch_signals {
            tokio::select! {
                outcome = handle.outcome() => outcome,
                _ = shutdown_signal() => {
                    info!(target: "debug_relay::host", "Termination requested");
                    handle.request_shutdown();
                    handle.outcome().await
                }
            }
        } else {
            handle.outcome().await
        };

        if outcome == SessionOutcome::ProtocolError {
            error!(target: "debug_relay::host", "Session ended on a protocol error");
        }
        handle.deactivate().await;
        outcome
    }
}

/// Resolves on SIGTERM (unix) or Ctrl-C.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => {}
                    _ = tokio::signal::ctrl_c() => {}
                }
            }
            Err(e) => {
                warn!(target: "debug_relay::host", "Cannot watch SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
