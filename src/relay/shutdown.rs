//! Shutdown procedure.
//!
//! Runs at most once per controller, guarded by the lifecycle phase. Send
//! and kill failures are logged and never abort the remaining steps.

use std::fmt;
use std::time::Duration;

use log::{debug, error, info};

use super::controller::{ControlEvent, ControllerActor};
use super::{LifecyclePhase, SessionMode};
use crate::protocol::{Event, Response};

const TARGET: &str = "debug_relay::relay";

/// What caused a shutdown attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownTrigger {
    /// Client sent `disconnect`.
    DisconnectRequest,
    /// Backend sent a `terminated` event.
    TerminatedEvent,
    /// Backend answered `disconnect`.
    DisconnectResponse,
    /// Backend socket reached end of stream.
    BackendEnded,
    /// Backend socket failed.
    BackendError,
    /// Backend could not be reached at all.
    BackendUnavailable,
    /// Client input reached end of stream.
    ClientClosed,
    /// Process termination was requested.
    Signal,
    /// A DAP stream could not be decoded.
    ProtocolError,
}

impl fmt::Display for ShutdownTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ShutdownTrigger::DisconnectRequest => "disconnect request",
            ShutdownTrigger::TerminatedEvent => "terminated event",
            ShutdownTrigger::DisconnectResponse => "disconnect response",
            ShutdownTrigger::BackendEnded => "backend closed",
            ShutdownTrigger::BackendError => "backend error",
            ShutdownTrigger::BackendUnavailable => "backend unavailable",
            ShutdownTrigger::ClientClosed => "client closed",
            ShutdownTrigger::Signal => "termination signal",
            ShutdownTrigger::ProtocolError => "protocol error",
        };
        f.write_str(text)
    }
}

/// How a controller epoch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Session finished; everything is disposed.
    Terminated,
    /// Client asked for a restart; the owner must deactivate and rebuild.
    Restart,
    /// A DAP stream was corrupted.
    ProtocolError,
}

impl ControllerActor {
    /// Send `Shutdown(trigger)` to the actor after `delay`.
    pub(super) fn schedule_shutdown(&mut self, trigger: ShutdownTrigger, delay: Duration) {
        debug!(
            target: TARGET,
            "Scheduling shutdown in {:?} ({})",
            delay,
            trigger
        );
        let events = self.events.clone();
        self.track(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(ControlEvent::Shutdown(trigger));
        }));
    }

    pub(super) async fn shutdown(&mut self, trigger: ShutdownTrigger) {
        if trigger == ShutdownTrigger::Signal && self.session.restart_requested {
            debug!(target: TARGET, "Restart in progress, ignoring {}", trigger);
            return;
        }
        if self.session.has_shutdown() {
            debug!(
                target: TARGET,
                "Shutdown already performed, ignoring {}",
                trigger
            );
            return;
        }
        if !self.enter(LifecyclePhase::ShuttingDown) {
            return;
        }
        info!(target: TARGET, "Shutting down debug session ({})", trigger);

        if !self.session.terminated_event_sent && !self.session.restart_requested {
            info!(target: TARGET, "Sending Terminated Event");
            match self.send_to_client(Event::terminated().into()).await {
                Ok(()) => self.session.terminated_event_sent = true,
                Err(e) => error!(
                    target: TARGET,
                    "Failed to send terminated event: {} ({:?})",
                    e,
                    e
                ),
            }
        }

        if !self.session.disconnect_response_sent && self.session.restart_requested {
            if let Some(request) = self.session.pending_disconnect_request.clone() {
                info!(target: TARGET, "Sending Disconnect Response");
                match self
                    .send_to_client(Response::success_for(&request).into())
                    .await
                {
                    Ok(()) => self.session.disconnect_response_sent = true,
                    Err(e) => error!(
                        target: TARGET,
                        "Failed to send disconnect response: {} ({:?})",
                        e,
                        e
                    ),
                }
            }
        }

        if self.session.mode == SessionMode::Launch {
            if let Some(pid) = self.session.backend_process_id {
                tokio::time::sleep(self.delays.kill_grace).await;
                info!(target: TARGET, "Killing backend process tree {}", pid);
                if let Err(e) = self.terminator.kill_tree(pid).await {
                    debug!(target: TARGET, "Kill of process {} failed: {}", pid, e);
                }
            }
        }

        let outcome = if self.session.restart_requested {
            // The owner deactivates this controller before building the next
            SessionOutcome::Restart
        } else {
            self.handler.shutdown();
            tokio::time::sleep(self.delays.dispose_grace).await;
            self.dispose();
            self.enter(LifecyclePhase::Disposed);
            if trigger == ShutdownTrigger::ProtocolError {
                SessionOutcome::ProtocolError
            } else {
                SessionOutcome::Terminated
            }
        };

        info!(target: TARGET, "Debug session ended: {:?}", outcome);
        self.outcome.resolve(outcome);
    }
}
