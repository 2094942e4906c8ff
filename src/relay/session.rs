//! Per-epoch session state owned by the controller actor.

use crate::protocol::Request;

/// How the backend was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionMode {
    #[default]
    Unset,
    Launch,
    Attach,
}

/// Lifecycle of one controller epoch.
///
/// ```text
/// Idle -> Intercepting -> Relaying -> ShuttingDown -> Disposed
///              \___________________________^
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecyclePhase {
    #[default]
    Idle,
    Intercepting,
    Relaying,
    ShuttingDown,
    Disposed,
}

impl LifecyclePhase {
    pub fn can_transition_to(self, next: LifecyclePhase) -> bool {
        use LifecyclePhase::*;
        matches!(
            (self, next),
            (Idle, Intercepting)
                | (Intercepting, Relaying)
                | (Intercepting, ShuttingDown)
                | (Relaying, ShuttingDown)
                | (ShuttingDown, Disposed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LifecyclePhase::Idle => "idle",
            LifecyclePhase::Intercepting => "intercepting",
            LifecyclePhase::Relaying => "relaying",
            LifecyclePhase::ShuttingDown => "shutting-down",
            LifecyclePhase::Disposed => "disposed",
        }
    }
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable state of one debug session.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub mode: SessionMode,
    pub is_server_mode: bool,
    phase: LifecyclePhase,
    pub terminated_event_sent: bool,
    pub disconnect_response_sent: bool,
    pub restart_requested: bool,
    pub backend_process_id: Option<u32>,
    pub pending_disconnect_request: Option<Request>,
}

impl Session {
    pub fn new(is_server_mode: bool) -> Self {
        Self {
            is_server_mode,
            ..Self::default()
        }
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.phase
    }

    /// Move to `next` if the transition is allowed.
    ///
    /// Returns `false` and leaves the phase untouched otherwise, including
    /// when the session is already in `next`.
    pub fn transition(&mut self, next: LifecyclePhase) -> bool {
        if !self.phase.can_transition_to(next) {
            return false;
        }
        self.phase = next;
        true
    }

    pub fn has_shutdown(&self) -> bool {
        matches!(
            self.phase,
            LifecyclePhase::ShuttingDown | LifecyclePhase::Disposed
        )
    }

    /// Clear every per-session flag when the client (re)initializes.
    ///
    /// The phase is left alone: once shutdown began it stays begun.
    pub fn reset_for_initialize(&mut self) {
        self.terminated_event_sent = false;
        self.disconnect_response_sent = false;
        self.restart_requested = false;
        self.pending_disconnect_request = None;
    }
}
