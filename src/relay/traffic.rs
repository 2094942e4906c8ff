//! Debug logging of every relayed message.

use log::{debug, log_enabled};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::disposable::Disposable;
use crate::protocol::{MessageDispatcher, ProtocolMessage};

const TARGET: &str = "debug_relay::traffic";

/// Logs a one-line summary of each message seen by the two dispatchers.
pub(crate) struct TrafficLogger {
    cancel: CancellationToken,
    inbound: Option<UnboundedReceiver<ProtocolMessage>>,
    outbound: Option<UnboundedReceiver<ProtocolMessage>>,
}

impl TrafficLogger {
    /// Subscribe now so nothing published before [`spawn`](Self::spawn) is
    /// missed.
    pub(crate) fn new(inbound: &MessageDispatcher, outbound: &MessageDispatcher) -> Self {
        Self {
            cancel: CancellationToken::new(),
            inbound: Some(inbound.subscribe()),
            outbound: Some(outbound.subscribe()),
        }
    }

    pub(crate) fn spawn(&mut self) -> Option<JoinHandle<()>> {
        let mut inbound = self.inbound.take()?;
        let mut outbound = self.outbound.take()?;
        let cancel = self.cancel.clone();

        Some(tokio::spawn(async move {
            let mut inbound_open = true;
            let mut outbound_open = true;
            while inbound_open || outbound_open {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    message = inbound.recv(), if inbound_open => match message {
                        Some(message) => log_message("client -> relay", &message),
                        None => inbound_open = false,
                    },
                    message = outbound.recv(), if outbound_open => match message {
                        Some(message) => log_message("relay -> client", &message),
                        None => outbound_open = false,
                    },
                }
            }
        }))
    }
}

impl Disposable for TrafficLogger {
    fn dispose(&self) {
        self.cancel.cancel();
    }
}

fn log_message(direction: &str, message: &ProtocolMessage) {
    if log_enabled!(target: TARGET, log::Level::Debug) {
        debug!(target: TARGET, "{} {}", direction, summarize(message));
    }
}

/// Short human readable description of `message`.
pub(crate) fn summarize(message: &ProtocolMessage) -> String {
    match message {
        ProtocolMessage::Request(r) => format!("request #{} {}", r.seq, r.command),
        ProtocolMessage::Response(r) => format!(
            "response #{} {} to #{} ({})",
            r.seq,
            r.command,
            r.request_seq,
            if r.success { "success" } else { "failure" }
        ),
        ProtocolMessage::Event(e) => format!("event #{} {}", e.seq, e.event),
    }
}
