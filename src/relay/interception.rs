//! Fire-once interception of the messages that drive the session lifecycle.
//!
//! Subscriptions are armed when the controller is built so that no message
//! can slip past before the forwarders run. Each forwarder waits for its one
//! message, resolves the matching [`Deferred`] itself (so waiters never depend
//! on the actor being free), then tells the actor.

use log::debug;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::Deferred;
use super::controller::ControlEvent;
use crate::protocol::{MessageDispatcher, ProtocolMessage, Request};

/// A lifecycle-relevant message seen on the wire.
#[derive(Debug, Clone)]
pub(crate) enum Intercepted {
    Initialize(Request),
    Launch(Request),
    Attach(Request),
    Disconnect(Request),
    Terminated,
    DisconnectResponse,
}

/// First-seen requests that the relay replays to the backend.
#[derive(Clone, Default)]
pub(crate) struct CapturedRequests {
    pub(crate) initialize: Deferred<Request>,
    pub(crate) launch: Deferred<Request>,
    pub(crate) attach: Deferred<Request>,
}

/// Subscriptions armed but not yet forwarded.
pub(crate) struct ArmedInterceptions {
    initialize: oneshot::Receiver<ProtocolMessage>,
    launch: oneshot::Receiver<ProtocolMessage>,
    attach: oneshot::Receiver<ProtocolMessage>,
    disconnect: oneshot::Receiver<ProtocolMessage>,
    terminated: oneshot::Receiver<ProtocolMessage>,
    disconnect_response: oneshot::Receiver<ProtocolMessage>,
}

impl ArmedInterceptions {
    pub(crate) fn arm(inbound: &MessageDispatcher, outbound: &MessageDispatcher) -> Self {
        Self {
            initialize: inbound.once("request_initialize"),
            launch: inbound.once("request_launch"),
            attach: inbound.once("request_attach"),
            disconnect: inbound.once("request_disconnect"),
            terminated: outbound.once("event_terminated"),
            disconnect_response: outbound.once("response_disconnect"),
        }
    }

    /// Spawn one forwarder per subscription.
    pub(crate) fn forward(
        self,
        captured: &CapturedRequests,
        events: &mpsc::UnboundedSender<ControlEvent>,
    ) -> Vec<JoinHandle<()>> {
        vec![
            forward_request(
                self.initialize,
                Some(captured.initialize.clone()),
                Intercepted::Initialize,
                events.clone(),
            ),
            forward_request(
                self.launch,
                Some(captured.launch.clone()),
                Intercepted::Launch,
                events.clone(),
            ),
            forward_request(
                self.attach,
                Some(captured.attach.clone()),
                Intercepted::Attach,
                events.clone(),
            ),
            forward_request(self.disconnect, None, Intercepted::Disconnect, events.clone()),
            forward_signal(self.terminated, Intercepted::Terminated, events.clone()),
            forward_signal(
                self.disconnect_response,
                Intercepted::DisconnectResponse,
                events.clone(),
            ),
        ]
    }
}

fn forward_request(
    rx: oneshot::Receiver<ProtocolMessage>,
    deferred: Option<Deferred<Request>>,
    wrap: fn(Request) -> Intercepted,
    events: mpsc::UnboundedSender<ControlEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        // Closed when the dispatcher is disposed first
        let Ok(message) = rx.await else { return };
        let Some(request) = message.into_request() else {
            return;
        };
        debug!(
            target: "debug_relay::relay",
            "Intercepted '{}' request #{}",
            request.command,
            request.seq
        );
        if let Some(deferred) = deferred {
            deferred.resolve(request.clone());
        }
        let _ = events.send(ControlEvent::Intercepted(wrap(request)));
    })
}

fn forward_signal(
    rx: oneshot::Receiver<ProtocolMessage>,
    intercepted: Intercepted,
    events: mpsc::UnboundedSender<ControlEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let Ok(message) = rx.await else { return };
        debug!(
            target: "debug_relay::relay",
            "Intercepted {}",
            message.event_name()
        );
        let _ = events.send(ControlEvent::Intercepted(intercepted));
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Event, Response};

    #[tokio::test]
    async fn forwarders_resolve_captures_and_notify_actor() {
        let inbound = MessageDispatcher::new("client");
        let outbound = MessageDispatcher::new("backend");
        let captured = CapturedRequests::default();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let _tasks = ArmedInterceptions::arm(&inbound, &outbound).forward(&captured, &tx);

        inbound.dispatch(Request::new(1, "initialize").into());
        inbound.dispatch(Request::new(2, "launch").into());
        outbound.dispatch(Event::terminated().into());
        outbound.dispatch(Response::success_for(&Request::new(3, "disconnect")).into());

        let mut seen = Vec::new();
        for _ in 0..4 {
            match rx.recv().await {
                Some(ControlEvent::Intercepted(i)) => seen.push(format!("{:?}", i)),
                _ => panic!("expected an intercepted message"),
            }
        }

        assert_eq!(captured.initialize.get().map(|r| r.seq), Some(1));
        assert_eq!(captured.launch.get().map(|r| r.seq), Some(2));
        assert!(!captured.attach.is_resolved());
        assert!(seen.iter().any(|s| s.starts_with("Terminated")));
        assert!(seen.iter().any(|s| s.starts_with("DisconnectResponse")));
    }

    #[tokio::test]
    async fn each_interception_fires_once() {
        let inbound = MessageDispatcher::new("client");
        let outbound = MessageDispatcher::new("backend");
        let captured = CapturedRequests::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _tasks = ArmedInterceptions::arm(&inbound, &outbound).forward(&captured, &tx);

        inbound.dispatch(Request::new(1, "initialize").into());
        inbound.dispatch(Request::new(9, "initialize").into());

        assert!(matches!(
            rx.recv().await,
            Some(ControlEvent::Intercepted(Intercepted::Initialize(r))) if r.seq == 1
        ));
        let second =
            tokio::time::timeout(std::time::Duration::from_millis(50), rx.recv()).await;
        assert!(second.is_err(), "second initialize must not be intercepted");
        assert_eq!(captured.initialize.get().map(|r| r.seq), Some(1));
    }
}
