//! A relay controller wired to a scripted client and an in-memory backend.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use debug_relay::backend::BackendKind;
use debug_relay::config::ShutdownDelays;
use debug_relay::protocol::{Event, MessageReader, ProtocolMessage, Request, Response, encode};
use debug_relay::relay::{
    InputRoute, OutputRoute, RelayController, RelayHandle, RelaySnapshot, SessionOutcome,
};
use debug_relay::session::{DebugSession, SessionHandler};
use debug_relay::transport::ClientStreams;
use serde_json::json;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;

use super::effects::{
    EffectLog, RecordingDisposable, RecordingHandler, RecordingTerminator, RecordingWriter,
};
use super::fake_backend::{BackendBehavior, BackendPeer, FakeLauncher};

const TIMEOUT: Duration = Duration::from_secs(5);

/// Short delays keep the tests fast while preserving ordering.
pub fn fast_delays() -> ShutdownDelays {
    ShutdownDelays {
        disconnect_request: Duration::from_millis(20),
        terminated_event: Duration::from_millis(20),
        disconnect_response: Duration::from_millis(20),
        kill_grace: Duration::from_millis(5),
        dispose_grace: Duration::from_millis(5),
    }
}

/// The IDE's end of the relay.
pub struct ClientPeer {
    writer: Option<DuplexStream>,
    reader: MessageReader<DuplexStream>,
    seq: i64,
}

impl ClientPeer {
    /// Send a request with the next sequence number; returns it.
    pub async fn request(&mut self, command: &str, arguments: serde_json::Value) -> Request {
        self.seq += 1;
        let request = Request::new(self.seq, command).with_arguments(arguments);
        let frame = encode(&request.clone().into()).expect("request should encode");
        self.send_raw(&frame).await;
        request
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        let writer = self.writer.as_mut().expect("client input already closed");
        writer
            .write_all(bytes)
            .await
            .expect("client write should succeed");
    }

    /// Close the client's input, as an IDE going away would.
    pub fn close_input(&mut self) {
        self.writer = None;
    }

    pub async fn next_message(&mut self) -> ProtocolMessage {
        tokio::time::timeout(TIMEOUT, self.reader.read_message())
            .await
            .expect("timed out waiting for a message on the client output")
            .expect("client output should carry valid frames")
            .expect("client output closed unexpectedly")
    }

    pub async fn next_response(&mut self) -> Response {
        loop {
            match self.next_message().await {
                ProtocolMessage::Response(response) => return response,
                ProtocolMessage::Event(_) => continue,
                other => panic!("unexpected message on client output: {:?}", other),
            }
        }
    }

    pub async fn next_event(&mut self) -> Event {
        loop {
            if let ProtocolMessage::Event(event) = self.next_message().await {
                return event;
            }
        }
    }
}

pub struct Harness {
    pub client: ClientPeer,
    pub handle: RelayHandle,
    pub effects: EffectLog,
    backends: mpsc::UnboundedReceiver<(BackendKind, DuplexStream)>,
}

impl Harness {
    pub fn start(behavior: BackendBehavior) -> Self {
        Self::start_with(behavior, fast_delays())
    }

    pub fn start_with(behavior: BackendBehavior, delays: ShutdownDelays) -> Self {
        let (launcher, backends) = FakeLauncher::new(behavior);
        Self::start_with_handler(DebugSession::new(Arc::new(launcher)), backends, delays)
    }

    /// Start a relay serving the client with `handler`.
    ///
    /// `backends` is where the handler's launcher reports started backends.
    pub fn start_with_handler(
        handler: impl SessionHandler + 'static,
        backends: mpsc::UnboundedReceiver<(BackendKind, DuplexStream)>,
        delays: ShutdownDelays,
    ) -> Self {
        let effects = EffectLog::default();

        let (client_input, relay_input) = tokio::io::duplex(64 * 1024);
        let (relay_output, client_output) = tokio::io::duplex(64 * 1024);
        let streams = ClientStreams::new(
            Box::new(relay_input),
            Box::new(RecordingWriter::new(relay_output, effects.clone())),
            false,
        );

        let handler = RecordingHandler::new(handler, effects.clone());

        let mut controller = RelayController::new(
            streams,
            Arc::new(handler),
            Arc::new(RecordingTerminator(effects.clone())),
            delays,
        );
        controller.register(Box::new(RecordingDisposable(effects.clone())));
        let handle = controller.start();

        Self {
            client: ClientPeer {
                writer: Some(client_input),
                reader: MessageReader::new(client_output),
                seq: 0,
            },
            handle,
            effects,
            backends,
        }
    }

    /// Wait for the backend the session handler started.
    pub async fn backend(&mut self) -> BackendPeer {
        let (kind, stream) = tokio::time::timeout(TIMEOUT, self.backends.recv())
            .await
            .expect("timed out waiting for the backend to start")
            .expect("launcher dropped");
        BackendPeer::new(kind, stream)
    }

    /// Assert no further backend was started.
    pub async fn assert_no_more_backends(&mut self) {
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(
            self.backends.try_recv().is_err(),
            "only one backend should be started"
        );
    }

    /// Run `initialize` and `launch`/`attach` up to the splice.
    ///
    /// Checks that the backend received the replayed start request followed
    /// by the initialize request.
    pub async fn handshake(&mut self, command: &str) -> (BackendPeer, Request, Request) {
        let initialize = self
            .client
            .request("initialize", json!({"adapterID": "fake", "linesStartAt1": true}))
            .await;
        let response = self.client.next_response().await;
        assert_eq!(response.command, "initialize");
        assert!(response.success, "session handler should answer initialize");

        let start = self
            .client
            .request(command, json!({"program": "app.py", "port": 1}))
            .await;

        let mut backend = self.backend().await;
        let replayed_start = backend.next_request().await;
        let replayed_initialize = backend.next_request().await;
        assert_eq!(replayed_start, start, "start request should be replayed verbatim");
        assert_eq!(
            replayed_initialize, initialize,
            "initialize should be replayed after the start request"
        );

        self.wait_for(|s| {
            s.input_route == InputRoute::Backend && s.output_route == OutputRoute::Backend
        })
        .await;

        (backend, initialize, start)
    }

    pub async fn wait_for(&self, predicate: impl FnMut(&RelaySnapshot) -> bool) -> RelaySnapshot {
        tokio::time::timeout(TIMEOUT, self.handle.wait_for(predicate))
            .await
            .expect("timed out waiting for relay state")
    }

    pub async fn outcome(&self) -> SessionOutcome {
        tokio::time::timeout(TIMEOUT, self.handle.outcome())
            .await
            .expect("timed out waiting for the session to end")
    }

    /// Report a backend process id through a `process` event.
    pub async fn announce_process(&self, backend: &mut BackendPeer, pid: u32) {
        let mut event = Event::new("process");
        event.seq = 1;
        event.body = Some(json!({"name": "app.py", "systemProcessId": pid}));
        backend.send(event).await;
        self.wait_for(|s| s.session.backend_process_id == Some(pid))
            .await;
    }
}
