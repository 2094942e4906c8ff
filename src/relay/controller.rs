//! Relay controller actor.
//!
//! One task owns the [`Session`], the routers and the disposables. Pumps,
//! dispatchers, interception forwarders, the backend connector and delay
//! timers run as separate tasks and only send [`ControlEvent`]s, so every
//! state change happens in event order on the actor.

use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::io::{DuplexStream, duplex};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::interception::{ArmedInterceptions, CapturedRequests, Intercepted};
use super::router::{
    BoxedReader, BoxedWriter, InputRoute, InputRouter, OutputRoute, OutputRouter, pump_input,
    pump_output,
};
use super::shutdown::{SessionOutcome, ShutdownTrigger};
use super::traffic::TrafficLogger;
use super::{Deferred, LifecyclePhase, Session, SessionMode};
use crate::backend::{BackendConnection, BackendKind, BackendSocket};
use crate::config::ShutdownDelays;
use crate::disposable::{DisposableRegistry, TaskDisposable};
use crate::error::{CodecError, RelayError};
use crate::process::ProcessTerminator;
use crate::protocol::{
    Event, MessageDispatcher, ProtocolMessage, Request, SequenceCounter, encode,
};
use crate::session::{SessionEvent, SessionHandler, SessionIo};
use crate::transport::ClientStreams;

const TARGET: &str = "debug_relay::relay";

/// Shadow buffers must absorb bursts while the dispatcher catches up.
const SHADOW_CAPACITY: usize = 256 * 1024;
const SESSION_CAPACITY: usize = 64 * 1024;

/// Messages consumed by the controller actor.
pub(crate) enum ControlEvent {
    Intercepted(Intercepted),
    SessionReady(SessionEvent),
    BackendConnected(ConnectedBackend),
    BackendUnavailable(RelayError),
    ProcessId(u32),
    Shutdown(ShutdownTrigger),
    Deactivate(oneshot::Sender<()>),
}

/// A backend socket ready to be spliced, with the requests to replay.
pub(crate) struct ConnectedBackend {
    kind: BackendKind,
    socket: BackendSocket,
    replay: Vec<Request>,
    process_id: Option<u32>,
}

/// Read-only view of the controller state.
#[derive(Debug, Clone)]
pub struct RelaySnapshot {
    pub session: Session,
    pub input_route: InputRoute,
    pub output_route: OutputRoute,
}

/// A controller in the `Idle` phase: everything is wired, nothing runs.
pub struct RelayController {
    actor: ControllerActor,
    events_rx: mpsc::UnboundedReceiver<ControlEvent>,
    snapshot_rx: watch::Receiver<RelaySnapshot>,
    client_input: BoxedReader,
    session_io: SessionIo,
    session_output: DuplexStream,
    shadow_in: DuplexStream,
    shadow_out: DuplexStream,
    armed: ArmedInterceptions,
    traffic: TrafficLogger,
}

impl RelayController {
    pub fn new(
        client: ClientStreams,
        handler: Arc<dyn SessionHandler>,
        terminator: Arc<dyn ProcessTerminator>,
        delays: ShutdownDelays,
    ) -> Self {
        let ClientStreams {
            input: client_input,
            output: client_output,
            is_server_mode,
        } = client;

        let (shadow_in_tx, shadow_in) = duplex(SHADOW_CAPACITY);
        let (shadow_out_tx, shadow_out) = duplex(SHADOW_CAPACITY);
        let (session_in_tx, session_in_rx) = duplex(SESSION_CAPACITY);
        let (session_out_tx, session_output) = duplex(SESSION_CAPACITY);

        let inbound = MessageDispatcher::new("client");
        let outbound = MessageDispatcher::new("backend");
        let armed = ArmedInterceptions::arm(&inbound, &outbound);
        let traffic = TrafficLogger::new(&inbound, &outbound);

        let input = Arc::new(InputRouter::new(
            Box::new(session_in_tx),
            Box::new(shadow_in_tx),
        ));
        let output = Arc::new(OutputRouter::new(client_output, Box::new(shadow_out_tx)));

        let mut registry = DisposableRegistry::new();
        registry.register(Box::new(inbound.clone()));
        registry.register(Box::new(outbound.clone()));

        let session = Session::new(is_server_mode);
        let (snapshot_tx, snapshot_rx) = watch::channel(RelaySnapshot {
            session: session.clone(),
            input_route: InputRoute::SessionHandler,
            output_route: OutputRoute::SessionHandler,
        });
        let (events, events_rx) = mpsc::unbounded_channel();

        let actor = ControllerActor {
            session,
            handler,
            terminator,
            delays,
            inbound,
            outbound,
            input,
            output,
            captured: CapturedRequests::default(),
            registry,
            events,
            seq: SequenceCounter::new(),
            outcome: Deferred::new(),
            snapshot: snapshot_tx,
            input_route: InputRoute::SessionHandler,
            output_route: OutputRoute::SessionHandler,
            parked: Vec::new(),
            client_input_stop: CancellationToken::new(),
        };

        Self {
            actor,
            events_rx,
            snapshot_rx,
            client_input,
            session_io: SessionIo {
                input: Box::new(session_in_rx),
                output: Box::new(session_out_tx),
            },
            session_output,
            shadow_in,
            shadow_out,
            armed,
            traffic,
        }
    }

    /// Register an extra component disposed together with the relay.
    pub fn register(&mut self, item: Box<dyn crate::disposable::Disposable>) {
        self.actor.registry.register(item);
    }

    /// Enter `Intercepting`: start the pumps and serve the session handler.
    pub fn start(self) -> RelayHandle {
        let RelayController {
            mut actor,
            events_rx,
            snapshot_rx,
            client_input,
            session_io,
            session_output,
            shadow_in,
            shadow_out,
            armed,
            mut traffic,
        } = self;

        actor.enter(LifecyclePhase::Intercepting);
        let events = actor.events.clone();

        let inbound_decoder = actor.inbound.connect(shadow_in);
        actor.track(watch_decoder("client", inbound_decoder, events.clone()));
        let outbound_decoder = actor.outbound.connect(shadow_out);
        actor.track(watch_decoder("backend", outbound_decoder, events.clone()));

        for forwarder in armed.forward(&actor.captured, &events) {
            actor.track(forwarder);
        }
        if let Some(task) = traffic.spawn() {
            actor.track(task);
        }
        actor.registry.register(Box::new(traffic));

        let input = Arc::clone(&actor.input);
        let stop = actor.client_input_stop.clone();
        let tx = events.clone();
        actor.track(tokio::spawn(async move {
            if let Err(e) = pump_input(client_input, &input, &stop).await {
                warn!(target: TARGET, "Client input failed: {}", e);
            }
            if !stop.is_cancelled() {
                let _ = tx.send(ControlEvent::Shutdown(ShutdownTrigger::ClientClosed));
            }
        }));

        let output = Arc::clone(&actor.output);
        actor.track(tokio::spawn(async move {
            if let Err(e) =
                pump_output(session_output, OutputRoute::SessionHandler, &output).await
            {
                debug!(target: TARGET, "Session handler output failed: {}", e);
            }
        }));

        let (session_tx, mut session_rx) = mpsc::unbounded_channel();
        let serve = actor.handler.serve(session_io, session_tx);
        actor.track(tokio::spawn(async move {
            match serve.await {
                Ok(()) => debug!(target: TARGET, "Session handler finished"),
                Err(e) => warn!(target: TARGET, "Session handler stopped: {}", e),
            }
        }));
        let tx = events.clone();
        actor.track(tokio::spawn(async move {
            while let Some(event) = session_rx.recv().await {
                if tx.send(ControlEvent::SessionReady(event)).is_err() {
                    break;
                }
            }
        }));

        let handle = RelayHandle {
            events,
            snapshot: snapshot_rx,
            outcome: actor.outcome.clone(),
        };
        tokio::spawn(actor.run(events_rx));
        handle
    }
}

/// Report stream corruption seen by a dispatcher as a shutdown trigger.
fn watch_decoder(
    label: &'static str,
    decoder: JoinHandle<Result<(), CodecError>>,
    events: mpsc::UnboundedSender<ControlEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match decoder.await {
            Ok(Ok(())) => return,
            Ok(Err(e)) => error!(
                target: TARGET,
                "Malformed DAP traffic on {} stream: {} ({:?})",
                label,
                e,
                e
            ),
            Err(e) if e.is_cancelled() => return,
            Err(e) => error!(
                target: TARGET,
                "Decoder for {} stream crashed: {}",
                label,
                e
            ),
        }
        let _ = events.send(ControlEvent::Shutdown(ShutdownTrigger::ProtocolError));
    })
}

/// Handle to a running controller.
#[derive(Clone)]
pub struct RelayHandle {
    events: mpsc::UnboundedSender<ControlEvent>,
    snapshot: watch::Receiver<RelaySnapshot>,
    outcome: Deferred<SessionOutcome>,
}

impl RelayHandle {
    /// Shut down as if the process were asked to terminate.
    ///
    /// Ignored while a restart is in progress.
    pub fn request_shutdown(&self) {
        let _ = self
            .events
            .send(ControlEvent::Shutdown(ShutdownTrigger::Signal));
    }

    pub fn snapshot(&self) -> RelaySnapshot {
        self.snapshot.borrow().clone()
    }

    /// Wait until the published state satisfies `predicate`.
    ///
    /// Returns the latest state if the controller stops first.
    pub async fn wait_for(&self, predicate: impl FnMut(&RelaySnapshot) -> bool) -> RelaySnapshot {
        let mut rx = self.snapshot.clone();
        if let Ok(snapshot) = rx.wait_for(predicate).await {
            return snapshot.clone();
        }
        rx.borrow().clone()
    }

    /// Wait for the shutdown procedure to finish.
    pub async fn outcome(&self) -> SessionOutcome {
        self.outcome.wait().await
    }

    /// Tear the controller down and wait until it is disposed.
    pub async fn deactivate(&self) {
        let (tx, rx) = oneshot::channel();
        if self.events.send(ControlEvent::Deactivate(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

pub(super) struct ControllerActor {
    pub(super) session: Session,
    pub(super) handler: Arc<dyn SessionHandler>,
    pub(super) terminator: Arc<dyn ProcessTerminator>,
    pub(super) delays: ShutdownDelays,
    inbound: MessageDispatcher,
    outbound: MessageDispatcher,
    input: Arc<InputRouter>,
    output: Arc<OutputRouter>,
    captured: CapturedRequests,
    pub(super) registry: DisposableRegistry,
    pub(super) events: mpsc::UnboundedSender<ControlEvent>,
    seq: SequenceCounter,
    pub(super) outcome: Deferred<SessionOutcome>,
    snapshot: watch::Sender<RelaySnapshot>,
    input_route: InputRoute,
    output_route: OutputRoute,
    /// Sinks replaced by a splice, kept open until disposal.
    parked: Vec<BoxedWriter>,
    /// Stops reading client input; what follows belongs to the next epoch.
    client_input_stop: CancellationToken,
}

impl ControllerActor {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<ControlEvent>) {
        self.publish();
        while let Some(event) = events.recv().await {
            match event {
                ControlEvent::Intercepted(message) => self.on_intercepted(message),
                ControlEvent::SessionReady(event) => self.on_session_ready(event),
                ControlEvent::BackendConnected(backend) => self.on_backend_connected(backend).await,
                ControlEvent::BackendUnavailable(e) => self.on_backend_unavailable(e).await,
                ControlEvent::ProcessId(pid) => {
                    debug!(target: TARGET, "Backend process id is {}", pid);
                    self.session.backend_process_id = Some(pid);
                }
                ControlEvent::Shutdown(trigger) => self.shutdown(trigger).await,
                ControlEvent::Deactivate(ack) => {
                    self.deactivate();
                    self.publish();
                    let _ = ack.send(());
                    break;
                }
            }
            self.publish();
            if self.session.phase() == LifecyclePhase::Disposed {
                break;
            }
        }
        debug!(target: TARGET, "Relay controller stopped");
    }

    /// Move to `phase`, logging rejected transitions.
    pub(super) fn enter(&mut self, phase: LifecyclePhase) -> bool {
        let from = self.session.phase();
        if self.session.transition(phase) {
            debug!(target: TARGET, "Lifecycle {} -> {}", from, phase);
            true
        } else {
            warn!(
                target: TARGET,
                "Ignoring lifecycle transition {} -> {}",
                from,
                phase
            );
            false
        }
    }

    /// Abort `task` when the relay is disposed.
    pub(super) fn track(&mut self, task: JoinHandle<()>) {
        self.registry.register(Box::new(TaskDisposable::new(task)));
    }

    fn publish(&self) {
        self.snapshot.send_replace(RelaySnapshot {
            session: self.session.clone(),
            input_route: self.input_route,
            output_route: self.output_route,
        });
    }

    fn on_intercepted(&mut self, message: Intercepted) {
        match message {
            Intercepted::Initialize(_) => self.session.reset_for_initialize(),
            Intercepted::Launch(_) => self.session.mode = SessionMode::Launch,
            Intercepted::Attach(_) => self.session.mode = SessionMode::Attach,
            Intercepted::Disconnect(request) => {
                let restart = request.requests_restart();
                self.session.pending_disconnect_request = Some(request);
                if self.session.mode == SessionMode::Attach {
                    debug!(
                        target: TARGET,
                        "Disconnect in attach mode, leaving the backend to the client"
                    );
                    return;
                }
                if restart {
                    self.session.restart_requested = true;
                    self.client_input_stop.cancel();
                }
                self.schedule_shutdown(
                    ShutdownTrigger::DisconnectRequest,
                    self.delays.disconnect_request,
                );
            }
            Intercepted::Terminated => {
                self.session.terminated_event_sent = true;
                self.schedule_shutdown(
                    ShutdownTrigger::TerminatedEvent,
                    self.delays.terminated_event,
                );
            }
            Intercepted::DisconnectResponse => {
                self.session.disconnect_response_sent = true;
                self.schedule_shutdown(
                    ShutdownTrigger::DisconnectResponse,
                    self.delays.disconnect_response,
                );
            }
        }
    }

    fn on_session_ready(&mut self, event: SessionEvent) {
        let (kind, connection) = match event {
            SessionEvent::Launched(connection) => (BackendKind::Launch, connection),
            SessionEvent::Attached(connection) => (BackendKind::Attach, connection),
        };

        match self.session.phase() {
            LifecyclePhase::Intercepting => {}
            LifecyclePhase::Relaying => {
                warn!(
                    target: TARGET,
                    "Ignoring second {} backend, one is already relayed",
                    kind.command()
                );
                return;
            }
            phase => {
                info!(
                    target: TARGET,
                    "Backend became ready while {}, dropping it",
                    phase
                );
                return;
            }
        }
        if !self.enter(LifecyclePhase::Relaying) {
            return;
        }
        if self.session.mode == SessionMode::Unset {
            self.session.mode = match kind {
                BackendKind::Launch => SessionMode::Launch,
                BackendKind::Attach => SessionMode::Attach,
            };
        }

        let request = match kind {
            BackendKind::Launch => self.captured.launch.clone(),
            BackendKind::Attach => self.captured.attach.clone(),
        };
        let initialize = self.captured.initialize.clone();
        let events = self.events.clone();
        self.track(tokio::spawn(connect_backend(
            kind, connection, request, initialize, events,
        )));
    }

    async fn on_backend_connected(&mut self, backend: ConnectedBackend) {
        let ConnectedBackend {
            kind,
            socket,
            replay,
            process_id,
        } = backend;

        if self.session.has_shutdown() {
            info!(
                target: TARGET,
                "Backend connected after shutdown began, closing it"
            );
            return;
        }

        if self.session.backend_process_id.is_none() {
            self.session.backend_process_id = process_id;
        }

        let frames = match replay
            .into_iter()
            .map(|request| encode(&ProtocolMessage::Request(request)))
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(frames) => frames,
            Err(e) => {
                error!(target: TARGET, "Failed to encode replay: {} ({:?})", e, e);
                self.shutdown(ShutdownTrigger::BackendError).await;
                return;
            }
        };

        let (reader, writer) = tokio::io::split(socket);

        if self.session.mode == SessionMode::Launch {
            self.capture_process_id();
        }

        match self
            .input
            .splice(InputRoute::Backend, Box::new(writer), &frames)
            .await
        {
            Ok(previous) => self.parked.push(previous),
            Err(e) => {
                error!(
                    target: TARGET,
                    "Failed to replay session start to backend: {} ({:?})",
                    e,
                    e
                );
                self.shutdown(ShutdownTrigger::BackendError).await;
                return;
            }
        }
        self.input_route = InputRoute::Backend;

        self.output.activate(OutputRoute::Backend).await;
        self.output_route = OutputRoute::Backend;

        let output = Arc::clone(&self.output);
        let events = self.events.clone();
        self.track(tokio::spawn(async move {
            let trigger = match pump_output(reader, OutputRoute::Backend, &output).await {
                Ok(()) => ShutdownTrigger::BackendEnded,
                Err(e) => {
                    warn!(target: TARGET, "Backend socket error: {}", e);
                    ShutdownTrigger::BackendError
                }
            };
            let _ = events.send(ControlEvent::Shutdown(trigger));
        }));

        info!(
            target: TARGET,
            "Relaying client to {} backend",
            kind.command()
        );
    }

    async fn on_backend_unavailable(&mut self, error: RelayError) {
        error!(target: TARGET, "Debug backend unavailable: {}", error);
        if !self.session.has_shutdown() {
            let notice = Event::output("stderr", format!("{}\n", error));
            if let Err(e) = self.send_to_client(notice.into()).await {
                debug!(target: TARGET, "Could not report backend failure: {}", e);
            }
        }
        self.shutdown(ShutdownTrigger::BackendUnavailable).await;
    }

    /// Record the backend's OS pid from its first `process` event.
    fn capture_process_id(&mut self) {
        let rx = self.outbound.once("event_process");
        let events = self.events.clone();
        self.track(tokio::spawn(async move {
            let Ok(message) = rx.await else { return };
            if let Some(pid) = message.into_event().and_then(|e| e.system_process_id()) {
                let _ = events.send(ControlEvent::ProcessId(pid));
            }
        }));
    }

    /// Write a relay-generated message to the client.
    pub(super) async fn send_to_client(
        &mut self,
        message: ProtocolMessage,
    ) -> Result<(), CodecError> {
        let frame = encode(&self.seq.stamp(message))?;
        self.output.inject(&frame).await?;
        Ok(())
    }

    pub(super) fn dispose(&mut self) {
        let count = self.registry.dispose_all();
        self.parked.clear();
        debug!(target: TARGET, "Disposed {} relay components", count);
    }

    fn deactivate(&mut self) {
        if self.session.phase() == LifecyclePhase::Disposed {
            return;
        }
        info!(target: TARGET, "Deactivating relay controller");
        if !self.session.has_shutdown() {
            self.enter(LifecyclePhase::ShuttingDown);
        }
        self.handler.shutdown();
        self.dispose();
        self.enter(LifecyclePhase::Disposed);
        self.outcome.resolve(SessionOutcome::Terminated);
    }
}

/// Await the backend socket and the captured requests, then hand them to
/// the actor.
async fn connect_backend(
    kind: BackendKind,
    connection: BackendConnection,
    request: Deferred<Request>,
    initialize: Deferred<Request>,
    events: mpsc::UnboundedSender<ControlEvent>,
) {
    let BackendConnection { socket, process_id } = connection;
    let socket = match socket.await {
        Ok(socket) => socket,
        Err(e) => {
            let _ = events.send(ControlEvent::BackendUnavailable(e));
            return;
        }
    };
    let request = request.wait().await;
    let initialize = initialize.wait().await;
    debug!(
        target: TARGET,
        "Backend socket ready, replaying {} #{} and initialize #{}",
        kind.command(),
        request.seq,
        initialize.seq
    );
    let _ = events.send(ControlEvent::BackendConnected(ConnectedBackend {
        kind,
        socket,
        replay: vec![request, initialize],
        process_id,
    }));
}
