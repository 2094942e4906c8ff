//! Message dispatcher: decodes a byte stream and publishes named events.
//!
//! Each decoded message is published under [`ProtocolMessage::event_name`].
//! Two kinds of listeners exist:
//!
//! - `once(name)`: fires for the first matching message, then is removed
//! - `subscribe()`: receives every message until the receiver is dropped
//!
//! A fire-once listener never hides a message from other listeners.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, error};
use tokio::io::AsyncRead;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::disposable::Disposable;
use crate::error::CodecError;

use super::{MessageReader, ProtocolMessage};

/// Publishes decoded DAP messages to registered listeners.
///
/// Cloning yields another handle to the same listener tables.
#[derive(Clone)]
pub struct MessageDispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Label used in log lines ("client" / "backend").
    label: &'static str,
    once: Mutex<HashMap<String, Vec<oneshot::Sender<ProtocolMessage>>>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ProtocolMessage>>>,
    cancel: CancellationToken,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MessageDispatcher {
    pub fn new(label: &'static str) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                label,
                once: Mutex::new(HashMap::new()),
                subscribers: Mutex::new(Vec::new()),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Register a listener for the first message named `event_name`.
    pub fn once(&self, event_name: impl Into<String>) -> oneshot::Receiver<ProtocolMessage> {
        let (tx, rx) = oneshot::channel();
        lock(&self.inner.once)
            .entry(event_name.into())
            .or_default()
            .push(tx);
        rx
    }

    /// Receive every message published from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ProtocolMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.inner.subscribers).push(tx);
        rx
    }

    /// Number of fire-once listeners still armed for `event_name`.
    pub fn pending_once(&self, event_name: &str) -> usize {
        lock(&self.inner.once)
            .get(event_name)
            .map_or(0, |listeners| listeners.len())
    }

    /// Publish one message to all matching listeners.
    pub fn dispatch(&self, message: ProtocolMessage) {
        let name = message.event_name();

        let fired = lock(&self.inner.once).remove(&name).unwrap_or_default();
        for listener in fired {
            // Receiver may have been dropped; nothing to do then
            let _ = listener.send(message.clone());
        }

        lock(&self.inner.subscribers).retain(|subscriber| subscriber.send(message.clone()).is_ok());
    }

    /// Start decoding `reader` and dispatching every message.
    ///
    /// The returned task ends with `Ok(())` on clean end of stream or
    /// disposal, and with the codec error when the stream is corrupted.
    pub fn connect<R>(&self, reader: R) -> JoinHandle<Result<(), CodecError>>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let dispatcher = self.clone();
        tokio::spawn(async move { dispatcher.decode_loop(MessageReader::new(reader)).await })
    }

    async fn decode_loop<R>(&self, mut reader: MessageReader<R>) -> Result<(), CodecError>
    where
        R: AsyncRead + Unpin,
    {
        let label = self.inner.label;
        loop {
            tokio::select! {
                _ = self.inner.cancel.cancelled() => {
                    debug!(
                        target: "debug_relay::protocol",
                        "{} dispatcher disposed, stopping decode loop",
                        label
                    );
                    return Ok(());
                }

                result = reader.read_message() => {
                    match result {
                        Ok(Some(message)) => self.dispatch(message),
                        Ok(None) => {
                            debug!(
                                target: "debug_relay::protocol",
                                "{} stream ended",
                                label
                            );
                            return Ok(());
                        }
                        Err(e) => {
                            error!(
                                target: "debug_relay::protocol",
                                "{} stream is corrupted: {} ({:?})",
                                label,
                                e,
                                e
                            );
                            return Err(e);
                        }
                    }
                }
            }
        }
    }
}

impl Disposable for MessageDispatcher {
    fn dispose(&self) {
        self.inner.cancel.cancel();
        lock(&self.inner.once).clear();
        lock(&self.inner.subscribers).clear();
    }
}
