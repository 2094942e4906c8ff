//! Teardown bookkeeping for relay sub-components.

use std::sync::Arc;

use tokio::task::JoinHandle;

/// A sub-component with a teardown step.
pub trait Disposable: Send + Sync {
    fn dispose(&self);
}

impl<T: Disposable + ?Sized> Disposable for Arc<T> {
    fn dispose(&self) {
        (**self).dispose();
    }
}

/// Aborts a background task on disposal.
pub struct TaskDisposable(JoinHandle<()>);

impl TaskDisposable {
    pub fn new(handle: JoinHandle<()>) -> Self {
        Self(handle)
    }
}

impl Disposable for TaskDisposable {
    fn dispose(&self) {
        self.0.abort();
    }
}

/// Ordered collection of disposables, drained on first disposal.
///
/// Draining makes a second `dispose_all` a no-op, so each component is torn
/// down at most once.
#[derive(Default)]
pub struct DisposableRegistry {
    items: Vec<Box<dyn Disposable>>,
    disposed: bool,
}

impl DisposableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component. Registering after disposal disposes it at once.
    pub fn register(&mut self, item: Box<dyn Disposable>) {
        if self.disposed {
            item.dispose();
            return;
        }
        self.items.push(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Dispose every registered component in registration order.
    ///
    /// Returns the number of components disposed by this call.
    pub fn dispose_all(&mut self) -> usize {
        self.disposed = true;
        let items = std::mem::take(&mut self.items);
        let count = items.len();
        for item in items {
            item.dispose();
        }
        count
    }
}
