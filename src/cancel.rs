//! Cooperative cancellation tokens.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::plugin::PluginError;

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    waiters: Mutex<Vec<Sender<()>>>,
    children: Mutex<Vec<Cancellable>>,
}

/// Shared cancellation flag. Cancelling a token cancels every child created
/// from it; cancelling a child leaves the parent alone.
#[derive(Clone, Default)]
pub struct Cancellable {
    inner: Arc<Inner>,
}

impl Cancellable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        for waiter in self.inner.waiters.lock().drain(..) {
            let _ = waiter.try_send(());
        }
        let children: Vec<Cancellable> = self.inner.children.lock().drain(..).collect();
        for child in children {
            child.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancelled, for use with `?` inside plugins.
    pub fn check(&self) -> Result<(), PluginError> {
        if self.is_cancelled() {
            Err(PluginError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// A token cancelled together with this one.
    pub fn child(&self) -> Cancellable {
        let child = Cancellable::new();
        self.inner.children.lock().push(child.clone());
        if self.is_cancelled() {
            child.cancel();
        }
        child
    }

    /// A receiver that gets one message when the token is cancelled.
    pub fn subscribe(&self) -> Receiver<()> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.inner.waiters.lock().push(tx.clone());
        if self.is_cancelled() {
            let _ = tx.try_send(());
        }
        rx
    }
}

impl fmt::Debug for Cancellable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cancellable")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
