//! Ordered handler registries
//!
//! Every transport keeps one [`ListenerSet`] per observer kind. Handlers are
//! snapshotted before they run, so a handler may subscribe or unsubscribe
//! while being invoked, and a panicking handler is logged instead of
//! unwinding into the transport.

use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use tracing::error;
use uuid::Uuid;

/// Handle returned by every subscribe call
///
/// Dropping the handle keeps the handler registered; call
/// [`Subscription::unsubscribe`] to remove it.
#[must_use = "dropping a Subscription keeps the handler registered"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Wrap the action that removes a handler; used by [`Transport`](crate::Transport) implementations
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Remove the handler this subscription refers to
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

type Entries<F> = Mutex<Vec<(Uuid, Arc<F>)>>;

/// Registration-ordered set of handlers
pub(crate) struct ListenerSet<F: ?Sized> {
    entries: Arc<Entries<F>>,
}

impl<F: ?Sized + Send + Sync + 'static> ListenerSet<F> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Register a handler; it runs after every handler added before it
    pub fn add(&self, listener: Arc<F>) -> Subscription {
        let id = Uuid::new_v4();
        self.entries.lock().push((id, listener));

        let entries: Weak<Entries<F>> = Arc::downgrade(&self.entries);
        Subscription::new(move || {
            if let Some(entries) = entries.upgrade() {
                entries.lock().retain(|(entry_id, _)| *entry_id != id);
            }
        })
    }

    /// Current handlers in registration order
    pub fn snapshot(&self) -> Vec<Arc<F>> {
        self.entries
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[cfg(test)]
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl<F: ?Sized + Send + Sync + 'static> Default for ListenerSet<F> {
    fn default() -> Self {
        Self::new()
    }
}

/// Run a user callback, logging a panic instead of propagating it
pub(crate) fn invoke_guarded(context: &'static str, f: impl FnOnce()) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(f)) {
        error!(context, panic = %panic_message(panic.as_ref()), "Handler panicked");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
