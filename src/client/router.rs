//! Subscription router.
//!
//! Server pushes carry a method name but no request id. The router keeps
//! method-keyed handler lists and fans each notification out to every
//! handler registered for its method.
//!
//! Registrations outlive connections: the router only holds handlers and
//! knows nothing about server-side subscription state.

// ============================================================================
// Imports
// ============================================================================

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{error, trace, warn};

use crate::error::Result;
use crate::identifiers::SubscriptionId;
use crate::protocol::Notification;

// ============================================================================
// Types
// ============================================================================

/// Notification handler callback type.
///
/// Returning an error (or panicking) is logged and does not affect other
/// handlers.
pub type NotificationHandler = Arc<dyn Fn(&Notification) -> Result<()> + Send + Sync>;

/// Handlers registered for one method, in registration order.
type HandlerList = Vec<(SubscriptionId, NotificationHandler)>;

// ============================================================================
// SubscriptionRouter
// ============================================================================

/// Routes notifications to handlers by method name.
#[derive(Default)]
pub struct SubscriptionRouter {
    /// Handlers keyed by method.
    handlers: RwLock<FxHashMap<String, HandlerList>>,
    /// Last issued handle.
    next_id: AtomicU64,
}

impl SubscriptionRouter {
    /// Creates an empty router.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `method`.
    ///
    /// Several handlers may share a method; each gets its own handle.
    pub fn subscribe<F>(&self, method: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&Notification) -> Result<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let method = method.into();

        trace!(%id, %method, "Handler registered");
        self.handlers
            .write()
            .entry(method)
            .or_default()
            .push((id, Arc::new(handler)));

        id
    }

    /// Removes one handler. Other handlers on the same method are untouched.
    ///
    /// Returns `false` if the handle was unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();

        let mut removed = false;
        handlers.retain(|_, list| {
            let before = list.len();
            list.retain(|(sid, _)| *sid != id);
            removed |= list.len() != before;
            !list.is_empty()
        });

        removed
    }

    /// Removes every handler for `method`, returning how many were removed.
    pub fn clear_method(&self, method: &str) -> usize {
        self.handlers
            .write()
            .remove(method)
            .map_or(0, |list| list.len())
    }

    /// Invokes every handler registered for the notification's method.
    ///
    /// Returns the number of handlers that ran successfully.
    pub fn dispatch(&self, notification: &Notification) -> usize {
        // Snapshot so handlers may (un)subscribe without deadlocking.
        let handlers: HandlerList = match self.handlers.read().get(&notification.method) {
            Some(list) => list.clone(),
            None => {
                trace!(method = %notification.method, "No handler for notification");
                return 0;
            }
        };

        let mut delivered = 0;
        for (id, handler) in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(notification))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    warn!(%id, method = %notification.method, error = %e, "Notification handler failed");
                }
                Err(_) => {
                    error!(%id, method = %notification.method, "Notification handler panicked");
                }
            }
        }

        delivered
    }

    /// Returns `true` if any handler is registered for `method`.
    #[inline]
    #[must_use]
    pub fn has_handlers(&self, method: &str) -> bool {
        self.handlers.read().contains_key(method)
    }

    /// Returns the total number of registered handlers.
    #[inline]
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.read().values().map(Vec::len).sum()
    }
}

// ============================================================================
// Tests
// ============================================================================
