//! Connection lifecycle hooks
//!
//! Applications observe connections opening and closing by registering
//! handlers. Each handler runs in isolation: an error or a panic is logged
//! and the remaining handlers still run.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::session::ConnectionContext;

/// Error returned by a hook handler
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Hook handler
pub type HookHandler = Arc<dyn Fn(&ConnectionContext) -> Result<(), HookError> + Send + Sync>;

/// Lifecycle transition a hook listens to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    /// Connection entered OPEN
    Open,
    /// Connection entered CLOSED
    Close,
}

/// Registration handle for [`LifecycleHooks::unregister`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

/// Open and close listener lists
pub struct LifecycleHooks {
    next_id: AtomicU64,
    open: RwLock<Vec<(HookId, HookHandler)>>,
    close: RwLock<Vec<(HookId, HookHandler)>>,
}

impl LifecycleHooks {
    /// Create an empty hook set
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            open: RwLock::new(Vec::new()),
            close: RwLock::new(Vec::new()),
        }
    }

    fn list(&self, event: HookEvent) -> &RwLock<Vec<(HookId, HookHandler)>> {
        match event {
            HookEvent::Open => &self.open,
            HookEvent::Close => &self.close,
        }
    }

    /// Register a handler for `event`
    pub fn register<F>(&self, event: HookEvent, handler: F) -> HookId
    where
        F: Fn(&ConnectionContext) -> Result<(), HookError> + Send + Sync + 'static,
    {
        let id = HookId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.list(event).write().push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler
    ///
    /// Returns false if it was not registered.
    pub fn unregister(&self, id: HookId) -> bool {
        [HookEvent::Open, HookEvent::Close].into_iter().any(|event| {
            let mut handlers = self.list(event).write();
            let before = handlers.len();
            handlers.retain(|(hid, _)| *hid != id);
            handlers.len() != before
        })
    }

    /// Remove every handler
    pub fn clear(&self) {
        self.open.write().clear();
        self.close.write().clear();
    }

    /// Number of handlers registered for `event`
    pub fn len(&self, event: HookEvent) -> usize {
        self.list(event).read().len()
    }

    /// Whether no handler is registered at all
    pub fn is_empty(&self) -> bool {
        self.open.read().is_empty() && self.close.read().is_empty()
    }

    /// Run every handler registered for `event`
    ///
    /// Returns the number of handlers that failed.
    pub fn fire(&self, event: HookEvent, ctx: &ConnectionContext) -> usize {
        // Handlers may register or unregister hooks themselves
        let handlers: Vec<HookHandler> = self
            .list(event)
            .read()
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();

        let mut failed = 0;
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(ctx))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failed += 1;
                    tracing::warn!(
                        connection_id = %ctx.connection_id,
                        event = ?event,
                        error = %e,
                        "Lifecycle hook failed"
                    );
                }
                Err(panic) => {
                    failed += 1;
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_default();
                    tracing::warn!(
                        connection_id = %ctx.connection_id,
                        event = ?event,
                        panic = %message,
                        "Lifecycle hook panicked"
                    );
                }
            }
        }
        failed
    }
}

impl Default for LifecycleHooks {
    fn default() -> Self {
        Self::new()
    }
}
