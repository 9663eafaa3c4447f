use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::handler::{Handler, HandlerId};

/// Id-keyed set of message handlers, iterated in insertion order.
///
/// Ids come from a monotonic counter but a handler built with its own id may
/// be inserted after handlers issued later ids, so iteration follows the map,
/// not the ids. Once closed, the registry refuses new handlers but keeps
/// issuing ids so callers can still deregister them idempotently.
#[derive(Debug)]
pub struct HandlerRegistry {
    handlers: IndexMap<HandlerId, Handler>,
    next_id: u64,
    closed: Option<String>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: IndexMap::new(),
            next_id: 1,
            closed: None,
        }
    }

    /// Store a handler under the next unused id.
    pub fn register(&mut self, handler: Handler) -> HandlerId {
        self.register_with(|_| handler)
    }

    /// Store a handler that needs to know its own id.
    pub fn register_with(&mut self, build: impl FnOnce(HandlerId) -> Handler) -> HandlerId {
        let id = self.issue_id();
        let _refused = self.insert(id, build(id));
        id
    }

    /// Remove a handler, returning it. Unknown or already removed ids are a
    /// no-op returning `None`.
    pub fn remove(&mut self, id: HandlerId) -> Option<Handler> {
        let removed = self.handlers.shift_remove(&id);
        if removed.is_some() {
            debug!(%id, remaining = self.handlers.len(), "handler deregistered");
        }
        removed
    }

    /// Check whether an id is currently registered.
    pub fn contains(&self, id: HandlerId) -> bool {
        self.handlers.contains_key(&id)
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Stable copy of the handler set, in insertion order.
    pub fn snapshot(&self) -> Vec<(HandlerId, Handler)> {
        self.handlers
            .iter()
            .map(|(id, handler)| (*id, handler.clone()))
            .collect()
    }

    /// Drop every handler and refuse further registrations.
    ///
    /// Returns the removed handlers so the caller controls where they are
    /// dropped. Closing twice keeps the first reason.
    pub fn close(&mut self, reason: impl Into<String>) -> Vec<Handler> {
        if self.closed.is_none() {
            self.closed = Some(reason.into());
        }
        let drained = std::mem::take(&mut self.handlers);
        debug!(dropped = drained.len(), "handler registry closed");
        drained.into_values().collect()
    }

    /// Returns true once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.is_some()
    }

    /// Reason passed to [`close`](Self::close), if closed.
    pub fn closed_reason(&self) -> Option<&str> {
        self.closed.as_deref()
    }

    pub(crate) fn issue_id(&mut self) -> HandlerId {
        let id = HandlerId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Insert under an id from [`issue_id`](Self::issue_id). The handler goes
    /// to the end of the delivery order. A closed registry hands it back
    /// instead of storing it.
    pub(crate) fn insert(&mut self, id: HandlerId, handler: Handler) -> Option<Handler> {
        if let Some(reason) = &self.closed {
            warn!(%id, reason = %reason, "registry closed, handler refused");
            return Some(handler);
        }
        debug!(%id, scheduled = handler.is_scheduled(), "handler registered");
        self.handlers.insert(id, handler);
        None
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
