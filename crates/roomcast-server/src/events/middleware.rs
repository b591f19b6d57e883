//! Ordered message filters run before dispatch.

use std::sync::Arc;

use parking_lot::RwLock;
use roomcast_core::EventMessage;

use crate::websocket::session::Session;

type Middleware = Arc<dyn Fn(&Arc<Session>, &EventMessage) -> bool + Send + Sync>;

/// Middleware functions in registration order.
///
/// Each one sees the session and the decoded message and returns whether
/// processing continues. The first `false` drops the message.
#[derive(Default)]
pub struct MiddlewareChain {
    entries: RwLock<Vec<Middleware>>,
}

impl MiddlewareChain {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a middleware to the end of the chain.
    pub fn push<F>(&self, middleware: F)
    where
        F: Fn(&Arc<Session>, &EventMessage) -> bool + Send + Sync + 'static,
    {
        self.entries.write().push(Arc::new(middleware));
    }

    /// Number of registered middleware.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Run the chain. Returns the index of the middleware that blocked the
    /// message, or `None` if every one allowed it.
    pub fn blocked_by(&self, session: &Arc<Session>, message: &EventMessage) -> Option<usize> {
        // Snapshot so a middleware can register more middleware.
        let entries = self.entries.read().clone();
        entries.iter().position(|allow| !allow(session, message))
    }
}

impl std::fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareChain")
            .field("len", &self.len())
            .finish()
    }
}
