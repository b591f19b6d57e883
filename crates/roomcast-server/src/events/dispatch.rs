//! Event name → handler table.
//!
//! Handlers come in two forms. Untyped handlers receive the raw JSON
//! payload. Typed handlers declare a payload type; the payload is decoded
//! into it before the handler runs, and a decode failure is reported as
//! [`DispatchError::Decode`] without invoking the handler.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::RwLock;
use roomcast_core::DispatchError;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::HandlerResult;
use crate::websocket::session::Session;

type UntypedFn = dyn Fn(&Arc<Session>, Value) -> HandlerResult + Send + Sync;

/// Type-erased typed handler: decodes then invokes.
trait TypedInvoke: Send + Sync {
    fn shape(&self) -> &'static str;
    fn invoke(&self, session: &Arc<Session>, event: &str, data: Value)
    -> Result<(), DispatchError>;
}

struct Typed<T, F> {
    handler: F,
    _payload: PhantomData<fn() -> T>,
}

impl<T, F> TypedInvoke for Typed<T, F>
where
    T: DeserializeOwned + 'static,
    F: Fn(&Arc<Session>, T) -> HandlerResult + Send + Sync,
{
    fn shape(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn invoke(
        &self,
        session: &Arc<Session>,
        event: &str,
        data: Value,
    ) -> Result<(), DispatchError> {
        let payload: T = serde_json::from_value(data).map_err(|source| DispatchError::Decode {
            event: event.to_owned(),
            shape: self.shape(),
            source,
        })?;
        (self.handler)(session, payload).map_err(|e| handler_error(event, e))
    }
}

/// A registered handler.
enum HandlerEntry {
    Untyped(Box<UntypedFn>),
    Typed(Box<dyn TypedInvoke>),
}

impl HandlerEntry {
    fn invoke(
        &self,
        session: &Arc<Session>,
        event: &str,
        data: Value,
    ) -> Result<(), DispatchError> {
        match self {
            Self::Untyped(handler) => handler(session, data).map_err(|e| handler_error(event, e)),
            Self::Typed(handler) => handler.invoke(session, event, data),
        }
    }

    fn shape(&self) -> &'static str {
        match self {
            Self::Untyped(_) => "serde_json::Value",
            Self::Typed(handler) => handler.shape(),
        }
    }
}

fn handler_error(event: &str, err: anyhow::Error) -> DispatchError {
    DispatchError::Handler {
        event: event.to_owned(),
        source: err.into(),
    }
}

/// At most one handler per event name; re-registering replaces.
#[derive(Default)]
pub struct EventTable {
    handlers: RwLock<HashMap<String, Arc<HandlerEntry>>>,
}

impl EventTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler that receives the raw JSON payload.
    pub fn on<F>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(&Arc<Session>, Value) -> HandlerResult + Send + Sync + 'static,
    {
        self.insert(event.into(), HandlerEntry::Untyped(Box::new(handler)));
    }

    /// Register a handler whose payload is decoded into `T` first.
    pub fn on_typed<T, F>(&self, event: impl Into<String>, handler: F)
    where
        T: DeserializeOwned + 'static,
        F: Fn(&Arc<Session>, T) -> HandlerResult + Send + Sync + 'static,
    {
        let typed = Typed {
            handler,
            _payload: PhantomData::<fn() -> T>,
        };
        self.insert(event.into(), HandlerEntry::Typed(Box::new(typed)));
    }

    fn insert(&self, event: String, entry: HandlerEntry) {
        let shape = entry.shape();
        let replaced = self
            .handlers
            .write()
            .insert(event.clone(), Arc::new(entry))
            .is_some();
        debug!(event = %event, shape, replaced, "handler registered");
    }

    /// Whether a handler exists for `event`.
    pub fn contains(&self, event: &str) -> bool {
        self.handlers.read().contains_key(event)
    }

    /// Sorted registered event names.
    pub fn events(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Invoke the handler for `event`.
    ///
    /// Returns `Ok(false)` when nothing is registered. The table lock is
    /// released before the handler runs, so handlers may register handlers.
    pub fn dispatch(
        &self,
        session: &Arc<Session>,
        event: &str,
        data: Value,
    ) -> Result<bool, DispatchError> {
        let Some(entry) = self.handlers.read().get(event).cloned() else {
            return Ok(false);
        };
        entry.invoke(session, event, data)?;
        Ok(true)
    }
}

impl std::fmt::Debug for EventTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventTable")
            .field("events", &self.events())
            .finish()
    }
}
