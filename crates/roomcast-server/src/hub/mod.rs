//! The hub: one coordinating task plus the shared registry it guards.
//!
//! Admission, removal and whole-hub broadcasts are serialised through the
//! [`HubRunner`] command loop. Room operations and direct sends go through
//! the registry lock from whichever task calls them. The only handler
//! invocations the hub performs itself are the `connect` and `disconnect`
//! lifecycle events.

mod registry;
pub mod rooms;

use std::sync::Arc;

use metrics::{counter, gauge};
use parking_lot::RwLock;
use roomcast_core::{CONNECT_EVENT, DISCONNECT_EVENT, EventMessage, HubError, SessionId};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::events::{EventTable, MiddlewareChain};
use crate::metrics as names;
use crate::websocket::session::Session;
use registry::Registry;

/// Knobs the hub needs from the server configuration.
#[derive(Clone, Copy, Debug)]
pub struct HubOptions {
    /// Outbound queue length per session.
    pub queue_capacity: usize,
    /// Dispatch peer-sent lifecycle names instead of dropping them.
    pub allow_reserved_events: bool,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            allow_reserved_events: false,
        }
    }
}

/// Requests processed by the hub loop, one at a time.
pub(crate) enum HubCommand {
    /// Admit a session; `ack` fires after its `connect` handler has run.
    Register {
        session: Arc<Session>,
        ack: oneshot::Sender<()>,
    },
    /// Remove a session. Repeats are no-ops.
    Deregister { session: Arc<Session> },
    /// Fan a message out to every registered session except `exclude`.
    BroadcastAll {
        message: Arc<EventMessage>,
        exclude: Option<SessionId>,
    },
    /// A session was shed from a send path; fire its `disconnect`.
    Evicted { session: Arc<Session> },
}

impl HubCommand {
    fn kind(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Deregister { .. } => "deregister",
            Self::BroadcastAll { .. } => "broadcast_all",
            Self::Evicted { .. } => "evicted",
        }
    }
}

struct HubInner {
    registry: RwLock<Registry>,
    events: EventTable,
    middleware: MiddlewareChain,
    commands: mpsc::UnboundedSender<HubCommand>,
    options: HubOptions,
}

/// Cheap, cloneable handle to the hub's shared state.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    /// Create the hub handle and the loop that must be spawned to drive it.
    pub fn new(options: HubOptions) -> (Self, HubRunner) {
        let (tx, rx) = mpsc::unbounded_channel();
        let hub = Self {
            inner: Arc::new(HubInner {
                registry: RwLock::new(Registry::default()),
                events: EventTable::new(),
                middleware: MiddlewareChain::new(),
                commands: tx,
                options,
            }),
        };
        let runner = HubRunner {
            hub: hub.clone(),
            commands: rx,
        };
        (hub, runner)
    }

    /// The dispatch table.
    pub fn events(&self) -> &EventTable {
        &self.inner.events
    }

    /// The middleware chain.
    pub fn middleware(&self) -> &MiddlewareChain {
        &self.inner.middleware
    }

    /// Whether peer-sent lifecycle names are dispatched.
    pub fn allow_reserved_events(&self) -> bool {
        self.inner.options.allow_reserved_events
    }

    /// Number of registered sessions.
    pub fn connection_count(&self) -> usize {
        self.inner.registry.read().len()
    }

    /// Sorted names of all non-empty rooms.
    pub fn room_names(&self) -> Vec<String> {
        self.inner.registry.read().rooms().room_names()
    }

    /// Sorted member ids of `room`.
    pub fn room_members(&self, room: &str) -> Vec<SessionId> {
        let mut members: Vec<SessionId> = self
            .inner
            .registry
            .read()
            .rooms()
            .members(room)
            .cloned()
            .collect();
        members.sort_unstable();
        members
    }

    /// Look up a registered session.
    pub fn session(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.inner.registry.read().get(id)
    }

    /// Whether `id` is currently registered.
    pub fn is_registered(&self, id: &SessionId) -> bool {
        self.inner.registry.read().contains(id)
    }

    /// Queue `message` for every registered session except `exclude`.
    ///
    /// Returns `false` if the hub loop has stopped.
    pub fn broadcast_all(&self, message: EventMessage, exclude: Option<SessionId>) -> bool {
        self.command(HubCommand::BroadcastAll {
            message: Arc::new(message),
            exclude,
        })
    }

    pub(crate) fn create_session(
        &self,
    ) -> (Arc<Session>, mpsc::Receiver<Arc<EventMessage>>) {
        Session::new(self.clone(), self.inner.options.queue_capacity)
    }

    /// Ask the loop to admit `session` and wait until it has.
    pub(crate) async fn register(&self, session: Arc<Session>) -> Result<(), HubError> {
        let (ack, done) = oneshot::channel();
        if !self.command(HubCommand::Register { session, ack }) {
            return Err(HubError::HubClosed);
        }
        done.await.map_err(|_| HubError::HubClosed)
    }

    pub(crate) fn deregister(&self, session: Arc<Session>) {
        let _ = self.command(HubCommand::Deregister { session });
    }

    pub(crate) fn join(&self, session: &Session, room: &str) -> bool {
        let joined = self.inner.registry.write().join(session, room);
        if joined {
            debug!(session_id = %session.id(), room, "joined room");
        }
        joined
    }

    pub(crate) fn leave(&self, session: &Session, room: &str) -> bool {
        let left = self.inner.registry.write().leave(session, room);
        if left {
            debug!(session_id = %session.id(), room, "left room");
        }
        left
    }

    pub(crate) fn room_recipients(
        &self,
        room: &str,
        exclude: Option<&SessionId>,
    ) -> Vec<Arc<Session>> {
        self.inner.registry.read().room_snapshot(room, exclude)
    }

    /// Evict a session whose queue is full.
    ///
    /// Only the caller that actually removes it returns `true`; the hub
    /// loop then fires `disconnect` for it.
    pub(crate) fn shed(&self, session: &Session) -> bool {
        let Some(removed) = self.inner.registry.write().remove(session.id()) else {
            return false;
        };
        let err = HubError::Backpressure {
            session_id: session.id().to_string(),
        };
        warn!(session_id = %session.id(), error = %err, "shedding slow session");
        counter!(names::SESSIONS_SHED_TOTAL).increment(1);
        gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
        let _ = self.command(HubCommand::Evicted { session: removed });
        true
    }

    fn command(&self, command: HubCommand) -> bool {
        let kind = command.kind();
        if self.inner.commands.send(command).is_err() {
            debug!(command = kind, "hub loop stopped, command dropped");
            return false;
        }
        true
    }

    fn fire_lifecycle(&self, event: &str, session: &Arc<Session>) {
        if let Err(err) = self.inner.events.dispatch(session, event, Value::Null) {
            crate::events::record_failure(session.id(), &err);
        }
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("connections", &self.connection_count())
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

/// The hub's coordinating loop. Spawn [`HubRunner::run`] exactly once.
pub struct HubRunner {
    hub: Hub,
    commands: mpsc::UnboundedReceiver<HubCommand>,
}

impl HubRunner {
    /// Process commands until `shutdown` is cancelled, then remove every
    /// remaining session.
    #[instrument(skip_all, name = "hub")]
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("hub loop started");
        loop {
            let command = tokio::select! {
                () = shutdown.cancelled() => break,
                command = self.commands.recv() => command,
            };
            match command {
                Some(command) => self.handle(command),
                None => break,
            }
        }
        self.commands.close();
        let closed = self.close_all();
        info!(sessions_closed = closed, "hub loop stopped");
    }

    fn handle(&self, command: HubCommand) {
        match command {
            HubCommand::Register { session, ack } => {
                let inserted = self.hub.inner.registry.write().insert(Arc::clone(&session));
                if inserted {
                    counter!(names::CONNECTIONS_TOTAL).increment(1);
                    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
                    info!(session_id = %session.id(), "session registered");
                    self.hub.fire_lifecycle(CONNECT_EVENT, &session);
                } else {
                    warn!(session_id = %session.id(), "duplicate registration ignored");
                }
                let _ = ack.send(());
            }
            HubCommand::Deregister { session } => {
                let removed = self.hub.inner.registry.write().remove(session.id());
                match removed {
                    Some(session) => {
                        gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
                        info!(
                            session_id = %session.id(),
                            connected_secs = session.connected_for().as_secs(),
                            "session deregistered"
                        );
                        self.hub.fire_lifecycle(DISCONNECT_EVENT, &session);
                    }
                    None => debug!(session_id = %session.id(), "already deregistered"),
                }
            }
            HubCommand::BroadcastAll { message, exclude } => {
                let targets = self.hub.inner.registry.read().snapshot(exclude.as_ref());
                debug!(event = %message.event, recipients = targets.len(), "broadcast");
                for target in targets {
                    let _ = target.send(Arc::clone(&message));
                }
            }
            HubCommand::Evicted { session } => {
                info!(session_id = %session.id(), "session evicted");
                self.hub.fire_lifecycle(DISCONNECT_EVENT, &session);
            }
        }
    }

    fn close_all(&mut self) -> usize {
        // Shed sessions whose eviction was still queued.
        while let Ok(command) = self.commands.try_recv() {
            if let HubCommand::Evicted { session } = command {
                self.hub.fire_lifecycle(DISCONNECT_EVENT, &session);
            }
        }
        let sessions = self.hub.inner.registry.write().drain();
        for session in &sessions {
            gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
            self.hub.fire_lifecycle(DISCONNECT_EVENT, session);
        }
        sessions.len()
    }
}

#[cfg(test)]
impl Hub {
    pub(crate) fn admit_for_test(&self, session: &Arc<Session>) {
        let _ = self.inner.registry.write().insert(Arc::clone(session));
    }

    pub(crate) fn remove_for_test(&self, id: &SessionId) {
        let _ = self.inner.registry.write().remove(id);
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::{Hub, HubOptions};

    /// A hub whose loop is never started. Registry-level operations work;
    /// commands are dropped.
    pub(crate) fn detached_hub(queue_capacity: usize) -> Hub {
        let (hub, _runner) = Hub::new(HubOptions {
            queue_capacity,
            allow_reserved_events: false,
        });
        hub
    }
}
