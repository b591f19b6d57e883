//! Per-connection session handle.
//!
//! A [`Session`] is what handlers and middleware see. It owns the sending
//! half of the connection's bounded outbound queue and the session-local
//! copy of its room memberships. Sends never block: a full queue sheds the
//! session.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use roomcast_core::{EventMessage, SessionId};
use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use crate::hub::Hub;

/// Outcome of enqueuing one message to one session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendStatus {
    /// The message is in the outbound queue.
    Queued,
    /// The queue was full; the message was dropped and the session evicted.
    Shed,
    /// The session is already closed; the message was dropped.
    Closed,
}

/// One connected peer.
pub struct Session {
    id: SessionId,
    hub: Hub,
    outbound: Mutex<Option<mpsc::Sender<Arc<EventMessage>>>>,
    rooms: Mutex<HashSet<String>>,
    connected_at: Instant,
    dropped_messages: AtomicU64,
    closed: CancellationToken,
}

impl Session {
    pub(crate) fn new(
        hub: Hub,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Arc<EventMessage>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let session = Arc::new(Self {
            id: SessionId::new(),
            hub,
            outbound: Mutex::new(Some(tx)),
            rooms: Mutex::new(HashSet::new()),
            connected_at: Instant::now(),
            dropped_messages: AtomicU64::new(0),
            closed: CancellationToken::new(),
        });
        (session, rx)
    }

    /// Unique id for the lifetime of this connection.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Send `event` to this peer only.
    pub fn emit(&self, event: impl Into<String>, data: Value) -> SendStatus {
        self.send(Arc::new(EventMessage::new(event, data)))
    }

    /// Send `event` to every other registered session.
    ///
    /// Delivery happens on the hub loop. Returns `false` if the hub is gone.
    pub fn broadcast(&self, event: impl Into<String>, data: Value) -> bool {
        self.hub
            .broadcast_all(EventMessage::new(event, data), Some(self.id.clone()))
    }

    /// Send `event` to every other member of `room`.
    ///
    /// The sender need not be a member. Returns how many members had the
    /// message queued.
    pub fn broadcast_to_room(&self, room: &str, event: impl Into<String>, data: Value) -> usize {
        let recipients = self.hub.room_recipients(room, Some(&self.id));
        let message = Arc::new(EventMessage::new(event, data));
        recipients
            .iter()
            .filter(|peer| peer.send(Arc::clone(&message)) == SendStatus::Queued)
            .count()
    }

    /// Join `room`. Returns `false` if already a member or no longer registered.
    pub fn join(&self, room: &str) -> bool {
        self.hub.join(self, room)
    }

    /// Leave `room`. Returns `false` if not a member.
    pub fn leave(&self, room: &str) -> bool {
        self.hub.leave(self, room)
    }

    /// Sorted names of the rooms this session belongs to.
    pub fn rooms(&self) -> Vec<String> {
        let mut rooms: Vec<String> = self.rooms.lock().iter().cloned().collect();
        rooms.sort_unstable();
        rooms
    }

    /// Whether this session is in `room`.
    pub fn in_room(&self, room: &str) -> bool {
        self.rooms.lock().contains(room)
    }

    /// Whether the outbound queue still accepts messages.
    pub fn is_open(&self) -> bool {
        self.outbound.lock().is_some()
    }

    /// Time since the connection was accepted.
    pub fn connected_for(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Messages dropped because the session was closed or shed.
    pub fn dropped_messages(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Enqueue without blocking.
    ///
    /// The outbound lock is released before shedding, which takes the
    /// registry write lock.
    pub(crate) fn send(&self, message: Arc<EventMessage>) -> SendStatus {
        let full = {
            let outbound = self.outbound.lock();
            let Some(tx) = outbound.as_ref() else {
                self.record_drop();
                return SendStatus::Closed;
            };
            match tx.try_send(message) {
                Ok(()) => return SendStatus::Queued,
                Err(TrySendError::Full(_)) => true,
                Err(TrySendError::Closed(_)) => false,
            }
        };
        self.record_drop();
        if full && self.hub.shed(self) {
            SendStatus::Shed
        } else {
            SendStatus::Closed
        }
    }

    /// Drop the sender and cancel [`Session::closed`] so both connection
    /// loops stop, even when the writer is stuck on a peer that stopped
    /// reading.
    ///
    /// Returns `false` if the queue was already closed.
    pub(crate) fn close_outbound(&self) -> bool {
        let was_open = self.outbound.lock().take().is_some();
        self.closed.cancel();
        was_open
    }

    /// Cancelled once the session is deregistered, shed or drained.
    pub(crate) fn closed(&self) -> &CancellationToken {
        &self.closed
    }

    /// Session-local room set. Only the registry mutates it.
    pub(crate) fn room_set(&self) -> MutexGuard<'_, HashSet<String>> {
        self.rooms.lock()
    }

    fn record_drop(&self) {
        let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .field("rooms", &self.rooms())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::test_support::detached_hub;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn emit_queues_message() {
        let hub = detached_hub(4);
        let (session, mut rx) = hub.create_session();
        assert_eq!(session.emit("hello", json!({"n": 1})), SendStatus::Queued);
        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.event, "hello");
        assert_eq!(msg.data["n"], 1);
    }

    #[test]
    fn emit_preserves_order() {
        let hub = detached_hub(8);
        let (session, mut rx) = hub.create_session();
        for i in 0..5 {
            let _ = session.emit("tick", json!(i));
        }
        for i in 0..5 {
            assert_eq!(rx.try_recv().unwrap().data, json!(i));
        }
    }

    #[test]
    fn emit_after_close_is_dropped() {
        let hub = detached_hub(4);
        let (session, _rx) = hub.create_session();
        assert!(session.close_outbound());
        assert!(!session.close_outbound());
        assert_eq!(session.emit("late", Value::Null), SendStatus::Closed);
        assert_eq!(session.dropped_messages(), 1);
    }

    #[test]
    fn full_queue_sheds_registered_session() {
        let hub = detached_hub(2);
        let (session, _rx) = hub.create_session();
        hub.admit_for_test(&session);
        let _ = session.join("lobby");

        assert_eq!(session.emit("a", Value::Null), SendStatus::Queued);
        assert_eq!(session.emit("b", Value::Null), SendStatus::Queued);
        assert_eq!(session.emit("c", Value::Null), SendStatus::Shed);

        assert!(!session.is_open());
        assert!(session.rooms().is_empty());
        assert_eq!(hub.connection_count(), 0);
        assert!(hub.room_names().is_empty());
        assert_eq!(session.emit("d", Value::Null), SendStatus::Closed);
        assert!(session.closed().is_cancelled());
    }

    #[test]
    fn full_queue_on_unregistered_session_is_closed() {
        let hub = detached_hub(1);
        let (session, _rx) = hub.create_session();
        assert_eq!(session.emit("a", Value::Null), SendStatus::Queued);
        assert_eq!(session.emit("b", Value::Null), SendStatus::Closed);
    }

    #[test]
    fn join_and_leave_are_idempotent() {
        let hub = detached_hub(4);
        let (session, _rx) = hub.create_session();
        hub.admit_for_test(&session);

        assert!(session.join("lobby"));
        assert!(!session.join("lobby"));
        assert_eq!(hub.room_members("lobby"), vec![session.id().clone()]);

        assert!(session.leave("lobby"));
        assert!(!session.leave("lobby"));
        assert!(hub.room_names().is_empty());
    }

    #[test]
    fn join_refused_when_not_registered() {
        let hub = detached_hub(4);
        let (session, _rx) = hub.create_session();
        assert!(!session.join("lobby"));
        assert!(!session.in_room("lobby"));
        assert!(hub.room_names().is_empty());
    }

    #[test]
    fn broadcast_to_room_skips_sender_and_non_members() {
        let hub = detached_hub(4);
        let (a, mut ra) = hub.create_session();
        let (b, mut rb) = hub.create_session();
        let (c, mut rc) = hub.create_session();
        for s in [&a, &b, &c] {
            hub.admit_for_test(s);
        }
        let _ = a.join("lobby");
        let _ = b.join("lobby");

        assert_eq!(a.broadcast_to_room("lobby", "ping", Value::Null), 1);
        assert_eq!(rb.try_recv().unwrap().event, "ping");
        assert!(ra.try_recv().is_err());
        assert!(rc.try_recv().is_err());
    }

    #[test]
    fn broadcast_to_unknown_room_reaches_nobody() {
        let hub = detached_hub(4);
        let (a, _ra) = hub.create_session();
        hub.admit_for_test(&a);
        assert_eq!(a.broadcast_to_room("ghost", "ping", Value::Null), 0);
    }

    #[test]
    fn debug_output_names_session() {
        let hub = detached_hub(4);
        let (session, _rx) = hub.create_session();
        let out = format!("{session:?}");
        assert!(out.contains(session.id().as_str()));
    }

    #[derive(Clone, Debug)]
    enum Op {
        Join(usize, usize),
        Leave(usize, usize),
        Remove(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..4usize, 0..3usize).prop_map(|(s, r)| Op::Join(s, r)),
            (0..4usize, 0..3usize).prop_map(|(s, r)| Op::Leave(s, r)),
            (0..4usize).prop_map(Op::Remove),
        ]
    }

    proptest! {
        #[test]
        fn room_views_always_agree(ops in proptest::collection::vec(op(), 0..64)) {
            let hub = detached_hub(4);
            let rooms = ["a", "b", "c"];
            let sessions: Vec<_> = (0..4).map(|_| hub.create_session()).collect();
            for (s, _) in &sessions {
                hub.admit_for_test(s);
            }

            for op in ops {
                match op {
                    Op::Join(s, r) => { let _ = sessions[s].0.join(rooms[r]); }
                    Op::Leave(s, r) => { let _ = sessions[s].0.leave(rooms[r]); }
                    Op::Remove(s) => hub.remove_for_test(sessions[s].0.id()),
                }
            }

            for room in rooms {
                let members = hub.room_members(room);
                for (s, _) in &sessions {
                    prop_assert_eq!(s.in_room(room), members.contains(s.id()));
                }
            }
            for name in hub.room_names() {
                prop_assert!(!hub.room_members(&name).is_empty());
            }
        }
    }
}
