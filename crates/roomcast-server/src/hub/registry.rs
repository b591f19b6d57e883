//! Live session registry and room membership.
//!
//! One `Registry` sits behind the hub's `RwLock`. Every mutation of a
//! session's local room set happens here under the write lock, together with
//! the matching change to the [`RoomIndex`], so the two views never disagree.
//! Lock order is registry first, then the session's own mutexes.

use std::collections::HashMap;
use std::sync::Arc;

use roomcast_core::SessionId;

use super::rooms::RoomIndex;
use crate::websocket::session::Session;

/// Registered sessions plus the room index.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    sessions: HashMap<SessionId, Arc<Session>>,
    rooms: RoomIndex,
}

impl Registry {
    /// Admit a session. Returns `false` if its id is already registered.
    pub(crate) fn insert(&mut self, session: Arc<Session>) -> bool {
        if self.sessions.contains_key(session.id()) {
            return false;
        }
        let _ = self.sessions.insert(session.id().clone(), session);
        true
    }

    /// Remove a session, close its queue and drop it from every room.
    ///
    /// Returns the removed session, or `None` if it was not registered.
    pub(crate) fn remove(&mut self, id: &SessionId) -> Option<Arc<Session>> {
        let session = self.sessions.remove(id)?;
        let rooms: Vec<String> = session.room_set().drain().collect();
        for room in &rooms {
            let _ = self.rooms.leave(room, id);
        }
        let _ = session.close_outbound();
        Some(session)
    }

    /// Remove every session (shutdown).
    pub(crate) fn drain(&mut self) -> Vec<Arc<Session>> {
        let ids: Vec<SessionId> = self.sessions.keys().cloned().collect();
        ids.iter().filter_map(|id| self.remove(id)).collect()
    }

    /// Add a registered session to `room`.
    ///
    /// Returns `false` if the session is unknown or already a member.
    pub(crate) fn join(&mut self, session: &Session, room: &str) -> bool {
        if !self.sessions.contains_key(session.id()) {
            return false;
        }
        let added = session.room_set().insert(room.to_owned());
        let indexed = self.rooms.join(room, session.id());
        debug_assert_eq!(added, indexed, "room views disagree for {room}");
        added
    }

    /// Remove a session from `room`. Returns `false` if it was not a member.
    pub(crate) fn leave(&mut self, session: &Session, room: &str) -> bool {
        let removed = session.room_set().remove(room);
        let unindexed = self.rooms.leave(room, session.id());
        removed || unindexed
    }

    pub(crate) fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.get(id).cloned()
    }

    pub(crate) fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Every registered session except `exclude`.
    pub(crate) fn snapshot(&self, exclude: Option<&SessionId>) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .filter(|(id, _)| Some(*id) != exclude)
            .map(|(_, s)| Arc::clone(s))
            .collect()
    }

    /// Members of `room` except `exclude`.
    pub(crate) fn room_snapshot(
        &self,
        room: &str,
        exclude: Option<&SessionId>,
    ) -> Vec<Arc<Session>> {
        self.rooms
            .members(room)
            .filter(|id| Some(*id) != exclude)
            .filter_map(|id| self.sessions.get(id).cloned())
            .collect()
    }

    pub(crate) fn rooms(&self) -> &RoomIndex {
        &self.rooms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::test_support::detached_hub;

    #[test]
    fn insert_rejects_duplicate_id() {
        let hub = detached_hub(4);
        let (session, _rx) = hub.create_session();
        let mut registry = Registry::default();
        assert!(registry.insert(Arc::clone(&session)));
        assert!(!registry.insert(session));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn join_requires_registration() {
        let hub = detached_hub(4);
        let (session, _rx) = hub.create_session();
        let mut registry = Registry::default();
        assert!(!registry.join(&session, "lobby"));
        assert!(session.rooms().is_empty());

        let _ = registry.insert(Arc::clone(&session));
        assert!(registry.join(&session, "lobby"));
        assert!(session.in_room("lobby"));
        assert!(registry.rooms().contains("lobby", session.id()));
    }

    #[test]
    fn remove_clears_rooms_and_closes_queue() {
        let hub = detached_hub(4);
        let (session, _rx) = hub.create_session();
        let mut registry = Registry::default();
        let _ = registry.insert(Arc::clone(&session));
        let _ = registry.join(&session, "a");
        let _ = registry.join(&session, "b");

        let removed = registry.remove(session.id()).unwrap();
        assert_eq!(removed.id(), session.id());
        assert!(registry.rooms().is_empty());
        assert!(session.rooms().is_empty());
        assert!(!session.is_open());
        assert!(registry.remove(session.id()).is_none());
    }

    #[test]
    fn room_snapshot_excludes_sender() {
        let hub = detached_hub(4);
        let (a, _ra) = hub.create_session();
        let (b, _rb) = hub.create_session();
        let mut registry = Registry::default();
        let _ = registry.insert(Arc::clone(&a));
        let _ = registry.insert(Arc::clone(&b));
        let _ = registry.join(&a, "lobby");
        let _ = registry.join(&b, "lobby");

        let targets = registry.room_snapshot("lobby", Some(a.id()));
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].id(), b.id());
        assert_eq!(registry.snapshot(None).len(), 2);
    }

    #[test]
    fn drain_empties_everything() {
        let hub = detached_hub(4);
        let mut registry = Registry::default();
        for _ in 0..3 {
            let (s, _rx) = hub.create_session();
            let _ = registry.insert(Arc::clone(&s));
            let _ = registry.join(&s, "lobby");
        }
        assert_eq!(registry.drain().len(), 3);
        assert_eq!(registry.len(), 0);
        assert!(registry.rooms().is_empty());
    }
}
