//! Room name → member set index.

use std::collections::{HashMap, HashSet};

use roomcast_core::SessionId;

/// Membership index keyed by room name.
///
/// A room exists only while it has at least one member.
#[derive(Debug, Default)]
pub struct RoomIndex {
    rooms: HashMap<String, HashSet<SessionId>>,
}

impl RoomIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `id` to `room`. Returns `false` if it was already a member.
    pub fn join(&mut self, room: &str, id: &SessionId) -> bool {
        self.rooms
            .entry(room.to_owned())
            .or_default()
            .insert(id.clone())
    }

    /// Remove `id` from `room`, dropping the room once empty.
    ///
    /// Returns `false` if `id` was not a member.
    pub fn leave(&mut self, room: &str, id: &SessionId) -> bool {
        let Some(members) = self.rooms.get_mut(room) else {
            return false;
        };
        let removed = members.remove(id);
        if members.is_empty() {
            let _ = self.rooms.remove(room);
        }
        removed
    }

    /// Whether `id` is a member of `room`.
    pub fn contains(&self, room: &str, id: &SessionId) -> bool {
        self.rooms.get(room).is_some_and(|m| m.contains(id))
    }

    /// Members of `room` (empty for an unknown room).
    pub fn members(&self, room: &str) -> impl Iterator<Item = &SessionId> {
        self.rooms.get(room).into_iter().flatten()
    }

    /// Number of members in `room`.
    pub fn member_count(&self, room: &str) -> usize {
        self.rooms.get(room).map_or(0, HashSet::len)
    }

    /// Sorted names of all non-empty rooms.
    pub fn room_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.rooms.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Number of non-empty rooms.
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// Whether there are no rooms.
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}
