use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use super::state::Room;

/// Mapping from room id to the live [`Room`] for that id.
pub struct RoomRegistry {
    rooms: Mutex<HashMap<String, Arc<Room>>>,
}

impl RoomRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            rooms: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the live room for `id`, creating it if there is none.
    /// Retired rooms are replaced rather than handed out again.
    pub fn get_or_create(self: &Arc<Self>, id: &str) -> Arc<Room> {
        let mut rooms = self.rooms.lock();
        if let Some(room) = rooms.get(id) {
            if !room.is_retired() {
                return Arc::clone(room);
            }
        }
        let room = Arc::new(Room::new(id.to_owned(), Arc::downgrade(self)));
        rooms.insert(id.to_owned(), Arc::clone(&room));
        info!(room = %id, "created room");
        room
    }

    pub fn get(&self, id: &str) -> Option<Arc<Room>> {
        self.rooms.lock().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.rooms.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.lock().is_empty()
    }

    /// Drops the mapping for `room` only if it is still the instance stored
    /// under its id and still has no members.
    pub(crate) fn remove_if_empty(&self, room: &Room) {
        let mut rooms = self.rooms.lock();
        let current = match rooms.get(room.id()) {
            Some(current) => current,
            None => return,
        };
        if std::ptr::eq(current.as_ref(), room) && room.is_empty() {
            rooms.remove(room.id());
            info!(room = %room.id(), "room removed (empty)");
        }
    }
}
