use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use thiserror::Error;
use tracing::info;

use super::registry::RoomRegistry;
use crate::peer::Peer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MembershipError {
    #[error("identity already present")]
    Duplicate,
    /// The room emptied and left the registry; join a fresh instance.
    #[error("room retired")]
    Retired,
}

struct Membership {
    members: HashMap<String, Arc<Peer>>,
    retired: bool,
}

/// A named set of peers whose audio is relayed to each other.
pub struct Room {
    id: String,
    membership: RwLock<Membership>,
    registry: Weak<RoomRegistry>,
}

impl Room {
    pub(super) fn new(id: String, registry: Weak<RoomRegistry>) -> Self {
        Self {
            id,
            membership: RwLock::new(Membership {
                members: HashMap::new(),
                retired: false,
            }),
            registry,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Optimistic pre-check only; [`Room::add_member`] is authoritative.
    pub fn has_member(&self, identity: &str) -> bool {
        self.membership.read().members.contains_key(identity)
    }

    /// Inserts `peer` unless its identity is already present. Returns the
    /// resulting member count.
    pub fn add_member(self: &Arc<Self>, peer: &Arc<Peer>) -> Result<usize, MembershipError> {
        let count = {
            let mut membership = self.membership.write();
            if membership.retired {
                return Err(MembershipError::Retired);
            }
            if membership.members.contains_key(peer.identity()) {
                return Err(MembershipError::Duplicate);
            }
            membership
                .members
                .insert(peer.identity().to_owned(), Arc::clone(peer));
            peer.set_room(self);
            membership.members.len()
        };
        info!(
            room = %self.id,
            peer = %peer.identity(),
            name = %peer.display_name(),
            members = count,
            "peer joined room"
        );
        Ok(count)
    }

    /// Removes `peer`'s identity (no-op if absent) and clears its room
    /// back-reference. An emptied room retires and leaves the registry.
    pub fn remove_member(&self, peer: &Peer) {
        let (remaining, retired) = {
            let mut membership = self.membership.write();
            membership.members.remove(peer.identity());
            peer.clear_room();
            if membership.members.is_empty() {
                membership.retired = true;
            }
            (membership.members.len(), membership.retired)
        };
        info!(
            room = %self.id,
            peer = %peer.identity(),
            members = remaining,
            "peer left room"
        );
        if retired {
            if let Some(registry) = self.registry.upgrade() {
                registry.remove_if_empty(self);
            }
        }
    }

    /// Point-in-time copy of the membership.
    pub fn members_snapshot(&self) -> Vec<Arc<Peer>> {
        self.membership.read().members.values().cloned().collect()
    }

    /// Calls `f` once per member of a snapshot taken under the read lock.
    /// The lock is released before the first call.
    pub fn for_each_member<F>(&self, mut f: F)
    where
        F: FnMut(&Arc<Peer>),
    {
        for peer in self.members_snapshot() {
            f(&peer);
        }
    }

    pub fn len(&self) -> usize {
        self.membership.read().members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.membership.read().members.is_empty()
    }

    pub fn is_retired(&self) -> bool {
        self.membership.read().retired
    }
}
