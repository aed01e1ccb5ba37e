//! Which captains and users currently hold a live push session.
//!
//! The matcher consults this to decide between a push-channel event and a
//! queued push notification when offering a job.

use std::collections::HashSet;

use parking_lot::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceKind {
    Captain,
    User,
}

#[derive(Default)]
pub struct PresenceRegistry {
    captains: Mutex<HashSet<Uuid>>,
    users: Mutex<HashSet<Uuid>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, kind: PresenceKind, id: Uuid) {
        self.set(kind).lock().insert(id);
    }

    pub fn leave(&self, kind: PresenceKind, id: Uuid) {
        self.set(kind).lock().remove(&id);
    }

    pub fn is_online(&self, kind: PresenceKind, id: &Uuid) -> bool {
        self.set(kind).lock().contains(id)
    }

    fn set(&self, kind: PresenceKind) -> &Mutex<HashSet<Uuid>> {
        match kind {
            PresenceKind::Captain => &self.captains,
            PresenceKind::User => &self.users,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_and_leave_track_membership() {
        let registry = PresenceRegistry::new();
        let id = Uuid::new_v4();

        assert!(!registry.is_online(PresenceKind::Captain, &id));
        registry.join(PresenceKind::Captain, id);
        assert!(registry.is_online(PresenceKind::Captain, &id));
        registry.leave(PresenceKind::Captain, id);
        assert!(!registry.is_online(PresenceKind::Captain, &id));
    }

    #[test]
    fn roles_are_independent() {
        let registry = PresenceRegistry::new();
        let id = Uuid::new_v4();

        registry.join(PresenceKind::User, id);
        assert!(registry.is_online(PresenceKind::User, &id));
        assert!(!registry.is_online(PresenceKind::Captain, &id));
    }
}
