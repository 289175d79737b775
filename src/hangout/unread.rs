// Peer actions waiting for the owner's attention

use log::debug;

use crate::models::Hangout;
use crate::store::{keys, PersistentStore, PersistentStoreExt, StoreError};

pub struct UnreadTracker<'a> {
    store: &'a dyn PersistentStore,
    owner: &'a str,
}

impl<'a> UnreadTracker<'a> {
    pub fn new(store: &'a dyn PersistentStore, owner: &'a str) -> Self {
        Self { store, owner }
    }

    pub fn entries(&self) -> Result<Vec<Hangout>, StoreError> {
        self.store.load_list(&keys::unread_hangouts(self.owner))
    }

    /// Flat append; the list never nests previous values
    pub fn append(&self, hangout: &Hangout) -> Result<Vec<Hangout>, StoreError> {
        let key = keys::unread_hangouts(self.owner);
        let mut unread: Vec<Hangout> = self.store.load_list(&key)?;
        unread.push(hangout.clone());
        self.store.save_list(&key, &unread)?;
        Ok(unread)
    }

    /// Drop every entry from `peer_id`; selecting the peer means all of them were seen
    pub fn clear(&self, peer_id: &str) -> Result<Vec<Hangout>, StoreError> {
        let key = keys::unread_hangouts(self.owner);
        let mut unread: Vec<Hangout> = self.store.load_list(&key)?;

        let before = unread.len();
        unread.retain(|h| h.peer_id != peer_id);
        if unread.len() == before {
            debug!("Nothing unread from {}", peer_id);
        } else {
            self.store.save_list(&key, &unread)?;
        }
        Ok(unread)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActionKind, HangoutState};
    use crate::store::MemoryStore;

    fn inbound(peer: &str, timestamp: i64) -> Hangout {
        Hangout {
            peer_id: peer.to_string(),
            peer_email: None,
            state: HangoutState::received(ActionKind::Message),
            message: None,
            timestamp,
            delivered: true,
            read: false,
        }
    }

    #[test]
    fn test_append_is_flat() {
        let store = MemoryStore::new();
        let tracker = UnreadTracker::new(&store, "alice");
        tracker.append(&inbound("bob", 1)).unwrap();
        tracker.append(&inbound("carol", 2)).unwrap();
        tracker.append(&inbound("bob", 3)).unwrap();

        let raw = store.get("alice-unread-hangouts").unwrap().unwrap();
        let items = raw.as_array().unwrap();
        assert_eq!(items.len(), 3);
        assert!(items.iter().all(|item| item.is_object()));
    }

    #[test]
    fn test_clear_removes_every_entry_from_the_peer() {
        let store = MemoryStore::new();
        let tracker = UnreadTracker::new(&store, "alice");
        tracker.append(&inbound("bob", 1)).unwrap();
        tracker.append(&inbound("carol", 5)).unwrap();
        tracker.append(&inbound("bob", 9_999_999_999_999)).unwrap();

        let remaining = tracker.clear("bob").unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].peer_id, "carol");

        let remaining = tracker.clear("dave").unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(tracker.entries().unwrap().len(), 1);
    }
}
