// Actions recorded while the channel was unavailable
// Entries leave the queue only when their OFFLINE_ACKN arrives, never on send

use log::{debug, info, warn};

use crate::models::Hangout;
use crate::protocol::OutboundMessage;
use crate::store::{keys, PersistentStore, PersistentStoreExt, StoreError};
use crate::transport::TransportChannel;

pub struct OfflineQueue<'a> {
    store: &'a dyn PersistentStore,
    owner: &'a str,
}

impl<'a> OfflineQueue<'a> {
    pub fn new(store: &'a dyn PersistentStore, owner: &'a str) -> Self {
        Self { store, owner }
    }

    pub fn entries(&self) -> Result<Vec<Hangout>, StoreError> {
        self.store.load_list(&keys::offline_hangouts(self.owner))
    }

    pub fn append(&self, hangout: &Hangout) -> Result<Vec<Hangout>, StoreError> {
        let key = keys::offline_hangouts(self.owner);
        let mut entries: Vec<Hangout> = self.store.load_list(&key)?;
        entries.push(hangout.clone());
        self.store.save_list(&key, &entries)?;
        debug!("Queued {} for {} ({} waiting)", hangout.state, hangout.peer_id, entries.len());
        Ok(entries)
    }

    /// Replay every queued entry with `offline: true`. Returns how many frames went out.
    pub fn flush(&self, channel: &dyn TransportChannel) -> Result<usize, StoreError> {
        let entries = self.entries()?;
        if entries.is_empty() {
            return Ok(0);
        }

        let mut sent = 0;
        for entry in &entries {
            match channel.send(&OutboundMessage::from_hangout(entry).replayed()) {
                Ok(()) => sent += 1,
                Err(e) => warn!(
                    "Failed to replay {} for {} ({}): {}",
                    entry.state, entry.peer_id, entry.timestamp, e
                ),
            }
        }
        info!("Replayed {}/{} offline actions for {}", sent, entries.len(), self.owner);
        Ok(sent)
    }

    /// Drop the entry acknowledged by `timestamp`; returns the remaining queue and the removed entry
    pub fn acknowledge(&self, timestamp: i64) -> Result<(Vec<Hangout>, Option<Hangout>), StoreError> {
        let key = keys::offline_hangouts(self.owner);
        let mut entries: Vec<Hangout> = self.store.load_list(&key)?;

        let removed = match entries.iter().position(|h| h.timestamp == timestamp) {
            Some(index) => Some(entries.remove(index)),
            None => {
                debug!("No queued entry for offline acknowledgement {}", timestamp);
                return Ok((entries, None));
            }
        };

        self.store.save_list(&key, &entries)?;
        Ok((entries, removed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActionKind, HangoutState};
    use crate::store::MemoryStore;
    use crate::transport::MemoryTransport;

    fn queued(peer: &str, timestamp: i64) -> Hangout {
        Hangout {
            peer_id: peer.to_string(),
            peer_email: None,
            state: HangoutState::requested(ActionKind::Invite),
            message: None,
            timestamp,
            delivered: false,
            read: false,
        }
    }

    #[test]
    fn test_flush_without_queue_is_a_no_op() {
        let store = MemoryStore::new();
        let (transport, _events) = MemoryTransport::new();
        transport.open();

        let sent = OfflineQueue::new(&store, "alice").flush(&transport).unwrap();
        assert_eq!(sent, 0);
        assert!(transport.sent().is_empty());
        assert!(store.keys().is_empty());
    }

    #[test]
    fn test_flush_marks_replays_and_keeps_entries() {
        let store = MemoryStore::new();
        let queue = OfflineQueue::new(&store, "alice");
        queue.append(&queued("bob", 1)).unwrap();
        queue.append(&queued("carol", 2)).unwrap();

        let (transport, _events) = MemoryTransport::new();
        transport.open();
        assert_eq!(queue.flush(&transport).unwrap(), 2);

        let sent = transport.sent();
        assert!(sent.iter().all(|m| m.offline == Some(true)));
        assert_eq!(sent[0].username, "bob");
        assert_eq!(queue.entries().unwrap().len(), 2);
    }

    #[test]
    fn test_acknowledge_removes_only_matching_entry() {
        let store = MemoryStore::new();
        let queue = OfflineQueue::new(&store, "alice");
        queue.append(&queued("bob", 1)).unwrap();
        queue.append(&queued("bob", 2)).unwrap();

        let (remaining, removed) = queue.acknowledge(1).unwrap();
        assert_eq!(removed.map(|h| h.timestamp), Some(1));
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].timestamp, 2);

        let (remaining, removed) = queue.acknowledge(99).unwrap();
        assert!(removed.is_none());
        assert_eq!(remaining.len(), 1);
    }
}
