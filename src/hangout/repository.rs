// Per-peer hangout records and message histories

use log::debug;

use crate::models::{Hangout, Message};
use crate::store::{Namespace, PersistentStore, PersistentStoreExt, StoreError};

/// Reads and writes one owner's hangout collections.
///
/// At most one record exists per peer in a collection written through
/// [`HangoutRepository::upsert`]; histories keep insertion order and are
/// matched by `timestamp`.
pub struct HangoutRepository<'a> {
    store: &'a dyn PersistentStore,
    owner: &'a str,
}

impl<'a> HangoutRepository<'a> {
    pub fn new(store: &'a dyn PersistentStore, owner: &'a str) -> Self {
        Self { store, owner }
    }

    pub fn hangouts(&self, namespace: Namespace) -> Result<Vec<Hangout>, StoreError> {
        self.store.load_list(&namespace.hangouts_key(self.owner))
    }

    pub fn find(&self, namespace: Namespace, peer_id: &str) -> Result<Option<Hangout>, StoreError> {
        Ok(self
            .hangouts(namespace)?
            .into_iter()
            .find(|h| h.peer_id == peer_id))
    }

    /// Replace the peer's record in place, or append it if the peer is new.
    ///
    /// Returns the whole collection and the record as stored.
    pub fn upsert(
        &self,
        namespace: Namespace,
        mut hangout: Hangout,
    ) -> Result<(Vec<Hangout>, Hangout), StoreError> {
        let key = namespace.hangouts_key(self.owner);
        let mut hangouts: Vec<Hangout> = self.store.load_list(&key)?;

        match hangouts.iter().position(|h| h.peer_id == hangout.peer_id) {
            Some(index) => {
                hangout.merge_flags_from(&hangouts[index]);
                hangouts[index] = hangout.clone();
                // Collapse duplicates left behind by older writers
                let mut seen = false;
                hangouts.retain(|h| {
                    if h.peer_id != hangout.peer_id {
                        return true;
                    }
                    let keep = !seen;
                    seen = true;
                    keep
                });
            }
            None => {
                debug!("First hangout with {} for {}", hangout.peer_id, self.owner);
                hangouts.push(hangout.clone());
            }
        }

        self.store.save_list(&key, &hangouts)?;
        Ok((hangouts, hangout))
    }

    pub fn messages(&self, namespace: Namespace, peer_id: &str) -> Result<Vec<Message>, StoreError> {
        self.store.load_list(&namespace.messages_key(self.owner, peer_id))
    }

    /// Online history followed by messages still waiting offline
    pub fn visible_messages(&self, peer_id: &str) -> Result<Vec<Message>, StoreError> {
        let mut messages = self.messages(Namespace::Online, peer_id)?;
        for pending in self.messages(Namespace::Offline, peer_id)? {
            if !messages.iter().any(|m| m.timestamp == pending.timestamp) {
                messages.push(pending);
            }
        }
        Ok(messages)
    }

    /// Append to the peer's history; a message already mirrored (same timestamp) is not repeated
    pub fn append_message(
        &self,
        namespace: Namespace,
        peer_id: &str,
        message: Message,
    ) -> Result<Vec<Message>, StoreError> {
        let key = namespace.messages_key(self.owner, peer_id);
        let mut messages: Vec<Message> = self.store.load_list(&key)?;

        match messages.iter().position(|m| m.timestamp == message.timestamp) {
            Some(index) => {
                debug!("Message {} already in history with {}", message.timestamp, peer_id);
                let mut merged = message;
                merged.merge_flags_from(&messages[index]);
                messages[index] = merged;
            }
            None => messages.push(message),
        }

        self.store.save_list(&key, &messages)?;
        Ok(messages)
    }

    /// Replace the message with the same timestamp; `None` when there is no such message
    pub fn update_message(
        &self,
        namespace: Namespace,
        peer_id: &str,
        message: Message,
    ) -> Result<Option<Vec<Message>>, StoreError> {
        let key = namespace.messages_key(self.owner, peer_id);
        let mut messages: Vec<Message> = self.store.load_list(&key)?;

        let Some(existing) = messages.iter_mut().find(|m| m.timestamp == message.timestamp) else {
            return Ok(None);
        };
        let mut merged = message;
        merged.merge_flags_from(existing);
        *existing = merged;

        self.store.save_list(&key, &messages)?;
        Ok(Some(messages))
    }

    pub fn remove_message(
        &self,
        namespace: Namespace,
        peer_id: &str,
        timestamp: i64,
    ) -> Result<Option<Message>, StoreError> {
        let key = namespace.messages_key(self.owner, peer_id);
        let mut messages: Vec<Message> = self.store.load_list(&key)?;

        let Some(index) = messages.iter().position(|m| m.timestamp == timestamp) else {
            return Ok(None);
        };
        let removed = messages.remove(index);

        if messages.is_empty() {
            self.store.remove(&key)?;
        } else {
            self.store.save_list(&key, &messages)?;
        }
        Ok(Some(removed))
    }

    /// Mark every online message from the peer as read
    pub fn mark_messages_read(&self, peer_id: &str) -> Result<Vec<Message>, StoreError> {
        let key = Namespace::Online.messages_key(self.owner, peer_id);
        let mut messages: Vec<Message> = self.store.load_list(&key)?;
        if messages.iter().any(|m| !m.read) {
            for message in messages.iter_mut() {
                message.read = true;
            }
            self.store.save_list(&key, &messages)?;
        }
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActionKind, HangoutState};
    use crate::store::MemoryStore;

    fn hangout(peer: &str, state: HangoutState, timestamp: i64) -> Hangout {
        Hangout {
            peer_id: peer.to_string(),
            peer_email: None,
            state,
            message: None,
            timestamp,
            delivered: false,
            read: false,
        }
    }

    fn message(text: &str, timestamp: i64) -> Message {
        Message {
            text: text.to_string(),
            timestamp,
            delivered: false,
            read: false,
            owner: Some("alice".to_string()),
        }
    }

    #[test]
    fn test_upsert_keeps_one_record_per_peer() {
        let store = MemoryStore::new();
        let repo = HangoutRepository::new(&store, "alice");

        repo.upsert(Namespace::Online, hangout("bob", HangoutState::requested(ActionKind::Invite), 1)).unwrap();
        repo.upsert(Namespace::Online, hangout("carol", HangoutState::received(ActionKind::Invite), 2)).unwrap();
        let (all, stored) = repo
            .upsert(Namespace::Online, hangout("bob", HangoutState::confirmed(ActionKind::Invite), 1))
            .unwrap();

        assert_eq!(all.len(), 2);
        assert_eq!(all[0].peer_id, "bob");
        assert_eq!(stored.state, HangoutState::confirmed(ActionKind::Invite));
    }

    #[test]
    fn test_upsert_does_not_regress_delivery() {
        let store = MemoryStore::new();
        let repo = HangoutRepository::new(&store, "alice");

        let mut delivered = hangout("bob", HangoutState::confirmed(ActionKind::Invite), 5);
        delivered.delivered = true;
        repo.upsert(Namespace::Online, delivered).unwrap();

        let (_, stored) = repo
            .upsert(Namespace::Online, hangout("bob", HangoutState::requested(ActionKind::Invite), 5))
            .unwrap();
        assert!(stored.delivered);
    }

    #[test]
    fn test_upsert_collapses_duplicates() {
        let store = MemoryStore::new();
        let duplicated = vec![
            hangout("bob", HangoutState::requested(ActionKind::Invite), 1),
            hangout("bob", HangoutState::requested(ActionKind::Message), 2),
        ];
        store.save_list("alice-hangouts", &duplicated).unwrap();

        let repo = HangoutRepository::new(&store, "alice");
        let (all, _) = repo
            .upsert(Namespace::Online, hangout("bob", HangoutState::requested(ActionKind::Block), 3))
            .unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].timestamp, 3);
    }

    #[test]
    fn test_message_history_mirror_is_idempotent() {
        let store = MemoryStore::new();
        let repo = HangoutRepository::new(&store, "alice");

        repo.append_message(Namespace::Online, "bob", message("one", 1)).unwrap();
        repo.append_message(Namespace::Online, "bob", message("two", 2)).unwrap();
        let history = repo.append_message(Namespace::Online, "bob", message("one", 1)).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].text, "one");
        assert_eq!(history[1].text, "two");
    }

    #[test]
    fn test_update_and_remove_by_timestamp() {
        let store = MemoryStore::new();
        let repo = HangoutRepository::new(&store, "alice");
        repo.append_message(Namespace::Offline, "bob", message("queued", 9)).unwrap();

        assert!(repo.update_message(Namespace::Online, "bob", message("queued", 9)).unwrap().is_none());

        let mut delivered = message("queued", 9);
        delivered.delivered = true;
        let history = repo.update_message(Namespace::Offline, "bob", delivered).unwrap().unwrap();
        assert!(history[0].delivered);

        let removed = repo.remove_message(Namespace::Offline, "bob", 9).unwrap();
        assert_eq!(removed.map(|m| m.text), Some("queued".to_string()));
        assert!(store.get("alice-bob-offline-messages").unwrap().is_none());
    }

    #[test]
    fn test_visible_messages_include_pending() {
        let store = MemoryStore::new();
        let repo = HangoutRepository::new(&store, "alice");
        repo.append_message(Namespace::Online, "bob", message("sent", 1)).unwrap();
        repo.append_message(Namespace::Offline, "bob", message("waiting", 2)).unwrap();

        let visible = repo.visible_messages("bob").unwrap();
        let texts: Vec<&str> = visible.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["sent", "waiting"]);
    }
}
