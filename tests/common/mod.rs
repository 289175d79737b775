// Common test utilities for integration tests
// Harness around HangoutClient with an in-memory store and channel, plus relay frame builders

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};

use log::LevelFilter;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use hangout_sync::hangout::{HangoutClient, HangoutError, SessionEvent};
use hangout_sync::models::{Hangout, Message, Owner};
use hangout_sync::store::{keys, MemoryStore, Namespace, PersistentStore, PersistentStoreExt, StoreError};
use hangout_sync::transport::MemoryTransport;

// Initialize logging once
static INIT_LOGGER: Once = Once::new();

/// Set up the logger for the tests
pub fn setup_logging() {
    INIT_LOGGER.call_once(|| {
        env_logger::Builder::new()
            .filter_level(LevelFilter::Debug)
            .is_test(true)
            .init();
    });
}

/// One owner's engine wired to fakes the test keeps handles on
pub struct Harness {
    pub client: HangoutClient,
    pub transport: MemoryTransport,
    pub store: MemoryStore,
    pub session_events: mpsc::UnboundedReceiver<SessionEvent>,
    owner: String,
}

impl Harness {
    /// Fresh store, channel closed
    pub fn new(owner: &str) -> Self {
        Self::with_store(owner, MemoryStore::new())
    }

    /// Reuse `store`, as a restarted app would
    pub fn with_store(owner: &str, store: MemoryStore) -> Self {
        setup_logging();
        let (transport, events) = MemoryTransport::new();
        let (client, session_events) = HangoutClient::new(
            Owner::new(owner),
            Box::new(store.clone()),
            Box::new(transport.clone()),
            events,
        )
        .expect("engine should start on a readable store");

        Harness {
            client,
            transport,
            store,
            session_events,
            owner: owner.to_string(),
        }
    }

    /// Open the channel and let the engine see the event
    pub fn connect(&mut self) {
        self.transport.open();
        self.client.process_pending_events();
    }

    pub fn disconnect(&mut self) {
        self.transport.drop_connection();
        self.client.process_pending_events();
    }

    /// Push a relay frame through the channel, as the relay would
    pub fn relay(&mut self, raw: &str) {
        self.transport.deliver(raw);
        self.client.process_pending_events();
    }

    /// Hand a frame straight to the engine to inspect its result
    pub fn receive(&mut self, raw: &str) -> Result<(), HangoutError> {
        self.client.on_channel_message(raw)
    }

    pub fn hangouts(&self) -> Vec<Hangout> {
        self.store
            .load_list(&Namespace::Online.hangouts_key(&self.owner))
            .expect("hangouts readable")
    }

    pub fn hangout(&self, peer: &str) -> Option<Hangout> {
        self.hangouts().into_iter().find(|h| h.peer_id == peer)
    }

    pub fn offline_queue(&self) -> Vec<Hangout> {
        self.store
            .load_list(&keys::offline_hangouts(&self.owner))
            .expect("offline queue readable")
    }

    pub fn messages(&self, peer: &str) -> Vec<Message> {
        self.store
            .load_list(&keys::messages(&self.owner, peer))
            .expect("messages readable")
    }

    pub fn offline_messages(&self, peer: &str) -> Vec<Message> {
        self.store
            .load_list(&keys::offline_messages(&self.owner, peer))
            .expect("offline messages readable")
    }

    pub fn unread(&self) -> Vec<Hangout> {
        self.store
            .load_list(&keys::unread_hangouts(&self.owner))
            .expect("unread list readable")
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.session_events.try_recv() {
            events.push(event);
        }
        events
    }
}

/// A hangout as the relay serializes it
pub fn hangout_json(peer: &str, state: &str, timestamp: i64, text: Option<&str>) -> Value {
    let mut hangout = json!({
        "username": peer,
        "email": format!("{}@example.com", peer),
        "state": state,
        "timestamp": timestamp,
    });
    if let Some(text) = text {
        hangout["message"] = json!({ "text": text, "timestamp": timestamp });
    }
    hangout
}

pub fn acknowledgement(peer: &str, state: &str, timestamp: i64, text: Option<&str>) -> String {
    json!({ "type": "ACKHOWLEDGEMENT", "hangout": hangout_json(peer, state, timestamp, text) }).to_string()
}

pub fn offline_acknowledgement(peer: &str, state: &str, timestamp: i64, text: Option<&str>) -> String {
    json!({ "type": "OFFLINE_ACKN", "hangout": hangout_json(peer, state, timestamp, text) }).to_string()
}

pub fn peer_action(peer: &str, state: &str, timestamp: i64, text: Option<&str>) -> String {
    json!({ "type": "HANGOUT", "hangout": hangout_json(peer, state, timestamp, text) }).to_string()
}

pub fn unread_batch(hangouts: &[Value]) -> String {
    json!({ "type": "UNREAD_HANGOUTS", "hangouts": hangouts }).to_string()
}

/// Store whose reads can be switched to fail, for disk-error paths
#[derive(Clone, Default)]
pub struct FailingStore {
    inner: MemoryStore,
    failing: Arc<AtomicBool>,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl PersistentStore for FailingStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk unavailable")));
        }
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.inner.remove(key)
    }
}
