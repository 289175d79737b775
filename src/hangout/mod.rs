// Hangout delivery and acknowledgement engine
// This file wires the store, the relay channel and the session view together.
// Behaviour is split by concern:
//   delivery.rs        - optimistic local record + send or queue
//   acknowledgement.rs - inbound relay messages
//   connection.rs      - channel lifecycle, offline replay

use log::{debug, info};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::models::{Hangout, Owner};
use crate::protocol::ProtocolError;
use crate::store::{Namespace, PersistentStore, StoreError};
use crate::transport::{ChannelState, Subscription, TransportChannel, TransportError};

pub mod acknowledgement;
pub mod connection;
pub mod delivery;
pub mod offline_queue;
pub mod repository;
pub mod session;
pub mod unread;

pub use offline_queue::OfflineQueue;
pub use repository::HangoutRepository;
pub use session::{SessionEvent, SessionStore};
pub use unread::UnreadTracker;

#[derive(Debug, Error)]
pub enum HangoutError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Connectivity as the session should first see it. An already open channel
/// still has its `Open` event queued, and that event is what triggers replay.
pub(crate) fn observed_state(transport: &dyn TransportChannel) -> ChannelState {
    match transport.state() {
        ChannelState::Open => ChannelState::Connecting,
        state => state,
    }
}

/// Client-side engine for one owner on one device.
///
/// Everything runs on the caller's task: gestures and channel events are
/// handled one at a time through `&mut self`.
pub struct HangoutClient {
    owner: Owner,
    store: Box<dyn PersistentStore>,
    transport: Box<dyn TransportChannel>,
    events: Subscription,
    session: SessionStore,
    last_timestamp: i64,
}

impl HangoutClient {
    /// Build the engine and rebuild the session view from the store.
    ///
    /// `events` must be a subscription on `transport`; the returned receiver
    /// carries [`SessionEvent`]s for UI observers.
    pub fn new(
        owner: Owner,
        store: Box<dyn PersistentStore>,
        transport: Box<dyn TransportChannel>,
        events: Subscription,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>), HangoutError> {
        let (mut session, rx) = SessionStore::load(store.as_ref(), &owner.username)?;
        session.set_connectivity(observed_state(transport.as_ref()));
        info!("Hangout engine ready for {}", owner.username);

        Ok((
            HangoutClient {
                owner,
                store,
                transport,
                events,
                session,
                last_timestamp: 0,
            },
            rx,
        ))
    }

    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn channel_state(&self) -> ChannelState {
        self.transport.state()
    }

    pub fn set_pending_text(&mut self, text: &str) {
        self.session.set_pending_text(text);
    }

    // Correlation ids must not collide when two actions land in the same millisecond
    fn next_timestamp(&mut self) -> i64 {
        let now = crate::models::now_millis();
        self.last_timestamp = now.max(self.last_timestamp + 1);
        self.last_timestamp
    }

    /// Focus a peer: load its history, mark it read and clear its unread entries.
    pub fn select_peer(&mut self, peer_id: &str) -> Result<Hangout, HangoutError> {
        let repository = HangoutRepository::new(self.store.as_ref(), &self.owner.username);

        let selected = match repository.find(Namespace::Online, peer_id)? {
            Some(mut hangout) => {
                hangout.read = true;
                let (hangouts, stored) = repository.upsert(Namespace::Online, hangout)?;
                self.session.set_hangouts(hangouts);
                stored
            }
            None => {
                // Only queued actions (or nothing at all) exist for this peer so far
                let queued = OfflineQueue::new(self.store.as_ref(), &self.owner.username)
                    .entries()?
                    .into_iter()
                    .filter(|h| h.peer_id == peer_id)
                    .last();
                queued.unwrap_or_else(|| Hangout::for_peer(peer_id, None))
            }
        };

        repository.mark_messages_read(peer_id)?;
        let messages = repository.visible_messages(peer_id)?;

        self.session.select(selected.clone());
        self.session.set_messages(peer_id, messages);

        let unread = UnreadTracker::new(self.store.as_ref(), &self.owner.username)
            .clear(peer_id)?;
        self.session.set_unread(unread);

        debug!("{} focused on {}", self.owner.username, peer_id);
        Ok(selected)
    }
}
