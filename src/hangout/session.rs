// In-memory view of the current session
// Rebuilt from the store at start-up, then kept current by the engine; observers get SessionEvents

use log::debug;
use tokio::sync::mpsc;

use crate::models::{Hangout, HangoutState, Message};
use crate::store::{keys, PersistentStore, PersistentStoreExt, StoreError};
use crate::transport::ChannelState;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    HangoutsUpdated(Vec<Hangout>),
    HangoutUpdated(Hangout),
    HangoutSelected(Hangout),
    OfflineHangoutsUpdated(Vec<Hangout>),
    MessagesUpdated { peer_id: String, messages: Vec<Message> },
    UnreadUpdated(Vec<Hangout>),
    /// Move the UI to the screen for `state` with `peer_id`
    Navigate { peer_id: String, state: HangoutState },
    Connectivity(ChannelState),
    TransportError(String),
}

pub struct SessionStore {
    hangouts: Vec<Hangout>,
    offline_hangouts: Vec<Hangout>,
    selected: Option<Hangout>,
    messages: Vec<Message>,
    unread: Vec<Hangout>,
    pending_text: String,
    connectivity: ChannelState,
    last_error: Option<String>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionStore {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            SessionStore {
                hangouts: Vec::new(),
                offline_hangouts: Vec::new(),
                selected: None,
                messages: Vec::new(),
                unread: Vec::new(),
                pending_text: String::new(),
                connectivity: ChannelState::Closed,
                last_error: None,
                events,
            },
            rx,
        )
    }

    /// Rebuild the session view from durable state
    pub fn load(
        store: &dyn PersistentStore,
        owner: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>), StoreError> {
        let (mut session, rx) = Self::new();
        session.hangouts = store.load_list(&keys::hangouts(owner))?;
        session.offline_hangouts = store.load_list(&keys::offline_hangouts(owner))?;
        session.unread = store.load_list(&keys::unread_hangouts(owner))?;
        debug!(
            "Session for {} loaded: {} hangouts, {} queued offline, {} unread",
            owner,
            session.hangouts.len(),
            session.offline_hangouts.len(),
            session.unread.len()
        );
        Ok((session, rx))
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            debug!("No session observer attached");
        }
    }

    pub fn hangouts(&self) -> &[Hangout] {
        &self.hangouts
    }

    pub fn offline_hangouts(&self) -> &[Hangout] {
        &self.offline_hangouts
    }

    pub fn selected(&self) -> Option<&Hangout> {
        self.selected.as_ref()
    }

    pub fn focused_peer(&self) -> Option<&str> {
        self.selected.as_ref().map(|h| h.peer_id.as_str())
    }

    pub fn is_focused_on(&self, peer_id: &str) -> bool {
        self.focused_peer() == Some(peer_id)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn unread(&self) -> &[Hangout] {
        &self.unread
    }

    pub fn connectivity(&self) -> ChannelState {
        self.connectivity
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn pending_text(&self) -> &str {
        &self.pending_text
    }

    pub fn set_pending_text(&mut self, text: &str) {
        self.pending_text = text.to_string();
    }

    pub fn clear_pending_text(&mut self) {
        self.pending_text.clear();
    }

    pub fn set_hangouts(&mut self, hangouts: Vec<Hangout>) {
        self.hangouts = hangouts.clone();
        self.emit(SessionEvent::HangoutsUpdated(hangouts));
    }

    /// A single record changed; the selection follows it when it is the same peer
    pub fn set_hangout(&mut self, hangout: Hangout) {
        if self.is_focused_on(&hangout.peer_id) {
            self.selected = Some(hangout.clone());
        }
        self.emit(SessionEvent::HangoutUpdated(hangout));
    }

    pub fn select(&mut self, hangout: Hangout) {
        if !self.is_focused_on(&hangout.peer_id) {
            self.messages.clear();
        }
        self.selected = Some(hangout.clone());
        self.emit(SessionEvent::HangoutSelected(hangout));
    }

    pub fn set_offline_hangouts(&mut self, hangouts: Vec<Hangout>) {
        self.offline_hangouts = hangouts.clone();
        self.emit(SessionEvent::OfflineHangoutsUpdated(hangouts));
    }

    /// Only the focused peer's history is cached; every update is still announced
    pub fn set_messages(&mut self, peer_id: &str, messages: Vec<Message>) {
        if self.is_focused_on(peer_id) {
            self.messages = messages.clone();
        }
        self.emit(SessionEvent::MessagesUpdated {
            peer_id: peer_id.to_string(),
            messages,
        });
    }

    pub fn set_unread(&mut self, unread: Vec<Hangout>) {
        self.unread = unread.clone();
        self.emit(SessionEvent::UnreadUpdated(unread));
    }

    pub fn navigate(&mut self, peer_id: &str, state: HangoutState) {
        self.emit(SessionEvent::Navigate {
            peer_id: peer_id.to_string(),
            state,
        });
    }

    pub fn set_connectivity(&mut self, state: ChannelState) {
        if self.connectivity != state {
            self.connectivity = state;
            if state == ChannelState::Open {
                self.last_error = None;
            }
            self.emit(SessionEvent::Connectivity(state));
        }
    }

    pub fn record_error(&mut self, error: &str) {
        self.last_error = Some(error.to_string());
        self.emit(SessionEvent::TransportError(error.to_string()));
    }
}
