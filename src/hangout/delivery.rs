// Owner gestures: record optimistically, then send or queue
//
// Sending is at-most-once and best effort. A snapshot that never gets its
// acknowledgement stays `delivered: false`; `resend_pending` is the manual way out.

use log::{debug, info, warn};

use crate::models::{ActionKind, Hangout, HangoutState, Message, Phase};
use crate::protocol::OutboundMessage;
use crate::store::Namespace;
use crate::transport::ChannelState;

use super::{HangoutClient, HangoutError, HangoutRepository, OfflineQueue};

impl HangoutClient {
    /// Record `action` against `peer`, transmitting it when the channel is open.
    ///
    /// Returns the snapshot as recorded. Transport failures are logged, not returned.
    pub fn initiate(
        &mut self,
        action: ActionKind,
        peer: &Hangout,
        pending_text: &str,
    ) -> Result<Hangout, HangoutError> {
        let timestamp = self.next_timestamp();
        let message = if pending_text.trim().is_empty() {
            None
        } else {
            Some(Message {
                text: pending_text.to_string(),
                timestamp,
                delivered: false,
                read: false,
                owner: Some(self.owner.username.clone()),
            })
        };

        let snapshot = Hangout {
            peer_id: peer.peer_id.clone(),
            peer_email: peer.peer_email.clone(),
            state: HangoutState::requested(action),
            message,
            timestamp,
            delivered: false,
            read: false,
        };

        let repository = HangoutRepository::new(self.store.as_ref(), &self.owner.username);

        if self.transport.state() == ChannelState::Open {
            match self.transport.send(&OutboundMessage::from_hangout(&snapshot)) {
                Ok(()) => debug!("Sent {} to {} ({})", snapshot.state, snapshot.peer_id, timestamp),
                Err(e) => warn!(
                    "Failed to send {} to {}; it stays undelivered: {}",
                    snapshot.state, snapshot.peer_id, e
                ),
            }

            let (hangouts, stored) = repository.upsert(Namespace::Online, snapshot.clone())?;
            self.session.set_hangouts(hangouts);
            self.session.set_hangout(stored);

            if let Some(message) = &snapshot.message {
                let history = repository.append_message(Namespace::Online, &snapshot.peer_id, message.clone())?;
                self.session.set_messages(&snapshot.peer_id, history);
            }
        } else {
            info!(
                "Channel {:?}; queueing {} for {} until it opens",
                self.transport.state(),
                snapshot.state,
                snapshot.peer_id
            );
            let queue = OfflineQueue::new(self.store.as_ref(), &self.owner.username).append(&snapshot)?;
            self.session.set_offline_hangouts(queue);
            self.session.set_hangout(snapshot.clone());

            if let Some(message) = &snapshot.message {
                repository.append_message(Namespace::Offline, &snapshot.peer_id, message.clone())?;
                let visible = repository.visible_messages(&snapshot.peer_id)?;
                self.session.set_messages(&snapshot.peer_id, visible);
            }
        }

        self.session.clear_pending_text();
        Ok(snapshot)
    }

    /// `initiate` against the focused peer with the composer's text
    pub fn initiate_focused(&mut self, action: ActionKind) -> Result<Option<Hangout>, HangoutError> {
        let Some(peer) = self.session.selected().cloned() else {
            warn!("No peer selected; ignoring {:?}", action);
            return Ok(None);
        };
        let text = self.session.pending_text().to_string();
        self.initiate(action, &peer, &text).map(Some)
    }

    /// Send every undelivered online record again. Returns how many frames went out.
    pub fn resend_pending(&mut self) -> Result<usize, HangoutError> {
        if self.transport.state() != ChannelState::Open {
            debug!("Channel not open; nothing resent");
            return Ok(0);
        }

        let repository = HangoutRepository::new(self.store.as_ref(), &self.owner.username);
        let mut sent = 0;
        for hangout in repository.hangouts(Namespace::Online)? {
            if hangout.delivered || hangout.state.phase() != Phase::Requested {
                continue;
            }
            match self.transport.send(&OutboundMessage::from_hangout(&hangout)) {
                Ok(()) => sent += 1,
                Err(e) => warn!("Resend to {} failed: {}", hangout.peer_id, e),
            }
        }
        info!("Resent {} undelivered actions", sent);
        Ok(sent)
    }
}
