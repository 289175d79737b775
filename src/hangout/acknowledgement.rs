// Inbound relay messages
// Acknowledgements confirm the owner's own actions; HANGOUT frames are peer actions.

use log::{debug, info, warn};

use crate::models::{Hangout, HangoutState, Message, Role};
use crate::protocol::{InboundMessage, ProtocolError};
use crate::store::Namespace;

use super::{HangoutClient, HangoutError, HangoutRepository, OfflineQueue, UnreadTracker};

impl HangoutClient {
    /// Single entry point for frames pushed by the relay.
    ///
    /// A malformed or inconsistent frame is logged and dropped; the error is
    /// returned for inspection but never poisons later frames.
    pub fn on_channel_message(&mut self, raw: &str) -> Result<(), HangoutError> {
        let message = match InboundMessage::parse(raw) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping malformed relay message: {}", e);
                return Err(e.into());
            }
        };
        debug!("Relay message {}", message.kind());

        let result = match message {
            InboundMessage::Acknowledgement { hangout } => self.handle_acknowledgement(hangout, false),
            InboundMessage::OfflineAck { hangout } => self.handle_acknowledgement(hangout, true),
            InboundMessage::PeerAction { hangout } => self.handle_peer_action(hangout, false),
            InboundMessage::UnreadBatch { hangouts } => {
                info!("{} unread hangouts delivered on reconnect", hangouts.len());
                let mut first_error = None;
                for hangout in hangouts {
                    if let Err(e) = self.handle_peer_action(hangout, true) {
                        warn!("Skipping unread hangout: {}", e);
                        first_error.get_or_insert(e);
                    }
                }
                first_error.map_or(Ok(()), Err)
            }
        };

        if let Err(e) = &result {
            warn!("Relay message not applied: {}", e);
        }
        result
    }

    /// Mark one of the owner's own actions as delivered.
    ///
    /// Acknowledgements always land in the online collection, also for replayed
    /// offline actions; `offline` additionally retires the queued entry.
    pub fn handle_acknowledgement(&mut self, hangout: Hangout, offline: bool) -> Result<(), HangoutError> {
        if hangout.state.role() != Role::Initiator {
            return Err(ProtocolError::UnexpectedState {
                kind: if offline { "OFFLINE_ACKN" } else { "ACKHOWLEDGEMENT" },
                state: hangout.state,
            }
            .into());
        }

        let owner = self.owner.username.clone();
        let peer_id = hangout.peer_id.clone();
        let timestamp = hangout.timestamp;
        let state = HangoutState::confirmed(hangout.state.action());

        let confirmed_message = hangout.message.clone().map(|m| Message {
            owner: Some(owner.clone()),
            delivered: true,
            ..m
        });
        let confirmed = Hangout {
            state,
            delivered: true,
            message: confirmed_message.clone(),
            ..hangout
        };

        let repository = HangoutRepository::new(self.store.as_ref(), &owner);

        // An online ack only yields to a newer action of the owner's own; timestamps from
        // the peer's clock are not comparable. Offline acks are always stored, since their
        // queue entry is retired below.
        let stale = !offline
            && matches!(
                repository.find(Namespace::Online, &peer_id)?,
                Some(existing)
                    if existing.state.role() == Role::Initiator && existing.timestamp > timestamp
            );
        if stale {
            debug!("Acknowledgement {} for {} is older than the current record", timestamp, peer_id);
        } else {
            let (hangouts, stored) = repository.upsert(Namespace::Online, confirmed)?;
            self.session.set_hangouts(hangouts);
            self.session.set_hangout(stored);
        }

        if let Some(message) = confirmed_message {
            let updated = repository.update_message(Namespace::Online, &peer_id, message.clone())?;
            if updated.is_none() {
                // Sent while offline: move it out of the offline history
                repository.remove_message(Namespace::Offline, &peer_id, message.timestamp)?;
                repository.append_message(Namespace::Online, &peer_id, message)?;
            }
            let visible = repository.visible_messages(&peer_id)?;
            self.session.set_messages(&peer_id, visible);
        }

        if offline {
            let (queue, removed) =
                OfflineQueue::new(self.store.as_ref(), &owner).acknowledge(timestamp)?;
            if removed.is_some() {
                info!("Offline {} for {} delivered", state, peer_id);
            }
            self.session.set_offline_hangouts(queue);
        }

        if !state.is_chat_message() && !stale {
            self.session.navigate(&peer_id, state);
        }
        Ok(())
    }

    /// Apply an action the peer performed against the owner.
    pub fn handle_peer_action(&mut self, hangout: Hangout, unread: bool) -> Result<(), HangoutError> {
        if hangout.state.role() != Role::Acknowledger {
            return Err(ProtocolError::UnexpectedState {
                kind: if unread { "UNREAD_HANGOUTS" } else { "HANGOUT" },
                state: hangout.state,
            }
            .into());
        }

        let owner = self.owner.username.clone();
        let peer_id = hangout.peer_id.clone();
        let focused = self.session.is_focused_on(&peer_id);
        let record = Hangout { read: focused, ..hangout };

        let repository = HangoutRepository::new(self.store.as_ref(), &owner);
        let (hangouts, stored) = repository.upsert(Namespace::Online, record)?;
        self.session.set_hangouts(hangouts);
        self.session.set_hangout(stored.clone());

        if focused {
            self.session.select(stored.clone());
            if !stored.state.is_chat_message() {
                self.session.navigate(&peer_id, stored.state);
            }
        }

        if let Some(message) = stored.message.clone() {
            let history = repository.append_message(
                Namespace::Online,
                &peer_id,
                Message { read: focused, ..message },
            )?;
            self.session.set_messages(&peer_id, history);
        }

        if unread || !focused {
            let list = UnreadTracker::new(self.store.as_ref(), &owner).append(&stored)?;
            self.session.set_unread(list);
        }

        debug!("{} from {} applied (focused: {})", stored.state, peer_id, focused);
        Ok(())
    }
}
