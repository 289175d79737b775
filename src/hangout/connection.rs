// Relay channel lifecycle
// Open triggers offline replay, Message feeds the acknowledgement handlers,
// Close/Error only update connectivity. Reconnecting is the caller's business.

use log::{debug, error, info, warn};

use crate::transport::{ChannelEvent, ChannelState, Subscription, TransportChannel};

use super::{observed_state, HangoutClient, HangoutError, OfflineQueue};

impl HangoutClient {
    pub fn handle_channel_event(&mut self, event: ChannelEvent) -> Result<(), HangoutError> {
        match event {
            ChannelEvent::Open => {
                self.on_open()?;
            }
            ChannelEvent::Message(raw) => self.on_channel_message(&raw)?,
            ChannelEvent::Close => {
                info!("Relay channel closed");
                self.session.set_connectivity(ChannelState::Closed);
            }
            ChannelEvent::Error(reason) => {
                error!("Relay channel error: {}", reason);
                self.session.record_error(&reason);
                self.session.set_connectivity(self.transport.state());
            }
        }
        Ok(())
    }

    /// Replays the offline queue exactly once per transition into `Open`.
    ///
    /// The session only turns `Open` once the replay went through, so a failed
    /// replay is attempted again by the next `Open` event or [`Self::retry_replay`].
    fn on_open(&mut self) -> Result<usize, HangoutError> {
        if self.session.connectivity() == ChannelState::Open {
            debug!("Channel already open; no replay");
            return Ok(0);
        }
        info!("Relay channel open for {}", self.owner.username);

        let sent = OfflineQueue::new(self.store.as_ref(), &self.owner.username)
            .flush(self.transport.as_ref())
            .map_err(|e| {
                error!("Offline replay failed; will retry: {}", e);
                e
            })?;
        self.session.set_connectivity(ChannelState::Open);
        Ok(sent)
    }

    /// Run a replay that failed when the channel opened. No-op unless the channel is
    /// open and the session has not seen a successful replay yet.
    pub fn retry_replay(&mut self) -> Result<usize, HangoutError> {
        if self.transport.state() != ChannelState::Open {
            return Ok(0);
        }
        self.on_open()
    }

    /// Handle every event already waiting, without blocking. Returns how many were handled.
    pub fn process_pending_events(&mut self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.events.try_recv() {
            if let Err(e) = self.handle_channel_event(event) {
                warn!("Channel event not applied: {}", e);
            }
            handled += 1;
        }
        handled
    }

    /// Wait for the next channel event; `None` once the channel is gone for good
    pub async fn next_channel_event(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }

    /// Swap in a freshly built channel; the old subscription is dropped
    pub fn replace_transport(&mut self, transport: Box<dyn TransportChannel>, events: Subscription) {
        self.transport.close();
        self.transport = transport;
        self.events = events;
        self.session.set_connectivity(observed_state(self.transport.as_ref()));
    }

    pub fn shutdown(&mut self) {
        info!("Shutting down relay channel for {}", self.owner.username);
        self.transport.close();
    }
}
