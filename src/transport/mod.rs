// Relay channel contract
// The engine only depends on this trait; reconnection policy lives with whoever builds the channel

use log::{debug, warn};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::protocol::{OutboundMessage, ProtocolError};

pub mod websocket;

pub use websocket::WebSocketChannel;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Channel is not open (state: {0:?})")]
    NotOpen(ChannelState),

    #[error("Channel task has stopped")]
    Closed,

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Invalid channel URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Encoding error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Ready state of the channel, numbered like a browser WebSocket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChannelState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ChannelState {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => ChannelState::Connecting,
            1 => ChannelState::Open,
            2 => ChannelState::Closing,
            _ => ChannelState::Closed,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Open,
    Message(String),
    Close,
    Error(String),
}

pub trait TransportChannel: Send {
    fn state(&self) -> ChannelState;

    /// Fire-and-forget; nothing waits for a response
    fn send(&self, message: &OutboundMessage) -> Result<(), TransportError>;

    fn subscribe(&self) -> Subscription;

    fn close(&self);
}

/// Fan-out of channel events to any number of subscribers
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<ChannelEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        match self.subscribers.lock() {
            Ok(mut subscribers) => subscribers.push(tx),
            Err(_) => warn!("Event bus lock poisoned; subscription will stay silent"),
        }
        Subscription { rx }
    }

    pub fn publish(&self, event: ChannelEvent) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            // A dropped Subscription closes its receiver; prune it here
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
            debug!("Published {:?} to {} subscribers", event, subscribers.len());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}

/// Receiving end of an [`EventBus`]; drop it to unsubscribe
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<ChannelEvent>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ChannelEvent> {
        self.rx.try_recv().ok()
    }
}

struct MemoryInner {
    state: ChannelState,
    sent: Vec<OutboundMessage>,
}

/// In-process channel used by tests and offline tooling.
///
/// Clones share state, so a test can keep one handle while the engine owns another.
#[derive(Clone)]
pub struct MemoryTransport {
    inner: Arc<Mutex<MemoryInner>>,
    bus: EventBus,
}

impl MemoryTransport {
    /// Starts closed
    pub fn new() -> (Self, Subscription) {
        let transport = MemoryTransport {
            inner: Arc::new(Mutex::new(MemoryInner {
                state: ChannelState::Closed,
                sent: Vec::new(),
            })),
            bus: EventBus::new(),
        };
        let events = transport.bus.subscribe();
        (transport, events)
    }

    fn set_state(&self, state: ChannelState) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.state = state;
        }
    }

    pub fn open(&self) {
        self.set_state(ChannelState::Open);
        self.bus.publish(ChannelEvent::Open);
    }

    pub fn drop_connection(&self) {
        self.set_state(ChannelState::Closed);
        self.bus.publish(ChannelEvent::Close);
    }

    pub fn fail(&self, reason: &str) {
        self.set_state(ChannelState::Closed);
        self.bus.publish(ChannelEvent::Error(reason.to_string()));
        self.bus.publish(ChannelEvent::Close);
    }

    /// Simulate a frame pushed by the relay
    pub fn deliver(&self, raw: &str) {
        self.bus.publish(ChannelEvent::Message(raw.to_string()));
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.inner.lock().map(|inner| inner.sent.clone()).unwrap_or_default()
    }

    pub fn take_sent(&self) -> Vec<OutboundMessage> {
        self.inner
            .lock()
            .map(|mut inner| std::mem::take(&mut inner.sent))
            .unwrap_or_default()
    }
}

impl TransportChannel for MemoryTransport {
    fn state(&self) -> ChannelState {
        self.inner.lock().map(|inner| inner.state).unwrap_or(ChannelState::Closed)
    }

    fn send(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().map_err(|_| TransportError::Closed)?;
        if inner.state != ChannelState::Open {
            return Err(TransportError::NotOpen(inner.state));
        }
        inner.sent.push(message.clone());
        Ok(())
    }

    fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    fn close(&self) {
        if self.state() == ChannelState::Open {
            self.drop_connection();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ActionKind;

    fn outbound(peer: &str) -> OutboundMessage {
        OutboundMessage {
            username: peer.to_string(),
            email: None,
            message: None,
            command: ActionKind::Invite,
            timestamp: 1,
            offline: None,
        }
    }

    #[test]
    fn test_dropped_subscription_is_pruned() {
        let bus = EventBus::new();
        let mut kept = bus.subscribe();
        let dropped = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        drop(dropped);
        bus.publish(ChannelEvent::Open);
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(kept.try_recv(), Some(ChannelEvent::Open));
        assert_eq!(kept.try_recv(), None);
    }

    #[test]
    fn test_memory_transport_refuses_send_when_closed() {
        let (transport, mut events) = MemoryTransport::new();
        assert!(matches!(
            transport.send(&outbound("bob")),
            Err(TransportError::NotOpen(ChannelState::Closed))
        ));

        transport.open();
        assert_eq!(events.try_recv(), Some(ChannelEvent::Open));
        transport.send(&outbound("bob")).unwrap();
        assert_eq!(transport.sent().len(), 1);
        assert_eq!(transport.take_sent().len(), 1);
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn test_ready_state_numbers() {
        assert_eq!(ChannelState::Open as u8, 1);
        assert_eq!(ChannelState::from_u8(2), ChannelState::Closing);
        assert_eq!(ChannelState::from_u8(9), ChannelState::Closed);
    }
}
