// Hangout delivery/acknowledgement synchronization engine
pub mod hangout;
pub mod models;
pub mod protocol;
pub mod store;
pub mod transport;

// Re-export main types for convenience
pub use hangout::{HangoutClient, HangoutError, SessionEvent, SessionStore};
pub use models::*;
pub use protocol::{InboundMessage, OutboundMessage};
pub use store::{FileStore, MemoryStore, PersistentStore};
pub use transport::{ChannelEvent, ChannelState, MemoryTransport, TransportChannel, WebSocketChannel};
