// WebSocket relay channel
// Owner identity travels in the URL query; the token is issued by whoever authenticated the user

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use url::Url;

use super::{ChannelEvent, ChannelState, EventBus, Subscription, TransportChannel, TransportError};
use crate::protocol::OutboundMessage;

enum Command {
    Frame(String),
    Close,
}

pub struct WebSocketChannel {
    state: Arc<AtomicU8>,
    outgoing: mpsc::UnboundedSender<Command>,
    bus: EventBus,
}

impl WebSocketChannel {
    /// Build the relay URL: `<server>?username=<owner>[&token=<token>]`
    pub fn channel_url(server: &str, owner: &str, token: Option<&str>) -> Result<Url, TransportError> {
        let mut url = Url::parse(server)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("username", owner);
            if let Some(token) = token {
                query.append_pair("token", token);
            }
        }
        Ok(url)
    }

    /// Start connecting in the background. The returned subscription is registered
    /// before the connection task runs, so it sees the `Open` event.
    pub fn connect(url: Url) -> (Self, Subscription) {
        let state = Arc::new(AtomicU8::new(ChannelState::Connecting as u8));
        let (outgoing, commands) = mpsc::unbounded_channel();
        let bus = EventBus::new();
        let events = bus.subscribe();

        tokio::spawn(run_channel(url, state.clone(), commands, bus.clone()));

        (WebSocketChannel { state, outgoing, bus }, events)
    }
}

impl TransportChannel for WebSocketChannel {
    fn state(&self) -> ChannelState {
        ChannelState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn send(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        let state = self.state();
        if state != ChannelState::Open {
            return Err(TransportError::NotOpen(state));
        }
        let frame = message.to_json()?;
        self.outgoing
            .send(Command::Frame(frame))
            .map_err(|_| TransportError::Closed)
    }

    fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    fn close(&self) {
        if self.outgoing.send(Command::Close).is_err() {
            debug!("Channel task already stopped");
        }
    }
}

async fn run_channel(
    url: Url,
    state: Arc<AtomicU8>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    bus: EventBus,
) {
    info!("Connecting to relay at {}://{}{}", url.scheme(), url.host_str().unwrap_or(""), url.path());

    let stream = match connect_async(url.as_str()).await {
        Ok((stream, _response)) => stream,
        Err(e) => {
            error!("Failed to connect to relay: {}", e);
            state.store(ChannelState::Closed as u8, Ordering::SeqCst);
            bus.publish(ChannelEvent::Error(e.to_string()));
            bus.publish(ChannelEvent::Close);
            return;
        }
    };

    state.store(ChannelState::Open as u8, Ordering::SeqCst);
    bus.publish(ChannelEvent::Open);
    info!("Relay channel open");

    let (mut sink, mut frames) = stream.split();

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Frame(text)) => {
                    if let Err(e) = sink.send(WsMessage::Text(text)).await {
                        error!("Failed to send frame: {}", e);
                        bus.publish(ChannelEvent::Error(e.to_string()));
                        break;
                    }
                }
                // The owning channel was dropped or asked to close
                Some(Command::Close) | None => {
                    state.store(ChannelState::Closing as u8, Ordering::SeqCst);
                    if let Err(e) = sink.send(WsMessage::Close(None)).await {
                        debug!("Close frame not sent: {}", e);
                    }
                    let _ = sink.close().await;
                    break;
                }
            },
            frame = frames.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => bus.publish(ChannelEvent::Message(text)),
                Some(Ok(WsMessage::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => bus.publish(ChannelEvent::Message(text)),
                    Err(_) => warn!("Dropping non UTF-8 binary frame"),
                },
                Some(Ok(WsMessage::Close(_))) | None => {
                    info!("Relay closed the channel");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!("Relay channel error: {}", e);
                    bus.publish(ChannelEvent::Error(e.to_string()));
                    break;
                }
            },
        }
    }

    state.store(ChannelState::Closed as u8, Ordering::SeqCst);
    bus.publish(ChannelEvent::Close);
}
