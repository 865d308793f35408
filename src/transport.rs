use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::{future, pin_mut, SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio_tungstenite::tungstenite::Message;

use crate::event::SessionEvent;
use crate::relay::{self, StateType, Tx};
use crate::relay_message::RelayMessage;

/// Opens relay links for sessions.
///
/// `open` returns immediately; frames from the relay arrive on `inbound` as
/// `SessionEvent::Relay`, followed by one `SessionEvent::LinkClosed` when the
/// link ends.
pub trait Connector: Send + Sync {
    fn open(&self, inbound: UnboundedSender<SessionEvent>) -> Tx;
}

fn deliver(inbound: &UnboundedSender<SessionEvent>, event: SessionEvent) -> bool {
    inbound.unbounded_send(event).is_ok()
}

async fn pump(mut frames: UnboundedReceiver<RelayMessage>, inbound: UnboundedSender<SessionEvent>) {
    while let Some(frame) = frames.next().await {
        if !deliver(&inbound, SessionEvent::Relay(frame)) {
            return;
        }
    }
    deliver(&inbound, SessionEvent::LinkClosed);
}

/// Relay running in this process.
#[derive(Clone)]
pub struct LocalConnector {
    state: StateType,
}

impl LocalConnector {
    pub fn new(state: StateType) -> Self {
        LocalConnector { state }
    }
}

impl Connector for LocalConnector {
    fn open(&self, inbound: UnboundedSender<SessionEvent>) -> Tx {
        let (tx, frames) = relay::attach(&self.state);
        tokio::spawn(pump(frames, inbound));
        tx
    }
}

/// Relay server reached over a websocket.
#[derive(Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        WsConnector { url: url.into() }
    }
}

impl Connector for WsConnector {
    fn open(&self, inbound: UnboundedSender<SessionEvent>) -> Tx {
        let (tx, outgoing) = unbounded::<RelayMessage>();
        tokio::spawn(run_ws_link(self.url.clone(), outgoing, inbound));
        tx
    }
}

async fn run_ws_link(
    url: String,
    outgoing: UnboundedReceiver<RelayMessage>,
    inbound: UnboundedSender<SessionEvent>,
) {
    let websocket = match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok((websocket, _)) => websocket,
        Err(e) => {
            warn!("Could not reach relay at {}: {}", url, e);
            deliver(&inbound, SessionEvent::LinkClosed);
            return;
        }
    };
    info!("Connected to relay at {}", url);
    let (mut sink, mut stream) = websocket.split();

    let send_frames = async {
        let mut outgoing = outgoing;
        while let Some(frame) = outgoing.next().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Could not encode frame {:?}: {}", frame, e);
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(text)).await {
                warn!("Relay link write failed: {}", e);
                break;
            }
        }
        let _ = sink.close().await;
    };

    let receive_frames = async {
        while let Some(msg) = stream.next().await {
            let text = match msg {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    warn!("Relay link read failed: {}", e);
                    break;
                }
            };
            match serde_json::from_str::<RelayMessage>(&text) {
                Ok(frame) => {
                    if !deliver(&inbound, SessionEvent::Relay(frame)) {
                        break;
                    }
                }
                Err(e) => debug!("Ignoring malformed frame from relay: {}", e),
            }
        }
    };

    pin_mut!(send_frames, receive_frames);
    future::select(send_frames, receive_frames).await;
    info!("Relay link to {} closed", url);
    deliver(&inbound, SessionEvent::LinkClosed);
}
