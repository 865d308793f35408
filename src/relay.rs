use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::SystemTime;

use failure::{format_err, Error};
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::StreamExt;
use log::{debug, info};
use rand::distributions::Distribution;
use rand::{thread_rng, Rng};
use tokio::sync::Mutex;

use crate::metrics;
use crate::relay_message::{ChannelId, RelayMessage};

type Result<T> = std::result::Result<T, Error>;
pub type Tx = UnboundedSender<RelayMessage>;

const PEER_ID_LEN: usize = 5;
const MAX_PEER_ID_LEN: usize = 8;

fn generate_peer_id(len: usize) -> String {
    pub struct UserFriendlyAlphabet;
    impl Distribution<u8> for UserFriendlyAlphabet {
        fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> u8 {
            const GEN_ASCII_STR_CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
            GEN_ASCII_STR_CHARSET[(rng.next_u32() >> (32 - 5)) as usize]
        }
    }

    thread_rng()
        .sample_iter(&UserFriendlyAlphabet)
        .take(len)
        .map(char::from)
        .collect()
}

/// A registered identity and the channels it currently takes part in.
pub struct Peer {
    pub sender: Tx,
    pub channels: HashSet<ChannelId>,
}

pub struct Channel {
    pub initiator: String,
    pub acceptor: String,
    pub start_time: SystemTime,
}

impl Channel {
    fn connects(&self, a: &str, b: &str) -> bool {
        (self.initiator == a && self.acceptor == b) || (self.initiator == b && self.acceptor == a)
    }

    fn other_end(&self, id: &str) -> &str {
        if self.initiator == id {
            &self.acceptor
        } else {
            &self.initiator
        }
    }
}

#[derive(Default)]
pub struct RelayState {
    pub peers: HashMap<String, Peer>,
    pub channels: HashMap<ChannelId, Channel>,
}

pub type StateType = Arc<Mutex<RelayState>>;

impl RelayState {
    pub fn new() -> StateType {
        Arc::new(Mutex::new(RelayState::default()))
    }

    pub fn register(&mut self, sender: Tx) -> String {
        let mut len = PEER_ID_LEN;
        let mut id = generate_peer_id(len);
        let tries = 3;
        while self.peers.contains_key(&id) {
            for _ in 0..tries {
                id = generate_peer_id(len);
                if !self.peers.contains_key(&id) {
                    break;
                }
            }
            len = (len + 1).min(MAX_PEER_ID_LEN);
        }
        info!("Registered peer {}", id);
        metrics::NUM_REGISTERED_PEERS.inc();
        self.peers.insert(
            id.clone(),
            Peer {
                sender,
                channels: Default::default(),
            },
        );
        id
    }

    fn forward(&self, to: &str, frame: RelayMessage) -> Result<()> {
        let peer = self
            .peers
            .get(to)
            .ok_or_else(|| format_err!("Peer {} does not exist", to))?;
        peer.sender.unbounded_send(frame)?;
        Ok(())
    }

    fn open_channel(&mut self, from: &str, to: &str, channel: ChannelId) -> Result<()> {
        if !self.peers.contains_key(to) {
            return Err(format_err!("peer {} is not available", to));
        }
        if from == to {
            return Err(format_err!("cannot open a channel to yourself"));
        }
        if self.channels.contains_key(&channel) {
            return Err(format_err!("channel {} is already in use", channel));
        }
        self.channels.insert(
            channel,
            Channel {
                initiator: from.to_owned(),
                acceptor: to.to_owned(),
                start_time: SystemTime::now(),
            },
        );
        for id in [from, to] {
            if let Some(peer) = self.peers.get_mut(id) {
                peer.channels.insert(channel);
            }
        }
        metrics::NUM_OPEN_CHANNELS.inc();
        Ok(())
    }

    fn close_channel(&mut self, channel: ChannelId) -> Option<Channel> {
        let removed = self.channels.remove(&channel)?;
        for id in [&removed.initiator, &removed.acceptor] {
            if let Some(peer) = self.peers.get_mut(id) {
                peer.channels.remove(&channel);
            }
        }
        let duration_sec = removed
            .start_time
            .elapsed()
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        metrics::NUM_OPEN_CHANNELS.dec();
        metrics::CHANNEL_DURATION_SEC.observe(duration_sec);
        Some(removed)
    }

    fn is_routable(&self, from: &str, to: &str, channel: ChannelId) -> bool {
        self.channels
            .get(&channel)
            .map_or(false, |c| c.connects(from, to))
    }

    /// Releases an identity and closes every channel it still held.
    pub fn on_disconnect(&mut self, id: &str) {
        let peer = match self.peers.remove(id) {
            Some(peer) => peer,
            None => return,
        };
        info!("Releasing peer {}", id);
        metrics::NUM_REGISTERED_PEERS.dec();
        for channel in peer.channels {
            if let Some(removed) = self.close_channel(channel) {
                let other = removed.other_end(id).to_owned();
                self.forward(
                    &other,
                    RelayMessage::Close {
                        from: id.to_owned(),
                        to: other.clone(),
                        channel,
                    },
                )
                .unwrap_or_else(|e| debug!("Could not notify {} of close: {}", other, e));
            }
        }
    }
}

/// Applies one frame received on a link. `link` holds the identity registered
/// on that link, if any.
pub fn handle_frame(
    state: &mut RelayState,
    tx: &Tx,
    link: &mut Option<String>,
    frame: RelayMessage,
) -> Result<()> {
    if let RelayMessage::Register {} = frame {
        if let Some(id) = link {
            return Err(format_err!("link already registered as {}", id));
        }
        let id = state.register(tx.clone());
        *link = Some(id.clone());
        tx.unbounded_send(RelayMessage::Registered { id })?;
        return Ok(());
    }

    let sender = link
        .as_deref()
        .ok_or_else(|| format_err!("frame received before register"))?;

    match &frame {
        RelayMessage::Open { from, to, channel } => {
            check_sender(sender, from)?;
            match state.open_channel(from, to, *channel) {
                Ok(()) => state.forward(to, frame.clone())?,
                Err(e) => {
                    info!("Refusing channel {} from {} to {}: {}", channel, from, to, e);
                    tx.unbounded_send(RelayMessage::Unavailable {
                        to: from.clone(),
                        peer: to.clone(),
                        channel: *channel,
                        reason: e.to_string(),
                    })?;
                }
            }
        }
        RelayMessage::Accept { from, to, channel } | RelayMessage::Data { from, to, channel, .. } => {
            check_sender(sender, from)?;
            if !state.is_routable(from, to, *channel) {
                return Err(format_err!("channel {} does not connect {} and {}", channel, from, to));
            }
            state.forward(to, frame.clone())?;
        }
        RelayMessage::Close { from, to, channel } => {
            check_sender(sender, from)?;
            if !state.is_routable(from, to, *channel) {
                debug!("Close for unknown channel {} from {}", channel, from);
                return Ok(());
            }
            state.close_channel(*channel);
            state.forward(to, frame.clone())?;
        }
        RelayMessage::Register {} | RelayMessage::Registered { .. } | RelayMessage::Unavailable { .. } => {
            return Err(format_err!("unexpected frame from peer {}", sender));
        }
    }
    Ok(())
}

fn check_sender(link: &str, from: &str) -> Result<()> {
    if link != from {
        return Err(format_err!("link {} tried to send as {}", link, from));
    }
    Ok(())
}

/// Attaches an in-process link to the relay. Returns the sender for frames
/// going to the relay and the receiver for frames coming back.
pub fn attach(state: &StateType) -> (Tx, UnboundedReceiver<RelayMessage>) {
    let (client_tx, mut client_rx) = unbounded::<RelayMessage>();
    let (relay_tx, relay_rx) = unbounded();
    let state = state.clone();

    tokio::spawn(async move {
        let mut link = None;
        while let Some(frame) = client_rx.next().await {
            let mut locked_state = state.lock().await;
            if let Err(e) = handle_frame(&mut locked_state, &relay_tx, &mut link, frame) {
                info!("Error occurred when handling frame: {}", e);
            }
        }
        if let Some(id) = link {
            state.lock().await.on_disconnect(&id);
        }
    });

    (client_tx, relay_rx)
}
