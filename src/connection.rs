use log::{debug, warn};

use crate::protocol::PeerMessage;
use crate::relay::Tx;
use crate::relay_message::{ChannelId, RelayMessage};

/// One open channel to a remote peer, carried over the session's relay link.
pub struct PeerConnection {
    pub remote: String,
    pub channel: ChannelId,
    local: String,
    link: Tx,
    open: bool,
}

impl PeerConnection {
    pub fn new(local: String, remote: String, channel: ChannelId, link: Tx) -> Self {
        PeerConnection {
            remote,
            channel,
            local,
            link,
            open: true,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open && !self.link.is_closed()
    }

    /// Sends `msg` to the remote peer. Sending on a closed channel is logged
    /// and otherwise ignored.
    pub fn send(&self, msg: &PeerMessage) {
        if !self.is_open() {
            debug!("Dropping {:?} to {}: channel closed", msg, self.remote);
            return;
        }
        let payload = match msg.encode() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Could not encode {:?}: {}", msg, e);
                return;
            }
        };
        self.link
            .unbounded_send(RelayMessage::Data {
                from: self.local.clone(),
                to: self.remote.clone(),
                channel: self.channel,
                payload,
            })
            .unwrap_or_else(|e| {
                debug!("Error sending to {}: {}", self.remote, e);
            });
    }

    pub fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        close_channel(&self.link, &self.local, &self.remote, self.channel);
    }

    /// Marks the channel closed after the remote side closed it.
    pub fn closed_by_remote(&mut self) {
        self.open = false;
    }
}

impl Drop for PeerConnection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Sends a `close` frame for a channel that has no `PeerConnection` yet.
pub fn close_channel(link: &Tx, local: &str, remote: &str, channel: ChannelId) {
    link.unbounded_send(RelayMessage::Close {
        from: local.to_owned(),
        to: remote.to_owned(),
        channel,
    })
    .unwrap_or_else(|e| {
        debug!("Error closing channel {} to {}: {}", channel, remote, e);
    });
}
