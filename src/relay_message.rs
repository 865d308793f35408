use serde::{Deserialize, Serialize};

/// Identifier of one channel between two peers, picked by the initiator.
pub type ChannelId = u64;

/// Frames exchanged between a peer and the relay.
///
/// Everything except `register`/`registered` names both endpoints so the relay
/// can route it without any per-link lookup beyond the sender check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayMessage {
    Register {},
    Registered {
        id: String,
    },
    Open {
        from: String,
        to: String,
        channel: ChannelId,
    },
    Accept {
        from: String,
        to: String,
        channel: ChannelId,
    },
    Data {
        from: String,
        to: String,
        channel: ChannelId,
        payload: serde_json::Value,
    },
    Close {
        from: String,
        to: String,
        channel: ChannelId,
    },
    Unavailable {
        to: String,
        peer: String,
        channel: ChannelId,
        reason: String,
    },
}
