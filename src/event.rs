use crate::protocol::PlaybackState;
use crate::relay_message::{ChannelId, RelayMessage};

/// Commands the host runtime sends into a session.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Re-initialisation of a live session: new resource and nickname, same party.
    Refresh {
        resource: Option<String>,
        nickname: String,
    },
    ConnectTo(String),
    DisconnectPeer(String),
    DisconnectAll,
    RequestHost,
    Promote(String),
    UpdateNickname(String),
    ResourceChanged(String),
    NoResourceLeft(String),
    PlaybackEvent(PlaybackState),
    QueryState,
}

/// Why an outbound connect was started; only changes what gets reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOrigin {
    Manual,
    Redirect,
    Handoff,
}

/// Work a session scheduled for itself.
#[derive(Debug, Clone, PartialEq)]
pub enum Deferred {
    /// No redirect arrived on an outbound channel in time.
    RedirectWindowElapsed(ChannelId),
    ConnectTimedOut(ChannelId),
    /// Close an inbound channel we redirected.
    CloseRedirected(ChannelId),
    FollowRedirect { target: String, hops: u8 },
    ReconnectToHost(String),
    DisconnectAfterNoResource,
    SyncTick(u64),
}

/// Everything a session task reacts to, processed one at a time.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Command(Command),
    Relay(RelayMessage),
    /// The relay link is gone; the session identity is no longer valid.
    LinkClosed,
    Deferred { generation: u64, action: Deferred },
    Shutdown,
}
