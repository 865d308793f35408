
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackAction {
    Play,
    Pause,
    Seeked,
    Sync,
}

/// Snapshot of the host's player at the moment it was sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackState {
    pub action: PlaybackAction,
    /// Media position in seconds.
    pub time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
    /// Sender wall clock in milliseconds since the Unix epoch. Zero disables
    /// latency compensation.
    #[serde(default)]
    pub timestamp: u64,
}

impl PlaybackState {
    /// The paused state the sender wants the receiver in, if it says so.
    pub fn target_paused(&self) -> Option<bool> {
        match self.action {
            PlaybackAction::Play => Some(false),
            PlaybackAction::Pause => Some(true),
            PlaybackAction::Seeked | PlaybackAction::Sync => self.paused,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.target_paused() == Some(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerMessage {
    NicknameUpdate {
        peer_id: String,
        nickname: String,
    },
    HostRequest {},
    HostGranted {
        guests: Vec<String>,
        old_host: String,
    },
    ReconnectToNewHost {
        new_host: String,
    },
    Redirect {
        host: String,
    },
    ResourceChanged {
        locator: String,
    },
    NoResourceLeft {
        reason: String,
    },
    Playback(PlaybackState),
}

impl PeerMessage {
    /// Messages only the current host is allowed to send.
    pub fn requires_host(&self) -> bool {
        matches!(
            self,
            PeerMessage::HostGranted { .. }
                | PeerMessage::ReconnectToNewHost { .. }
                | PeerMessage::ResourceChanged { .. }
                | PeerMessage::NoResourceLeft { .. }
                | PeerMessage::Playback(_)
        )
    }

    pub fn decode(payload: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(payload)
    }

    pub fn encode(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}
