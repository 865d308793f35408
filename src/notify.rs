use std::collections::HashMap;

use futures_channel::mpsc::UnboundedSender;
use log::debug;
use serde::Serialize;

use crate::protocol::PlaybackState;
use crate::session::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

/// What a session reports back to the host runtime and UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    IdentityAssigned {
        id: String,
    },
    MembershipChanged {
        peers: Vec<String>,
        nicknames: HashMap<String, String>,
    },
    RoleChanged {
        is_host: bool,
        connected: bool,
        host_requests: Vec<String>,
    },
    PeerJoined {
        id: String,
        nickname: Option<String>,
    },
    PeerDisconnected {
        id: String,
        nickname: Option<String>,
    },
    PeerRequestingHost {
        id: String,
        nickname: Option<String>,
    },
    NicknameUpdated {
        id: String,
        nickname: String,
    },
    ApplyPlayback(PlaybackState),
    NavigateTo {
        locator: String,
    },
    NoResourceLeft {
        reason: String,
    },
    Status {
        text: String,
        severity: Severity,
    },
    StateReport {
        id: Option<String>,
        role: Role,
        host: Option<String>,
        peers: Vec<String>,
        nicknames: HashMap<String, String>,
        host_requests: Vec<String>,
        resource: Option<String>,
    },
}

/// A notification tagged with the session it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub session: String,
    pub notification: Notification,
}

#[derive(Clone)]
pub struct Notifier {
    session: String,
    sink: UnboundedSender<Outbound>,
}

impl Notifier {
    pub fn new(session: String, sink: UnboundedSender<Outbound>) -> Self {
        Notifier { session, sink }
    }

    pub fn notify(&self, notification: Notification) {
        self.sink
            .unbounded_send(Outbound {
                session: self.session.clone(),
                notification,
            })
            .unwrap_or_else(|e| {
                debug!("Dropping notification for {}: {}", self.session, e);
            });
    }

    pub fn status(&self, text: impl Into<String>, severity: Severity) {
        self.notify(Notification::Status {
            text: text.into(),
            severity,
        });
    }
}
