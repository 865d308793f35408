use std::time::{SystemTime, UNIX_EPOCH};

use log::debug;

use crate::coordinator::Coordinator;
use crate::event::Deferred;
use crate::notify::{Notification, Severity};
use crate::protocol::{PeerMessage, PlaybackAction, PlaybackState};
use crate::session::Role;

/// Wall clock in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Where the sender's media is now, given when the state was captured.
///
/// Only a playing state moves. A zero timestamp, or one from a clock ahead of
/// ours, counts as no elapsed time.
pub fn adjusted_time(state: &PlaybackState, now_ms: u64) -> f64 {
    if !state.is_playing() || state.timestamp == 0 {
        return state.time;
    }
    state.time + now_ms.saturating_sub(state.timestamp) as f64 / 1000.0
}

#[derive(Debug, Clone, PartialEq)]
pub struct Correction {
    pub target_time: f64,
    pub play: bool,
    pub pause: bool,
    pub seek_to: Option<f64>,
}

impl Correction {
    pub fn changes_anything(&self) -> bool {
        self.play || self.pause || self.seek_to.is_some()
    }
}

/// Decides what a guest's player has to do to match `state`.
pub fn plan_correction(
    state: &PlaybackState,
    local_time: f64,
    local_paused: bool,
    now_ms: u64,
    allowed_offset: f64,
) -> Correction {
    let target_time = adjusted_time(state, now_ms);
    let (play, pause) = match state.target_paused() {
        Some(false) => (local_paused, false),
        Some(true) => (false, !local_paused),
        None => (false, false),
    };
    let seek_to = if (local_time - target_time).abs() > allowed_offset {
        Some(target_time)
    } else {
        None
    };
    Correction {
        target_time,
        play,
        pause,
        seek_to,
    }
}

impl Coordinator {
    /// Handles a message that arrived on a tracked connection.
    pub(crate) fn dispatch_message(&mut self, from: String, msg: PeerMessage) {
        if msg.requires_host()
            && (self.state.role != Role::Guest || self.state.host_id.as_deref() != Some(from.as_str()))
        {
            debug!("Ignoring {:?} from {}: not our host", msg, from);
            return;
        }
        match msg {
            PeerMessage::NicknameUpdate { peer_id, nickname } => self.on_nickname(peer_id, nickname),
            PeerMessage::HostRequest {} => self.on_host_request(from),
            PeerMessage::HostGranted { guests, old_host } => {
                self.on_host_granted(from, guests, old_host)
            }
            PeerMessage::ReconnectToNewHost { new_host } => {
                self.on_reconnect_to_new_host(from, new_host)
            }
            PeerMessage::Redirect { host } => {
                debug!("Ignoring redirect to {} on established channel", host)
            }
            PeerMessage::ResourceChanged { locator } => self.on_resource_changed(locator),
            PeerMessage::NoResourceLeft { reason } => {
                self.notifier.status(
                    format!("Host has no video anymore: {}", reason),
                    Severity::Warning,
                );
                self.notifier.notify(Notification::NoResourceLeft { reason });
            }
            PeerMessage::Playback(state) => self.apply_playback(state),
        }
    }

    pub(crate) fn broadcast(&self, msg: &PeerMessage) {
        for conn in self.state.connections.values() {
            conn.send(msg);
        }
    }

    /// Introduces ourselves on a fresh connection.
    pub(crate) fn greet(&self, peer: &str) {
        let conn = match self.state.connections.get(peer) {
            Some(conn) => conn,
            None => return,
        };
        if let Some(id) = &self.state.local_id {
            conn.send(&PeerMessage::NicknameUpdate {
                peer_id: id.clone(),
                nickname: self.state.local_nickname.clone(),
            });
        }
        if self.state.is_host() {
            if let Some(locator) = &self.state.resource {
                conn.send(&PeerMessage::ResourceChanged {
                    locator: locator.clone(),
                });
            }
        }
    }

    fn on_nickname(&mut self, peer_id: String, nickname: String) {
        self.state.nicknames.insert(peer_id.clone(), nickname.clone());
        self.notifier.notify(Notification::NicknameUpdated {
            id: peer_id,
            nickname,
        });
        self.membership_changed();
    }

    pub(crate) fn update_nickname(&mut self, nickname: String) {
        self.state.local_nickname = nickname.clone();
        if let Some(id) = self.state.local_id.clone() {
            self.broadcast(&PeerMessage::NicknameUpdate {
                peer_id: id.clone(),
                nickname: nickname.clone(),
            });
            self.notifier
                .notify(Notification::NicknameUpdated { id, nickname });
        }
    }

    /// The local resource changed. Always stored; announced only by a
    /// connected host.
    pub(crate) fn resource_changed(&mut self, locator: String) {
        let changed = self.state.resource.as_deref() != Some(locator.as_str());
        self.state.resource = Some(locator.clone());
        if changed && self.state.is_host() && self.state.is_connected() {
            self.broadcast(&PeerMessage::ResourceChanged { locator });
        }
    }

    fn on_resource_changed(&mut self, locator: String) {
        if self.state.resource.as_deref() == Some(locator.as_str()) {
            debug!("Already at {}", locator);
            return;
        }
        self.state.resource = Some(locator.clone());
        self.notifier
            .status(format!("Host switched to {}", locator), Severity::Info);
        self.notifier.notify(Notification::NavigateTo { locator });
    }

    /// The host lost its resource: tell the guests, then end the party.
    pub(crate) fn announce_no_resource(&mut self, reason: String) {
        self.state.resource = None;
        if !self.state.is_host() || !self.state.is_connected() {
            return;
        }
        self.broadcast(&PeerMessage::NoResourceLeft {
            reason: reason.clone(),
        });
        self.notifier
            .status(format!("Ending the session: {}", reason), Severity::Info);
        let grace = self.config().no_resource_grace();
        self.schedule(grace, Deferred::DisconnectAfterNoResource);
    }

    pub(crate) fn broadcast_playback(&mut self, mut state: PlaybackState) {
        if !self.state.is_host() {
            debug!("Guests never emit playback; dropping {:?}", state.action);
            return;
        }
        if state.timestamp == 0 {
            state.timestamp = now_ms();
        }
        self.broadcast(&PeerMessage::Playback(state));
    }

    pub(crate) fn start_sync(&mut self) {
        self.sync_token += 1;
        let interval = self.config().sync_interval();
        self.schedule(interval, Deferred::SyncTick(self.sync_token));
    }

    pub(crate) fn sync_tick(&mut self, token: u64) {
        if token != self.sync_token || !self.state.is_host() {
            return;
        }
        if self.state.is_connected() {
            let state = PlaybackState {
                action: PlaybackAction::Sync,
                time: self.player.current_time(),
                paused: Some(self.player.is_paused()),
                timestamp: now_ms(),
            };
            self.broadcast(&PeerMessage::Playback(state));
        }
        let interval = self.config().sync_interval();
        self.schedule(interval, Deferred::SyncTick(token));
    }

    fn apply_playback(&mut self, state: PlaybackState) {
        let allowed_offset = self.config().allowed_offset_seconds;
        let correction = plan_correction(
            &state,
            self.player.current_time(),
            self.player.is_paused(),
            now_ms(),
            allowed_offset,
        );
        if correction.pause {
            self.player.pause();
        }
        if correction.play {
            self.player.play();
        }
        if let Some(time) = correction.seek_to {
            self.player.seek(time);
        }
        if correction.changes_anything() || state.action != PlaybackAction::Sync {
            self.notifier.notify(Notification::ApplyPlayback(PlaybackState {
                time: correction.target_time,
                ..state
            }));
        }
    }
}
