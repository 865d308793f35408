//! One task per session drains its event queue in arrival order. Nothing else
//! touches the session's state.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::time::Duration;

use futures_channel::mpsc::{UnboundedReceiver, UnboundedSender};
use futures_util::StreamExt;
use log::{debug, info, warn};

use crate::config::{self, Config, SharedConfig};
use crate::connection::close_channel;
use crate::event::{Command, ConnectOrigin, Deferred, SessionEvent};
use crate::notify::{Notification, Notifier, Severity};
use crate::player::Player;
use crate::protocol::PeerMessage;
use crate::relay::Tx;
use crate::relay_message::{ChannelId, RelayMessage};
use crate::session::SessionState;

/// An outbound channel that has not been accepted as a connection yet.
pub(crate) struct ConnectAttempt {
    pub target: String,
    pub hops: u8,
    pub origin: ConnectOrigin,
    pub opened: bool,
    /// Messages that arrived during the redirect window, replayed on acceptance.
    pub early: Vec<PeerMessage>,
}

pub struct Coordinator {
    pub(crate) state: SessionState,
    pub(crate) generation: u64,
    pub(crate) link: Tx,
    pub(crate) events: UnboundedSender<SessionEvent>,
    pub(crate) notifier: Notifier,
    pub(crate) config: SharedConfig,
    pub(crate) player: Box<dyn Player>,
    pub(crate) attempts: HashMap<ChannelId, ConnectAttempt>,
    /// Inbound channels we answered with a redirect, by channel.
    pub(crate) redirecting: HashMap<ChannelId, String>,
    pub(crate) sync_token: u64,
}

impl Coordinator {
    pub fn new(
        state: SessionState,
        generation: u64,
        link: Tx,
        events: UnboundedSender<SessionEvent>,
        notifier: Notifier,
        config: SharedConfig,
        player: Box<dyn Player>,
    ) -> Self {
        Coordinator {
            state,
            generation,
            link,
            events,
            notifier,
            config,
            player,
            attempts: Default::default(),
            redirecting: Default::default(),
            sync_token: 0,
        }
    }

    pub async fn run(mut self, mut events: UnboundedReceiver<SessionEvent>) {
        info!("Session {} starting (generation {})", self.state.key, self.generation);
        self.send_frame(RelayMessage::Register {});
        while let Some(event) = events.next().await {
            if let ControlFlow::Break(()) = self.handle(event) {
                break;
            }
        }
        self.teardown();
        info!("Session {} stopped", self.state.key);
    }

    pub fn handle(&mut self, event: SessionEvent) -> ControlFlow<()> {
        match event {
            SessionEvent::Command(command) => self.handle_command(command),
            SessionEvent::Relay(frame) => self.handle_frame(frame),
            SessionEvent::Deferred { generation, action } => {
                if generation == self.generation {
                    self.handle_deferred(action);
                } else {
                    debug!("Dropping stale deferred action {:?}", action);
                }
            }
            SessionEvent::LinkClosed => {
                warn!("Relay link for session {} closed", self.state.key);
                self.notifier
                    .status("Lost connection to the relay", Severity::Error);
                self.teardown();
                self.membership_changed();
                self.role_changed();
                return ControlFlow::Break(());
            }
            SessionEvent::Shutdown => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    fn handle_command(&mut self, command: Command) {
        debug!("Session {} command {:?}", self.state.key, command);
        match command {
            Command::Refresh { resource, nickname } => self.refresh(resource, nickname),
            Command::ConnectTo(target) => self.connect(target, 0, ConnectOrigin::Manual),
            Command::DisconnectPeer(id) => self.disconnect_peer(&id),
            Command::DisconnectAll => self.disconnect_all(),
            Command::RequestHost => self.request_host(),
            Command::Promote(id) => self.promote(id),
            Command::UpdateNickname(name) => self.update_nickname(name),
            Command::ResourceChanged(locator) => self.resource_changed(locator),
            Command::NoResourceLeft(reason) => self.announce_no_resource(reason),
            Command::PlaybackEvent(state) => self.broadcast_playback(state),
            Command::QueryState => self.report_state(),
        }
    }

    fn handle_frame(&mut self, frame: RelayMessage) {
        match frame {
            RelayMessage::Registered { id } => self.on_identity(id),
            RelayMessage::Open { from, channel, .. } => self.on_inbound(from, channel),
            RelayMessage::Accept { from, channel, .. } => self.on_outbound_opened(from, channel),
            RelayMessage::Data {
                from,
                channel,
                payload,
                ..
            } => self.on_data(from, channel, payload),
            RelayMessage::Close { from, channel, .. } => self.on_channel_closed(from, channel),
            RelayMessage::Unavailable {
                peer,
                channel,
                reason,
                ..
            } => self.on_connect_failed(peer, channel, reason),
            RelayMessage::Register {} => debug!("Ignoring register frame from relay"),
        }
    }

    fn handle_deferred(&mut self, action: Deferred) {
        match action {
            Deferred::RedirectWindowElapsed(channel) => self.accept_outbound(channel),
            Deferred::ConnectTimedOut(channel) => self.connect_timed_out(channel),
            Deferred::CloseRedirected(channel) => self.close_redirected(channel),
            Deferred::FollowRedirect { target, hops } => {
                self.connect(target, hops, ConnectOrigin::Redirect)
            }
            Deferred::ReconnectToHost(target) => self.connect(target, 0, ConnectOrigin::Handoff),
            Deferred::DisconnectAfterNoResource => {
                if self.state.is_host() {
                    self.disconnect_all();
                }
            }
            Deferred::SyncTick(token) => self.sync_tick(token),
        }
    }

    fn on_identity(&mut self, id: String) {
        if let Some(existing) = &self.state.local_id {
            warn!("Relay assigned {} but session already is {}", id, existing);
            return;
        }
        info!("Session {} is peer {}", self.state.key, id);
        self.state.local_id = Some(id.clone());
        self.notifier.notify(Notification::IdentityAssigned { id });
        self.report_state();
    }

    fn on_data(&mut self, from: String, channel: ChannelId, payload: serde_json::Value) {
        let msg = match PeerMessage::decode(payload) {
            Ok(msg) => msg,
            Err(e) => {
                debug!("Ignoring malformed message from {}: {}", from, e);
                return;
            }
        };

        if let Some(target) = self.attempts.get(&channel).map(|a| a.target.clone()) {
            if target != from {
                debug!("Ignoring message from {} on channel {}", from, channel);
                return;
            }
            match msg {
                PeerMessage::Redirect { host } => self.on_redirect(channel, host),
                other => {
                    if let Some(attempt) = self.attempts.get_mut(&channel) {
                        attempt.early.push(other);
                    }
                }
            }
            return;
        }

        if self.redirecting.contains_key(&channel) {
            debug!("Discarding message from redirected peer {}", from);
            return;
        }

        match self.state.connections.get(&from) {
            Some(conn) if conn.channel == channel => self.dispatch_message(from, msg),
            _ => debug!("Discarding message from untracked peer {}", from),
        }
    }

    fn refresh(&mut self, resource: Option<String>, nickname: String) {
        if nickname != self.state.local_nickname {
            self.update_nickname(nickname);
        }
        match resource {
            Some(locator) => self.resource_changed(locator),
            None => self.state.resource = None,
        }
        self.report_state();
        if self.state.is_connected() {
            self.notifier.status("Connected", Severity::Success);
        } else {
            self.notifier.status("Not connected", Severity::Info);
        }
    }

    /// Closes everything the session still holds open.
    fn teardown(&mut self) {
        let local = self.state.local_id.clone().unwrap_or_default();
        for (channel, attempt) in self.attempts.drain() {
            close_channel(&self.link, &local, &attempt.target, channel);
        }
        for (channel, remote) in self.redirecting.drain() {
            close_channel(&self.link, &local, &remote, channel);
        }
        for (_, mut conn) in self.state.connections.drain() {
            conn.close();
        }
        self.state.nicknames.clear();
        self.state.reset_role();
        self.sync_token += 1;
    }

    pub(crate) fn config(&self) -> Config {
        config::snapshot(&self.config)
    }

    pub(crate) fn send_frame(&self, frame: RelayMessage) {
        self.link.unbounded_send(frame).unwrap_or_else(|e| {
            debug!("Relay link for {} is gone: {}", self.state.key, e);
        });
    }

    /// Posts `action` back into this session after `delay`. Fires into the
    /// void once the session has stopped.
    pub(crate) fn schedule(&self, delay: Duration, action: Deferred) {
        let events = self.events.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            events
                .unbounded_send(SessionEvent::Deferred { generation, action })
                .unwrap_or_else(|_| debug!("Session ended before deferred action fired"));
        });
    }

    pub(crate) fn membership_changed(&self) {
        self.notifier.notify(Notification::MembershipChanged {
            peers: self.state.connected_peers(),
            nicknames: self.state.peer_nicknames(),
        });
    }

    pub(crate) fn role_changed(&self) {
        self.notifier.notify(Notification::RoleChanged {
            is_host: self.state.is_host(),
            connected: self.state.is_connected(),
            host_requests: self.state.host_requests(),
        });
    }

    pub(crate) fn report_state(&self) {
        self.notifier.notify(Notification::StateReport {
            id: self.state.local_id.clone(),
            role: self.state.role,
            host: self.state.host_id.clone(),
            peers: self.state.connected_peers(),
            nicknames: self.state.peer_nicknames(),
            host_requests: self.state.host_requests(),
            resource: self.state.resource.clone(),
        });
    }
}
