use log::{debug, info, warn};

use crate::connection::{close_channel, PeerConnection};
use crate::coordinator::{ConnectAttempt, Coordinator};
use crate::event::{ConnectOrigin, Deferred};
use crate::notify::{Notification, Severity};
use crate::protocol::PeerMessage;
use crate::relay_message::{ChannelId, RelayMessage};
use crate::session::Role;

/// Redirects one logical connect attempt may follow before it is abandoned.
pub const MAX_REDIRECT_HOPS: u8 = 1;

impl Coordinator {
    /// A remote peer opened a channel to us.
    pub(crate) fn on_inbound(&mut self, from: String, channel: ChannelId) {
        let local = match self.state.local_id.clone() {
            Some(id) => id,
            None => {
                debug!("Inbound channel from {} before identity was assigned", from);
                return;
            }
        };

        // Both sides dialled each other at once: the lower id hosts.
        let crossing = self
            .attempts
            .iter()
            .find(|(_, attempt)| attempt.target == from)
            .map(|(channel, _)| *channel);
        if let Some(own_channel) = crossing {
            if local < from {
                self.attempts.remove(&own_channel);
                close_channel(&self.link, &local, &from, own_channel);
            } else {
                close_channel(&self.link, &local, &from, channel);
                return;
            }
        }

        self.send_frame(RelayMessage::Accept {
            from: local.clone(),
            to: from.clone(),
            channel,
        });

        match self.state.role {
            Role::Guest => self.redirect_inbound(local, from, channel),
            Role::Host => {
                self.admit_guest(local, from.clone(), channel);
                self.notifier
                    .status(format!("{} connected!", from), Severity::Success);
            }
            Role::Unassigned => {
                self.set_host();
                self.admit_guest(local, from.clone(), channel);
                self.notifier.status(
                    format!("{} connected! You are the host.", from),
                    Severity::Success,
                );
                self.role_changed();
            }
        }
    }

    fn redirect_inbound(&mut self, local: String, from: String, channel: ChannelId) {
        let host = match self.state.host_id.clone() {
            Some(host) => host,
            None => {
                close_channel(&self.link, &local, &from, channel);
                return;
            }
        };
        let payload = match (PeerMessage::Redirect { host }).encode() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Could not encode redirect: {}", e);
                close_channel(&self.link, &local, &from, channel);
                return;
            }
        };
        self.send_frame(RelayMessage::Data {
            from: local,
            to: from.clone(),
            channel,
            payload,
        });
        self.redirecting.insert(channel, from.clone());
        self.notifier
            .status(format!("Redirected {} to host", from), Severity::Info);
        let grace = self.config().redirect_grace();
        self.schedule(grace, Deferred::CloseRedirected(channel));
    }

    pub(crate) fn close_redirected(&mut self, channel: ChannelId) {
        if let Some(remote) = self.redirecting.remove(&channel) {
            let local = self.state.local_id.clone().unwrap_or_default();
            close_channel(&self.link, &local, &remote, channel);
        }
    }

    fn admit_guest(&mut self, local: String, from: String, channel: ChannelId) {
        let conn = PeerConnection::new(local, from.clone(), channel, self.link.clone());
        if let Some(previous) = self.state.add_connection(conn) {
            debug!("Replacing channel {} to {}", previous.channel, from);
        }
        self.greet(&from);
        self.notifier.notify(Notification::PeerJoined {
            id: from.clone(),
            nickname: self.state.nickname_of(&from),
        });
        self.membership_changed();
    }

    pub(crate) fn set_host(&mut self) {
        self.state.become_host();
        self.state.pending_requests.clear();
        self.start_sync();
    }

    /// Opens a channel to `target`; it becomes our host unless it redirects us.
    pub(crate) fn connect(&mut self, target: String, hops: u8, origin: ConnectOrigin) {
        let local = match self.state.local_id.clone() {
            Some(id) => id,
            None => {
                self.notifier.status("No peer available", Severity::Error);
                return;
            }
        };
        if target == local {
            self.notifier
                .status("Cannot connect to yourself", Severity::Warning);
            return;
        }
        if self.state.connections.contains_key(&target)
            || self.attempts.values().any(|a| a.target == target)
        {
            self.notifier
                .status("Already connected to this peer", Severity::Warning);
            return;
        }
        if self.state.role != Role::Unassigned {
            self.notifier.status(
                "Already in a session; disconnect before joining another",
                Severity::Warning,
            );
            return;
        }

        let channel: ChannelId = rand::random();
        info!("Connecting to {} on channel {} ({:?})", target, channel, origin);
        self.send_frame(RelayMessage::Open {
            from: local,
            to: target.clone(),
            channel,
        });
        self.attempts.insert(
            channel,
            ConnectAttempt {
                target: target.clone(),
                hops,
                origin,
                opened: false,
                early: Vec::new(),
            },
        );
        if origin == ConnectOrigin::Manual {
            self.notifier
                .status(format!("Connecting to {}...", target), Severity::Info);
        }
        let timeout = self.config().connect_timeout();
        self.schedule(timeout, Deferred::ConnectTimedOut(channel));
    }

    pub(crate) fn on_outbound_opened(&mut self, from: String, channel: ChannelId) {
        match self.attempts.get_mut(&channel) {
            Some(attempt) if attempt.target == from && !attempt.opened => attempt.opened = true,
            _ => {
                debug!("Unexpected accept from {} on channel {}", from, channel);
                return;
            }
        }
        let window = self.config().redirect_window();
        self.schedule(window, Deferred::RedirectWindowElapsed(channel));
    }

    pub(crate) fn on_redirect(&mut self, channel: ChannelId, host: String) {
        let attempt = match self.attempts.remove(&channel) {
            Some(attempt) => attempt,
            None => return,
        };
        let local = self.state.local_id.clone().unwrap_or_default();
        close_channel(&self.link, &local, &attempt.target, channel);

        if attempt.hops >= MAX_REDIRECT_HOPS {
            warn!(
                "Redirected again by {} (to {}) after {} hop(s); abandoning",
                attempt.target, host, attempt.hops
            );
            self.notifier.status(
                format!("Too many redirects while connecting via {}", attempt.target),
                Severity::Error,
            );
            return;
        }
        self.notifier
            .status("Redirecting to host...", Severity::Info);
        let delay = self.config().follow_redirect_delay();
        self.schedule(
            delay,
            Deferred::FollowRedirect {
                target: host,
                hops: attempt.hops + 1,
            },
        );
    }

    /// The redirect window passed without a redirect: we are a guest now.
    pub(crate) fn accept_outbound(&mut self, channel: ChannelId) {
        let attempt = match self.attempts.remove(&channel) {
            Some(attempt) => attempt,
            None => return,
        };
        let local = self.state.local_id.clone().unwrap_or_default();
        if self.state.role != Role::Unassigned {
            close_channel(&self.link, &local, &attempt.target, channel);
            self.notifier.status(
                format!("Dropped connection to {}: already in a session", attempt.target),
                Severity::Warning,
            );
            return;
        }

        let host = attempt.target.clone();
        let conn = PeerConnection::new(local, host.clone(), channel, self.link.clone());
        self.state.become_guest(host.clone());
        self.state.add_connection(conn);
        self.greet(&host);

        let text = match attempt.origin {
            ConnectOrigin::Manual => "Connected! You are a guest.",
            ConnectOrigin::Redirect | ConnectOrigin::Handoff => "Connected to host! You are a guest.",
        };
        self.notifier.status(text, Severity::Success);
        self.role_changed();
        self.notifier.notify(Notification::PeerJoined {
            id: host.clone(),
            nickname: self.state.nickname_of(&host),
        });
        self.membership_changed();

        for msg in attempt.early {
            self.dispatch_message(host.clone(), msg);
        }
    }

    pub(crate) fn connect_timed_out(&mut self, channel: ChannelId) {
        if let Some(attempt) = self.attempts.remove(&channel) {
            let local = self.state.local_id.clone().unwrap_or_default();
            close_channel(&self.link, &local, &attempt.target, channel);
            self.notifier.status(
                format!("Connection to {} timed out", attempt.target),
                Severity::Error,
            );
        }
    }

    pub(crate) fn on_connect_failed(&mut self, peer: String, channel: ChannelId, reason: String) {
        if self.attempts.remove(&channel).is_some() {
            warn!("Connecting to {} failed: {}", peer, reason);
            self.notifier
                .status(format!("Connection error: {}", reason), Severity::Error);
        }
    }

    pub(crate) fn on_channel_closed(&mut self, from: String, channel: ChannelId) {
        if let Some(attempt) = self.attempts.remove(&channel) {
            self.notifier.status(
                format!("Connection to {} closed before it was established", attempt.target),
                Severity::Error,
            );
            return;
        }
        if self.redirecting.remove(&channel).is_some() {
            return;
        }
        match self.state.connections.get(&from) {
            Some(conn) if conn.channel == channel => {}
            _ => {
                debug!("Close for untracked channel {} from {}", channel, from);
                return;
            }
        }
        let nickname = self.state.nickname_of(&from);
        if let Some(mut conn) = self.state.remove_connection(&from) {
            conn.closed_by_remote();
        }
        self.peer_left(from.clone(), nickname);
        self.notifier
            .status(format!("{} disconnected", from), Severity::Warning);
    }

    fn peer_left(&self, id: String, nickname: Option<String>) {
        self.notifier
            .notify(Notification::PeerDisconnected { id, nickname });
        self.membership_changed();
        self.role_changed();
    }

    pub(crate) fn disconnect_peer(&mut self, id: &str) {
        let nickname = self.state.nickname_of(id);
        match self.state.remove_connection(id) {
            Some(mut conn) => conn.close(),
            None => {
                debug!("Disconnect of unknown peer {}", id);
                return;
            }
        }
        self.peer_left(id.to_owned(), nickname);
        if self.state.is_connected() {
            self.notifier
                .status(format!("Disconnected from {}", id), Severity::Info);
        } else {
            self.notifier.status("Disconnected", Severity::Info);
        }
    }

    pub(crate) fn disconnect_all(&mut self) {
        let local = self.state.local_id.clone().unwrap_or_default();
        for (channel, attempt) in self.attempts.drain() {
            close_channel(&self.link, &local, &attempt.target, channel);
        }
        for id in self.state.connected_peers() {
            let nickname = self.state.nickname_of(&id);
            if let Some(mut conn) = self.state.remove_connection(&id) {
                conn.close();
            }
            self.notifier
                .notify(Notification::PeerDisconnected { id, nickname });
        }
        self.state.reset_role();
        self.membership_changed();
        self.role_changed();
        self.notifier
            .status("Disconnected from all peers", Severity::Info);
    }

    pub(crate) fn request_host(&mut self) {
        if self.state.is_host() {
            self.notifier
                .status("You are already the host", Severity::Info);
            return;
        }
        if !self.state.is_connected() {
            self.notifier.status("Not connected", Severity::Warning);
            return;
        }
        self.broadcast(&PeerMessage::HostRequest {});
        self.notifier
            .status("Host control requested", Severity::Info);
    }

    pub(crate) fn on_host_request(&mut self, from: String) {
        if !self.state.is_host() {
            debug!("Ignoring host request from {}: not the host", from);
            return;
        }
        self.state.pending_requests.insert(from.clone());
        self.notifier.notify(Notification::PeerRequestingHost {
            id: from.clone(),
            nickname: self.state.nickname_of(&from),
        });
        self.role_changed();
        self.notifier.status(
            format!("{} is requesting host control", from),
            Severity::Warning,
        );
    }

    /// Hands the host role to the connected guest `target`.
    pub(crate) fn promote(&mut self, target: String) {
        if !self.state.is_host() {
            self.notifier
                .status("Only the host can promote a peer", Severity::Warning);
            return;
        }
        let local = match self.state.local_id.clone() {
            Some(id) => id,
            None => return,
        };
        let others: Vec<String> = self
            .state
            .connected_peers()
            .into_iter()
            .filter(|id| *id != target)
            .collect();
        match self.state.connections.get(&target) {
            Some(conn) if conn.is_open() => conn.send(&PeerMessage::HostGranted {
                guests: others.clone(),
                old_host: local,
            }),
            _ => {
                self.notifier
                    .status(format!("{} is not connected", target), Severity::Warning);
                return;
            }
        }

        let reconnect = PeerMessage::ReconnectToNewHost {
            new_host: target.clone(),
        };
        for id in &others {
            if let Some(conn) = self.state.connections.get(id) {
                conn.send(&reconnect);
            }
        }

        self.state.become_guest(target.clone());
        for id in others {
            let nickname = self.state.nickname_of(&id);
            if let Some(mut conn) = self.state.remove_connection(&id) {
                conn.close();
            }
            self.notifier
                .notify(Notification::PeerDisconnected { id, nickname });
        }

        self.role_changed();
        self.membership_changed();
        self.notifier.status(
            format!("Promoted {} to host. You are now a guest.", target),
            Severity::Info,
        );
    }

    pub(crate) fn on_host_granted(&mut self, from: String, guests: Vec<String>, old_host: String) {
        info!("{} handed host to us (old host {}), {} guest(s) to follow", from, old_host, guests.len());
        self.set_host();
        let text = if guests.is_empty() {
            "You are now the host!".to_owned()
        } else {
            format!(
                "You are now the host! Expecting {} guest(s) to reconnect.",
                guests.len()
            )
        };
        self.notifier.status(text, Severity::Success);
        self.role_changed();
    }

    pub(crate) fn on_reconnect_to_new_host(&mut self, from: String, new_host: String) {
        self.notifier.status(
            "Host changed. Reconnecting to new host...",
            Severity::Info,
        );
        let nickname = self.state.nickname_of(&from);
        if let Some(mut conn) = self.state.remove_connection(&from) {
            conn.close();
        }
        self.peer_left(from, nickname);
        let delay = self.config().reconnect_delay();
        self.schedule(delay, Deferred::ReconnectToHost(new_host));
    }
}
