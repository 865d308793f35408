use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::connection::PeerConnection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Unassigned,
    Host,
    Guest,
}

/// Everything one sharing context knows about its party.
pub struct SessionState {
    pub key: String,
    /// Assigned once by the relay.
    pub local_id: Option<String>,
    pub role: Role,
    pub host_id: Option<String>,
    pub connections: HashMap<String, PeerConnection>,
    pub pending_requests: HashSet<String>,
    pub nicknames: HashMap<String, String>,
    pub resource: Option<String>,
    pub local_nickname: String,
}

impl SessionState {
    pub fn new(key: String, resource: Option<String>, local_nickname: String) -> Self {
        SessionState {
            key,
            local_id: None,
            role: Role::Unassigned,
            host_id: None,
            connections: Default::default(),
            pending_requests: Default::default(),
            nicknames: Default::default(),
            resource,
            local_nickname,
        }
    }

    pub fn is_host(&self) -> bool {
        self.role == Role::Host
    }

    pub fn is_connected(&self) -> bool {
        !self.connections.is_empty()
    }

    /// Connected peer ids, sorted so reports are stable.
    pub fn connected_peers(&self) -> Vec<String> {
        let mut peers: Vec<String> = self.connections.keys().cloned().collect();
        peers.sort();
        peers
    }

    pub fn host_requests(&self) -> Vec<String> {
        let mut requests: Vec<String> = self.pending_requests.iter().cloned().collect();
        requests.sort();
        requests
    }

    /// Nicknames of the connected peers only.
    pub fn peer_nicknames(&self) -> HashMap<String, String> {
        self.nicknames
            .iter()
            .filter(|(id, _)| self.connections.contains_key(*id))
            .map(|(id, name)| (id.clone(), name.clone()))
            .collect()
    }

    pub fn nickname_of(&self, id: &str) -> Option<String> {
        self.nicknames.get(id).cloned()
    }

    pub fn become_host(&mut self) {
        self.role = Role::Host;
        self.host_id = self.local_id.clone();
    }

    pub fn become_guest(&mut self, host: String) {
        self.role = Role::Guest;
        self.host_id = Some(host);
        self.pending_requests.clear();
    }

    pub fn reset_role(&mut self) {
        self.role = Role::Unassigned;
        self.host_id = None;
        self.pending_requests.clear();
    }

    /// Tracks `conn`, handing back any previous connection to the same peer.
    pub fn add_connection(&mut self, conn: PeerConnection) -> Option<PeerConnection> {
        self.connections.insert(conn.remote.clone(), conn)
    }

    /// Forgets a peer. When it was the last one the session drops back to
    /// `Unassigned`.
    pub fn remove_connection(&mut self, id: &str) -> Option<PeerConnection> {
        let removed = self.connections.remove(id)?;
        self.nicknames.remove(id);
        self.pending_requests.remove(id);
        if self.connections.is_empty() {
            self.reset_role();
        }
        Some(removed)
    }

    /// Whether the connection set is a star around the current host.
    pub fn is_star(&self) -> bool {
        match self.role {
            Role::Unassigned => self.connections.is_empty() && self.host_id.is_none(),
            Role::Host => self.local_id.is_some() && self.host_id == self.local_id,
            Role::Guest => match &self.host_id {
                Some(host) => self.connections.len() == 1 && self.connections.contains_key(host),
                None => false,
            },
        }
    }
}
