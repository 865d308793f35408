use std::collections::HashMap;
use std::sync::Arc;

use futures_channel::mpsc::{unbounded, UnboundedSender};
use log::{debug, info};

use crate::config::SharedConfig;
use crate::coordinator::Coordinator;
use crate::error::CoordError;
use crate::event::{Command, SessionEvent};
use crate::notify::{Notifier, Outbound};
use crate::player::PlayerFactory;
use crate::session::SessionState;
use crate::transport::Connector;

struct SessionHandle {
    events: UnboundedSender<SessionEvent>,
    generation: u64,
}

impl SessionHandle {
    fn is_live(&self) -> bool {
        !self.events.is_closed()
    }
}

pub struct SessionRegistry {
    sessions: HashMap<String, SessionHandle>,
    connector: Arc<dyn Connector>,
    players: PlayerFactory,
    notifications: UnboundedSender<Outbound>,
    config: SharedConfig,
    next_generation: u64,
}

impl SessionRegistry {
    pub fn new(
        connector: Arc<dyn Connector>,
        players: PlayerFactory,
        notifications: UnboundedSender<Outbound>,
        config: SharedConfig,
    ) -> Self {
        SessionRegistry {
            sessions: HashMap::new(),
            connector,
            players,
            notifications,
            config,
            next_generation: 1,
        }
    }

    /// Returns the session for `key`, starting one if none is running.
    ///
    /// A running session keeps its identity and connections; it only takes
    /// the new resource and nickname.
    pub fn get_or_create(&mut self, key: &str, resource: Option<String>, nickname: &str) {
        if let Some(handle) = self.sessions.get(key).filter(|handle| handle.is_live()) {
            debug!("Refreshing session {} (generation {})", key, handle.generation);
            let refresh = SessionEvent::Command(Command::Refresh {
                resource: resource.clone(),
                nickname: nickname.to_owned(),
            });
            if handle.events.unbounded_send(refresh).is_ok() {
                return;
            }
            debug!("Session {} stopped while refreshing; replacing it", key);
        }

        let generation = self.next_generation;
        self.next_generation += 1;
        let (events, rx) = unbounded();
        let link = self.connector.open(events.clone());
        let coordinator = Coordinator::new(
            SessionState::new(key.to_owned(), resource, nickname.to_owned()),
            generation,
            link,
            events.clone(),
            Notifier::new(key.to_owned(), self.notifications.clone()),
            self.config.clone(),
            (self.players)(key),
        );
        info!("Created session {} (generation {})", key, generation);
        tokio::spawn(coordinator.run(rx));
        self.sessions
            .insert(key.to_owned(), SessionHandle { events, generation });
    }

    pub fn dispatch(&self, key: &str, command: Command) -> Result<(), CoordError> {
        let handle = self
            .sessions
            .get(key)
            .ok_or_else(|| CoordError::UnknownSession(key.to_owned()))?;
        handle
            .events
            .unbounded_send(SessionEvent::Command(command))
            .map_err(|_| CoordError::SessionClosed(key.to_owned()))
    }

    /// Stops the session for `key`, closing all of its connections. Unknown
    /// keys are ignored.
    pub fn destroy(&mut self, key: &str) {
        if let Some(handle) = self.sessions.remove(key) {
            info!("Destroying session {}", key);
            handle
                .events
                .unbounded_send(SessionEvent::Shutdown)
                .unwrap_or_else(|_| debug!("Session {} had already stopped", key));
        }
    }

    pub fn is_live(&self, key: &str) -> bool {
        self.sessions.get(key).map_or(false, SessionHandle::is_live)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.sessions.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        for (key, handle) in self.sessions.drain() {
            handle
                .events
                .unbounded_send(SessionEvent::Shutdown)
                .unwrap_or_else(|_| debug!("Session {} had already stopped", key));
        }
    }
}
