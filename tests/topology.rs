use std::sync::Arc;
use std::time::Duration;

use futures_channel::mpsc::{unbounded, UnboundedReceiver};
use futures_util::StreamExt;

use syncwatch::config::{self, Config};
use syncwatch::error::CoordError;
use syncwatch::event::Command;
use syncwatch::notify::{Notification, Outbound, Severity};
use syncwatch::player::{Player, PlayerFactory, SharedClock};
use syncwatch::protocol::{PeerMessage, PlaybackAction, PlaybackState};
use syncwatch::registry::SessionRegistry;
use syncwatch::relay::{self, RelayState, StateType, Tx};
use syncwatch::relay_message::RelayMessage;
use syncwatch::session::Role;
use syncwatch::transport::LocalConnector;

const KEY: &str = "tab";

struct Snapshot {
    role: Role,
    host: Option<String>,
    peers: Vec<String>,
    host_requests: Vec<String>,
    resource: Option<String>,
}

/// One browser: a registry with a single session on the shared relay.
struct Participant {
    id: String,
    registry: SessionRegistry,
    clock: SharedClock,
    rx: UnboundedReceiver<Outbound>,
    seen: Vec<Notification>,
}

impl Participant {
    async fn join(relay: &StateType, nickname: &str, resource: Option<&str>) -> Participant {
        let (tx, mut rx) = unbounded();
        let clock = SharedClock::default();
        let player_clock = clock.clone();
        let players: PlayerFactory =
            Arc::new(move |_: &str| Box::new(player_clock.clone()) as Box<dyn Player>);
        let mut registry = SessionRegistry::new(
            Arc::new(LocalConnector::new(relay.clone())),
            players,
            tx,
            config::shared(Config::default()),
        );
        registry.get_or_create(KEY, resource.map(str::to_owned), nickname);

        let mut seen = Vec::new();
        let id = loop {
            let outbound = rx.next().await.expect("notification stream ended");
            if let Notification::IdentityAssigned { id } = &outbound.notification {
                break id.clone();
            }
            seen.push(outbound.notification);
        };
        Participant {
            id,
            registry,
            clock,
            rx,
            seen,
        }
    }

    fn send(&self, command: Command) {
        self.registry.dispatch(KEY, command).unwrap();
    }

    fn drain(&mut self) {
        while let Ok(Some(outbound)) = self.rx.try_next() {
            self.seen.push(outbound.notification);
        }
    }

    fn statuses(&self) -> Vec<(String, Severity)> {
        self.seen
            .iter()
            .filter_map(|n| match n {
                Notification::Status { text, severity } => Some((text.clone(), *severity)),
                _ => None,
            })
            .collect()
    }

    fn has_status(&self, wanted: &str, wanted_severity: Severity) -> bool {
        self.statuses()
            .iter()
            .any(|(text, severity)| text.starts_with(wanted) && *severity == wanted_severity)
    }

    fn navigations(&self) -> Vec<String> {
        self.seen
            .iter()
            .filter_map(|n| match n {
                Notification::NavigateTo { locator } => Some(locator.clone()),
                _ => None,
            })
            .collect()
    }

    async fn snapshot(&mut self) -> Snapshot {
        self.send(Command::QueryState);
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.drain();
        self.seen
            .iter()
            .rev()
            .find_map(|n| match n {
                Notification::StateReport {
                    role,
                    host,
                    peers,
                    host_requests,
                    resource,
                    ..
                } => Some(Snapshot {
                    role: *role,
                    host: host.clone(),
                    peers: peers.clone(),
                    host_requests: host_requests.clone(),
                    resource: resource.clone(),
                }),
                _ => None,
            })
            .expect("no state report")
    }
}

/// Lets redirect windows, grace periods and reconnects run their course.
async fn settle(participants: &mut [&mut Participant]) {
    tokio::time::sleep(Duration::from_secs(2)).await;
    for p in participants.iter_mut() {
        p.drain();
    }
}

fn sorted(mut ids: Vec<String>) -> Vec<String> {
    ids.sort();
    ids
}

#[tokio::test(start_paused = true)]
async fn connecting_to_a_guest_redirects_to_its_host() {
    let relay = RelayState::new();
    let mut a = Participant::join(&relay, "Alice", None).await;
    let mut b = Participant::join(&relay, "Bob", None).await;
    let mut c = Participant::join(&relay, "Carol", None).await;

    b.send(Command::ConnectTo(a.id.clone()));
    settle(&mut [&mut a, &mut b, &mut c]).await;
    c.send(Command::ConnectTo(b.id.clone()));
    settle(&mut [&mut a, &mut b, &mut c]).await;

    let host = a.snapshot().await;
    assert_eq!(host.role, Role::Host);
    assert_eq!(host.peers, sorted(vec![b.id.clone(), c.id.clone()]));

    for guest in [&mut b, &mut c] {
        let state = guest.snapshot().await;
        assert_eq!(state.role, Role::Guest);
        assert_eq!(state.host, Some(a.id.clone()));
        assert_eq!(state.peers, vec![a.id.clone()]);
    }
    assert!(b.has_status("Redirected", Severity::Info));
    assert!(c.has_status("Connected to host! You are a guest.", Severity::Success));
    assert!(a
        .seen
        .iter()
        .any(|n| *n == Notification::NicknameUpdated { id: c.id.clone(), nickname: "Carol".into() }));
}

#[tokio::test(start_paused = true)]
async fn promoting_a_guest_moves_the_whole_party() {
    let relay = RelayState::new();
    let mut h = Participant::join(&relay, "Host", None).await;
    let mut a = Participant::join(&relay, "A", None).await;
    let mut b = Participant::join(&relay, "B", None).await;
    let mut c = Participant::join(&relay, "C", None).await;

    for guest in [&a, &b, &c] {
        guest.send(Command::ConnectTo(h.id.clone()));
    }
    settle(&mut [&mut h, &mut a, &mut b, &mut c]).await;
    assert_eq!(h.snapshot().await.peers.len(), 3);

    h.send(Command::Promote(b.id.clone()));
    settle(&mut [&mut h, &mut a, &mut b, &mut c]).await;

    let new_host = b.snapshot().await;
    assert_eq!(new_host.role, Role::Host);
    assert_eq!(
        new_host.peers,
        sorted(vec![h.id.clone(), a.id.clone(), c.id.clone()])
    );
    assert!(b.has_status("You are now the host! Expecting 2 guest(s) to reconnect.", Severity::Success));

    for guest in [&mut h, &mut a, &mut c] {
        let state = guest.snapshot().await;
        assert_eq!(state.role, Role::Guest);
        assert_eq!(state.host, Some(b.id.clone()));
        assert_eq!(state.peers, vec![b.id.clone()]);
    }
    assert!(a.has_status("Host changed. Reconnecting to new host...", Severity::Info));
}

#[tokio::test(start_paused = true)]
async fn losing_the_last_peer_resets_the_role() {
    let relay = RelayState::new();
    let mut a = Participant::join(&relay, "A", None).await;
    let mut b = Participant::join(&relay, "B", None).await;

    b.send(Command::ConnectTo(a.id.clone()));
    settle(&mut [&mut a, &mut b]).await;
    assert_eq!(a.snapshot().await.role, Role::Host);

    a.send(Command::DisconnectPeer(b.id.clone()));
    settle(&mut [&mut a, &mut b]).await;

    for p in [&mut a, &mut b] {
        let state = p.snapshot().await;
        assert_eq!(state.role, Role::Unassigned);
        assert_eq!(state.host, None);
        assert!(state.peers.is_empty());
    }
    assert!(b.has_status(&format!("{} disconnected", a.id), Severity::Warning));
}

#[tokio::test(start_paused = true)]
async fn guests_follow_the_host_resource_once() {
    let relay = RelayState::new();
    let mut a = Participant::join(&relay, "A", Some("https://video.test/one")).await;
    let mut b = Participant::join(&relay, "B", None).await;

    b.send(Command::ConnectTo(a.id.clone()));
    settle(&mut [&mut a, &mut b]).await;
    assert_eq!(b.navigations(), vec!["https://video.test/one".to_owned()]);

    a.send(Command::ResourceChanged("https://video.test/two".into()));
    a.send(Command::ResourceChanged("https://video.test/two".into()));
    settle(&mut [&mut a, &mut b]).await;

    assert_eq!(
        b.navigations(),
        vec![
            "https://video.test/one".to_owned(),
            "https://video.test/two".to_owned()
        ]
    );
    assert_eq!(b.snapshot().await.resource.as_deref(), Some("https://video.test/two"));
}

#[tokio::test(start_paused = true)]
async fn guests_cannot_change_the_resource() {
    let relay = RelayState::new();
    let mut a = Participant::join(&relay, "A", Some("https://video.test/one")).await;
    let mut b = Participant::join(&relay, "B", None).await;

    b.send(Command::ConnectTo(a.id.clone()));
    settle(&mut [&mut a, &mut b]).await;
    b.send(Command::ResourceChanged("https://video.test/mine".into()));
    settle(&mut [&mut a, &mut b]).await;

    assert!(a.navigations().is_empty());
    assert_eq!(a.snapshot().await.resource.as_deref(), Some("https://video.test/one"));
}

#[tokio::test(start_paused = true)]
async fn host_playback_is_applied_by_guests() {
    let relay = RelayState::new();
    let mut a = Participant::join(&relay, "A", None).await;
    let mut b = Participant::join(&relay, "B", None).await;

    b.send(Command::ConnectTo(a.id.clone()));
    settle(&mut [&mut a, &mut b]).await;

    a.clock.seek(10.0);
    a.clock.play();
    a.send(Command::PlaybackEvent(PlaybackState {
        action: PlaybackAction::Play,
        time: a.clock.current_time(),
        paused: Some(false),
        timestamp: 0,
    }));
    tokio::time::sleep(Duration::from_millis(50)).await;
    b.drain();

    assert!(!b.clock.is_paused());
    assert!((b.clock.current_time() - 10.0).abs() < 1.0);
    assert!(b.seen.iter().any(|n| matches!(
        n,
        Notification::ApplyPlayback(PlaybackState { action: PlaybackAction::Play, .. })
    )));

    // Guest playback never reaches the host.
    b.send(Command::PlaybackEvent(PlaybackState {
        action: PlaybackAction::Pause,
        time: 3.0,
        paused: Some(true),
        timestamp: 0,
    }));
    tokio::time::sleep(Duration::from_millis(50)).await;
    a.drain();
    assert!(!a.clock.is_paused());
    assert!(!a.seen.iter().any(|n| matches!(n, Notification::ApplyPlayback(_))));
}

#[tokio::test(start_paused = true)]
async fn host_requests_are_tracked_until_promotion() {
    let relay = RelayState::new();
    let mut a = Participant::join(&relay, "A", None).await;
    let mut b = Participant::join(&relay, "B", None).await;

    b.send(Command::ConnectTo(a.id.clone()));
    settle(&mut [&mut a, &mut b]).await;
    b.send(Command::RequestHost);
    settle(&mut [&mut a, &mut b]).await;

    assert_eq!(a.snapshot().await.host_requests, vec![b.id.clone()]);
    assert!(a.seen.iter().any(|n| *n
        == Notification::PeerRequestingHost {
            id: b.id.clone(),
            nickname: Some("B".into())
        }));

    a.send(Command::Promote(b.id.clone()));
    settle(&mut [&mut a, &mut b]).await;

    assert!(a.snapshot().await.host_requests.is_empty());
    let state = b.snapshot().await;
    assert_eq!(state.role, Role::Host);
    assert!(state.host_requests.is_empty());
}

#[tokio::test(start_paused = true)]
async fn duplicate_and_invalid_connects_are_refused() {
    let relay = RelayState::new();
    let mut a = Participant::join(&relay, "A", None).await;
    let mut b = Participant::join(&relay, "B", None).await;

    b.send(Command::ConnectTo(a.id.clone()));
    settle(&mut [&mut a, &mut b]).await;
    b.send(Command::ConnectTo(a.id.clone()));
    b.send(Command::ConnectTo(b.id.clone()));
    settle(&mut [&mut a, &mut b]).await;

    assert!(b.has_status("Already connected to this peer", Severity::Warning));
    assert!(b.has_status("Cannot connect to yourself", Severity::Warning));
    assert_eq!(a.snapshot().await.peers, vec![b.id.clone()]);
}

#[tokio::test(start_paused = true)]
async fn unknown_peer_reports_a_connection_error() {
    let relay = RelayState::new();
    let mut a = Participant::join(&relay, "A", None).await;

    a.send(Command::ConnectTo("ZZZZZ".into()));
    settle(&mut [&mut a]).await;

    assert!(a.has_status("Connection error", Severity::Error));
    assert_eq!(a.snapshot().await.role, Role::Unassigned);
}

/// A raw relay client that answers every channel with a redirect to `host`.
async fn redirector(relay: &StateType) -> (String, Tx, UnboundedReceiver<RelayMessage>) {
    let (tx, mut rx) = relay::attach(relay);
    tx.unbounded_send(RelayMessage::Register {}).unwrap();
    match rx.next().await {
        Some(RelayMessage::Registered { id }) => (id, tx, rx),
        other => panic!("unexpected frame {:?}", other),
    }
}

fn redirect_to(id: String, tx: Tx, mut rx: UnboundedReceiver<RelayMessage>, host: String) {
    tokio::spawn(async move {
        while let Some(frame) = rx.next().await {
            if let RelayMessage::Open { from, channel, .. } = frame {
                tx.unbounded_send(RelayMessage::Accept {
                    from: id.clone(),
                    to: from.clone(),
                    channel,
                })
                .unwrap();
                tx.unbounded_send(RelayMessage::Data {
                    from: id.clone(),
                    to: from,
                    channel,
                    payload: PeerMessage::Redirect { host: host.clone() }.encode().unwrap(),
                })
                .unwrap();
            }
        }
    });
}

#[tokio::test(start_paused = true)]
async fn redirect_loops_are_abandoned() {
    let relay = RelayState::new();
    let (x, x_tx, x_rx) = redirector(&relay).await;
    let (y, y_tx, y_rx) = redirector(&relay).await;
    redirect_to(x.clone(), x_tx, x_rx, y.clone());
    redirect_to(y, y_tx, y_rx, x.clone());

    let mut c = Participant::join(&relay, "C", None).await;
    c.send(Command::ConnectTo(x));
    settle(&mut [&mut c]).await;

    assert!(c.has_status("Too many redirects", Severity::Error));
    let state = c.snapshot().await;
    assert_eq!(state.role, Role::Unassigned);
    assert!(state.peers.is_empty());
}

#[tokio::test(start_paused = true)]
async fn destroying_a_session_releases_its_peers() {
    let relay = RelayState::new();
    let mut a = Participant::join(&relay, "A", None).await;
    let mut b = Participant::join(&relay, "B", None).await;

    b.send(Command::ConnectTo(a.id.clone()));
    settle(&mut [&mut a, &mut b]).await;

    a.registry.destroy(KEY);
    a.registry.destroy(KEY);
    settle(&mut [&mut a, &mut b]).await;

    assert!(!a.registry.is_live(KEY));
    assert_eq!(
        a.registry.dispatch(KEY, Command::QueryState),
        Err(CoordError::UnknownSession(KEY.into()))
    );
    let state = b.snapshot().await;
    assert_eq!(state.role, Role::Unassigned);
    assert!(state.peers.is_empty());
}

#[tokio::test(start_paused = true)]
async fn refreshing_a_live_session_keeps_its_identity() {
    let relay = RelayState::new();
    let mut a = Participant::join(&relay, "A", None).await;
    let mut b = Participant::join(&relay, "B", None).await;

    b.send(Command::ConnectTo(a.id.clone()));
    settle(&mut [&mut a, &mut b]).await;

    b.registry.get_or_create(KEY, Some("https://video.test/x".into()), "Bee");
    settle(&mut [&mut a, &mut b]).await;

    assert!(b
        .statuses()
        .contains(&("Connected".to_owned(), Severity::Success)));
    assert!(!b
        .seen
        .iter()
        .any(|n| matches!(n, Notification::IdentityAssigned { .. })));
    assert_eq!(b.snapshot().await.host, Some(a.id.clone()));
    assert!(a
        .seen
        .iter()
        .any(|n| *n == Notification::NicknameUpdated { id: b.id.clone(), nickname: "Bee".into() }));
}

#[tokio::test(start_paused = true)]
async fn host_without_a_video_ends_the_party() {
    let relay = RelayState::new();
    let mut a = Participant::join(&relay, "A", Some("https://video.test/one")).await;
    let mut b = Participant::join(&relay, "B", None).await;

    b.send(Command::ConnectTo(a.id.clone()));
    settle(&mut [&mut a, &mut b]).await;

    a.send(Command::NoResourceLeft("Host closed the tab".into()));
    settle(&mut [&mut a, &mut b]).await;

    assert!(b.seen.iter().any(|n| *n
        == Notification::NoResourceLeft {
            reason: "Host closed the tab".into()
        }));
    assert!(a.has_status("Disconnected from all peers", Severity::Info));
    for p in [&mut a, &mut b] {
        let state = p.snapshot().await;
        assert_eq!(state.role, Role::Unassigned);
        assert!(state.peers.is_empty());
    }
    assert_eq!(a.snapshot().await.resource, None);
}

#[tokio::test(start_paused = true)]
async fn periodic_sync_corrects_a_drifting_guest() {
    let relay = RelayState::new();
    let mut a = Participant::join(&relay, "A", None).await;
    let mut b = Participant::join(&relay, "B", None).await;

    b.send(Command::ConnectTo(a.id.clone()));
    settle(&mut [&mut a, &mut b]).await;

    // The host's player moves without any discrete playback event.
    a.clock.seek(30.0);
    a.clock.play();
    assert!(b.clock.is_paused());
    settle(&mut [&mut a, &mut b]).await;

    assert!(!b.clock.is_paused());
    assert!((a.clock.current_time() - b.clock.current_time()).abs() < 0.3);
    assert!(b.seen.iter().any(|n| matches!(
        n,
        Notification::ApplyPlayback(PlaybackState { action: PlaybackAction::Sync, .. })
    )));
}

#[tokio::test(start_paused = true)]
async fn silent_peer_times_out() {
    let relay = RelayState::new();
    let (tx, mut rx) = relay::attach(&relay);
    tx.unbounded_send(RelayMessage::Register {}).unwrap();
    let silent = match rx.next().await {
        Some(RelayMessage::Registered { id }) => id,
        other => panic!("unexpected frame {:?}", other),
    };

    let mut c = Participant::join(&relay, "C", None).await;
    c.send(Command::ConnectTo(silent.clone()));
    settle(&mut [&mut c]).await;
    assert!(!c.has_status("Connection to", Severity::Error));

    tokio::time::sleep(Duration::from_secs(9)).await;
    c.drain();
    assert!(c.has_status(&format!("Connection to {} timed out", silent), Severity::Error));
    let state = c.snapshot().await;
    assert_eq!(state.role, Role::Unassigned);
    assert!(state.peers.is_empty());
    drop((tx, rx));
}

#[tokio::test(start_paused = true)]
async fn crossing_connects_settle_on_the_lower_id() {
    let relay = RelayState::new();
    let mut a = Participant::join(&relay, "A", None).await;
    let mut b = Participant::join(&relay, "B", None).await;

    a.send(Command::ConnectTo(b.id.clone()));
    b.send(Command::ConnectTo(a.id.clone()));
    settle(&mut [&mut a, &mut b]).await;

    let (low, high) = if a.id < b.id { (&mut a, &mut b) } else { (&mut b, &mut a) };
    let low_id = low.id.clone();
    let high_id = high.id.clone();

    let host = low.snapshot().await;
    assert_eq!(host.role, Role::Host);
    assert_eq!(host.peers, vec![high_id]);

    let guest = high.snapshot().await;
    assert_eq!(guest.role, Role::Guest);
    assert_eq!(guest.host, Some(low_id.clone()));
    assert_eq!(guest.peers, vec![low_id]);
}

#[tokio::test(start_paused = true)]
async fn members_of_a_party_cannot_dial_out() {
    let relay = RelayState::new();
    let mut a = Participant::join(&relay, "A", None).await;
    let mut b = Participant::join(&relay, "B", None).await;
    let mut c = Participant::join(&relay, "C", None).await;

    b.send(Command::ConnectTo(a.id.clone()));
    settle(&mut [&mut a, &mut b, &mut c]).await;

    a.send(Command::ConnectTo(c.id.clone()));
    b.send(Command::ConnectTo(c.id.clone()));
    settle(&mut [&mut a, &mut b, &mut c]).await;

    for p in [&a, &b] {
        assert!(p.has_status("Already in a session", Severity::Warning));
    }
    let state = c.snapshot().await;
    assert_eq!(state.role, Role::Unassigned);
    assert!(state.peers.is_empty());
    assert_eq!(a.snapshot().await.peers, vec![b.id.clone()]);
}
