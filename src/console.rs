use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use failure::Error;
use futures_channel::mpsc::{unbounded, UnboundedReceiver};
use futures_util::StreamExt;
use log::{info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::config::{self, SharedConfig};
use crate::error::CoordError;
use crate::event::Command;
use crate::notify::{Notification, Outbound};
use crate::player::{Player, PlayerFactory, SharedClock};
use crate::protocol::{PlaybackAction, PlaybackState};
use crate::registry::SessionRegistry;
use crate::transport::WsConnector;

pub const DEFAULT_TAB: &str = "tab-1";

const HELP: &str = "\
connect <peer>       join the party of <peer>
disconnect [peer]    drop one peer, or everyone
request-host         ask the host for control
promote <peer>       hand the host role to <peer>
nick <name>          change your nickname
load <url>           switch the video
leave [reason]       stop sharing a video
play | pause         control the local player
seek <seconds>       jump to a position
state                print the session state
tab <key> [url]      switch to (or open) another session
close [key]          end a session
reload               re-read the configuration file
quit";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Session(Command),
    Play,
    Pause,
    Seek(f64),
    Tab { key: String, resource: Option<String> },
    Close(Option<String>),
    Reload,
    Help,
    Quit,
}

/// Parses one input line. Blank lines yield `None`.
pub fn parse(line: &str) -> Result<Option<ConsoleCommand>, CoordError> {
    let mut words = line.split_whitespace();
    let verb = match words.next() {
        Some(verb) => verb,
        None => return Ok(None),
    };
    let rest: Vec<&str> = words.collect();
    let arg = |name: &str| -> Result<String, CoordError> {
        rest.first()
            .map(|s| s.to_string())
            .ok_or_else(|| CoordError::InvalidCommand(format!("{} needs a {}", verb, name)))
    };
    let joined = rest.join(" ");

    let command = match verb {
        "connect" => ConsoleCommand::Session(Command::ConnectTo(arg("peer id")?.to_uppercase())),
        "disconnect" => match rest.first() {
            Some(peer) => ConsoleCommand::Session(Command::DisconnectPeer(peer.to_uppercase())),
            None => ConsoleCommand::Session(Command::DisconnectAll),
        },
        "request-host" => ConsoleCommand::Session(Command::RequestHost),
        "promote" => ConsoleCommand::Session(Command::Promote(arg("peer id")?.to_uppercase())),
        "nick" => {
            if joined.is_empty() {
                return Err(CoordError::InvalidCommand("nick needs a name".into()));
            }
            ConsoleCommand::Session(Command::UpdateNickname(joined))
        }
        "load" => ConsoleCommand::Session(Command::ResourceChanged(arg("url")?)),
        "leave" => {
            let reason = if joined.is_empty() {
                "Host left the video".to_owned()
            } else {
                joined
            };
            ConsoleCommand::Session(Command::NoResourceLeft(reason))
        }
        "state" => ConsoleCommand::Session(Command::QueryState),
        "play" => ConsoleCommand::Play,
        "pause" => ConsoleCommand::Pause,
        "seek" => {
            let raw = arg("position")?;
            let time: f64 = raw
                .parse()
                .map_err(|_| CoordError::InvalidCommand(format!("not a position: {}", raw)))?;
            if !(time >= 0.0) {
                return Err(CoordError::InvalidCommand(format!("not a position: {}", raw)));
            }
            ConsoleCommand::Seek(time)
        }
        "tab" => ConsoleCommand::Tab {
            key: arg("key")?,
            resource: rest.get(1).map(|s| s.to_string()),
        },
        "close" => ConsoleCommand::Close(rest.first().map(|s| s.to_string())),
        "reload" => ConsoleCommand::Reload,
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        other => return Err(CoordError::InvalidCommand(format!("unknown command {}", other))),
    };
    Ok(Some(command))
}

#[derive(Debug, Clone)]
pub struct PeerOptions {
    pub relay: String,
    pub nickname: String,
    pub config_path: PathBuf,
    pub resource: Option<String>,
}

type Clocks = Arc<Mutex<HashMap<String, SharedClock>>>;

fn clock_for(clocks: &Clocks, key: &str) -> SharedClock {
    let mut clocks = match clocks.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    clocks.entry(key.to_owned()).or_default().clone()
}

/// Prints notifications as they arrive. Status toasts honour `toast_enabled`;
/// a toast repeated while the previous one is still showing is not printed.
async fn print_notifications(mut rx: UnboundedReceiver<Outbound>, config: SharedConfig) {
    let mut showing: Option<(String, Instant)> = None;
    while let Some(Outbound {
        session,
        notification,
    }) = rx.next().await
    {
        match &notification {
            Notification::Status { text, severity } => {
                let settings = config::snapshot(&config);
                if !settings.toast_enabled {
                    continue;
                }
                let toast = format!("[{}] {:?}: {}", session, severity, text);
                if let Some((last, shown_at)) = &showing {
                    if *last == toast && shown_at.elapsed() < settings.toast_duration() {
                        continue;
                    }
                }
                println!("{}", toast);
                showing = Some((toast, Instant::now()));
            }
            other => match serde_json::to_string(other) {
                Ok(json) => println!("[{}] {}", session, json),
                Err(e) => warn!("Could not print notification: {}", e),
            },
        }
    }
}

fn playback(action: PlaybackAction, clock: &SharedClock) -> Command {
    Command::PlaybackEvent(PlaybackState {
        action,
        time: clock.current_time(),
        paused: Some(clock.is_paused()),
        timestamp: 0,
    })
}

/// Runs a peer until `quit` or end of input.
pub async fn run(options: PeerOptions) -> Result<(), Error> {
    let shared = config::shared(config::load(&options.config_path)?);
    let (notifications, rx) = unbounded();
    tokio::spawn(print_notifications(rx, shared.clone()));

    let clocks: Clocks = Default::default();
    let factory_clocks = clocks.clone();
    let players: PlayerFactory =
        Arc::new(move |key: &str| Box::new(clock_for(&factory_clocks, key)) as Box<dyn Player>);

    let mut registry = SessionRegistry::new(
        Arc::new(WsConnector::new(options.relay.clone())),
        players,
        notifications,
        shared.clone(),
    );
    let mut current = DEFAULT_TAB.to_owned();
    registry.get_or_create(&current, options.resource.clone(), &options.nickname);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("{} (try `help`)", e);
                continue;
            }
        };
        let result = match command {
            ConsoleCommand::Session(command) => registry.dispatch(&current, command),
            ConsoleCommand::Play => {
                let mut clock = clock_for(&clocks, &current);
                clock.play();
                registry.dispatch(&current, playback(PlaybackAction::Play, &clock))
            }
            ConsoleCommand::Pause => {
                let mut clock = clock_for(&clocks, &current);
                clock.pause();
                registry.dispatch(&current, playback(PlaybackAction::Pause, &clock))
            }
            ConsoleCommand::Seek(time) => {
                let mut clock = clock_for(&clocks, &current);
                clock.seek(time);
                registry.dispatch(&current, playback(PlaybackAction::Seeked, &clock))
            }
            ConsoleCommand::Tab { key, resource } => {
                registry.get_or_create(&key, resource, &options.nickname);
                println!("Now on {}", key);
                current = key;
                Ok(())
            }
            ConsoleCommand::Close(key) => {
                let key = key.unwrap_or_else(|| current.clone());
                registry.destroy(&key);
                println!("Closed {}", key);
                Ok(())
            }
            ConsoleCommand::Reload => {
                match config::reload(&options.config_path, &shared) {
                    Ok(_) => info!("Reloaded {}", options.config_path.display()),
                    Err(e) => warn!("Keeping previous configuration: {}", e),
                }
                Ok(())
            }
            ConsoleCommand::Help => {
                println!("{}", HELP);
                Ok(())
            }
            ConsoleCommand::Quit => break,
        };
        if let Err(e) = result {
            println!("{}", e);
        }
    }

    for key in registry.keys() {
        registry.destroy(&key);
    }
    Ok(())
}
