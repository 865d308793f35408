use std::net::{IpAddr, SocketAddr};

use futures_channel::mpsc::unbounded;
use futures_util::{future, pin_mut, StreamExt};
use log::info;
use warp::ws::Message;
use warp::ws::WebSocket;
use warp::Filter;

use crate::metrics;
use crate::relay::{self, StateType, Tx};
use crate::relay_message::RelayMessage;

#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub address: SocketAddr,
    pub metrics_address: SocketAddr,
    pub ip_hash_salt: String,
}

async fn process_message(msg: Message, state: &StateType, tx: &Tx, link: &mut Option<String>) {
    if !msg.is_text() {
        return;
    }

    if let Ok(s) = msg.to_str() {
        let frame = match serde_json::from_str::<RelayMessage>(s) {
            Ok(frame) => frame,
            Err(e) => {
                info!("Ignoring malformed frame: {}\nFrame: {}", e, s);
                return;
            }
        };
        let mut locked_state = state.lock().await;
        if let Err(e) = relay::handle_frame(&mut locked_state, tx, link, frame) {
            info!("Error occurred when handling frame: {}\nFrame: {}", e, s);
        }
    }
}

async fn handle_connection(salt: String, state: StateType, websocket: WebSocket, addr: Option<IpAddr>) {
    let hashed_ip = addr
        .and_then(|ip| metrics::hash_ip(ip, &salt).ok())
        .unwrap_or_else(|| "unknown".to_owned());

    metrics::NUM_CONNECTED_CLIENTS
        .with_label_values(&[hashed_ip.as_str()])
        .inc();
    info!("WebSocket connection established: {:?}", addr);

    let (tx, rx) = unbounded::<RelayMessage>();
    let (outgoing, mut incoming) = websocket.split();
    let mut link = None;

    {
        let handle_incoming = async {
            while let Some(msg) = incoming.next().await {
                match msg {
                    Ok(msg) => process_message(msg, &state, &tx, &mut link).await,
                    Err(e) => {
                        info!("WebSocket error from {:?}: {}", addr, e);
                        break;
                    }
                }
            }
        };

        let receive_from_others = rx
            .filter_map(|frame| {
                future::ready(match serde_json::to_string(&frame) {
                    Ok(text) => Some(Ok::<_, warp::Error>(Message::text(text))),
                    Err(e) => {
                        info!("Could not encode frame {:?}: {}", frame, e);
                        None
                    }
                })
            })
            .forward(outgoing);

        pin_mut!(handle_incoming, receive_from_others);
        future::select(handle_incoming, receive_from_others).await;
    }

    metrics::NUM_CONNECTED_CLIENTS
        .with_label_values(&[hashed_ip.as_str()])
        .dec();
    info!("{:?} disconnected", addr);
    if let Some(id) = link {
        state.lock().await.on_disconnect(&id);
    }
}

pub async fn start_server(options: ServerOptions, state: StateType) {
    metrics::register();

    use warp::{any, ws};
    let metrics_route = warp::path!("metrics").and_then(metrics::metrics_handler);
    let salt = options.ip_hash_salt.clone();
    let ws_route = warp::path::end()
        .and(ws())
        .and(warp_real_ip::get_forwarded_for())
        .and(any().map(move || salt.clone()))
        .and(any().map(move || state.clone()))
        .map(
            |ws: ws::Ws, ip_addrs: Vec<IpAddr>, salt: String, state: StateType| {
                ws.on_upgrade(move |socket| async move {
                    handle_connection(salt, state, socket, ip_addrs.last().copied()).await
                })
            },
        );

    info!("Metrics listening on {}", options.metrics_address);
    let metrics_server = warp::serve(metrics_route).run(options.metrics_address);
    info!("Relay listening on {}", options.address);
    let relay_server = warp::serve(ws_route).run(options.address);
    future::join(metrics_server, relay_server).await;
}
