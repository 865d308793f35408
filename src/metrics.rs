use lazy_static::lazy_static;
use log::error;
use prometheus::{Histogram, HistogramOpts, IntGauge, IntGaugeVec, Opts, Registry};
use warp::{Rejection, Reply};

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
    pub static ref NUM_CONNECTED_CLIENTS: IntGaugeVec = IntGaugeVec::new(
        Opts::new("num_connected_clients", "Connected Clients"),
        &["hashed_ip"]
    )
    .expect("metric can be created");
    pub static ref NUM_REGISTERED_PEERS: IntGauge =
        IntGauge::new("num_registered_peers", "Registered Peers").expect("metric can be created");
    pub static ref NUM_OPEN_CHANNELS: IntGauge =
        IntGauge::new("num_open_channels", "Open Peer Channels").expect("metric can be created");
    pub static ref CHANNEL_DURATION_SEC: Histogram = Histogram::with_opts(
        HistogramOpts::new("channel_duration_sec", "Peer Channel Duration Seconds").buckets(vec![
            1.0, 5.0, 10.0, 15.0, 20.0, 25.0, 30.0, 40.0, 50.0, 60.0, 90.0, 120.0, 180.0, 240.0,
            300.0, 600.0, 900.0, 1800.0, 3600.0, 7200.0, 14400.0, 28800.0, 43200.0, 86400.0,
        ])
    )
    .expect("metric can be created");
}

pub(crate) fn register() {
    REGISTRY
        .register(Box::new(NUM_CONNECTED_CLIENTS.clone()))
        .expect("collector can be registered");
    REGISTRY
        .register(Box::new(NUM_REGISTERED_PEERS.clone()))
        .expect("collector can be registered");
    REGISTRY
        .register(Box::new(NUM_OPEN_CHANNELS.clone()))
        .expect("collector can be registered");
    REGISTRY
        .register(Box::new(CHANNEL_DURATION_SEC.clone()))
        .expect("collector can be registered");
}

fn encode(families: &[prometheus::proto::MetricFamily], what: &str) -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(families, &mut buffer) {
        error!("could not encode {} metrics: {}", what, e);
    };
    String::from_utf8(buffer).unwrap_or_else(|e| {
        error!("{} metrics could not be from_utf8'd: {}", what, e);
        String::default()
    })
}

pub(crate) async fn metrics_handler() -> Result<impl Reply, Rejection> {
    let mut res = encode(&REGISTRY.gather(), "relay");
    res.push_str(&encode(&prometheus::gather(), "prometheus"));
    Ok(res)
}

/// Hashes a client address so it can be used as a metric label.
pub fn hash_ip(ip: std::net::IpAddr, salt: &str) -> Result<String, argon2::password_hash::Error> {
    use argon2::{
        password_hash::{PasswordHasher, SaltString},
        Argon2,
    };
    Ok(Argon2::default()
        .hash_password(ip.to_string().as_bytes(), &SaltString::from_b64(salt)?)?
        .hash
        .map(|hash| hash.to_string())
        .unwrap_or_default())
}
