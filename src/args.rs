use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Mode,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Mode {
    /// Run the relay that peers register with
    Relay {
        /// Listening Websocket address
        #[arg(short, long, default_value = "0.0.0.0:8080")]
        address: String,
        /// Metrics server address
        #[arg(short, long, default_value = "0.0.0.0:8081")]
        metrics_address: String,
        /// Salt for hashing client addresses in metrics labels
        #[arg(long, env = "IP_HASH_SALT", default_value = "c3luY3dhdGNocmVsYXk")]
        ip_hash_salt: String,
    },
    /// Join parties from the terminal
    Peer {
        /// Relay Websocket URL
        #[arg(short, long, default_value = "ws://127.0.0.1:8080/")]
        relay: String,
        #[arg(short, long, default_value = "Guest")]
        nickname: String,
        /// Settings file, created with defaults if missing
        #[arg(short, long, default_value = "syncwatch.toml")]
        config: PathBuf,
        /// Video to start with
        #[arg(long)]
        resource: Option<String>,
    },
}
