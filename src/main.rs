use std::net::SocketAddr;

use clap::Parser;
use failure::{format_err, Error};

use syncwatch::console::{self, PeerOptions};
use syncwatch::relay::RelayState;
use syncwatch::server::{self, ServerOptions};

use crate::args::{Args, Mode};

mod args;

type Result<T> = std::result::Result<T, Error>;

fn parse_address(raw: &str) -> Result<SocketAddr> {
    raw.parse()
        .map_err(|e| format_err!("invalid address {}: {}", raw, e))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );
    let args = Args::parse();

    match args.command {
        Mode::Relay {
            address,
            metrics_address,
            ip_hash_salt,
        } => {
            let options = ServerOptions {
                address: parse_address(&address)?,
                metrics_address: parse_address(&metrics_address)?,
                ip_hash_salt,
            };
            server::start_server(options, RelayState::new()).await;
        }
        Mode::Peer {
            relay,
            nickname,
            config,
            resource,
        } => {
            console::run(PeerOptions {
                relay,
                nickname,
                config_path: config,
                resource,
            })
            .await?;
        }
    }

    Ok(())
}
