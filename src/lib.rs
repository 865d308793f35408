pub mod config;
pub mod connection;
pub mod console;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod metrics;
pub mod notify;
pub mod player;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod relay_message;
pub mod server;
pub mod session;
pub mod sync;
pub mod topology;
pub mod transport;
