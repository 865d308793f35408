use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use failure::{format_err, Error};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// How often the host broadcasts a `sync` playback message.
    pub sync_interval_ms: u64,
    /// Drift a guest tolerates before seeking.
    pub allowed_offset_seconds: f64,
    pub toast_enabled: bool,
    pub toast_duration_ms: u64,

    /// How long an outbound channel waits for a redirect before it counts as accepted.
    pub redirect_window_ms: u64,
    /// How long a guest keeps a redirected channel open so the redirect is delivered.
    pub redirect_grace_ms: u64,
    pub follow_redirect_delay_ms: u64,
    /// Delay before a guest reconnects to a newly promoted host.
    pub reconnect_delay_ms: u64,
    pub no_resource_grace_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            sync_interval_ms: 1000,
            allowed_offset_seconds: 0.3,
            toast_enabled: true,
            toast_duration_ms: 1500,
            redirect_window_ms: 200,
            redirect_grace_ms: 1000,
            follow_redirect_delay_ms: 100,
            reconnect_delay_ms: 300,
            no_resource_grace_ms: 500,
            connect_timeout_ms: 10_000,
        }
    }
}

impl Config {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms.max(1))
    }

    pub fn toast_duration(&self) -> Duration {
        Duration::from_millis(self.toast_duration_ms)
    }

    pub fn redirect_window(&self) -> Duration {
        Duration::from_millis(self.redirect_window_ms)
    }

    pub fn redirect_grace(&self) -> Duration {
        Duration::from_millis(self.redirect_grace_ms)
    }

    pub fn follow_redirect_delay(&self) -> Duration {
        Duration::from_millis(self.follow_redirect_delay_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn no_resource_grace(&self) -> Duration {
        Duration::from_millis(self.no_resource_grace_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Settings shared by every session; replaced wholesale on reload.
pub type SharedConfig = Arc<RwLock<Config>>;

pub fn shared(config: Config) -> SharedConfig {
    Arc::new(RwLock::new(config))
}

/// Takes a copy of the current settings. A poisoned lock still holds the last
/// good value, so it is read through.
pub fn snapshot(config: &SharedConfig) -> Config {
    match config.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

pub fn load(path: &Path) -> Result<Config, Error> {
    // create a new file if it does not exist
    if !path.exists() {
        let mut file = File::create(path)?;
        let config = toml::from_str::<Config>("")?;
        file.write_all(toml::to_string(&config)?.as_ref())?;
        return Ok(config);
    }

    let mut file = File::open(path)?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    let config: Config = toml::from_str(&contents)?;
    if !(config.allowed_offset_seconds >= 0.0) {
        return Err(format_err!(
            "allowed_offset_seconds must be non-negative, got {}",
            config.allowed_offset_seconds
        ));
    }
    Ok(config)
}

/// Re-reads `path` into `shared`. On error the previous settings stay in place.
pub fn reload(path: &Path, shared: &SharedConfig) -> Result<Config, Error> {
    let config = load(path)?;
    let mut guard = shared
        .write()
        .map_err(|_| format_err!("configuration lock poisoned"))?;
    *guard = config.clone();
    Ok(config)
}
