/// ----- CONFIG MODULE -----
/// Static system parameters, overridable through an optional `config.json`
/// in the working directory. Missing file or missing keys fall back to the
/// compiled-in defaults, so every binary also runs with no file at all.
use std::fs;
use std::time::Duration;

const CONFIG_FILE: &str = "config.json";

pub const DEFAULT_CONTROLLER_ADDRESS: &str = "127.0.0.1:3000";
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 10;
pub const DEFAULT_IDLE_DELAY_MS: u64 = 50;
pub const DEFAULT_SAFETY_INTERVAL_MS: u64 = 1000;

#[derive(serde::Serialize, serde::Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SystemConfig {
    /// Address the controller listens on and everyone else connects to.
    pub controller_address: String,
    /// Timeout for the car's non-blocking poll of the controller socket.
    pub poll_timeout_ms: u64,
    /// Timed condvar wait while a closed, idle car has nowhere to go.
    pub idle_delay_ms: u64,
    /// Safety monitor wake-up interval.
    pub safety_interval_ms: u64,
    /// Render the controller's live car table (crossterm) instead of
    /// keeping stdout quiet.
    pub status_display: bool,
}

impl Default for SystemConfig {
    fn default() -> Self {
        SystemConfig {
            controller_address: DEFAULT_CONTROLLER_ADDRESS.to_string(),
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
            idle_delay_ms: DEFAULT_IDLE_DELAY_MS,
            safety_interval_ms: DEFAULT_SAFETY_INTERVAL_MS,
            status_display: false,
        }
    }
}

impl SystemConfig {
    pub fn get() -> Self {
        match fs::read_to_string(CONFIG_FILE) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => config,
                Err(e) => {
                    log::warn!("ignoring malformed {}: {}", CONFIG_FILE, e);
                    SystemConfig::default()
                }
            },
            Err(_) => {
                log::info!("no {} found, using default settings", CONFIG_FILE);
                SystemConfig::default()
            }
        }
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn idle_delay(&self) -> Duration {
        Duration::from_millis(self.idle_delay_ms)
    }

    pub fn safety_interval(&self) -> Duration {
        Duration::from_millis(self.safety_interval_ms)
    }
}
