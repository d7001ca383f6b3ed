//! Load config from file and environment.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration. File: ~/.config/lftp/config.toml or /etc/lftp/config.toml.
/// Env overrides: LFTP_DISCOVERY_PORT, LFTP_TRANSFER_PORT, LFTP_ROOT.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Discovery UDP broadcast port (default 5050).
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// Transfer TCP port (default 5060).
    #[serde(default = "default_transfer_port")]
    pub transfer_port: u16,
    #[serde(default = "default_announce_interval")]
    pub announce_interval_secs: u64,
    /// Peer goes offline after this many silent seconds, evicted after twice that.
    #[serde(default = "default_peer_ttl")]
    pub peer_ttl_secs: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Default server root. Falls back to the working directory.
    #[serde(default)]
    pub root: Option<PathBuf>,
    /// Tracing filter used when RUST_LOG is unset.
    #[serde(default = "default_log")]
    pub log: String,
}

fn default_discovery_port() -> u16 {
    5050
}
fn default_transfer_port() -> u16 {
    5060
}
fn default_announce_interval() -> u64 {
    30
}
fn default_peer_ttl() -> u64 {
    90
}
fn default_sweep_interval() -> u64 {
    5
}
fn default_log() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discovery_port: default_discovery_port(),
            transfer_port: default_transfer_port(),
            announce_interval_secs: default_announce_interval(),
            peer_ttl_secs: default_peer_ttl(),
            sweep_interval_secs: default_sweep_interval(),
            root: None,
            log: default_log(),
        }
    }
}

impl Config {
    pub fn announce_interval(&self) -> Duration {
        Duration::from_secs(self.announce_interval_secs.max(1))
    }

    pub fn peer_ttl(&self) -> Duration {
        Duration::from_secs(self.peer_ttl_secs.max(1))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    apply_env(&mut c, |k| std::env::var(k).ok());
    c
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(p) = var("LFTP_DISCOVERY_PORT").and_then(|s| s.parse::<u16>().ok()) {
        c.discovery_port = p;
    }
    if let Some(p) = var("LFTP_TRANSFER_PORT").and_then(|s| s.parse::<u16>().ok()) {
        c.transfer_port = p;
    }
    if let Some(root) = var("LFTP_ROOT").filter(|s| !s.is_empty()) {
        c.root = Some(PathBuf::from(root));
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/lftp/config.toml"));
    }
    out.push(PathBuf::from("/etc/lftp/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            match std::fs::read_to_string(&p) {
                Ok(s) => match toml::from_str::<Config>(&s) {
                    Ok(c) => return Some(c),
                    // Logging is not up yet when config loads.
                    Err(e) => eprintln!("ignoring {}: {e}", p.display()),
                },
                Err(e) => eprintln!("cannot read {}: {e}", p.display()),
            }
            break;
        }
    }
    None
}
