//! Load config from file and environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::playback::PlaybackConfig;
use crate::server::ServerConfig;

const TRACKER_ENV: &str = "SONGPOD_TRACKER_ADDR";

/// Peer configuration. File: `--config <path>`, ~/.config/songpod/config.toml or /etc/songpod/config.toml.
/// Env override: SONGPOD_TRACKER_ADDR.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Tracker address, host:port.
    #[serde(default = "default_tracker_addr")]
    pub tracker_addr: String,
    /// Timeout for dialing the tracker or a peer, and for tracker replies.
    #[serde(default = "default_dial_timeout_ms")]
    pub dial_timeout_ms: u64,
    /// How long an inbound connection may sit idle: delivering its request, or not
    /// draining the song it asked for.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Max request handlers running at once.
    #[serde(default = "default_max_handlers")]
    pub max_handlers: usize,
    /// Bytes read from a song stream per buffer fill.
    #[serde(default = "default_read_buffer")]
    pub read_buffer: usize,
    /// Write decoded PCM (s16le stereo) here instead of playing it.
    #[serde(default)]
    pub output: Option<PathBuf>,
    /// Play on the default audio device. Needs the `device` build feature; when off
    /// (and no `output` is set) decoded audio is discarded.
    #[serde(default = "default_device")]
    pub device: bool,
}

fn default_tracker_addr() -> String {
    "127.0.0.1:7000".to_string()
}
fn default_dial_timeout_ms() -> u64 {
    5_000
}
fn default_request_timeout_ms() -> u64 {
    10_000
}
fn default_max_handlers() -> usize {
    64
}
fn default_read_buffer() -> usize {
    8 * 1024
}
fn default_device() -> bool {
    cfg!(feature = "device")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tracker_addr: default_tracker_addr(),
            dial_timeout_ms: default_dial_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            max_handlers: default_max_handlers(),
            read_buffer: default_read_buffer(),
            output: None,
            device: default_device(),
        }
    }
}

/// Error reading or parsing a config file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl Config {
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            max_handlers: self.max_handlers.max(1),
            request_timeout: self.request_timeout(),
        }
    }

    pub fn playback_config(&self) -> PlaybackConfig {
        PlaybackConfig {
            dial_timeout: self.dial_timeout(),
            read_buffer: self.read_buffer.max(1),
        }
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(addr) = var(TRACKER_ENV) {
            if !addr.trim().is_empty() {
                self.tracker_addr = addr.trim().to_string();
            }
        }
    }
}

/// Load config: explicit file if given, else the first default path that exists, else defaults;
/// then env vars.
pub fn load(explicit: Option<&Path>) -> Result<Config, ConfigError> {
    let path = match explicit {
        Some(p) => Some(p.to_path_buf()),
        None => config_paths().into_iter().find(|p| p.exists()),
    };
    let mut c = match path {
        Some(p) => load_file(&p)?,
        None => Config::default(),
    };
    c.apply_env(|k| std::env::var(k).ok());
    Ok(c)
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/songpod/config.toml"));
    }
    out.push(PathBuf::from("/etc/songpod/config.toml"));
    out
}

fn load_file(path: &Path) -> Result<Config, ConfigError> {
    let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str::<Config>(&s).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
