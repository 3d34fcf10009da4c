//! # Runtime Configuration Module
//!
//! Settings the connection server needs before the first request arrives:
//! where to listen, how many workers to run, and how to treat a full queue.
//!
//! ## Sources
//!
//! Values are taken, in increasing priority, from:
//!
//! 1. built-in defaults ([`ServerConfig::default`]),
//! 2. the `global` section of a [`Config`] (`server.*` keys),
//! 3. `ARBOR_*` environment variables.
//!
//! ## Environment Variables
//!
//! | Variable | Key | Default |
//! |---|---|---|
//! | `ARBOR_SOCKET_HOST` | `server.socket_host` | `127.0.0.1` |
//! | `ARBOR_SOCKET_PORT` | `server.socket_port` | `8080` |
//! | `ARBOR_THREAD_POOL` | `server.thread_pool` | `10` |
//! | `ARBOR_SOCKET_QUEUE_SIZE` | `server.socket_queue_size` | `5` |
//! | `ARBOR_QUEUE_BOUND` | `server.queue_bound` | `0` (unbounded) |
//! | `ARBOR_BACKPRESSURE_MODE` | `server.backpressure` | `block` |
//! | `ARBOR_SOCKET_TIMEOUT_MS` | `server.socket_timeout_ms` | `10000` |
//! | `ARBOR_ACCEPT_POLL_MS` | `server.accept_poll_ms` | `100` |
//!
//! Numeric values accept decimal or `0x` hexadecimal.
//!
//! ```rust
//! use arbor::runtime_config::ServerConfig;
//!
//! let config = ServerConfig::from_env();
//! println!("listening on {}:{}", config.socket_host, config.socket_port);
//! ```

use crate::config::{Config, ConfigError};
use crate::http::Protocol;
use crate::worker_pool::BackpressureMode;
use std::env;
use std::time::Duration;

/// Default upper bound on a request body (100 MiB).
pub const DEFAULT_MAX_REQUEST_BODY_SIZE: u64 = 100 * 1024 * 1024;
/// Default upper bound on the request line plus header block (500 KiB).
pub const DEFAULT_MAX_REQUEST_HEADER_SIZE: u64 = 500 * 1024;
/// Default number of internal redirects allowed per request.
pub const DEFAULT_MAX_INTERNAL_REDIRECTS: u64 = 10;

/// Listener and worker pool settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub socket_host: String,
    pub socket_port: u16,
    /// Number of worker threads.
    pub thread_pool: usize,
    /// Listen backlog handed to the OS.
    pub socket_queue_size: i32,
    /// Maximum queued connections; `0` means unbounded.
    pub queue_bound: usize,
    pub backpressure: BackpressureMode,
    /// Read/write timeout applied to accepted sockets.
    pub socket_timeout: Duration,
    /// How long `accept` blocks before re-checking the interrupt flag.
    pub accept_poll: Duration,
    /// Protocol written on every status line.
    pub protocol_version: Protocol,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_host: "127.0.0.1".to_string(),
            socket_port: 8080,
            thread_pool: 10,
            socket_queue_size: 5,
            queue_bound: 0,
            backpressure: BackpressureMode::Block,
            socket_timeout: Duration::from_secs(10),
            accept_poll: Duration::from_millis(100),
            protocol_version: Protocol::HTTP_11,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `ARBOR_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Read `server.*` keys from the global section, then apply the
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Value`] when `server.protocol_version` or
    /// `server.backpressure` holds an unrecognised value.
    pub fn from_config(config: &dyn Config) -> Result<Self, ConfigError> {
        let d = Self::default();
        let backpressure = match config.get_str("server.backpressure", None) {
            Some(mode) => BackpressureMode::parse(&mode).ok_or_else(|| ConfigError::Value {
                key: "server.backpressure".to_string(),
                message: format!("expected 'block' or 'shed', found {mode:?}"),
            })?,
            None => d.backpressure,
        };
        let protocol_version = match config.get_str("server.protocol_version", None) {
            Some(p) => p.parse().map_err(|e: crate::http::ProtocolError| ConfigError::Value {
                key: "server.protocol_version".to_string(),
                message: e.to_string(),
            })?,
            None => d.protocol_version,
        };
        let port = config.get_u64("server.socket_port", None, u64::from(d.socket_port));
        let mut out = Self {
            socket_host: config
                .get_str("server.socket_host", None)
                .unwrap_or(d.socket_host),
            socket_port: u16::try_from(port).map_err(|_| ConfigError::Value {
                key: "server.socket_port".to_string(),
                message: format!("{port} is not a valid port"),
            })?,
            thread_pool: to_usize(config.get_u64("server.thread_pool", None, d.thread_pool as u64)),
            socket_queue_size: i32::try_from(config.get_u64(
                "server.socket_queue_size",
                None,
                d.socket_queue_size as u64,
            ))
            .unwrap_or(i32::MAX),
            queue_bound: to_usize(config.get_u64("server.queue_bound", None, 0)),
            backpressure,
            socket_timeout: Duration::from_millis(config.get_u64(
                "server.socket_timeout_ms",
                None,
                duration_ms(d.socket_timeout),
            )),
            accept_poll: Duration::from_millis(config.get_u64(
                "server.accept_poll_ms",
                None,
                duration_ms(d.accept_poll),
            )),
            protocol_version,
        };
        out.apply_env();
        Ok(out)
    }

    /// `host:port` for binding.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.socket_host, self.socket_port)
    }

    fn apply_env(&mut self) {
        if let Ok(host) = env::var("ARBOR_SOCKET_HOST") {
            self.socket_host = host;
        }
        if let Some(port) = env_number("ARBOR_SOCKET_PORT").and_then(|p| u16::try_from(p).ok()) {
            self.socket_port = port;
        }
        if let Some(n) = env_number("ARBOR_THREAD_POOL") {
            self.thread_pool = to_usize(n);
        }
        if let Some(n) = env_number("ARBOR_SOCKET_QUEUE_SIZE") {
            self.socket_queue_size = i32::try_from(n).unwrap_or(i32::MAX);
        }
        if let Some(n) = env_number("ARBOR_QUEUE_BOUND") {
            self.queue_bound = to_usize(n);
        }
        if let Some(mode) = env::var("ARBOR_BACKPRESSURE_MODE")
            .ok()
            .and_then(|s| BackpressureMode::parse(&s))
        {
            self.backpressure = mode;
        }
        if let Some(ms) = env_number("ARBOR_SOCKET_TIMEOUT_MS") {
            self.socket_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_number("ARBOR_ACCEPT_POLL_MS") {
            self.accept_poll = Duration::from_millis(ms);
        }
    }
}

fn env_number(name: &str) -> Option<u64> {
    let val = env::var(name).ok()?;
    let val = val.trim();
    match val.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => val.parse().ok(),
    }
}

fn to_usize(n: u64) -> usize {
    usize::try_from(n).unwrap_or(usize::MAX)
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SectionConfig;

    #[test]
    fn reads_server_keys_from_global_section() {
        let cfg = SectionConfig::new()
            .with("global", "server.thread_pool", 3)
            .with("global", "server.queue_bound", 8)
            .with("global", "server.backpressure", "shed")
            .with("global", "server.protocol_version", "HTTP/1.0")
            .with("global", "server.accept_poll_ms", 20);
        let server = ServerConfig::from_config(&cfg).unwrap();
        assert_eq!(server.thread_pool, 3);
        assert_eq!(server.queue_bound, 8);
        assert_eq!(server.backpressure, BackpressureMode::Shed);
        assert_eq!(server.protocol_version, Protocol::HTTP_10);
        assert_eq!(server.accept_poll, Duration::from_millis(20));
    }

    #[test]
    fn rejects_unknown_backpressure_mode() {
        let cfg = SectionConfig::new().with("global", "server.backpressure", "drop");
        assert!(matches!(
            ServerConfig::from_config(&cfg),
            Err(ConfigError::Value { .. })
        ));
    }

    #[test]
    fn rejects_out_of_range_port() {
        let cfg = SectionConfig::new().with("global", "server.socket_port", 70000);
        assert!(ServerConfig::from_config(&cfg).is_err());
    }

    #[test]
    fn defaults_are_sane() {
        let d = ServerConfig::default();
        assert_eq!(d.queue_bound, 0);
        assert_eq!(d.accept_poll, Duration::from_millis(100));
        assert_eq!(d.bind_addr(), "127.0.0.1:8080");
    }
}
