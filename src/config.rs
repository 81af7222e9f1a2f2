//! Relay Configuration
//!
//! Read once at startup from environment variables. Anything missing or
//! unparseable falls back to its default.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::core::code::{DEFAULT_CODE_LENGTH, MAX_CODE_LENGTH};
use crate::network::registry::{RegistryConfig, DEFAULT_SESSION_TIMEOUT};

/// Default listening port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default largest inbound frame (16 MiB, room for an uploaded map).
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

/// Relay server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Largest accepted inbound message.
    pub max_message_bytes: usize,
    /// Session registry settings.
    pub registry: RegistryConfig,
    /// Server version string.
    pub version: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            max_connections: 1000,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            registry: RegistryConfig::default(),
            version: crate::VERSION.to_string(),
        }
    }
}

impl RelayConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let host = lookup("HOST").unwrap_or_else(|| defaults.bind_addr.ip().to_string());
        let port = parse_or(&lookup, "PORT", DEFAULT_PORT);
        let bind_addr = match format!("{}:{}", host, port).parse() {
            Ok(addr) => addr,
            Err(_) => {
                warn!(host = %host, "Invalid HOST, using default");
                SocketAddr::new(defaults.bind_addr.ip(), port)
            }
        };

        let timeout_secs = parse_or(&lookup, "SESSION_TIMEOUT_SECS", DEFAULT_SESSION_TIMEOUT.as_secs());
        let mut code_length = parse_or(&lookup, "SESSION_CODE_LENGTH", DEFAULT_CODE_LENGTH);
        if !(1..=MAX_CODE_LENGTH).contains(&code_length) {
            warn!(code_length, "SESSION_CODE_LENGTH out of range, using default");
            code_length = DEFAULT_CODE_LENGTH;
        }
        let max_sessions = lookup("MAX_SESSIONS").and_then(|v| match v.trim().parse::<usize>() {
            Ok(0) => None,
            Ok(n) => Some(n),
            Err(_) => {
                warn!(value = %v, "Invalid MAX_SESSIONS, using unlimited");
                None
            }
        });

        Self {
            bind_addr,
            max_connections: parse_or(&lookup, "MAX_CONNECTIONS", defaults.max_connections),
            max_message_bytes: parse_or(&lookup, "MAX_MESSAGE_BYTES", defaults.max_message_bytes),
            registry: RegistryConfig {
                code_length,
                session_timeout: Duration::from_secs(timeout_secs.max(1)),
                max_sessions,
            },
            version: defaults.version,
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(key, value = %raw, "Invalid value, using default");
                default
            }
        },
        None => default,
    }
}
