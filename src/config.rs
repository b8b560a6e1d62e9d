//! Client configuration.
//!
//! A [`ClientConfig`] is plain data: it can be built in code, loaded from a
//! JSON file, or overridden from the command line.

use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MutexError, Result};
use crate::retry::RetryPolicy;

/// The `host:port` pair of the lock server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Parse a `host:port` string.
    ///
    /// Exactly one `:` is accepted, the host must be non-empty and the port
    /// must fit in a `u16`.
    pub fn parse(addr: &str) -> Result<Endpoint> {
        let invalid = || MutexError::InvalidAddress(addr.to_string());
        let mut parts = addr.split(':');
        let (host, port) = match (parts.next(), parts.next(), parts.next()) {
            (Some(host), Some(port), None) => (host.trim(), port.trim()),
            _ => return Err(invalid()),
        };
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        Ok(Endpoint {
            host: host.to_string(),
            port,
        })
    }

    /// Host name or address.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl FromStr for Endpoint {
    type Err = MutexError;

    fn from_str(s: &str) -> Result<Self> {
        Endpoint::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Wire format spoken with the server.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolVersion {
    /// Action byte first, split reset actions, source address trailer.
    #[default]
    Current,
    /// Action byte last, a single reset-by-key action, no source address.
    Legacy,
}

impl ProtocolVersion {
    /// Lowercase name, as used in config files and on the command line.
    pub fn name(self) -> &'static str {
        match self {
            ProtocolVersion::Current => "current",
            ProtocolVersion::Legacy => "legacy",
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProtocolVersion {
    type Err = MutexError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "current" => Ok(ProtocolVersion::Current),
            "legacy" => Ok(ProtocolVersion::Legacy),
            other => Err(MutexError::InvalidConfig(format!(
                "unknown protocol version {other:?}"
            ))),
        }
    }
}

/// How long a connection lives.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMode {
    /// A fresh connection for every attempt.
    #[default]
    PerAttempt,
    /// One connection for all attempts of a single operation, replaced after
    /// an I/O failure.
    PerOperation,
}

/// Everything a [`crate::MutexClient`] needs to know.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Server address, `host:port`.
    pub addr: String,
    /// Wire format.
    pub protocol: ProtocolVersion,
    /// Connection lifetime.
    pub connection_mode: ConnectionMode,
    /// Timeout for establishing a TCP connection.
    pub connect_timeout_ms: u64,
    /// Read and write timeout on an established connection.
    pub io_timeout_ms: u64,
    /// Retry discipline for runtime operations.
    pub retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:4000".to_string(),
            protocol: ProtocolVersion::default(),
            connection_mode: ConnectionMode::default(),
            connect_timeout_ms: 3_000,
            io_timeout_ms: 5_000,
            retry: RetryPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Default configuration for the given address.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            ..Self::default()
        }
    }

    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Parse [`ClientConfig::addr`].
    pub fn endpoint(&self) -> Result<Endpoint> {
        Endpoint::parse(&self.addr)
    }

    /// Connect timeout as a [`Duration`]; zero disables it.
    pub fn connect_timeout(&self) -> Option<Duration> {
        non_zero(self.connect_timeout_ms)
    }

    /// I/O timeout as a [`Duration`]; zero disables it.
    pub fn io_timeout(&self) -> Option<Duration> {
        non_zero(self.io_timeout_ms)
    }
}

fn non_zero(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}
