//! Link module - Moves drone frames over the wire
//!
//! Provides:
//! - The [`Transport`] seam the session talks through
//! - A raw link-layer socket implementation (Linux only)
//! - Hardware address handling

mod raw;

pub use raw::*;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Link errors
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Interface not found: {0}")]
    InterfaceNotFound(String),

    #[error("Raw link-layer sockets are not supported on {0}")]
    Unsupported(&'static str),

    #[error("A request is already awaiting its reply")]
    InFlight,

    #[error("Invalid hardware address: {0}")]
    InvalidAddress(String),
}

pub type LinkResult<T> = Result<T, LinkError>;

/// Ethernet hardware address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddr(pub [u8; 6]);

impl FromStr for MacAddr {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || LinkError::InvalidAddress(s.to_string());

        let mut octets = [0u8; 6];
        let mut parts = s.trim().split(':');
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }

        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(MacAddr(octets))
    }
}

impl TryFrom<String> for MacAddr {
    type Error = LinkError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MacAddr> for String {
    fn from(addr: MacAddr) -> Self {
        addr.to_string()
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// Settings for a link-layer transport
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Interface to send on
    pub interface: String,
    /// Destination hardware address
    pub destination: MacAddr,
    /// EtherType frames are tagged with
    pub ether_type: u16,
    /// How long to wait for a reply
    pub reply_timeout: Duration,
}

/// Sends one frame and waits for the reply it triggers
///
/// Implementations allow a single request in flight; `Ok(None)` means no
/// reply arrived within `timeout`.
#[async_trait]
pub trait Transport: Send {
    async fn exchange(&mut self, frame: &[u8], timeout: Duration) -> LinkResult<Option<Vec<u8>>>;
}
