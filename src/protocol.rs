//! Protocol tags and tunnel header names.
//!
//! Every tunnel request carries an `x-nerve-protocol` header naming the
//! encapsulated protocol; the server routes on it. Tag values are
//! case-sensitive on the wire.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Header naming the encapsulated protocol. Required on every request.
pub const PROTOCOL_HEADER: &str = "x-nerve-protocol";
/// Header carrying the opaque forward target ("host:port" for direct-forward
/// protocols). Optional.
pub const TARGET_HEADER: &str = "x-nerve-target";
/// Header carrying the bearer auth token, compared byte-for-byte server-side.
/// Optional.
pub const TOKEN_HEADER: &str = "x-nerve-token";

/// The protocol encapsulated in a tunnel session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolType {
    /// SOCKS5 proxy sessions.
    Socks5,
    /// Shadowsocks sessions.
    Shadowsocks,
    /// SSH / port-forwarding sessions.
    Ssh,
}

impl ProtocolType {
    /// The wire form of the tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Socks5 => "socks5",
            Self::Shadowsocks => "shadowsocks",
            Self::Ssh => "ssh",
        }
    }
}

impl fmt::Display for ProtocolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "socks5" => Ok(Self::Socks5),
            "shadowsocks" => Ok(Self::Shadowsocks),
            "ssh" => Ok(Self::Ssh),
            other => Err(Error::config(format!("unknown protocol: {other}"))),
        }
    }
}
