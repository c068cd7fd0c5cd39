use std::fmt;
use std::str::FromStr;

use tunecho_proto::NetworkAddress;

use crate::error::TunError;

pub const DEFAULT_ADDRESS: NetworkAddress = NetworkAddress::V4([10, 10, 10, 10]);
pub const DEFAULT_PREFIX_LEN: u8 = 24;
pub const DEFAULT_MTU: usize = 1500;

/// Smallest MTU that still carries a full IPv4 header plus an ICMP header.
pub const MIN_MTU: usize = 28;

/// How inbound packets are answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponderMode {
    /// Every packet is written back unmodified.
    Loopback,
    /// Echo Requests are answered, other IPv4 traffic is written back untouched.
    #[default]
    Reply,
    /// Echo Requests are answered, everything else is dropped.
    Ping,
}

impl fmt::Display for ResponderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResponderMode::Loopback => "echo",
            ResponderMode::Reply => "reply-ping",
            ResponderMode::Ping => "ping",
        };
        f.write_str(s)
    }
}

impl FromStr for ResponderMode {
    type Err = TunError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "echo" | "loopback" => Ok(ResponderMode::Loopback),
            "reply-ping" | "reply" => Ok(ResponderMode::Reply),
            "ping" => Ok(ResponderMode::Ping),
            other => Err(TunError::InvalidConfiguration(format!("unknown responder mode {:?}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoConfig {
    /// Requested interface name; `None` lets the OS choose.
    pub if_name: Option<String>,
    pub address: NetworkAddress,
    pub prefix_len: u8,
    pub mtu: usize,
    pub mode: ResponderMode,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            if_name: None,
            address: DEFAULT_ADDRESS,
            prefix_len: DEFAULT_PREFIX_LEN,
            mtu: DEFAULT_MTU,
            mode: ResponderMode::default(),
        }
    }
}

impl EchoConfig {
    pub fn validate(&self) -> Result<(), TunError> {
        if self.prefix_len > self.address.max_prefix_len() {
            return Err(TunError::InvalidConfiguration(format!(
                "prefix length {} is too long for {}",
                self.prefix_len, self.address
            )));
        }
        if !(MIN_MTU..=tunecho_core::MAX_PACKET_SIZE).contains(&self.mtu) {
            return Err(TunError::InvalidConfiguration(format!(
                "MTU {} outside {}..={}",
                self.mtu,
                MIN_MTU,
                tunecho_core::MAX_PACKET_SIZE
            )));
        }
        if let Some(name) = &self.if_name {
            tunecho_core::validate_name(name).map_err(|e| TunError::InvalidConfiguration(e.to_string()))?;
        }
        Ok(())
    }
}
