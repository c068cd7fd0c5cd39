use std::fmt;
use std::net::{AddrParseError, IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// Raw network-layer address as it appears in a packet header.
///
/// Equality is byte-wise. The value never changes after construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkAddress {
    V4([u8; 4]),
    V6([u8; 16]),
}

impl NetworkAddress {
    /// Build from a 4- or 16-byte slice.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        match bytes.len() {
            4 => bytes.try_into().ok().map(NetworkAddress::V4),
            16 => bytes.try_into().ok().map(NetworkAddress::V6),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            NetworkAddress::V4(bytes) => bytes,
            NetworkAddress::V6(bytes) => bytes,
        }
    }

    pub fn is_ipv4(&self) -> bool {
        matches!(self, NetworkAddress::V4(_))
    }

    /// Longest valid prefix length for this family.
    pub fn max_prefix_len(&self) -> u8 {
        match self {
            NetworkAddress::V4(_) => 32,
            NetworkAddress::V6(_) => 128,
        }
    }

    /// Dotted netmask for an IPv4 prefix length, e.g. 24 -> 255.255.255.0.
    pub fn ipv4_netmask(prefix_len: u8) -> Option<Self> {
        if prefix_len > 32 {
            return None;
        }
        let mask = u32::MAX.checked_shl(32 - u32::from(prefix_len)).unwrap_or(0);
        Some(NetworkAddress::V4(mask.to_be_bytes()))
    }
}

impl From<IpAddr> for NetworkAddress {
    fn from(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(v4) => NetworkAddress::V4(v4.octets()),
            IpAddr::V6(v6) => NetworkAddress::V6(v6.octets()),
        }
    }
}

impl From<Ipv4Addr> for NetworkAddress {
    fn from(addr: Ipv4Addr) -> Self {
        NetworkAddress::V4(addr.octets())
    }
}

impl From<NetworkAddress> for IpAddr {
    fn from(addr: NetworkAddress) -> Self {
        match addr {
            NetworkAddress::V4(bytes) => IpAddr::V4(Ipv4Addr::from(bytes)),
            NetworkAddress::V6(bytes) => IpAddr::V6(Ipv6Addr::from(bytes)),
        }
    }
}

impl FromStr for NetworkAddress {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<IpAddr>().map(NetworkAddress::from)
    }
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&IpAddr::from(*self), f)
    }
}
