//! Per-frame headers some TUN flavours put in front of each IP packet.
//!
//! macOS utun prefixes a 4-byte big-endian address family. Linux, when
//! opened without `IFF_NO_PI`, prefixes a `tun_pi` struct (2 bytes of flags
//! followed by the ethertype).

use std::io;

/// Size of both supported prefixes.
pub const PREFIX_LEN: usize = 4;

pub const ETH_P_IP: u16 = 0x0800;
pub const ETH_P_IPV6: u16 = 0x86DD;

// Darwin values, fixed by the utun wire format rather than the host libc.
pub const DARWIN_AF_INET: u32 = 2;
pub const DARWIN_AF_INET6: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Frames are bare IP packets.
    None,
    /// macOS utun address-family header.
    Utun,
    /// Linux `tun_pi` packet-information header.
    PacketInfo,
}

impl Framing {
    pub fn overhead(&self) -> usize {
        match self {
            Framing::None => 0,
            Framing::Utun | Framing::PacketInfo => PREFIX_LEN,
        }
    }

    /// Drop the prefix from `buf[..len]`, moving the packet to the front.
    ///
    /// Returns the packet length, or `None` if the frame is too short to
    /// carry a prefix.
    pub fn strip_in_place(&self, buf: &mut [u8], len: usize) -> Option<usize> {
        let overhead = self.overhead();
        if len < overhead || len > buf.len() {
            return None;
        }
        if overhead > 0 {
            buf.copy_within(overhead..len, 0);
        }
        Some(len - overhead)
    }

    /// Prefix to emit ahead of `packet`, chosen from its version nibble.
    pub fn prefix_for(&self, packet: &[u8]) -> io::Result<Option<[u8; PREFIX_LEN]>> {
        if *self == Framing::None {
            return Ok(None);
        }
        let version = packet.first().map(|b| b >> 4);
        let prefix = match (self, version) {
            (Framing::Utun, Some(4)) => DARWIN_AF_INET.to_be_bytes(),
            (Framing::Utun, Some(6)) => DARWIN_AF_INET6.to_be_bytes(),
            (Framing::PacketInfo, Some(4)) => pi_header(ETH_P_IP),
            (Framing::PacketInfo, Some(6)) => pi_header(ETH_P_IPV6),
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "cannot frame a packet that is neither IPv4 nor IPv6",
                ))
            }
        };
        Ok(Some(prefix))
    }
}

fn pi_header(ethertype: u16) -> [u8; PREFIX_LEN] {
    let proto = ethertype.to_be_bytes();
    [0, 0, proto[0], proto[1]]
}
