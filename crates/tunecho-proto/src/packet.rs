//! Typed overlay on a raw IP packet buffer.
//!
//! [`PacketView`] never copies and never changes the buffer length. Every
//! accessor is bounds-checked against the buffer; mutators that would land
//! outside it are ignored. Keeping checksums consistent after a mutation is
//! the caller's responsibility.

use thiserror::Error;

use crate::address::NetworkAddress;
use crate::icmp::IcmpMessage;
use crate::{ipv4, ipv6};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    #[error("packet too short: {0} bytes")]
    TooShort(usize),

    #[error("unsupported IP version {0}")]
    UnsupportedVersion(u8),

    #[error("malformed packet: {0}")]
    Malformed(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpVersion {
    V4,
    V6,
}

#[derive(Debug)]
pub struct PacketView<'a> {
    buf: &'a mut [u8],
    version: IpVersion,
    header_len: usize,
    packet_len: usize,
}

impl<'a> PacketView<'a> {
    pub fn parse(buf: &'a mut [u8]) -> Result<Self, ParseError> {
        if buf.len() < ipv4::IPV4_HEADER_LEN {
            return Err(ParseError::TooShort(buf.len()));
        }

        match buf[0] >> 4 {
            ipv4::IPV4_VERSION => {
                let header_len = ipv4::header_len(buf[ipv4::VERSION_IHL_OFFSET]);
                if header_len < ipv4::IPV4_HEADER_LEN {
                    return Err(ParseError::Malformed("IPv4 header length below 20 bytes"));
                }
                if header_len > buf.len() {
                    return Err(ParseError::Malformed("IPv4 header length exceeds buffer"));
                }
                let total_len = usize::from(u16::from_be_bytes([
                    buf[ipv4::TOTAL_LEN_OFFSET],
                    buf[ipv4::TOTAL_LEN_OFFSET + 1],
                ]));
                if total_len > buf.len() {
                    return Err(ParseError::Malformed("IPv4 total length exceeds buffer"));
                }
                if total_len < header_len {
                    return Err(ParseError::Malformed("IPv4 total length shorter than header"));
                }
                Ok(Self {
                    buf,
                    version: IpVersion::V4,
                    header_len,
                    packet_len: total_len,
                })
            }
            ipv6::IPV6_VERSION => {
                if buf.len() < ipv6::IPV6_HEADER_LEN {
                    return Err(ParseError::Malformed("IPv6 fixed header truncated"));
                }
                let payload_len = usize::from(u16::from_be_bytes([
                    buf[ipv6::PAYLOAD_LEN_OFFSET],
                    buf[ipv6::PAYLOAD_LEN_OFFSET + 1],
                ]));
                let packet_len = ipv6::IPV6_HEADER_LEN + payload_len;
                if packet_len > buf.len() {
                    return Err(ParseError::Malformed("IPv6 payload length exceeds buffer"));
                }
                Ok(Self {
                    buf,
                    version: IpVersion::V6,
                    header_len: ipv6::IPV6_HEADER_LEN,
                    packet_len,
                })
            }
            version => Err(ParseError::UnsupportedVersion(version)),
        }
    }

    pub fn version(&self) -> IpVersion {
        self.version
    }

    /// IPv4 protocol or IPv6 next header.
    pub fn protocol(&self) -> u8 {
        match self.version {
            IpVersion::V4 => self.buf[ipv4::PROTOCOL_OFFSET],
            IpVersion::V6 => self.buf[ipv6::NEXT_HEADER_OFFSET],
        }
    }

    pub fn header_len(&self) -> usize {
        self.header_len
    }

    /// Length the header declares for the whole packet. Trailing bytes past
    /// it (link padding) are not part of the payload.
    pub fn total_len(&self) -> usize {
        self.packet_len
    }

    pub fn source(&self) -> NetworkAddress {
        let (offset, len) = self.address_span(Field::Source);
        self.address_at(offset, len)
    }

    pub fn destination(&self) -> NetworkAddress {
        let (offset, len) = self.address_span(Field::Destination);
        self.address_at(offset, len)
    }

    /// IPv4 header checksum. IPv6 has none.
    pub fn header_checksum(&self) -> Option<u16> {
        match self.version {
            IpVersion::V4 => self.short_at(ipv4::CHECKSUM_OFFSET),
            IpVersion::V6 => None,
        }
    }

    pub fn header(&self) -> &[u8] {
        &self.buf[..self.header_len]
    }

    pub fn payload(&self) -> &[u8] {
        &self.buf[self.header_len..self.packet_len]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.header_len..self.packet_len]
    }

    /// ICMPv4 message carried by this packet, if it is one and is at least
    /// a full ICMP header long.
    pub fn icmp(&self) -> Option<IcmpMessage<'_>> {
        if self.version != IpVersion::V4 || self.protocol() != ipv4::protocol::ICMP {
            return None;
        }
        IcmpMessage::new(self.payload())
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.buf
    }

    pub fn byte_at(&self, offset: usize) -> Option<u8> {
        self.buf.get(offset).copied()
    }

    pub fn short_at(&self, offset: usize) -> Option<u16> {
        let bytes = self.buf.get(offset..offset.checked_add(2)?)?;
        Some(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn set_byte_at(&mut self, offset: usize, value: u8) {
        if let Some(byte) = self.buf.get_mut(offset) {
            *byte = value;
        }
    }

    pub fn set_short_at(&mut self, offset: usize, value: u16) {
        let Some(end) = offset.checked_add(2) else {
            return;
        };
        if let Some(bytes) = self.buf.get_mut(offset..end) {
            bytes.copy_from_slice(&value.to_be_bytes());
        }
    }

    /// Overwrite the source address. An address of the other family is
    /// ignored.
    pub fn set_source(&mut self, address: &NetworkAddress) {
        let (offset, len) = self.address_span(Field::Source);
        self.write_address(offset, len, address);
    }

    /// Overwrite the destination address. An address of the other family is
    /// ignored.
    pub fn set_destination(&mut self, address: &NetworkAddress) {
        let (offset, len) = self.address_span(Field::Destination);
        self.write_address(offset, len, address);
    }

    fn address_span(&self, field: Field) -> (usize, usize) {
        match (self.version, field) {
            (IpVersion::V4, Field::Source) => (ipv4::SOURCE_OFFSET, 4),
            (IpVersion::V4, Field::Destination) => (ipv4::DESTINATION_OFFSET, 4),
            (IpVersion::V6, Field::Source) => (ipv6::SOURCE_OFFSET, 16),
            (IpVersion::V6, Field::Destination) => (ipv6::DESTINATION_OFFSET, 16),
        }
    }

    fn address_at(&self, offset: usize, len: usize) -> NetworkAddress {
        let bytes = &self.buf[offset..offset + len];
        match self.version {
            IpVersion::V4 => NetworkAddress::V4([bytes[0], bytes[1], bytes[2], bytes[3]]),
            IpVersion::V6 => {
                let mut raw = [0u8; 16];
                raw.copy_from_slice(bytes);
                NetworkAddress::V6(raw)
            }
        }
    }

    fn write_address(&mut self, offset: usize, len: usize, address: &NetworkAddress) {
        let bytes = address.as_bytes();
        if bytes.len() == len {
            self.buf[offset..offset + len].copy_from_slice(bytes);
        }
    }
}

#[derive(Clone, Copy)]
enum Field {
    Source,
    Destination,
}
