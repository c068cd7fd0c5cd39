//! ICMPv4 message view (RFC 792).

use crate::checksum;
use crate::ipv4;

/// Type, code, checksum and the 4-byte rest-of-header.
pub const ICMP_HEADER_LEN: usize = 8;

pub const ICMP_TYPE_ECHO_REPLY: u8 = 0;
pub const ICMP_TYPE_ECHO_REQUEST: u8 = 8;

pub const TYPE_OFFSET: usize = 0;
pub const CODE_OFFSET: usize = 1;
pub const CHECKSUM_OFFSET: usize = 2;
pub const IDENTIFIER_OFFSET: usize = 4;
pub const SEQUENCE_OFFSET: usize = 6;

/// Read-only view over an ICMP message (header plus data).
#[derive(Debug, Clone, Copy)]
pub struct IcmpMessage<'a> {
    bytes: &'a [u8],
}

impl<'a> IcmpMessage<'a> {
    pub fn new(bytes: &'a [u8]) -> Option<Self> {
        if bytes.len() < ICMP_HEADER_LEN {
            return None;
        }
        Some(Self { bytes })
    }

    pub fn kind(&self) -> u8 {
        self.bytes[TYPE_OFFSET]
    }

    pub fn code(&self) -> u8 {
        self.bytes[CODE_OFFSET]
    }

    pub fn checksum(&self) -> u16 {
        self.short(CHECKSUM_OFFSET)
    }

    /// Identifier of an Echo Request/Reply.
    pub fn identifier(&self) -> u16 {
        self.short(IDENTIFIER_OFFSET)
    }

    /// Sequence number of an Echo Request/Reply.
    pub fn sequence(&self) -> u16 {
        self.short(SEQUENCE_OFFSET)
    }

    pub fn data(&self) -> &'a [u8] {
        &self.bytes[ICMP_HEADER_LEN..]
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn is_echo_request(&self) -> bool {
        self.kind() == ICMP_TYPE_ECHO_REQUEST && self.code() == 0
    }

    pub fn is_echo_reply(&self) -> bool {
        self.kind() == ICMP_TYPE_ECHO_REPLY && self.code() == 0
    }

    /// Checksum over the whole message validates.
    pub fn is_valid(&self) -> bool {
        checksum::verify(self.bytes)
    }

    fn short(&self, offset: usize) -> u16 {
        u16::from_be_bytes([self.bytes[offset], self.bytes[offset + 1]])
    }
}

/// Build a complete IPv4 packet carrying an Echo Request (`kind` 8) or
/// Echo Reply (`kind` 0) with valid IPv4 and ICMP checksums.
pub fn build_echo_packet(
    kind: u8,
    source: [u8; 4],
    destination: [u8; 4],
    identifier: u16,
    sequence: u16,
    data: &[u8],
) -> Option<Vec<u8>> {
    let mut message = Vec::with_capacity(ICMP_HEADER_LEN + data.len());
    message.extend_from_slice(&[kind, 0, 0, 0]);
    message.extend_from_slice(&identifier.to_be_bytes());
    message.extend_from_slice(&sequence.to_be_bytes());
    message.extend_from_slice(data);

    let sum = checksum::compute(&message);
    message[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&sum.to_be_bytes());

    ipv4::build_packet(ipv4::protocol::ICMP, source, destination, &message)
}
