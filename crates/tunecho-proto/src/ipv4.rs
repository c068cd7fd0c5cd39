//! IPv4 header layout (RFC 791).

pub const IPV4_HEADER_LEN: usize = 20;
pub const IPV4_VERSION: u8 = 4;
pub const DEFAULT_TTL: u8 = 64;

pub const VERSION_IHL_OFFSET: usize = 0;
pub const TOTAL_LEN_OFFSET: usize = 2;
pub const PROTOCOL_OFFSET: usize = 9;
pub const CHECKSUM_OFFSET: usize = 10;
pub const SOURCE_OFFSET: usize = 12;
pub const DESTINATION_OFFSET: usize = 16;

/// IP protocol numbers carried in the protocol / next-header field.
pub mod protocol {
    pub const ICMP: u8 = 1;
    pub const UDP: u8 = 17;
    pub const ICMPV6: u8 = 58;
}

/// Header length in bytes encoded in the IHL nibble of `ver_ihl`.
#[inline]
pub fn header_len(ver_ihl: u8) -> usize {
    usize::from(ver_ihl & 0x0F) * 4
}

/// Assemble a packet with a 20-byte header and a valid header checksum.
///
/// Returns `None` if `payload` does not fit in the 16-bit total length field.
pub fn build_packet(
    protocol: u8,
    source: [u8; 4],
    destination: [u8; 4],
    payload: &[u8],
) -> Option<Vec<u8>> {
    let total_len = u16::try_from(IPV4_HEADER_LEN + payload.len()).ok()?;

    let mut packet = Vec::with_capacity(usize::from(total_len));
    packet.extend_from_slice(&[(IPV4_VERSION << 4) | 5, 0]);
    packet.extend_from_slice(&total_len.to_be_bytes());
    packet.extend_from_slice(&[0, 0, 0x40, 0]); // id, DF
    packet.extend_from_slice(&[DEFAULT_TTL, protocol, 0, 0]);
    packet.extend_from_slice(&source);
    packet.extend_from_slice(&destination);

    let checksum = crate::checksum(&packet[..IPV4_HEADER_LEN]);
    packet[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&checksum.to_be_bytes());

    packet.extend_from_slice(payload);
    Some(packet)
}
