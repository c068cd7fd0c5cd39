//! IPv6 fixed header layout (RFC 8200). Only what is needed to classify.

pub const IPV6_HEADER_LEN: usize = 40;
pub const IPV6_VERSION: u8 = 6;

pub const PAYLOAD_LEN_OFFSET: usize = 4;
pub const NEXT_HEADER_OFFSET: usize = 6;
pub const SOURCE_OFFSET: usize = 8;
pub const DESTINATION_OFFSET: usize = 24;
