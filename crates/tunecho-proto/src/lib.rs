pub mod address;
pub mod checksum;
pub mod icmp;
pub mod ipv4;
pub mod ipv6;
pub mod packet;

pub use address::NetworkAddress;
pub use checksum::compute as checksum;
pub use icmp::IcmpMessage;
pub use packet::{IpVersion, PacketView, ParseError};
