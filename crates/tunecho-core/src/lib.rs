//! Platform access to virtual TUN interfaces.
//!
//! Every backend moves bare IP packets: any per-frame address-family header
//! the kernel adds is removed on receive and restored on send.

pub mod framing;

#[cfg(unix)]
pub mod sys;

#[cfg(windows)]
pub mod wintun;

pub mod simulator;

pub use framing::Framing;

/// Largest IP packet a TUN interface can hand over.
pub const MAX_PACKET_SIZE: usize = 0xFFFF;

/// Longest interface name accepted by the OS, terminator excluded.
pub const MAX_NAME_LEN: usize = 15;

/// Validate a requested interface name before touching the OS.
pub fn validate_name(name: &str) -> std::io::Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN || name.bytes().any(|b| b == 0 || b == b'/') {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("invalid interface name {:?}", name),
        ));
    }
    Ok(())
}
