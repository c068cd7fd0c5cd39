//! The virtual interface the engine reads from and writes to.
//!
//! One concrete device exists per platform, picked at build time through
//! [`PlatformDevice`]. With the `simulator` feature every platform uses the
//! in-memory driver instead; [`SimulatedDevice`] is available either way.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::warn;

use crate::config::DEFAULT_MTU;
use crate::error::TunError;

#[cfg(all(unix, not(feature = "simulator")))]
mod unix;
#[cfg(all(unix, not(feature = "simulator")))]
pub use unix::UnixTunDevice;

#[cfg(all(windows, not(feature = "simulator")))]
mod windows;
#[cfg(all(windows, not(feature = "simulator")))]
pub use windows::WintunDevice;

mod simulated;
pub use simulated::SimulatedDevice;

#[cfg(feature = "simulator")]
pub type PlatformDevice = SimulatedDevice;
#[cfg(all(unix, not(feature = "simulator")))]
pub type PlatformDevice = UnixTunDevice;
#[cfg(all(windows, not(feature = "simulator")))]
pub type PlatformDevice = WintunDevice;

/// OS-level identity of an open device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeHandle {
    /// Unix file descriptor.
    Fd(i32),
    /// Windows adapter LUID.
    Luid(u64),
    /// In-memory device with no OS object behind it.
    Simulated,
}

/// Options applied when a device is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceOptions {
    pub name: Option<String>,
    /// Upper bound on the size of a packet returned by `read_packet`.
    pub mtu: usize,
    /// Ask the kernel for per-frame packet information (Linux). The header
    /// never reaches the caller.
    pub packet_information: bool,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self { name: None, mtu: DEFAULT_MTU, packet_information: false }
    }
}

/// Something that can interrupt a blocked read.
pub(crate) trait Wakeup: Send + Sync {
    fn wake(&self) -> io::Result<()>;
}

/// Cloneable, thread-safe request to stop a device's reader.
///
/// After `shutdown` the next (or current, if blocked) `read_packet`
/// returns `Ok(None)`.
#[derive(Clone)]
pub struct ShutdownHandle {
    stop: Arc<AtomicBool>,
    waker: Arc<dyn Wakeup>,
}

impl ShutdownHandle {
    pub(crate) fn new(waker: Arc<dyn Wakeup>) -> Self {
        Self { stop: Arc::new(AtomicBool::new(false)), waker }
    }

    pub fn shutdown(&self) {
        if self.stop.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.waker.wake() {
            warn!("failed to wake reader: {}", e);
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for ShutdownHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownHandle").field("stop", &self.is_shutdown()).finish()
    }
}

/// An open TUN interface moving bare IPv4/IPv6 packets.
pub trait TunDevice: Send {
    /// Name the OS assigned at open.
    fn name(&self) -> &str;

    fn native_handle(&self) -> NativeHandle;

    fn shutdown_handle(&self) -> ShutdownHandle;

    /// Block until one packet is available.
    ///
    /// `Ok(None)` means shutdown was requested or the device went away.
    fn read_packet(&mut self) -> Result<Option<Vec<u8>>, TunError>;

    /// Hand one complete packet to the OS.
    fn write_packet(&mut self, packet: &[u8]) -> Result<(), TunError>;

    /// Release the device. Calling it again is a no-op.
    fn close(&mut self) -> Result<(), TunError>;
}

/// Devices that can be created from [`DeviceOptions`].
pub trait OpenDevice: TunDevice + Sized {
    /// Create the interface, returning it with the name the OS assigned.
    fn open_with(options: &DeviceOptions) -> Result<(Self, String), TunError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingWaker(AtomicUsize);

    impl Wakeup for CountingWaker {
        fn wake(&self) -> io::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_shutdown_wakes_once() {
        let waker = Arc::new(CountingWaker(AtomicUsize::new(0)));
        let handle = ShutdownHandle::new(waker.clone());
        let clone = handle.clone();

        assert!(!handle.is_shutdown());
        clone.shutdown();
        handle.shutdown();
        assert!(handle.is_shutdown());
        assert_eq!(waker.0.load(Ordering::SeqCst), 1);
    }
}
