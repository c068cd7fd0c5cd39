use std::os::unix::io::AsRawFd;
use std::sync::Arc;

use log::info;
use tunecho_core::sys::{open_tun, TunFd, WakePipe};

use super::{DeviceOptions, NativeHandle, OpenDevice, ShutdownHandle, TunDevice, Wakeup};
use crate::error::{DeviceState, TunError};

impl Wakeup for WakePipe {
    fn wake(&self) -> std::io::Result<()> {
        WakePipe::wake(self)
    }
}

/// `/dev/net/tun` on Linux, a utun control socket on macOS.
pub struct UnixTunDevice {
    tun: TunFd,
    wake: Arc<WakePipe>,
    shutdown: ShutdownHandle,
    mtu: usize,
    state: DeviceState,
}

impl UnixTunDevice {
    pub fn open(name: Option<&str>) -> Result<(Self, String), TunError> {
        Self::open_with(&DeviceOptions { name: name.map(str::to_string), ..Default::default() })
    }

    #[cfg(feature = "async")]
    pub(crate) fn tun(&self) -> &TunFd {
        &self.tun
    }

    #[cfg(feature = "async")]
    pub(crate) fn mtu(&self) -> usize {
        self.mtu
    }

    #[cfg(feature = "async")]
    pub(crate) fn state(&self) -> DeviceState {
        self.state
    }
}

impl OpenDevice for UnixTunDevice {
    fn open_with(options: &DeviceOptions) -> Result<(Self, String), TunError> {
        let name = options.name.as_deref();
        let tun = open_tun(name, options.packet_information).map_err(|e| TunError::from_open(e, name))?;
        let wake = Arc::new(WakePipe::new()?);
        let shutdown = ShutdownHandle::new(wake.clone());
        let assigned = tun.name().to_string();
        info!("opened tun device {}", assigned);

        let device = Self { tun, wake, shutdown, mtu: options.mtu, state: DeviceState::Open };
        Ok((device, assigned))
    }
}

impl TunDevice for UnixTunDevice {
    fn name(&self) -> &str {
        self.tun.name()
    }

    fn native_handle(&self) -> NativeHandle {
        NativeHandle::Fd(self.tun.as_raw_fd())
    }

    fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    fn read_packet(&mut self) -> Result<Option<Vec<u8>>, TunError> {
        self.state.expect_open("read")?;
        if self.shutdown.is_shutdown() {
            return Ok(None);
        }
        let mut buf = vec![0u8; self.mtu + self.tun.framing().overhead()];
        match self.tun.recv(&mut buf, &self.wake)? {
            Some(n) => {
                buf.truncate(n);
                Ok(Some(buf))
            }
            None => Ok(None),
        }
    }

    fn write_packet(&mut self, packet: &[u8]) -> Result<(), TunError> {
        self.state.expect_open("write")?;
        self.tun.send(packet)?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), TunError> {
        if self.state == DeviceState::Closed {
            return Ok(());
        }
        self.state = DeviceState::Closed;
        self.tun.close()?;
        info!("closed tun device {}", self.tun.name());
        Ok(())
    }
}
