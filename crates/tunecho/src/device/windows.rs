use std::sync::Arc;

use log::info;
use tunecho_core::wintun::{WakeEvent, WintunSession};

use super::{DeviceOptions, NativeHandle, OpenDevice, ShutdownHandle, TunDevice, Wakeup};
use crate::error::{DeviceState, TunError};

impl Wakeup for WakeEvent {
    fn wake(&self) -> std::io::Result<()> {
        WakeEvent::wake(self)
    }
}

/// A Wintun adapter and its packet session.
pub struct WintunDevice {
    session: WintunSession,
    wake: Arc<WakeEvent>,
    shutdown: ShutdownHandle,
    mtu: usize,
    state: DeviceState,
}

impl WintunDevice {
    pub fn open(name: Option<&str>) -> Result<(Self, String), TunError> {
        Self::open_with(&DeviceOptions { name: name.map(str::to_string), ..Default::default() })
    }
}

impl OpenDevice for WintunDevice {
    fn open_with(options: &DeviceOptions) -> Result<(Self, String), TunError> {
        let name = options.name.as_deref();
        let session = WintunSession::open(name).map_err(|e| TunError::from_open(e, name))?;
        let wake = Arc::new(WakeEvent::new()?);
        let shutdown = ShutdownHandle::new(wake.clone());
        let assigned = session.name().to_string();
        info!("opened wintun adapter {}", assigned);

        let device = Self { session, wake, shutdown, mtu: options.mtu, state: DeviceState::Open };
        Ok((device, assigned))
    }
}

impl TunDevice for WintunDevice {
    fn name(&self) -> &str {
        self.session.name()
    }

    fn native_handle(&self) -> NativeHandle {
        NativeHandle::Luid(self.session.luid())
    }

    fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    fn read_packet(&mut self) -> Result<Option<Vec<u8>>, TunError> {
        self.state.expect_open("read")?;
        if self.shutdown.is_shutdown() {
            return Ok(None);
        }
        let mut buf = vec![0u8; self.mtu];
        match self.session.recv(&mut buf, &self.wake)? {
            Some(n) => {
                buf.truncate(n);
                Ok(Some(buf))
            }
            None => Ok(None),
        }
    }

    fn write_packet(&mut self, packet: &[u8]) -> Result<(), TunError> {
        self.state.expect_open("write")?;
        self.session.send(packet)?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), TunError> {
        if self.state == DeviceState::Closed {
            return Ok(());
        }
        self.state = DeviceState::Closed;
        self.session.close()?;
        info!("closed wintun adapter {}", self.session.name());
        Ok(())
    }
}
