use std::sync::{Arc, Mutex};

use log::info;
use tunecho_core::simulator::{Driver, SimTun, SimWaker};

use super::{DeviceOptions, NativeHandle, OpenDevice, ShutdownHandle, TunDevice, Wakeup};
use crate::error::{DeviceState, TunError};

impl Wakeup for SimWaker {
    fn wake(&self) -> std::io::Result<()> {
        SimWaker::wake(self);
        Ok(())
    }
}

/// Waker for a device whose link may not exist yet.
#[derive(Default)]
struct PendingWaker {
    slot: Mutex<Option<SimWaker>>,
}

impl PendingWaker {
    fn set(&self, waker: SimWaker) {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(waker);
    }
}

impl Wakeup for PendingWaker {
    fn wake(&self) -> std::io::Result<()> {
        if let Some(waker) = self.slot.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            waker.wake();
        }
        Ok(())
    }
}

/// A device on the in-memory driver. Packets are injected and collected
/// through [`Driver`].
///
/// Unlike the OS devices it can exist before the interface does: [`new`](Self::new)
/// yields an `Unopened` device and [`attach`](Self::attach) creates the link.
pub struct SimulatedDevice {
    driver: Driver,
    requested: Option<String>,
    tun: Option<SimTun>,
    waker: Arc<PendingWaker>,
    shutdown: ShutdownHandle,
    mtu: usize,
    state: DeviceState,
}

impl SimulatedDevice {
    pub fn open(name: Option<&str>) -> Result<(Self, String), TunError> {
        Self::open_with(&DeviceOptions { name: name.map(str::to_string), ..Default::default() })
    }

    /// Open on a specific driver rather than the process-wide one.
    pub fn open_on(driver: &Driver, options: &DeviceOptions) -> Result<(Self, String), TunError> {
        let mut device = Self::new(driver, options);
        let assigned = device.attach()?;
        Ok((device, assigned))
    }

    /// A device bound to `driver` that has not created its interface yet.
    pub fn new(driver: &Driver, options: &DeviceOptions) -> Self {
        let waker = Arc::new(PendingWaker::default());
        Self {
            driver: driver.clone(),
            requested: options.name.clone(),
            tun: None,
            shutdown: ShutdownHandle::new(waker.clone()),
            waker,
            mtu: options.mtu,
            state: DeviceState::Unopened,
        }
    }

    /// Create the interface on the driver and return its name.
    pub fn attach(&mut self) -> Result<String, TunError> {
        if self.state != DeviceState::Unopened {
            return Err(TunError::InvalidState { op: "open", state: self.state });
        }
        let name = self.requested.as_deref();
        let tun = self.driver.open(name).map_err(|e| TunError::from_open(e, name))?;
        self.waker.set(tun.waker());
        let assigned = tun.name().to_string();
        info!("opened simulated device {}", assigned);

        self.tun = Some(tun);
        self.state = DeviceState::Open;
        Ok(assigned)
    }

    fn link(&self) -> Result<&SimTun, TunError> {
        self.tun.as_ref().ok_or(TunError::InvalidState { op: "use", state: self.state })
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }
}

impl OpenDevice for SimulatedDevice {
    fn open_with(options: &DeviceOptions) -> Result<(Self, String), TunError> {
        Self::open_on(&Driver::global(), options)
    }
}

impl TunDevice for SimulatedDevice {
    fn name(&self) -> &str {
        match &self.tun {
            Some(tun) => tun.name(),
            None => self.requested.as_deref().unwrap_or_default(),
        }
    }

    fn native_handle(&self) -> NativeHandle {
        NativeHandle::Simulated
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
        match self.link()?.recv(&mut buf)? {
            Some(n) => {
                buf.truncate(n);
                Ok(Some(buf))
            }
            None => Ok(None),
        }
    }

    fn write_packet(&mut self, packet: &[u8]) -> Result<(), TunError> {
        self.state.expect_open("write")?;
        self.link()?.send(packet)?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), TunError> {
        if self.state == DeviceState::Closed {
            return Ok(());
        }
        self.state = DeviceState::Closed;
        if let Some(tun) = self.tun.as_mut() {
            tun.close()?;
            info!("closed simulated device {}", tun.name());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn open(driver: &Driver, name: &str) -> SimulatedDevice {
        let options = DeviceOptions { name: Some(name.into()), ..Default::default() };
        SimulatedDevice::open_on(driver, &options).unwrap().0
    }

    #[test]
    fn test_open_reports_assigned_name() {
        let driver = Driver::new();
        driver.set_next_unit(3);
        let (device, name) = SimulatedDevice::open_on(&driver, &DeviceOptions::default()).unwrap();
        assert_eq!(name, "utun3");
        assert_eq!(device.name(), "utun3");
        assert_eq!(device.native_handle(), NativeHandle::Simulated);
        assert_eq!(device.state(), DeviceState::Open);
    }

    #[test]
    fn test_name_conflict() {
        let driver = Driver::new();
        let _first = open(&driver, "tun0");
        let options = DeviceOptions { name: Some("tun0".into()), ..Default::default() };
        let err = SimulatedDevice::open_on(&driver, &options).err().unwrap();
        assert!(matches!(err, TunError::NameConflict(ref n) if n == "tun0"));
    }

    #[test]
    fn test_driver_unavailable() {
        let driver = Driver::new();
        driver.set_unavailable(true);
        let err = SimulatedDevice::open_on(&driver, &DeviceOptions::default()).err().unwrap();
        assert!(matches!(err, TunError::DeviceUnavailable(_)));
    }

    #[test]
    fn test_read_and_write_after_close() {
        let driver = Driver::new();
        let mut device = open(&driver, "tun0");
        device.close().unwrap();
        device.close().unwrap();

        assert!(matches!(
            device.read_packet(),
            Err(TunError::InvalidState { op: "read", state: DeviceState::Closed })
        ));
        assert!(matches!(
            device.write_packet(&[0x45]),
            Err(TunError::InvalidState { op: "write", state: DeviceState::Closed })
        ));
    }

    #[test]
    fn test_unopened_device_rejects_io() {
        let driver = Driver::new();
        let options = DeviceOptions { name: Some("tun0".into()), ..Default::default() };
        let mut device = SimulatedDevice::new(&driver, &options);
        assert_eq!(device.state(), DeviceState::Unopened);
        assert_eq!(device.name(), "tun0");
        assert!(!driver.is_open("tun0"));

        assert!(matches!(
            device.read_packet(),
            Err(TunError::InvalidState { op: "read", state: DeviceState::Unopened })
        ));
        assert!(matches!(
            device.write_packet(&[0x45]),
            Err(TunError::InvalidState { op: "write", state: DeviceState::Unopened })
        ));

        assert_eq!(device.attach().unwrap(), "tun0");
        assert_eq!(device.state(), DeviceState::Open);
        assert!(driver.is_open("tun0"));
        assert!(matches!(
            device.attach(),
            Err(TunError::InvalidState { op: "open", state: DeviceState::Open })
        ));
    }

    #[test]
    fn test_close_before_attach() {
        let driver = Driver::new();
        let mut device = SimulatedDevice::new(&driver, &DeviceOptions::default());
        device.close().unwrap();
        assert_eq!(device.state(), DeviceState::Closed);
        assert!(matches!(
            device.attach(),
            Err(TunError::InvalidState { op: "open", state: DeviceState::Closed })
        ));
    }

    #[test]
    fn test_shutdown_before_attach_is_kept() {
        let driver = Driver::new();
        let mut device = SimulatedDevice::new(&driver, &DeviceOptions::default());
        device.shutdown_handle().shutdown();
        device.attach().unwrap();
        assert_eq!(device.read_packet().unwrap(), None);
    }

    #[test]
    fn test_read_is_mtu_bounded() {
        let driver = Driver::new();
        let options = DeviceOptions { name: Some("tun0".into()), mtu: 64, ..Default::default() };
        let (mut device, _) = SimulatedDevice::open_on(&driver, &options).unwrap();
        driver.inject_packet("tun0", &[0x45; 100]).unwrap();
        assert_eq!(device.read_packet().unwrap().unwrap().len(), 64);
    }

    #[test]
    fn test_shutdown_unblocks_read() {
        let driver = Driver::new();
        let mut device = open(&driver, "tun0");
        let shutdown = device.shutdown_handle();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            shutdown.shutdown();
        });

        assert_eq!(device.read_packet().unwrap(), None);
        assert_eq!(device.read_packet().unwrap(), None);
        handle.join().unwrap();
    }

    #[test]
    fn test_write_reaches_driver() {
        let driver = Driver::new();
        let mut device = open(&driver, "tun0");
        device.write_packet(&[0x45, 0x00]).unwrap();
        assert_eq!(driver.read_tx_packet("tun0").unwrap(), Some(vec![0x45, 0x00]));
    }
}
