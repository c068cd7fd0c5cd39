use crate::config::{EchoConfig, ResponderMode, DEFAULT_MTU};
use crate::device::{DeviceOptions, OpenDevice, PlatformDevice, TunDevice};
use crate::engine::EchoEngine;
use crate::error::TunError;
use crate::responder::IcmpEchoResponder;

/// An unopened device plus the responder settings for the engine that will
/// drive it.
#[derive(Debug, Clone)]
pub struct TunBuilder {
    name: Option<String>,
    mtu: usize,
    mode: ResponderMode,
    packet_information: bool,
}

impl Default for TunBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TunBuilder {
    pub fn new() -> Self {
        Self {
            name: None,
            mtu: DEFAULT_MTU,
            mode: ResponderMode::default(),
            packet_information: false,
        }
    }

    pub fn from_config(config: &EchoConfig) -> Self {
        Self {
            name: config.if_name.clone(),
            mtu: config.mtu,
            mode: config.mode,
            packet_information: false,
        }
    }

    /// Request a specific interface name. An empty name lets the OS choose.
    pub fn name(mut self, name: &str) -> Self {
        self.name = if name.is_empty() { None } else { Some(name.to_string()) };
        self
    }

    pub fn mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    pub fn mode(mut self, mode: ResponderMode) -> Self {
        self.mode = mode;
        self
    }

    /// Keep the kernel's packet-information header on Linux. It is still
    /// stripped before packets reach the engine.
    pub fn packet_information(mut self, enabled: bool) -> Self {
        self.packet_information = enabled;
        self
    }

    pub fn options(&self) -> DeviceOptions {
        DeviceOptions {
            name: self.name.clone(),
            mtu: self.mtu,
            packet_information: self.packet_information,
        }
    }

    /// Open the platform device, returning it with its assigned name.
    pub fn open(&self) -> Result<(PlatformDevice, String), TunError> {
        self.open_as::<PlatformDevice>()
    }

    pub fn open_as<D: OpenDevice>(&self) -> Result<(D, String), TunError> {
        if self.mtu < crate::config::MIN_MTU || self.mtu > tunecho_core::MAX_PACKET_SIZE {
            return Err(TunError::InvalidConfiguration(format!("MTU {} out of range", self.mtu)));
        }
        D::open_with(&self.options())
    }

    pub fn build_engine(&self) -> Result<EchoEngine<PlatformDevice>, TunError> {
        let (device, _) = self.open()?;
        Ok(self.engine_for(device))
    }

    /// Wrap an already opened device in an engine using this builder's mode.
    pub fn engine_for<D: TunDevice>(&self, device: D) -> EchoEngine<D> {
        EchoEngine::new(device, IcmpEchoResponder::new(self.mode))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SimulatedDevice;

    #[test]
    fn test_empty_name_means_os_choice() {
        let builder = TunBuilder::new().name("");
        assert_eq!(builder.options().name, None);
        let builder = TunBuilder::new().name("tun9");
        assert_eq!(builder.options().name.as_deref(), Some("tun9"));
    }

    #[test]
    fn test_from_config() {
        let config = EchoConfig { if_name: Some("tun5".into()), mtu: 9000, mode: ResponderMode::Ping, ..Default::default() };
        let builder = TunBuilder::from_config(&config);
        let options = builder.options();
        assert_eq!(options.name.as_deref(), Some("tun5"));
        assert_eq!(options.mtu, 9000);
        assert_eq!(builder.engine_for(open_sim("bldcfg0")).stats().received, 0);
    }

    #[test]
    fn test_rejects_bad_mtu() {
        let err = TunBuilder::new().name("bldmtu0").mtu(10).open_as::<SimulatedDevice>().err().unwrap();
        assert!(matches!(err, TunError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_open_as_simulated() {
        let (device, name) = TunBuilder::new().name("bldsim0").open_as::<SimulatedDevice>().unwrap();
        assert_eq!(name, "bldsim0");
        assert_eq!(device.name(), "bldsim0");
    }

    fn open_sim(name: &str) -> SimulatedDevice {
        TunBuilder::new().name(name).open_as::<SimulatedDevice>().unwrap().0
    }
}
