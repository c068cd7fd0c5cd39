use std::fmt;
use std::io;

use thiserror::Error;
use tunecho_proto::ParseError;

/// Lifecycle position of a device. OS devices start `Open`; a
/// [`SimulatedDevice`](crate::device::SimulatedDevice) built with `new` starts `Unopened`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Unopened,
    Open,
    Closed,
}

impl DeviceState {
    /// Fail with `InvalidState` unless open.
    pub fn expect_open(self, op: &'static str) -> Result<(), TunError> {
        match self {
            DeviceState::Open => Ok(()),
            state => Err(TunError::InvalidState { op, state }),
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceState::Unopened => "unopened",
            DeviceState::Open => "open",
            DeviceState::Closed => "closed",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum TunError {
    #[error("TUN device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Interface name already in use: {0}")]
    NameConflict(String),

    #[error("Cannot {op} a device that is {state}")]
    InvalidState { op: &'static str, state: DeviceState },

    #[error("IO Error: {0}")]
    Io(#[from] io::Error),

    #[error("OS command failed: {0}")]
    Os(String),

    #[error("Malformed packet: {0}")]
    Parse(#[from] ParseError),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl TunError {
    /// Classify an error raised while creating a device.
    ///
    /// A name in use only conflicts when the caller asked for it; otherwise
    /// the driver ran out of names to hand out.
    pub(crate) fn from_open(err: io::Error, name: Option<&str>) -> Self {
        match (err.kind(), name) {
            (io::ErrorKind::AddrInUse, Some(name)) => TunError::NameConflict(name.to_string()),
            (
                io::ErrorKind::AddrInUse
                | io::ErrorKind::PermissionDenied
                | io::ErrorKind::NotFound
                | io::ErrorKind::Unsupported,
                _,
            ) => TunError::DeviceUnavailable(err.to_string()),
            (io::ErrorKind::InvalidInput, _) => TunError::InvalidConfiguration(err.to_string()),
            _ => TunError::Io(err),
        }
    }
}
