pub mod address;
pub mod builder;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod responder;

#[cfg(all(unix, feature = "async", not(feature = "simulator")))]
pub mod reactor;

pub use builder::TunBuilder;
pub use config::{EchoConfig, ResponderMode};
pub use device::{NativeHandle, ShutdownHandle, TunDevice};
pub use engine::{EchoEngine, LoopStats, Outcome};
pub use error::{DeviceState, TunError};
pub use responder::{Action, IcmpEchoResponder};

pub use tunecho_core::simulator;
