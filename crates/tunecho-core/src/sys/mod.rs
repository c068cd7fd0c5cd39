pub mod fd;
pub mod tun;
pub mod utils;
pub mod wake;

pub use fd::{Readiness, TunFd};
pub use tun::open_tun;
pub use wake::WakePipe;
