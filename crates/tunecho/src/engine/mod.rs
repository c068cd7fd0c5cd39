pub mod runner;

pub use runner::{EchoEngine, LoopStats, Outcome};
