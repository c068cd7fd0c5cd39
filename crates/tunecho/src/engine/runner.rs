use std::fmt;

use log::{debug, info, warn};
use tunecho_proto::ParseError;

use crate::device::{ShutdownHandle, TunDevice};
use crate::error::TunError;
use crate::responder::{Action, IcmpEchoResponder};

/// What happened to a single packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Replied,
    Forwarded,
    Dropped,
    Malformed(ParseError),
    /// The responder wanted the packet written but the device refused it.
    WriteFailed,
}

/// Per-run packet counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub received: u64,
    pub replied: u64,
    pub forwarded: u64,
    pub dropped: u64,
    pub malformed: u64,
    pub write_failures: u64,
}

impl LoopStats {
    pub(crate) fn record(&mut self, outcome: &Outcome) {
        self.received += 1;
        match outcome {
            Outcome::Replied => self.replied += 1,
            Outcome::Forwarded => self.forwarded += 1,
            Outcome::Dropped => self.dropped += 1,
            Outcome::Malformed(_) => self.malformed += 1,
            Outcome::WriteFailed => self.write_failures += 1,
        }
    }
}

/// Responder verdict: a packet to write and the outcome if the write
/// succeeds, or a final outcome.
pub(crate) enum Decision {
    Write(Vec<u8>, Outcome),
    Done(Outcome),
}

pub(crate) fn decide(responder: &IcmpEchoResponder, buffer: Vec<u8>) -> Decision {
    match responder.handle(buffer) {
        Ok(Action::Reply(packet)) => Decision::Write(packet, Outcome::Replied),
        Ok(Action::Forward(packet)) => Decision::Write(packet, Outcome::Forwarded),
        Ok(Action::Drop) => Decision::Done(Outcome::Dropped),
        Err(e) => {
            debug!("dropping malformed packet: {}", e);
            Decision::Done(Outcome::Malformed(e))
        }
    }
}

impl fmt::Display for LoopStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} received, {} replied, {} forwarded, {} dropped, {} malformed, {} write failures",
            self.received, self.replied, self.forwarded, self.dropped, self.malformed, self.write_failures
        )
    }
}

/// Read, answer and write packets on one device until shutdown.
pub struct EchoEngine<D: TunDevice> {
    device: D,
    responder: IcmpEchoResponder,
    stats: LoopStats,
}

impl<D: TunDevice> EchoEngine<D> {
    pub fn new(device: D, responder: IcmpEchoResponder) -> Self {
        Self { device, responder, stats: LoopStats::default() }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn into_device(self) -> D {
        self.device
    }

    /// Handle that stops [`run`](Self::run) from any thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.device.shutdown_handle()
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    /// Answer one packet and write the result, if any, back to the device.
    /// This is public for testing and custom read loops.
    pub fn process_packet(&mut self, buffer: Vec<u8>) -> Outcome {
        let outcome = match decide(&self.responder, buffer) {
            Decision::Write(packet, success) => self.write(packet, success),
            Decision::Done(outcome) => outcome,
        };
        self.stats.record(&outcome);
        outcome
    }

    fn write(&mut self, packet: Vec<u8>, success: Outcome) -> Outcome {
        match self.device.write_packet(&packet) {
            Ok(()) => success,
            Err(e) => {
                warn!("{}: failed to write {} byte packet: {}", self.device.name(), packet.len(), e);
                Outcome::WriteFailed
            }
        }
    }

    /// Loop until shutdown or a read error, then close the device.
    ///
    /// The packet in flight when shutdown is requested is finished first.
    pub fn run(&mut self) -> Result<LoopStats, TunError> {
        info!("{}: echo loop started ({} mode)", self.device.name(), self.responder.mode());

        let result = loop {
            match self.device.read_packet() {
                Ok(Some(buffer)) => {
                    self.process_packet(buffer);
                }
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        let closed = self.device.close();

        info!("{}: echo loop stopped, {}", self.device.name(), self.stats);

        result?;
        closed?;
        Ok(self.stats)
    }
}
