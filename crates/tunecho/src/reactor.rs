//! Tokio integration for the Unix TUN device.

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};

use log::{info, warn};
use tokio::io::unix::AsyncFd;
use tokio::sync::watch;

use crate::device::{TunDevice, UnixTunDevice};
use crate::engine::runner::{decide, Decision};
use crate::engine::{LoopStats, Outcome};
use crate::error::TunError;
use crate::responder::IcmpEchoResponder;

/// A [`UnixTunDevice`] registered with the tokio reactor.
pub struct AsyncTunDevice {
    inner: UnixTunDevice,
    async_fd: Option<AsyncFd<RawFd>>,
}

impl AsyncTunDevice {
    /// Must be called from within a tokio runtime.
    pub fn new(inner: UnixTunDevice) -> io::Result<Self> {
        let fd = inner.tun().as_raw_fd();
        Ok(Self { inner, async_fd: Some(AsyncFd::new(fd)?) })
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    fn registered(&self, op: &'static str) -> Result<&AsyncFd<RawFd>, TunError> {
        self.inner.state().expect_open(op)?;
        self.async_fd.as_ref().ok_or(TunError::InvalidState { op, state: self.inner.state() })
    }

    /// Wait for one packet. `Ok(None)` at end of stream.
    ///
    /// Cancel-safe: dropping the future loses no packet.
    pub async fn recv(&self) -> Result<Option<Vec<u8>>, TunError> {
        let async_fd = self.registered("read")?;
        let tun = self.inner.tun();
        let mut buf = vec![0u8; self.inner.mtu() + tun.framing().overhead()];
        loop {
            let mut guard = async_fd.readable().await?;
            match guard.try_io(|_| tun.try_recv(&mut buf)) {
                Ok(Ok(0)) => return Ok(None),
                Ok(Ok(n)) => {
                    buf.truncate(n);
                    return Ok(Some(buf));
                }
                Ok(Err(e)) if e.kind() == io::ErrorKind::InvalidData => continue,
                Ok(Err(e)) => return Err(e.into()),
                Err(_would_block) => continue,
            }
        }
    }

    pub async fn send(&self, packet: &[u8]) -> Result<(), TunError> {
        let async_fd = self.registered("write")?;
        let tun = self.inner.tun();
        loop {
            let mut guard = async_fd.writable().await?;
            match guard.try_io(|_| tun.send(packet)) {
                Ok(result) => return result.map_err(TunError::from),
                Err(_would_block) => continue,
            }
        }
    }

    /// Deregister from the reactor, then close the device.
    pub fn close(&mut self) -> Result<(), TunError> {
        self.async_fd.take();
        self.inner.close()
    }

    /// Answer packets until `shutdown` turns true (or its sender is
    /// dropped), then close the device.
    pub async fn run_async(
        &mut self,
        responder: IcmpEchoResponder,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<LoopStats, TunError> {
        let mut stats = LoopStats::default();
        info!("{}: async echo loop started ({} mode)", self.name(), responder.mode());

        let result = loop {
            if *shutdown.borrow() {
                break Ok(());
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break Ok(());
                    }
                }
                packet = self.recv() => match packet {
                    Ok(Some(buffer)) => {
                        let outcome = match decide(&responder, buffer) {
                            Decision::Write(packet, success) => match self.send(&packet).await {
                                Ok(()) => success,
                                Err(e) => {
                                    warn!("{}: failed to write {} byte packet: {}", self.name(), packet.len(), e);
                                    Outcome::WriteFailed
                                }
                            },
                            Decision::Done(outcome) => outcome,
                        };
                        stats.record(&outcome);
                    }
                    Ok(None) => break Ok(()),
                    Err(e) => break Err(e),
                },
            }
        };
        let closed = self.close();

        info!("{}: async echo loop stopped, {}", self.name(), stats);
        result?;
        closed?;
        Ok(stats)
    }
}
