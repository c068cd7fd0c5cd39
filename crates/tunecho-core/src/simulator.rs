//! In-memory TUN driver for tests and machines without privileges.
//!
//! A [`Driver`] owns a registry of links keyed by interface name. Each link
//! has an inbound queue (what the OS would route into the interface) and an
//! outbound queue (what the application wrote).

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_queue::SegQueue;
use lazy_static::lazy_static;
use log::debug;

lazy_static! {
    static ref GLOBAL: Driver = Driver::new();
}

#[derive(Default)]
struct Inbound {
    packets: VecDeque<Vec<u8>>,
    woken: bool,
    closed: bool,
}

#[derive(Default)]
struct Link {
    inbound: Mutex<Inbound>,
    ready: Condvar,
    outbound: SegQueue<Vec<u8>>,
}

impl Link {
    fn lock(&self) -> MutexGuard<'_, Inbound> {
        // A panicking test thread must not wedge the others.
        self.inbound.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn wake(&self) {
        self.lock().woken = true;
        self.ready.notify_all();
    }
}

#[derive(Default)]
struct Registry {
    links: HashMap<String, Arc<Link>>,
    next_unit: u32,
    unavailable: bool,
}

/// A simulated TUN driver. Clones share state.
#[derive(Clone, Default)]
pub struct Driver {
    registry: Arc<Mutex<Registry>>,
}

impl Driver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide driver used when none is supplied.
    pub fn global() -> Driver {
        GLOBAL.clone()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Unit number used for the next unnamed open (`utunN`).
    pub fn set_next_unit(&self, unit: u32) {
        self.registry().next_unit = unit;
    }

    /// Make every subsequent open fail as if the driver were absent.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.registry().unavailable = unavailable;
    }

    pub fn open(&self, name: Option<&str>) -> io::Result<SimTun> {
        let mut registry = self.registry();
        if registry.unavailable {
            return Err(io::Error::new(io::ErrorKind::NotFound, "simulated tun driver is unavailable"));
        }

        let name = match name {
            Some(name) => {
                crate::validate_name(name)?;
                if registry.links.contains_key(name) {
                    return Err(io::Error::new(
                        io::ErrorKind::AddrInUse,
                        format!("interface name {} is already in use", name),
                    ));
                }
                name.to_string()
            }
            None => loop {
                let candidate = format!("utun{}", registry.next_unit);
                registry.next_unit += 1;
                if !registry.links.contains_key(&candidate) {
                    break candidate;
                }
            },
        };

        let link = Arc::new(Link::default());
        registry.links.insert(name.clone(), link.clone());
        debug!("simulator: opened {}", name);
        Ok(SimTun { driver: self.clone(), name, link, closed: false })
    }

    fn link(&self, name: &str) -> io::Result<Arc<Link>> {
        self.registry()
            .links
            .get(name)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no simulated interface {}", name)))
    }

    pub fn is_open(&self, name: &str) -> bool {
        self.registry().links.contains_key(name)
    }

    /// Deliver a packet to the interface as if the OS routed it there.
    pub fn inject_packet(&self, name: &str, packet: &[u8]) -> io::Result<()> {
        let link = self.link(name)?;
        link.lock().packets.push_back(packet.to_vec());
        link.ready.notify_one();
        Ok(())
    }

    /// Pop the oldest packet the application wrote, if any.
    pub fn read_tx_packet(&self, name: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self.link(name)?.outbound.pop())
    }

    /// Wait up to `timeout` for the application to write a packet.
    pub fn wait_tx_packet(&self, name: &str, timeout: Duration) -> io::Result<Option<Vec<u8>>> {
        let link = self.link(name)?;
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(packet) = link.outbound.pop() {
                return Ok(Some(packet));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            thread::sleep(Duration::from_millis(2));
        }
    }

    fn remove(&self, name: &str) {
        self.registry().links.remove(name);
    }
}

/// Wakes a reader blocked on a [`SimTun`].
#[derive(Clone)]
pub struct SimWaker {
    link: Arc<Link>,
}

impl SimWaker {
    pub fn wake(&self) {
        self.link.wake();
    }
}

/// Application side of a simulated interface.
pub struct SimTun {
    driver: Driver,
    name: String,
    link: Arc<Link>,
    closed: bool,
}

impl SimTun {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn waker(&self) -> SimWaker {
        SimWaker { link: self.link.clone() }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Block until a packet is queued, the link is woken, or it closes.
    ///
    /// Packets longer than `buf` are truncated, like a short `read(2)`.
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        let mut inbound = self.link.lock();
        loop {
            if inbound.woken || inbound.closed {
                return Ok(None);
            }
            if let Some(packet) = inbound.packets.pop_front() {
                let len = packet.len().min(buf.len());
                buf[..len].copy_from_slice(&packet[..len]);
                return Ok(Some(len));
            }
            inbound = self.link.ready.wait(inbound).unwrap_or_else(|e| e.into_inner());
        }
    }

    pub fn send(&self, packet: &[u8]) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "simulated interface is closed"));
        }
        self.link.outbound.push(packet.to_vec());
        Ok(())
    }

    /// Detach from the driver, freeing the name. Later calls are no-ops.
    pub fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.link.lock().closed = true;
        self.link.ready.notify_all();
        self.driver.remove(&self.name);
        debug!("simulator: closed {}", self.name);
        Ok(())
    }
}

impl Drop for SimTun {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unnamed_open_uses_next_unit() {
        let driver = Driver::new();
        driver.set_next_unit(3);
        let first = driver.open(None).unwrap();
        let second = driver.open(None).unwrap();
        assert_eq!(first.name(), "utun3");
        assert_eq!(second.name(), "utun4");
    }

    #[test]
    fn test_unnamed_open_skips_taken_names() {
        let driver = Driver::new();
        let _taken = driver.open(Some("utun0")).unwrap();
        let tun = driver.open(None).unwrap();
        assert_eq!(tun.name(), "utun1");
    }

    #[test]
    fn test_name_conflict() {
        let driver = Driver::new();
        let _first = driver.open(Some("tun7")).unwrap();
        let err = driver.open(Some("tun7")).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::AddrInUse);
    }

    #[test]
    fn test_close_frees_name() {
        let driver = Driver::new();
        let mut tun = driver.open(Some("tun7")).unwrap();
        tun.close().unwrap();
        tun.close().unwrap();
        assert!(!driver.is_open("tun7"));
        assert!(driver.open(Some("tun7")).is_ok());
    }

    #[test]
    fn test_unavailable_driver() {
        let driver = Driver::new();
        driver.set_unavailable(true);
        let err = driver.open(None).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_inject_and_capture() {
        let driver = Driver::new();
        let tun = driver.open(Some("sim0")).unwrap();
        driver.inject_packet("sim0", &[0x45, 1, 2]).unwrap();

        let mut buf = [0u8; 16];
        let n = tun.recv(&mut buf).unwrap().unwrap();
        assert_eq!(&buf[..n], &[0x45, 1, 2]);

        tun.send(&[0x45, 9]).unwrap();
        assert_eq!(driver.read_tx_packet("sim0").unwrap(), Some(vec![0x45, 9]));
        assert_eq!(driver.read_tx_packet("sim0").unwrap(), None);
    }

    #[test]
    fn test_waker_unblocks_recv() {
        let driver = Driver::new();
        let tun = driver.open(None).unwrap();
        let waker = tun.waker();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            waker.wake();
        });

        let mut buf = [0u8; 16];
        assert_eq!(tun.recv(&mut buf).unwrap(), None);
        handle.join().unwrap();
    }

    #[test]
    fn test_send_after_close_fails() {
        let driver = Driver::new();
        let mut tun = driver.open(None).unwrap();
        tun.close().unwrap();
        assert!(tun.send(&[0x45]).is_err());
    }
}
