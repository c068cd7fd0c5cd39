use std::io;
use std::os::unix::io::{AsRawFd, RawFd};

use log::{debug, trace};

use super::utils::close_fd;
use super::wake::WakePipe;
use crate::framing::{Framing, PREFIX_LEN};

/// Outcome of waiting on the device and the wake pipe together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Readable,
    Woken,
}

/// Wait until `fd` is readable or `wake` fires. `timeout_ms < 0` waits forever.
///
/// Returns `Ok(None)` on timeout. The wake pipe wins when both are ready.
pub fn wait_readable(fd: RawFd, wake: &WakePipe, timeout_ms: i32) -> io::Result<Option<Readiness>> {
    let mut fds = [
        libc::pollfd { fd, events: libc::POLLIN, revents: 0 },
        libc::pollfd { fd: wake.read_fd(), events: libc::POLLIN, revents: 0 },
    ];

    loop {
        let ret = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        if ret == 0 {
            return Ok(None);
        }
        break;
    }

    if fds[1].revents & libc::POLLIN != 0 {
        return Ok(Some(Readiness::Woken));
    }
    if fds[0].revents & libc::POLLNVAL != 0 {
        return Err(io::Error::from_raw_os_error(libc::EBADF));
    }
    // POLLERR/POLLHUP surface through the following read.
    Ok(Some(Readiness::Readable))
}

/// An open TUN descriptor together with the framing the kernel applies.
#[derive(Debug)]
pub struct TunFd {
    fd: RawFd,
    name: String,
    framing: Framing,
    closed: bool,
}

impl TunFd {
    /// Take ownership of an already configured, non-blocking descriptor.
    pub fn from_raw(fd: RawFd, name: String, framing: Framing) -> Self {
        Self { fd, name, framing, closed: false }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Read one frame without blocking and strip its prefix into `buf[..n]`.
    ///
    /// Returns `Ok(0)` at end of stream. Frames too short to carry the
    /// prefix are reported as `InvalidData`.
    pub fn try_recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let n = loop {
            let ret = unsafe { libc::read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
            if ret >= 0 {
                break ret as usize;
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        };
        if n == 0 {
            return Ok(0);
        }
        self.framing
            .strip_in_place(buf, n)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "frame shorter than its prefix"))
    }

    /// Block until a packet arrives or `wake` fires.
    ///
    /// Returns `Ok(None)` when woken or at end of stream.
    pub fn recv(&self, buf: &mut [u8], wake: &WakePipe) -> io::Result<Option<usize>> {
        loop {
            match wait_readable(self.fd, wake, -1)? {
                Some(Readiness::Woken) => return Ok(None),
                Some(Readiness::Readable) => {}
                None => continue,
            }
            match self.try_recv(buf) {
                Ok(0) => {
                    debug!("{}: end of stream", self.name);
                    return Ok(None);
                }
                Ok(n) => {
                    trace!("{}: read {} bytes", self.name, n);
                    return Ok(Some(n));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    debug!("{}: skipping runt frame", self.name);
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Write one packet, prefixing it as the device expects.
    pub fn send(&self, packet: &[u8]) -> io::Result<()> {
        let prefix = self.framing.prefix_for(packet)?;
        let prefix_buf = prefix.unwrap_or([0; PREFIX_LEN]);

        let mut iov = [
            libc::iovec { iov_base: prefix_buf.as_ptr() as *mut libc::c_void, iov_len: prefix_buf.len() },
            libc::iovec { iov_base: packet.as_ptr() as *mut libc::c_void, iov_len: packet.len() },
        ];
        let (iov_ptr, iov_cnt, expected) = match prefix {
            Some(_) => (iov.as_mut_ptr(), 2, PREFIX_LEN + packet.len()),
            None => (iov[1..].as_mut_ptr(), 1, packet.len()),
        };

        loop {
            let ret = unsafe { libc::writev(self.fd, iov_ptr, iov_cnt) };
            if ret < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            if ret as usize != expected {
                return Err(io::Error::new(io::ErrorKind::WriteZero, "short write to tun device"));
            }
            trace!("{}: wrote {} bytes", self.name, packet.len());
            return Ok(());
        }
    }

    /// Release the descriptor. Later calls are no-ops.
    pub fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        close_fd(self.fd)
    }
}

impl AsRawFd for TunFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for TunFd {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sys::utils::set_nonblocking_cloexec;

    // A socketpair stands in for the tun descriptor: both preserve
    // datagram boundaries.
    fn pair(framing: Framing) -> (TunFd, RawFd) {
        let mut fds = [0 as libc::c_int; 2];
        let ret = unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_DGRAM, 0, fds.as_mut_ptr()) };
        assert_eq!(ret, 0);
        set_nonblocking_cloexec(fds[0]).unwrap();
        (TunFd::from_raw(fds[0], "test0".into(), framing), fds[1])
    }

    fn peer_send(fd: RawFd, bytes: &[u8]) {
        let ret = unsafe { libc::write(fd, bytes.as_ptr() as *const libc::c_void, bytes.len()) };
        assert_eq!(ret as usize, bytes.len());
    }

    fn peer_recv(fd: RawFd) -> Vec<u8> {
        let mut buf = [0u8; 128];
        let ret = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        assert!(ret > 0);
        buf[..ret as usize].to_vec()
    }

    #[test]
    fn test_recv_strips_prefix() {
        let (tun, peer) = pair(Framing::Utun);
        let wake = WakePipe::new().unwrap();
        peer_send(peer, &[0, 0, 0, 2, 0x45, 0xAA]);

        let mut buf = [0u8; 64];
        let n = tun.recv(&mut buf, &wake).unwrap().unwrap();
        assert_eq!(&buf[..n], &[0x45, 0xAA]);
        close_fd(peer).unwrap();
    }

    #[test]
    fn test_send_adds_prefix() {
        let (tun, peer) = pair(Framing::PacketInfo);
        tun.send(&[0x45, 0x01, 0x02]).unwrap();
        assert_eq!(peer_recv(peer), vec![0, 0, 0x08, 0x00, 0x45, 0x01, 0x02]);
        close_fd(peer).unwrap();
    }

    #[test]
    fn test_send_bare() {
        let (tun, peer) = pair(Framing::None);
        tun.send(&[0x60, 0x00]).unwrap();
        assert_eq!(peer_recv(peer), vec![0x60, 0x00]);
        close_fd(peer).unwrap();
    }

    #[test]
    fn test_wake_interrupts_recv() {
        let (tun, peer) = pair(Framing::None);
        let wake = std::sync::Arc::new(WakePipe::new().unwrap());
        let waker = wake.clone();

        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(50));
            waker.wake().unwrap();
        });

        let mut buf = [0u8; 64];
        assert_eq!(tun.recv(&mut buf, &wake).unwrap(), None);
        handle.join().unwrap();
        close_fd(peer).unwrap();
    }

    #[test]
    fn test_close_is_idempotent() {
        let (mut tun, peer) = pair(Framing::None);
        tun.close().unwrap();
        tun.close().unwrap();
        assert!(tun.is_closed());
        close_fd(peer).unwrap();
    }
}
