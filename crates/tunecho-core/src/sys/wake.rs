use std::io;
use std::os::unix::io::RawFd;

use super::utils::{close_fd, set_nonblocking_cloexec};

/// Self-pipe used to interrupt a reader blocked in `poll`.
///
/// Once woken the pipe stays readable; shutdown is terminal.
#[derive(Debug)]
pub struct WakePipe {
    read_fd: RawFd,
    write_fd: RawFd,
}

impl WakePipe {
    pub fn new() -> io::Result<Self> {
        let mut fds = [0 as libc::c_int; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
            return Err(io::Error::last_os_error());
        }
        let pipe = Self { read_fd: fds[0], write_fd: fds[1] };
        set_nonblocking_cloexec(pipe.read_fd)?;
        set_nonblocking_cloexec(pipe.write_fd)?;
        Ok(pipe)
    }

    pub fn read_fd(&self) -> RawFd {
        self.read_fd
    }

    pub fn wake(&self) -> io::Result<()> {
        let byte = 1u8;
        let ret = unsafe { libc::write(self.write_fd, &byte as *const u8 as *const libc::c_void, 1) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            // A full pipe is already readable.
            if err.kind() != io::ErrorKind::WouldBlock {
                return Err(err);
            }
        }
        Ok(())
    }
}

impl Drop for WakePipe {
    fn drop(&mut self) {
        let _ = close_fd(self.read_fd);
        let _ = close_fd(self.write_fd);
    }
}
