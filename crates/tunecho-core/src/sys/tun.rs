use std::io;

use log::debug;

use super::fd::TunFd;

/// Create a TUN interface, letting the kernel pick the name if `name` is `None`.
///
/// `packet_information` keeps the kernel's per-frame header on platforms
/// where it is optional; it is stripped either way. The descriptor is
/// returned non-blocking.
pub fn open_tun(name: Option<&str>, packet_information: bool) -> io::Result<TunFd> {
    if let Some(name) = name {
        crate::validate_name(name)?;
    }
    let tun = platform::open(name, packet_information)?;
    debug!("opened {} ({:?} framing)", tun.name(), tun.framing());
    Ok(tun)
}

fn name_taken(name: &str) -> io::Error {
    io::Error::new(io::ErrorKind::AddrInUse, format!("interface name {} is already in use", name))
}

#[cfg(target_os = "linux")]
mod platform {
    use std::ffi::CStr;
    use std::io;
    use std::mem;

    use super::name_taken;
    use crate::framing::Framing;
    use crate::sys::fd::TunFd;
    use crate::sys::utils::{close_fd, interface_exists, name_from_c_buf};

    const TUN_PATH: &CStr = c"/dev/net/tun";
    const TUNSETIFF: libc::c_ulong = 0x4004_54CA;
    const IFF_TUN: libc::c_short = 0x0001;
    const IFF_NO_PI: libc::c_short = 0x1000;

    #[repr(C)]
    struct IfReq {
        ifr_name: [libc::c_char; libc::IFNAMSIZ],
        ifr_flags: libc::c_short,
        _pad: [u8; 22],
    }

    pub(super) fn open(name: Option<&str>, packet_information: bool) -> io::Result<TunFd> {
        let fd = unsafe { libc::open(TUN_PATH.as_ptr(), libc::O_RDWR | libc::O_NONBLOCK | libc::O_CLOEXEC) };
        if fd < 0 {
            let err = io::Error::last_os_error();
            return Err(match err.raw_os_error() {
                Some(libc::ENOENT) | Some(libc::ENODEV) | Some(libc::ENXIO) => io::Error::new(
                    io::ErrorKind::NotFound,
                    "/dev/net/tun is not available (is the tun module loaded?)",
                ),
                _ => err,
            });
        }

        let mut ifr: IfReq = unsafe { mem::zeroed() };
        ifr.ifr_flags = if packet_information { IFF_TUN } else { IFF_TUN | IFF_NO_PI };
        if let Some(name) = name {
            for (slot, byte) in ifr.ifr_name.iter_mut().zip(name.bytes()) {
                *slot = byte as libc::c_char;
            }
        }

        if unsafe { libc::ioctl(fd, TUNSETIFF as _, &mut ifr as *mut IfReq) } < 0 {
            let err = io::Error::last_os_error();
            let _ = close_fd(fd);
            return Err(match (err.raw_os_error(), name) {
                (Some(libc::EBUSY), Some(name)) => name_taken(name),
                // An existing non-tun interface of that name.
                (Some(libc::EINVAL), Some(name)) if interface_exists(name) => name_taken(name),
                _ => err,
            });
        }

        let framing = if packet_information { Framing::PacketInfo } else { Framing::None };
        Ok(TunFd::from_raw(fd, name_from_c_buf(&ifr.ifr_name), framing))
    }
}

#[cfg(target_os = "macos")]
mod platform {
    use std::io;
    use std::mem;

    use super::name_taken;
    use crate::framing::Framing;
    use crate::sys::fd::TunFd;
    use crate::sys::utils::{close_fd, name_from_c_buf, set_nonblocking_cloexec};

    const PF_SYSTEM: libc::c_int = 32;
    const AF_SYS_CONTROL: u16 = 2;
    const SYSPROTO_CONTROL: libc::c_int = 2;
    const CTLIOCGINFO: libc::c_ulong = 0xC064_4E03;
    const UTUN_OPT_IFNAME: libc::c_int = 2;
    const UTUN_CONTROL_NAME: &[u8] = b"com.apple.net.utun_control";

    #[repr(C)]
    struct CtlInfo {
        ctl_id: u32,
        ctl_name: [libc::c_char; 96],
    }

    #[repr(C)]
    struct SockaddrCtl {
        sc_len: u8,
        sc_family: u8,
        ss_sysaddr: u16,
        sc_id: u32,
        sc_unit: u32,
        sc_reserved: [u32; 5],
    }

    /// Unit number for `utunN`; the control socket uses `N + 1`.
    fn unit_for(name: &str) -> io::Result<u32> {
        name.strip_prefix("utun")
            .and_then(|n| n.parse::<u32>().ok())
            .and_then(|n| n.checked_add(1))
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, format!("utun interfaces must be named utunN, got {}", name))
            })
    }

    pub(super) fn open(name: Option<&str>, _packet_information: bool) -> io::Result<TunFd> {
        let unit = match name {
            Some(name) => unit_for(name)?,
            None => 0,
        };

        let fd = unsafe { libc::socket(PF_SYSTEM, libc::SOCK_DGRAM, SYSPROTO_CONTROL) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        match connect(fd, unit) {
            Ok(ifname) => Ok(TunFd::from_raw(fd, ifname, Framing::Utun)),
            Err(err) => {
                let _ = close_fd(fd);
                Err(match (err.raw_os_error(), name) {
                    (Some(libc::EBUSY), Some(name)) => name_taken(name),
                    _ => err,
                })
            }
        }
    }

    fn connect(fd: libc::c_int, unit: u32) -> io::Result<String> {
        let mut info: CtlInfo = unsafe { mem::zeroed() };
        for (slot, byte) in info.ctl_name.iter_mut().zip(UTUN_CONTROL_NAME) {
            *slot = *byte as libc::c_char;
        }
        if unsafe { libc::ioctl(fd, CTLIOCGINFO, &mut info as *mut CtlInfo) } < 0 {
            return Err(io::Error::last_os_error());
        }

        let addr = SockaddrCtl {
            sc_len: mem::size_of::<SockaddrCtl>() as u8,
            sc_family: PF_SYSTEM as u8,
            ss_sysaddr: AF_SYS_CONTROL,
            sc_id: info.ctl_id,
            sc_unit: unit,
            sc_reserved: [0; 5],
        };
        let ret = unsafe {
            libc::connect(
                fd,
                &addr as *const SockaddrCtl as *const libc::sockaddr,
                mem::size_of::<SockaddrCtl>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }

        let mut ifname = [0 as libc::c_char; libc::IFNAMSIZ];
        let mut len = ifname.len() as libc::socklen_t;
        let ret = unsafe {
            libc::getsockopt(
                fd,
                SYSPROTO_CONTROL,
                UTUN_OPT_IFNAME,
                ifname.as_mut_ptr() as *mut libc::c_void,
                &mut len,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }

        set_nonblocking_cloexec(fd)?;
        Ok(name_from_c_buf(&ifname))
    }

}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
mod platform {
    use std::io;

    use crate::sys::fd::TunFd;

    pub(super) fn open(_name: Option<&str>, _packet_information: bool) -> io::Result<TunFd> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "tun devices are not supported on this platform"))
    }
}
