//! Wintun adapters, driven through wintun.dll loaded on first use.

mod ffi;

use std::io;
use std::ptr;
use std::sync::{Arc, Mutex};

use lazy_static::lazy_static;
use log::{debug, warn};

use ffi::{Handle, WintunApi};

/// Ring size handed to `WintunStartSession` (4 MiB).
pub const RING_CAPACITY: u32 = 0x40_0000;

const TUNNEL_TYPE: &str = "tunecho";
const DEFAULT_NAME_PREFIX: &str = "tunecho";
const MAX_DEFAULT_UNITS: u32 = 16;

lazy_static! {
    static ref WINTUN: Mutex<Option<Arc<WintunApi>>> = Mutex::new(None);
}

/// Load wintun.dll once. A failed load is retried on the next call.
fn api() -> io::Result<Arc<WintunApi>> {
    let mut slot = WINTUN
        .lock()
        .map_err(|_| io::Error::new(io::ErrorKind::Other, "wintun loader poisoned"))?;
    if let Some(api) = slot.as_ref() {
        return Ok(api.clone());
    }
    let api = Arc::new(WintunApi::load()?);
    *slot = Some(api.clone());
    Ok(api)
}

/// Manual-reset event that interrupts a blocked `WintunSession::recv`.
#[derive(Debug)]
pub struct WakeEvent {
    handle: Handle,
}

unsafe impl Send for WakeEvent {}
unsafe impl Sync for WakeEvent {}

impl WakeEvent {
    pub fn new() -> io::Result<Self> {
        let handle = unsafe { ffi::CreateEventW(ptr::null_mut(), 1, 0, ptr::null()) };
        if handle.is_null() {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { handle })
    }

    pub fn wake(&self) -> io::Result<()> {
        if unsafe { ffi::SetEvent(self.handle) } == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn raw(&self) -> Handle {
        self.handle
    }
}

impl Drop for WakeEvent {
    fn drop(&mut self) {
        unsafe { ffi::CloseHandle(self.handle) };
    }
}

/// An adapter with a running packet session.
pub struct WintunSession {
    api: Arc<WintunApi>,
    adapter: ffi::AdapterHandle,
    session: ffi::SessionHandle,
    read_event: Handle,
    name: String,
    luid: u64,
    closed: bool,
}

// Wintun session handles may be used from any thread.
unsafe impl Send for WintunSession {}

impl WintunSession {
    /// Create an adapter named `name`, or the first free `tunechoN`.
    pub fn open(name: Option<&str>) -> io::Result<Self> {
        let api = api()?;
        let name = match name {
            Some(name) => {
                crate::validate_name(name)?;
                if adapter_exists(&api, name) {
                    return Err(io::Error::new(
                        io::ErrorKind::AddrInUse,
                        format!("interface name {} is already in use", name),
                    ));
                }
                name.to_string()
            }
            None => (0..MAX_DEFAULT_UNITS)
                .map(|unit| format!("{}{}", DEFAULT_NAME_PREFIX, unit))
                .find(|candidate| !adapter_exists(&api, candidate))
                .ok_or_else(|| io::Error::new(io::ErrorKind::AddrInUse, "no free adapter name"))?,
        };

        let wide_name = ffi::to_wide(&name);
        let wide_type = ffi::to_wide(TUNNEL_TYPE);
        let adapter = unsafe { (api.create_adapter)(wide_name.as_ptr(), wide_type.as_ptr(), ptr::null()) };
        if adapter.is_null() {
            return Err(io::Error::last_os_error());
        }

        let session = unsafe { (api.start_session)(adapter, RING_CAPACITY) };
        if session.is_null() {
            let err = io::Error::last_os_error();
            unsafe { (api.close_adapter)(adapter) };
            return Err(err);
        }

        let read_event = unsafe { (api.get_read_wait_event)(session) };
        let mut luid = 0u64;
        unsafe { (api.get_adapter_luid)(adapter, &mut luid) };
        debug!("opened wintun adapter {} (luid {:#x})", name, luid);

        Ok(Self { api, adapter, session, read_event, name, luid, closed: false })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Locally unique identifier of the adapter.
    pub fn luid(&self) -> u64 {
        self.luid
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Block until a packet arrives or `wake` is signalled.
    ///
    /// Returns `Ok(None)` when woken or when the adapter goes away.
    /// Packets larger than `buf` are dropped.
    pub fn recv(&self, buf: &mut [u8], wake: &WakeEvent) -> io::Result<Option<usize>> {
        let handles = [self.read_event, wake.raw()];
        loop {
            let mut size = 0u32;
            let packet = unsafe { (self.api.receive_packet)(self.session, &mut size) };
            if !packet.is_null() {
                let len = size as usize;
                let fits = len <= buf.len();
                if fits {
                    unsafe { ptr::copy_nonoverlapping(packet, buf.as_mut_ptr(), len) };
                }
                unsafe { (self.api.release_receive_packet)(self.session, packet) };
                if fits {
                    return Ok(Some(len));
                }
                warn!("{}: dropping {} byte packet larger than buffer", self.name, len);
                continue;
            }

            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(ffi::ERROR_NO_MORE_ITEMS) => {}
                Some(ffi::ERROR_HANDLE_EOF) => return Ok(None),
                _ => return Err(err),
            }

            let ret = unsafe { ffi::WaitForMultipleObjects(2, handles.as_ptr(), 0, ffi::INFINITE) };
            match ret {
                ffi::WAIT_OBJECT_0 => continue,
                r if r == ffi::WAIT_OBJECT_0 + 1 => return Ok(None),
                ffi::WAIT_FAILED => return Err(io::Error::last_os_error()),
                other => {
                    return Err(io::Error::new(io::ErrorKind::Other, format!("unexpected wait result {}", other)))
                }
            }
        }
    }

    pub fn send(&self, packet: &[u8]) -> io::Result<()> {
        let len = u32::try_from(packet.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "packet too large"))?;
        let slot = unsafe { (self.api.allocate_send_packet)(self.session, len) };
        if slot.is_null() {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(ffi::ERROR_BUFFER_OVERFLOW) {
                return Err(io::Error::new(io::ErrorKind::WouldBlock, "wintun send ring is full"));
            }
            return Err(err);
        }
        unsafe {
            ptr::copy_nonoverlapping(packet.as_ptr(), slot, packet.len());
            (self.api.send_packet)(self.session, slot);
        }
        Ok(())
    }

    /// End the session and remove the adapter. Later calls are no-ops.
    pub fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        unsafe {
            (self.api.end_session)(self.session);
            (self.api.close_adapter)(self.adapter);
        }
        debug!("closed wintun adapter {}", self.name);
        Ok(())
    }
}

impl Drop for WintunSession {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn adapter_exists(api: &WintunApi, name: &str) -> bool {
    let wide = ffi::to_wide(name);
    let adapter = unsafe { (api.open_adapter)(wide.as_ptr()) };
    if adapter.is_null() {
        return false;
    }
    unsafe { (api.close_adapter)(adapter) };
    true
}
