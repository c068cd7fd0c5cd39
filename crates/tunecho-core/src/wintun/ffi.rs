//! Raw bindings: kernel32 imports and the wintun.dll entry points resolved
//! at load time.

use std::ffi::c_void;
use std::io;

pub type Handle = *mut c_void;
pub type HModule = *mut c_void;
pub type AdapterHandle = *mut c_void;
pub type SessionHandle = *mut c_void;

pub const ERROR_HANDLE_EOF: i32 = 38;
pub const ERROR_BUFFER_OVERFLOW: i32 = 111;
pub const ERROR_NO_MORE_ITEMS: i32 = 259;

pub const INFINITE: u32 = 0xFFFF_FFFF;
pub const WAIT_OBJECT_0: u32 = 0;
pub const WAIT_FAILED: u32 = 0xFFFF_FFFF;

#[repr(C)]
#[derive(Clone, Copy)]
pub struct Guid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

pub type CreateAdapterFn = unsafe extern "system" fn(*const u16, *const u16, *const Guid) -> AdapterHandle;
pub type OpenAdapterFn = unsafe extern "system" fn(*const u16) -> AdapterHandle;
pub type CloseAdapterFn = unsafe extern "system" fn(AdapterHandle);
pub type GetAdapterLuidFn = unsafe extern "system" fn(AdapterHandle, *mut u64);
pub type StartSessionFn = unsafe extern "system" fn(AdapterHandle, u32) -> SessionHandle;
pub type EndSessionFn = unsafe extern "system" fn(SessionHandle);
pub type GetReadWaitEventFn = unsafe extern "system" fn(SessionHandle) -> Handle;
pub type ReceivePacketFn = unsafe extern "system" fn(SessionHandle, *mut u32) -> *mut u8;
pub type ReleaseReceivePacketFn = unsafe extern "system" fn(SessionHandle, *const u8);
pub type AllocateSendPacketFn = unsafe extern "system" fn(SessionHandle, u32) -> *mut u8;
pub type SendPacketFn = unsafe extern "system" fn(SessionHandle, *const u8);

#[link(name = "kernel32")]
extern "system" {
    pub fn LoadLibraryW(lp_lib_file_name: *const u16) -> HModule;
    pub fn GetProcAddress(h_module: HModule, lp_proc_name: *const u8) -> *mut c_void;
    pub fn CreateEventW(attributes: *mut c_void, manual_reset: i32, initial_state: i32, name: *const u16) -> Handle;
    pub fn SetEvent(event: Handle) -> i32;
    pub fn CloseHandle(handle: Handle) -> i32;
    pub fn WaitForMultipleObjects(count: u32, handles: *const Handle, wait_all: i32, millis: u32) -> u32;
}

/// Entry points of a loaded wintun.dll.
#[derive(Clone, Copy)]
pub struct WintunApi {
    pub create_adapter: CreateAdapterFn,
    pub open_adapter: OpenAdapterFn,
    pub close_adapter: CloseAdapterFn,
    pub get_adapter_luid: GetAdapterLuidFn,
    pub start_session: StartSessionFn,
    pub end_session: EndSessionFn,
    pub get_read_wait_event: GetReadWaitEventFn,
    pub receive_packet: ReceivePacketFn,
    pub release_receive_packet: ReleaseReceivePacketFn,
    pub allocate_send_packet: AllocateSendPacketFn,
    pub send_packet: SendPacketFn,
}

// Function pointers into a library that is never unloaded.
unsafe impl Send for WintunApi {}
unsafe impl Sync for WintunApi {}

impl WintunApi {
    pub fn load() -> io::Result<Self> {
        let library = to_wide("wintun.dll");
        let module = unsafe { LoadLibraryW(library.as_ptr()) };
        if module.is_null() {
            let err = io::Error::last_os_error();
            return Err(io::Error::new(io::ErrorKind::NotFound, format!("failed to load wintun.dll: {}", err)));
        }

        unsafe {
            Ok(Self {
                create_adapter: load_proc(module, b"WintunCreateAdapter\0")?,
                open_adapter: load_proc(module, b"WintunOpenAdapter\0")?,
                close_adapter: load_proc(module, b"WintunCloseAdapter\0")?,
                get_adapter_luid: load_proc(module, b"WintunGetAdapterLUID\0")?,
                start_session: load_proc(module, b"WintunStartSession\0")?,
                end_session: load_proc(module, b"WintunEndSession\0")?,
                get_read_wait_event: load_proc(module, b"WintunGetReadWaitEvent\0")?,
                receive_packet: load_proc(module, b"WintunReceivePacket\0")?,
                release_receive_packet: load_proc(module, b"WintunReleaseReceivePacket\0")?,
                allocate_send_packet: load_proc(module, b"WintunAllocateSendPacket\0")?,
                send_packet: load_proc(module, b"WintunSendPacket\0")?,
            })
        }
    }
}

unsafe fn load_proc<T: Copy>(module: HModule, name: &[u8]) -> io::Result<T> {
    let proc = GetProcAddress(module, name.as_ptr());
    if proc.is_null() {
        let err = io::Error::last_os_error();
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!(
                "wintun.dll lacks {}: {}",
                String::from_utf8_lossy(&name[..name.len().saturating_sub(1)]),
                err
            ),
        ));
    }
    Ok(std::mem::transmute_copy(&proc))
}

pub fn to_wide(value: &str) -> Vec<u16> {
    value.encode_utf16().chain(std::iter::once(0)).collect()
}
