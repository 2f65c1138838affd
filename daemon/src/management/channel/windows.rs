use super::ChannelError;
use std::io;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use winapi::shared::minwindef::{FALSE, TRUE};
use winapi::um::handleapi::{CloseHandle, INVALID_HANDLE_VALUE};
use winapi::um::memoryapi::{CreateFileMappingW, MapViewOfFile, UnmapViewOfFile, FILE_MAP_ALL_ACCESS};
use winapi::um::minwinbase::SECURITY_ATTRIBUTES;
use winapi::um::synchapi::{CreateEventW, SetEvent, SignalObjectAndWait};
use winapi::um::winbase::{INFINITE, WAIT_FAILED};
use winapi::um::winnt::{HANDLE, PAGE_READWRITE};

struct Handle(HANDLE);

// SAFETY: kernel object handles may be used from any thread
unsafe impl Send for Handle {}
unsafe impl Sync for Handle {}

impl Drop for Handle {
    fn drop(&mut self) {
        unsafe { CloseHandle(self.0) };
    }
}

/// Inheritable anonymous file mapping.
pub struct Region {
    mapping: Handle,
    view: *mut u8,
    len: usize,
}

// SAFETY: the view is only touched through the channel's region lock
unsafe impl Send for Region {}

impl Region {
    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.view, self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.view, self.len) }
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        unsafe { UnmapViewOfFile(self.view as _) };
    }
}

/// Two inheritable auto-reset events.
pub struct Link {
    controller_ready: Handle,
    child_ready: Handle,
    mapping: isize,
    exited: AtomicBool,
}

fn inheritable() -> SECURITY_ATTRIBUTES {
    SECURITY_ATTRIBUTES {
        nLength: std::mem::size_of::<SECURITY_ATTRIBUTES>() as u32,
        lpSecurityDescriptor: ptr::null_mut(),
        bInheritHandle: TRUE,
    }
}

fn create_event() -> io::Result<Handle> {
    let mut attributes = inheritable();
    let handle = unsafe { CreateEventW(&mut attributes, FALSE, FALSE, ptr::null()) };
    if handle.is_null() {
        return Err(io::Error::last_os_error());
    }
    Ok(Handle(handle))
}

pub fn create(capacity: usize) -> Result<(Region, Link), ChannelError> {
    let mut attributes = inheritable();
    let mapping = unsafe {
        CreateFileMappingW(
            INVALID_HANDLE_VALUE,
            &mut attributes,
            PAGE_READWRITE,
            0,
            capacity as u32,
            ptr::null(),
        )
    };
    if mapping.is_null() {
        return Err(io::Error::last_os_error().into());
    }
    let mapping = Handle(mapping);

    let view = unsafe { MapViewOfFile(mapping.0, FILE_MAP_ALL_ACCESS, 0, 0, capacity) } as *mut u8;
    if view.is_null() {
        return Err(io::Error::last_os_error().into());
    }

    let link = Link {
        controller_ready: create_event()?,
        child_ready: create_event()?,
        mapping: mapping.0 as isize,
        exited: AtomicBool::new(false),
    };
    let region = Region {
        mapping,
        view,
        len: capacity,
    };
    Ok((region, link))
}

impl Link {
    pub fn child_handles(&self) -> [i64; 3] {
        [
            self.mapping as i64,
            self.controller_ready.0 as i64,
            self.child_ready.0 as i64,
        ]
    }

    pub fn configure(&self, _command: &mut std::process::Command) {
        // inheritable handles are passed on by CreateProcess
    }

    pub fn spawned(&self) {}

    pub fn notify_exited(&self) {
        self.exited.store(true, Ordering::SeqCst);
        unsafe { SetEvent(self.child_ready.0) };
    }

    pub fn signal_and_wait(&self) -> Result<(), ChannelError> {
        if self.exited.load(Ordering::SeqCst) {
            return Err(ChannelError::Disconnected);
        }
        let result = unsafe {
            SignalObjectAndWait(self.controller_ready.0, self.child_ready.0, INFINITE, FALSE)
        };
        if result == WAIT_FAILED {
            return Err(io::Error::last_os_error().into());
        }
        if self.exited.load(Ordering::SeqCst) {
            return Err(ChannelError::Disconnected);
        }
        Ok(())
    }
}
