/// Platform-specific functionality: Windows implementations of every
/// [`crate::system`] trait, plus elevation checks.
///
/// Device handles are opened with `CreateFileW` and driven with raw
/// `DeviceIoControl` calls; output structures are parsed by byte offset.
/// The disk catalog goes through WMI instead.
pub mod diskpart;
pub mod disks;
pub mod drives;
pub mod handles;
pub mod notifier;
pub mod partitions;
pub mod permissions;
pub mod processes;
pub mod volume_io;

pub use permissions::{is_elevated, relaunch_elevated};

use crate::error::OsError;
use crate::system::SystemContext;
use std::sync::Arc;
use windows::core::PCWSTR;
use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::Storage::FileSystem::{
    CreateFileW, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
};

pub(crate) const GENERIC_READ: u32 = 0x8000_0000;
pub(crate) const GENERIC_WRITE: u32 = 0x4000_0000;

/// The real Windows backend.
pub fn windows_system() -> SystemContext {
    SystemContext {
        drives: Arc::new(drives::Win32Drives),
        catalog: Arc::new(disks::WmiCatalog),
        partitions: Arc::new(partitions::SysinfoPartitions),
        utility: Arc::new(diskpart::Diskpart),
        processes: Arc::new(processes::SystemProcesses::default()),
        volumes: Arc::new(volume_io::RawVolumes),
        notifier: Arc::new(notifier::WindowNotifier),
    }
}

impl From<windows::core::Error> for OsError {
    fn from(e: windows::core::Error) -> Self {
        // HRESULT_FROM_WIN32 wraps the code in facility 7.
        let hr = e.code().0 as u32;
        if hr & 0xFFFF_0000 == 0x8007_0000 {
            OsError::new(hr & 0xFFFF)
        } else {
            OsError::new(hr)
        }
    }
}

/// Null-terminated UTF-16 copy of `s`.
pub(crate) fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

/// `E:\`
pub(crate) fn root_path(letter: char) -> String {
    format!("{}:\\", letter.to_ascii_uppercase())
}

/// `\\.\E:`
pub(crate) fn volume_device_path(letter: char) -> String {
    format!("\\\\.\\{}:", letter.to_ascii_uppercase())
}

/// UTF-16 buffer up to its first NUL.
pub(crate) fn from_wide(buf: &[u16]) -> String {
    let len = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    String::from_utf16_lossy(&buf[..len])
}

/// Owned kernel handle, closed on drop.
pub(crate) struct OwnedHandle(pub(crate) HANDLE);

// Kernel handles are process-wide.
unsafe impl Send for OwnedHandle {}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.0);
        }
    }
}

/// Open a device path (`\\.\E:`, `\\.\PHYSICALDRIVE1`). An `access` of 0
/// opens for metadata queries only.
pub(crate) fn open_device(path: &str, access: u32) -> Result<OwnedHandle, OsError> {
    let path_wide = wide(path);
    let handle = unsafe {
        CreateFileW(
            PCWSTR(path_wide.as_ptr()),
            access,
            FILE_SHARE_READ | FILE_SHARE_WRITE,
            None,
            OPEN_EXISTING,
            Default::default(),
            None,
        )
    }?;
    Ok(OwnedHandle(handle))
}

/// Issue `code` on `handle`, returning the number of output bytes written.
pub(crate) fn ioctl(
    handle: &OwnedHandle,
    code: u32,
    input: Option<&[u8]>,
    output: Option<&mut [u8]>,
) -> Result<u32, OsError> {
    let (in_ptr, in_len) = match input {
        Some(buf) => (Some(buf.as_ptr() as *const std::ffi::c_void), buf.len() as u32),
        None => (None, 0),
    };
    let (out_ptr, out_len) = match output {
        Some(buf) => (Some(buf.as_mut_ptr() as *mut std::ffi::c_void), buf.len() as u32),
        None => (None, 0),
    };
    let mut bytes_returned: u32 = 0;
    unsafe {
        windows::Win32::System::IO::DeviceIoControl(
            handle.0,
            code,
            in_ptr,
            in_len,
            out_ptr,
            out_len,
            Some(&mut bytes_returned),
            None,
        )
    }?;
    Ok(bytes_returned)
}

pub(crate) fn read_u32(buf: &[u8], offset: usize) -> Option<u32> {
    buf.get(offset..offset + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
}

pub(crate) fn read_usize(buf: &[u8], offset: usize) -> Option<usize> {
    const N: usize = std::mem::size_of::<usize>();
    buf.get(offset..offset + N)
        .and_then(|b| b.try_into().ok())
        .map(usize::from_le_bytes)
}
