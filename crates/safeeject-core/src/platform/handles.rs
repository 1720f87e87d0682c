/// System-wide handle table and per-process open-file resolution.
///
/// `NtQuerySystemInformation(SystemExtendedHandleInformation)` returns
/// every open handle in the system. Handles are grouped by owning pid once
/// per scan; a process's handles are resolved to paths lazily by duplicating
/// each into this process, keeping only disk files, and asking for the
/// final path name.
use super::{from_wide, read_usize, OwnedHandle};
use crate::error::{OsError, ERROR_ACCESS_DENIED};
use std::collections::HashMap;
use windows::Wdk::System::SystemInformation::{NtQuerySystemInformation, SYSTEM_INFORMATION_CLASS};
use windows::Win32::Foundation::{DuplicateHandle, BOOL, DUPLICATE_SAME_ACCESS, HANDLE};
use windows::Win32::Storage::FileSystem::{
    GetFileType, GetFinalPathNameByHandleW, FILE_TYPE_DISK, GETFINALPATHNAMEBYHANDLE_FLAGS,
};
use windows::Win32::System::Threading::{GetCurrentProcess, OpenProcess, PROCESS_DUP_HANDLE};

const SYSTEM_EXTENDED_HANDLE_INFORMATION: i32 = 64;
const STATUS_INFO_LENGTH_MISMATCH: i32 = 0xC000_0004_u32 as i32;
const MAX_TABLE_BYTES: usize = 512 * 1024 * 1024;

const PTR: usize = std::mem::size_of::<usize>();
// SYSTEM_HANDLE_INFORMATION_EX: NumberOfHandles, Reserved, then entries.
const HEADER_SIZE: usize = 2 * PTR;
// SYSTEM_HANDLE_TABLE_ENTRY_INFO_EX: Object, UniqueProcessId, HandleValue,
// GrantedAccess, CreatorBackTraceIndex, ObjectTypeIndex, HandleAttributes,
// Reserved.
const ENTRY_SIZE: usize = 3 * PTR + 16;
const ENTRY_PID: usize = PTR;
const ENTRY_HANDLE: usize = 2 * PTR;

/// Handle values grouped by owning pid.
pub type HandleTable = HashMap<u32, Vec<usize>>;

/// Snapshot the system handle table.
pub fn snapshot() -> Result<HandleTable, OsError> {
    let mut buf = vec![0u8; 4 * 1024 * 1024];
    loop {
        let mut needed: u32 = 0;
        let status = unsafe {
            NtQuerySystemInformation(
                SYSTEM_INFORMATION_CLASS(SYSTEM_EXTENDED_HANDLE_INFORMATION),
                buf.as_mut_ptr() as *mut std::ffi::c_void,
                buf.len() as u32,
                &mut needed,
            )
        };
        if status.0 == STATUS_INFO_LENGTH_MISMATCH {
            let next = (buf.len() * 2).max(needed as usize + 64 * 1024);
            if next > MAX_TABLE_BYTES {
                return Err(OsError::new(status.0 as u32));
            }
            buf.resize(next, 0);
            continue;
        }
        if status.0 < 0 {
            return Err(OsError::new(status.0 as u32));
        }
        break;
    }

    let count = read_usize(&buf, 0).unwrap_or(0);
    let mut table = HandleTable::new();
    for i in 0..count {
        let base = HEADER_SIZE + i * ENTRY_SIZE;
        let (Some(pid), Some(value)) = (
            read_usize(&buf, base + ENTRY_PID),
            read_usize(&buf, base + ENTRY_HANDLE),
        ) else {
            break;
        };
        table.entry(pid as u32).or_default().push(value);
    }
    tracing::debug!("Handle table: {count} handles in {} processes", table.len());
    Ok(table)
}

/// Lazily resolved disk-file paths for one process.
pub struct OpenFileIter {
    process: OwnedHandle,
    handles: std::vec::IntoIter<usize>,
}

impl OpenFileIter {
    pub fn open(pid: u32, handles: Vec<usize>) -> Result<Self, OsError> {
        let process = unsafe { OpenProcess(PROCESS_DUP_HANDLE, BOOL::from(false), pid) }
            .map_err(|_| OsError::new(ERROR_ACCESS_DENIED))?;
        Ok(Self {
            process: OwnedHandle(process),
            handles: handles.into_iter(),
        })
    }

    fn resolve(&self, value: usize) -> Option<String> {
        let mut local = HANDLE::default();
        unsafe {
            DuplicateHandle(
                self.process.0,
                HANDLE(value as *mut std::ffi::c_void),
                GetCurrentProcess(),
                &mut local,
                0,
                BOOL::from(false),
                DUPLICATE_SAME_ACCESS,
            )
        }
        .ok()?;
        let local = OwnedHandle(local);

        // Pipes and consoles can block path queries.
        if unsafe { GetFileType(local.0) } != FILE_TYPE_DISK {
            return None;
        }

        let mut path = vec![0u16; 1024];
        let len = unsafe {
            GetFinalPathNameByHandleW(local.0, &mut path, GETFINALPATHNAMEBYHANDLE_FLAGS(0))
        } as usize;
        if len == 0 || len >= path.len() {
            return None;
        }
        Some(from_wide(&path[..len]))
    }
}

impl Iterator for OpenFileIter {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        loop {
            let value = self.handles.next()?;
            if let Some(path) = self.resolve(value) {
                return Some(path);
            }
        }
    }
}
