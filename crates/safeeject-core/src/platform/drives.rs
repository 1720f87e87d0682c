/// Drive letter queries using the Windows API.
///
/// `GetLogicalDriveStringsW` lists the lettered roots; type, label,
/// filesystem, and capacity come from `GetDriveTypeW`,
/// `GetVolumeInformationW`, and `GetDiskFreeSpaceExW`.
use super::{from_wide, open_device, root_path, wide};
use crate::error::OsError;
use crate::system::{physical_drive_id, DriveApi, DriveKind, SpaceInfo, VolumeInfo};
use std::ffi::OsString;
use std::os::windows::ffi::OsStringExt;
use std::path::Path;
use windows::core::PCWSTR;
use windows::Win32::Storage::FileSystem::{
    GetDiskFreeSpaceExW, GetDriveTypeW, GetLogicalDriveStringsW, GetVolumeInformationW,
};

pub struct Win32Drives;

impl DriveApi for Win32Drives {
    fn logical_drive_letters(&self) -> Result<Vec<char>, OsError> {
        // Null-separated drive root strings.
        let mut buffer = [0u16; 256];
        let len = unsafe { GetLogicalDriveStringsW(Some(&mut buffer)) };
        if len == 0 {
            tracing::warn!("GetLogicalDriveStringsW returned 0");
            return Err(OsError::last());
        }

        let full = OsString::from_wide(&buffer[..len as usize]);
        Ok(full
            .to_string_lossy()
            .split('\0')
            .filter_map(|root| root.chars().next())
            .filter(char::is_ascii_alphabetic)
            .map(|l| l.to_ascii_uppercase())
            .collect())
    }

    fn drive_kind(&self, letter: char) -> DriveKind {
        let root = wide(&root_path(letter));
        DriveKind::from_code(unsafe { GetDriveTypeW(PCWSTR(root.as_ptr())) })
    }

    fn volume_info(&self, letter: char) -> Result<VolumeInfo, OsError> {
        let root = wide(&root_path(letter));
        let mut label_buf = [0u16; 256];
        let mut fs_buf = [0u16; 256];
        unsafe {
            GetVolumeInformationW(
                PCWSTR(root.as_ptr()),
                Some(&mut label_buf),
                None,
                None,
                None,
                Some(&mut fs_buf),
            )
        }?;
        Ok(VolumeInfo {
            label: from_wide(&label_buf),
            filesystem: from_wide(&fs_buf),
        })
    }

    fn space(&self, letter: char) -> Result<SpaceInfo, OsError> {
        let root = wide(&root_path(letter));
        let mut free_caller: u64 = 0;
        let mut total: u64 = 0;
        let mut free_total: u64 = 0;
        unsafe {
            GetDiskFreeSpaceExW(
                PCWSTR(root.as_ptr()),
                Some(&mut free_caller as *mut u64),
                Some(&mut total as *mut u64),
                Some(&mut free_total as *mut u64),
            )
        }?;
        Ok(SpaceInfo {
            total_bytes: total,
            free_bytes: free_caller,
        })
    }

    fn root_exists(&self, letter: char) -> bool {
        Path::new(&root_path(letter)).exists()
    }

    fn physical_drive_exists(&self, index: u32) -> bool {
        open_device(&physical_drive_id(index), 0).is_ok()
    }

    fn boot_letter(&self) -> char {
        std::env::var("SystemDrive")
            .ok()
            .and_then(|d| d.chars().next())
            .map(|l| l.to_ascii_uppercase())
            .unwrap_or('C')
    }
}
