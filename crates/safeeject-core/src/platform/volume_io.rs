/// Raw volume handles for the eject sequence.
///
/// The handle is opened read/write on `\\.\E:` and closed when dropped.
use super::{
    ioctl, open_device, volume_device_path, OwnedHandle, GENERIC_READ, GENERIC_WRITE,
};
use crate::error::OsError;
use crate::system::{VolumeHandle, VolumeIo};
use windows::Win32::Storage::FileSystem::FlushFileBuffers;

const FSCTL_LOCK_VOLUME: u32 = 0x0009_0018;
const FSCTL_DISMOUNT_VOLUME: u32 = 0x0009_0020;
const IOCTL_STORAGE_MEDIA_REMOVAL: u32 = 0x002D_4804;
const IOCTL_STORAGE_EJECT_MEDIA: u32 = 0x002D_4808;

pub struct RawVolumes;

struct RawVolume {
    handle: OwnedHandle,
}

impl VolumeHandle for RawVolume {
    fn flush(&mut self) -> Result<(), OsError> {
        unsafe { FlushFileBuffers(self.handle.0) }?;
        Ok(())
    }

    fn allow_removal(&mut self) -> Result<(), OsError> {
        // PREVENT_MEDIA_REMOVAL { PreventMediaRemoval: FALSE }
        let prevent = [0u8; 1];
        ioctl(&self.handle, IOCTL_STORAGE_MEDIA_REMOVAL, Some(&prevent), None).map(drop)
    }

    fn lock(&mut self) -> Result<(), OsError> {
        ioctl(&self.handle, FSCTL_LOCK_VOLUME, None, None).map(drop)
    }

    fn dismount(&mut self) -> Result<(), OsError> {
        ioctl(&self.handle, FSCTL_DISMOUNT_VOLUME, None, None).map(drop)
    }

    fn eject_media(&mut self) -> Result<(), OsError> {
        ioctl(&self.handle, IOCTL_STORAGE_EJECT_MEDIA, None, None).map(drop)
    }
}

impl VolumeIo for RawVolumes {
    fn open_volume(&self, letter: char) -> Result<Box<dyn VolumeHandle>, OsError> {
        let handle = open_device(&volume_device_path(letter), GENERIC_READ | GENERIC_WRITE)?;
        Ok(Box::new(RawVolume { handle }))
    }
}
