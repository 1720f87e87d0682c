/// Narrow OS seams used by every component.
///
/// The components never call the OS directly; they go through these traits
/// so that the whole discovery and eject state machine can run against the
/// in-memory `sim::SimSystem` as well as the real Windows bindings in
/// `platform`.
use crate::error::OsError;
use crate::monitor::DeviceNotifier;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

// GetDriveTypeW return codes.
const DRIVE_NO_ROOT_DIR: u32 = 1;
const DRIVE_REMOVABLE: u32 = 2;
const DRIVE_FIXED: u32 = 3;
const DRIVE_REMOTE: u32 = 4;
const DRIVE_CDROM: u32 = 5;
const DRIVE_RAMDISK: u32 = 6;

/// Drive type classification of a lettered root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveKind {
    Unknown,
    NoRootDir,
    Removable,
    Fixed,
    Remote,
    CdRom,
    RamDisk,
}

impl DriveKind {
    /// Map a raw drive-type code to a kind. Unrecognised codes are `Unknown`.
    pub fn from_code(code: u32) -> Self {
        match code {
            DRIVE_NO_ROOT_DIR => Self::NoRootDir,
            DRIVE_REMOVABLE => Self::Removable,
            DRIVE_FIXED => Self::Fixed,
            DRIVE_REMOTE => Self::Remote,
            DRIVE_CDROM => Self::CdRom,
            DRIVE_RAMDISK => Self::RamDisk,
            _ => Self::Unknown,
        }
    }

    /// Human-readable label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::NoRootDir => "No root",
            Self::Removable => "Removable",
            Self::Fixed => "Fixed",
            Self::Remote => "Network",
            Self::CdRom => "CD-ROM",
            Self::RamDisk => "RAM disk",
        }
    }
}

/// Label and filesystem of a mounted volume.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeInfo {
    pub label: String,
    pub filesystem: String,
}

/// Capacity of a mounted volume as reported to the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpaceInfo {
    pub total_bytes: u64,
    pub free_bytes: u64,
}

/// Drive-letter level queries.
pub trait DriveApi: Send + Sync {
    /// Every letter currently assigned to a root, in any order.
    fn logical_drive_letters(&self) -> Result<Vec<char>, OsError>;
    fn drive_kind(&self, letter: char) -> DriveKind;
    fn volume_info(&self, letter: char) -> Result<VolumeInfo, OsError>;
    fn space(&self, letter: char) -> Result<SpaceInfo, OsError>;
    /// Whether `X:\` currently resolves to an existing path.
    fn root_exists(&self, letter: char) -> bool;
    /// Whether `PhysicalDrive<index>` names an existing device.
    fn physical_drive_exists(&self, index: u32) -> bool;
    /// Letter of the volume the OS booted from.
    fn boot_letter(&self) -> char;
}

/// Bus a physical disk is attached through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterfaceKind {
    Usb,
    Other,
}

/// A physical disk as reported by the hardware catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskRecord {
    /// Catalog identifier, e.g. `\\.\PHYSICALDRIVE2`.
    pub id: String,
    pub index: Option<u32>,
    pub model: String,
    pub size_bytes: u64,
    pub interface: InterfaceKind,
    pub removable_media: bool,
}

/// A partition on a physical disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionRecord {
    /// Catalog identifier, e.g. `Disk #2, Partition #0`.
    pub id: String,
    pub disk_index: Option<u32>,
}

/// Catalog identifier of a physical disk by index.
pub fn physical_drive_id(index: u32) -> String {
    format!("\\\\.\\PHYSICALDRIVE{index}")
}

/// Disk → partition → logical volume association chain.
pub trait DiskCatalog: Send + Sync {
    fn disks_by_interface(&self, interface: InterfaceKind) -> Result<Vec<DiskRecord>, OsError>;
    fn associated_partitions(&self, disk_id: &str) -> Result<Vec<PartitionRecord>, OsError>;
    fn associated_logical_volumes(&self, partition_id: &str) -> Result<Vec<char>, OsError>;

    /// Whether the disk at `index` is attached over USB. Query failures
    /// count as "no".
    fn is_usb_disk(&self, index: u32) -> bool {
        self.disks_by_interface(InterfaceKind::Usb)
            .map(|disks| disks.iter().any(|d| d.index == Some(index)))
            .unwrap_or(false)
    }

    /// Every letter reachable from `disk_id` through its partitions.
    ///
    /// A partition whose volumes cannot be listed contributes nothing; only a
    /// failure to list the partitions themselves is an error.
    fn letters_of_disk(&self, disk_id: &str) -> Result<Vec<char>, OsError> {
        let mut letters = Vec::new();
        for partition in self.associated_partitions(disk_id)? {
            match self.associated_logical_volumes(&partition.id) {
                Ok(found) => letters.extend(found),
                Err(e) => tracing::debug!("Volumes of {} not readable: {e}", partition.id),
            }
        }
        Ok(letters)
    }
}

/// A partition as listed by the mounted-partition table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountedPartition {
    pub letter: char,
    pub filesystem: String,
    pub removable: bool,
}

/// Mounted-partition listing.
pub trait PartitionTable: Send + Sync {
    fn mounted_partitions(&self) -> Result<Vec<MountedPartition>, OsError>;
}

/// The disk-partitioning command-line utility.
pub trait DiskUtility: Send + Sync {
    /// Feed `script` to the utility and return its standard output.
    fn run_script(&self, script: &str, timeout: Duration) -> Result<String, OsError>;
}

/// A running process as listed by the process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    pub name: String,
    pub exe: Option<PathBuf>,
}

/// Lazily produced list of open file paths.
pub type OpenFiles<'a> = Box<dyn Iterator<Item = String> + 'a>;

/// Process listing, open-handle introspection, and termination.
pub trait ProcessTable: Send + Sync {
    fn processes(&self) -> Vec<ProcessEntry>;
    /// Paths of files `pid` holds open. Resolved lazily so callers can stop
    /// at the first interesting one.
    fn open_files(&self, pid: u32) -> Result<OpenFiles<'_>, OsError>;
    /// Ask `pid` to exit, force-killing it once `grace` has elapsed.
    fn terminate(&self, pid: u32, grace: Duration) -> Result<(), OsError>;
}

/// An open volume device. Closed when dropped.
pub trait VolumeHandle: Send {
    fn flush(&mut self) -> Result<(), OsError>;
    /// Clear any media-removal prevention on the device.
    fn allow_removal(&mut self) -> Result<(), OsError>;
    fn lock(&mut self) -> Result<(), OsError>;
    fn dismount(&mut self) -> Result<(), OsError>;
    fn eject_media(&mut self) -> Result<(), OsError>;
}

/// Opens raw volume devices for the eject sequence.
pub trait VolumeIo: Send + Sync {
    /// Open `\\.\X:` for read/write with read/write sharing permitted.
    fn open_volume(&self, letter: char) -> Result<Box<dyn VolumeHandle>, OsError>;
}

/// One handle to each OS seam.
#[derive(Clone)]
pub struct SystemContext {
    pub drives: Arc<dyn DriveApi>,
    pub catalog: Arc<dyn DiskCatalog>,
    pub partitions: Arc<dyn PartitionTable>,
    pub utility: Arc<dyn DiskUtility>,
    pub processes: Arc<dyn ProcessTable>,
    pub volumes: Arc<dyn VolumeIo>,
    pub notifier: Arc<dyn DeviceNotifier>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drive_kind_codes() {
        assert_eq!(DriveKind::from_code(0), DriveKind::Unknown);
        assert_eq!(DriveKind::from_code(1), DriveKind::NoRootDir);
        assert_eq!(DriveKind::from_code(2), DriveKind::Removable);
        assert_eq!(DriveKind::from_code(3), DriveKind::Fixed);
        assert_eq!(DriveKind::from_code(4), DriveKind::Remote);
        assert_eq!(DriveKind::from_code(5), DriveKind::CdRom);
        assert_eq!(DriveKind::from_code(6), DriveKind::RamDisk);
        assert_eq!(DriveKind::from_code(99), DriveKind::Unknown);
    }

    #[test]
    fn physical_drive_ids() {
        assert_eq!(physical_drive_id(3), r"\\.\PHYSICALDRIVE3");
    }
}
