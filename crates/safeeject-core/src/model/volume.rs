/// Mounted and unmounted removable devices, plus per-letter eject state.
use super::size;
use compact_str::{format_compact, CompactString};
use serde::Serialize;

/// Letter placeholder for disks that carry no mounted volume.
pub const UNMOUNTED_LETTER: char = '?';

/// Filesystem placeholder for disks that carry no mounted volume.
pub const UNMOUNTED_FILESYSTEM: &str = "unmounted";

/// Which enumeration strategy first reported a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum DiscoverySource {
    /// Disk → partition → logical volume association chain.
    Instrumentation,
    /// Mounted partition listing.
    PartitionTable,
    /// Direct drive-letter scan.
    DriveScan,
}

impl DiscoverySource {
    pub fn label(self) -> &'static str {
        match self {
            Self::Instrumentation => "instrumentation",
            Self::PartitionTable => "partitions",
            Self::DriveScan => "drive scan",
        }
    }
}

/// Disk usage severity used when colouring capacity bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UsageLevel {
    Ok,
    Warning,
    Critical,
}

/// A mounted, letter-addressable removable volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Volume {
    /// Uppercase drive letter, e.g. `'E'`.
    pub letter: char,
    /// Volume label, or `Removable (E:)` when the volume has none.
    pub label: CompactString,
    /// Filesystem name (e.g. "FAT32", "exFAT").
    pub filesystem: CompactString,
    pub total_bytes: u64,
    pub free_bytes: u64,
    /// `total - free`, clamped at zero.
    pub used_bytes: u64,
    pub source: DiscoverySource,
    pub is_mounted: bool,
    /// Backing physical disk, when the association chain resolved it.
    pub disk_index: Option<u32>,
}

impl Volume {
    pub fn new(
        letter: char,
        label: &str,
        filesystem: &str,
        total_bytes: u64,
        free_bytes: u64,
        source: DiscoverySource,
    ) -> Self {
        let letter = letter.to_ascii_uppercase();
        let label = label.trim();
        let label = if label.is_empty() {
            format_compact!("Removable ({letter}:)")
        } else {
            CompactString::from(label)
        };

        Self {
            letter,
            label,
            filesystem: CompactString::from(filesystem),
            total_bytes,
            free_bytes,
            used_bytes: total_bytes.saturating_sub(free_bytes),
            source,
            is_mounted: true,
            disk_index: None,
        }
    }

    pub fn with_disk_index(mut self, disk_index: Option<u32>) -> Self {
        self.disk_index = disk_index;
        self
    }

    /// Root path, e.g. `E:\`.
    pub fn root(&self) -> String {
        format!("{}:\\", self.letter)
    }

    /// Usage percentage, 0–100.
    pub fn usage_percent(&self) -> u8 {
        if self.total_bytes == 0 {
            return 0;
        }
        (self.used_bytes as u128 * 100 / self.total_bytes as u128).min(100) as u8
    }

    pub fn usage_level(&self) -> UsageLevel {
        match self.usage_percent() {
            90.. => UsageLevel::Critical,
            80..=89 => UsageLevel::Warning,
            _ => UsageLevel::Ok,
        }
    }

    pub fn total_display(&self) -> String {
        size::format_size(self.total_bytes)
    }

    pub fn free_display(&self) -> String {
        size::format_size(self.free_bytes)
    }

    pub fn used_display(&self) -> String {
        size::format_size(self.used_bytes)
    }
}

/// A USB disk that is attached but exposes no mounted volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnmountedDisk {
    /// Physical disk index, `None` when the OS did not report one.
    pub disk_index: Option<u32>,
    /// Model string or a synthetic `Disk N` name.
    pub label: CompactString,
    /// Raw capacity in bytes, `0` when unknown.
    pub total_bytes: u64,
}

impl UnmountedDisk {
    pub fn new(disk_index: Option<u32>, label: &str, total_bytes: u64) -> Self {
        let label = if label.trim().is_empty() {
            CompactString::from("USB Drive")
        } else {
            CompactString::from(label.trim())
        };
        Self {
            disk_index,
            label,
            total_bytes,
        }
    }

    pub fn letter(&self) -> char {
        UNMOUNTED_LETTER
    }

    pub fn filesystem(&self) -> &'static str {
        UNMOUNTED_FILESYSTEM
    }

    pub fn is_mounted(&self) -> bool {
        false
    }

    pub fn total_display(&self) -> String {
        size::format_size(self.total_bytes)
    }
}

/// The two release sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EjectPolicy {
    /// Flush and dismount only, like the OS "quick removal" policy.
    Fast,
    /// Lock check, flush, allow-removal, exclusive lock, dismount.
    Verified,
}

impl EjectPolicy {
    /// Progress values reported by a successful sequence, in order.
    pub fn progress_steps(self) -> &'static [u8] {
        match self {
            Self::Fast => &[50, 90, 100],
            Self::Verified => &[20, 40, 60, 80, 90, 100],
        }
    }
}

/// Per-letter state of an eject request as tracked by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EjectState {
    Idle,
    InProgress(u8),
    Succeeded,
    Failed(String),
}

impl EjectState {
    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::InProgress(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn used_is_total_minus_free() {
        let v = Volume::new('e', "STICK", "FAT32", 1000, 400, DiscoverySource::DriveScan);
        assert_eq!(v.letter, 'E');
        assert_eq!(v.used_bytes, 600);
        assert_eq!(v.usage_percent(), 60);
    }

    #[test]
    fn used_clamps_when_free_exceeds_total() {
        let v = Volume::new('E', "X", "FAT32", 100, 250, DiscoverySource::DriveScan);
        assert_eq!(v.used_bytes, 0);
        assert_eq!(v.usage_percent(), 0);
    }

    #[test]
    fn blank_label_gets_default() {
        let v = Volume::new('F', "   ", "exFAT", 10, 5, DiscoverySource::PartitionTable);
        assert_eq!(v.label, "Removable (F:)");
        assert_eq!(v.root(), "F:\\");
    }

    #[test]
    fn usage_levels() {
        let ok = Volume::new('E', "a", "FAT32", 100, 21, DiscoverySource::DriveScan);
        let warn = Volume::new('E', "a", "FAT32", 100, 20, DiscoverySource::DriveScan);
        let crit = Volume::new('E', "a", "FAT32", 100, 10, DiscoverySource::DriveScan);
        assert_eq!(ok.usage_level(), UsageLevel::Ok);
        assert_eq!(warn.usage_level(), UsageLevel::Warning);
        assert_eq!(crit.usage_level(), UsageLevel::Critical);
    }

    #[test]
    fn unmounted_disk_sentinels() {
        let d = UnmountedDisk::new(Some(3), "", 0);
        assert_eq!(d.letter(), '?');
        assert_eq!(d.filesystem(), "unmounted");
        assert_eq!(d.label, "USB Drive");
        assert!(!d.is_mounted());
    }

    #[test]
    fn serialises_for_json_output() {
        let v = Volume::new('E', "STICK", "FAT32", 1000, 400, DiscoverySource::Instrumentation)
            .with_disk_index(Some(1));
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["letter"], "E");
        assert_eq!(json["label"], "STICK");
        assert_eq!(json["source"], "Instrumentation");
        assert_eq!(json["disk_index"], 1);

        let d = serde_json::to_value(UnmountedDisk::new(None, "Kingston", 0)).unwrap();
        assert!(d["disk_index"].is_null());
    }
}
