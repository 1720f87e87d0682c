/// Mounted partitions as reported by `sysinfo`.
use crate::error::OsError;
use crate::system::{MountedPartition, PartitionTable};
use sysinfo::Disks;

pub struct SysinfoPartitions;

impl PartitionTable for SysinfoPartitions {
    fn mounted_partitions(&self) -> Result<Vec<MountedPartition>, OsError> {
        let disks = Disks::new_with_refreshed_list();
        Ok(disks
            .list()
            .iter()
            .filter_map(|disk| {
                let mount = disk.mount_point().to_string_lossy();
                let letter = mount.chars().next().filter(char::is_ascii_alphabetic)?;
                Some(MountedPartition {
                    letter: letter.to_ascii_uppercase(),
                    filesystem: disk.file_system().to_string_lossy().into_owned(),
                    removable: disk.is_removable(),
                })
            })
            .collect())
    }
}
