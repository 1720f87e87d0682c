/// Detection of USB disks that are attached but expose no mounted volume.
///
/// Three strategies of decreasing reliability, each tried only when the
/// previous one found nothing:
///
/// 1. **Catalog**: every USB disk whose partitions reach no logical volume.
/// 2. **Partitioning utility**: `list disk` rows whose status is not
///    "Online", confirmed as USB through the catalog.
/// 3. **Raw probe**: `PhysicalDrive0..N` device names that exist, are USB,
///    and reach no logical volume (or whose volumes cannot be listed).
///
/// The scanner never fails; total failure is an empty list.
use crate::config::EjectorConfig;
use crate::model::size::parse_size;
use crate::model::UnmountedDisk;
use crate::system::{physical_drive_id, DiskCatalog, DiskUtility, DriveApi, InterfaceKind};
use lazy_regex::regex_captures;
use tracing::{debug, info, warn};

/// One row of the partitioning utility's `list disk` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskListing {
    pub index: u32,
    pub status: String,
    pub size_bytes: u64,
}

impl DiskListing {
    pub fn is_online(&self) -> bool {
        self.status.eq_ignore_ascii_case("online")
    }
}

/// Parse `list disk` output into rows.
///
/// Rows look like `  Disk 1    Offline          14 GB      0 B`, optionally
/// prefixed by `*` when the disk is selected. Header, separator, and
/// unparseable lines are skipped.
pub fn parse_disk_list(output: &str) -> Vec<DiskListing> {
    output
        .lines()
        .filter_map(|line| {
            let (_, index, status, size) =
                regex_captures!(r"^\s*\*?\s*Disk\s+(\d+)\s+(\w+)\s+(\d+\s+\w+)", line)?;
            Some(DiskListing {
                index: index.parse().ok()?,
                status: status.to_string(),
                size_bytes: parse_size(size),
            })
        })
        .collect()
}

/// Strategy 1: USB disks with no reachable logical volume.
fn scan_catalog(catalog: &dyn DiskCatalog) -> Vec<UnmountedDisk> {
    let disks = match catalog.disks_by_interface(InterfaceKind::Usb) {
        Ok(disks) => disks,
        Err(e) => {
            warn!("Disk catalog unavailable: {e}");
            return Vec::new();
        }
    };

    let mut unmounted = Vec::new();
    for disk in disks {
        match catalog.letters_of_disk(&disk.id) {
            Ok(letters) if letters.is_empty() => {
                info!("Unmounted USB disk (catalog): {} ({} bytes)", disk.model, disk.size_bytes);
                unmounted.push(UnmountedDisk::new(disk.index, &disk.model, disk.size_bytes));
            }
            Ok(_) => {}
            Err(e) => debug!("Skipping {}: {e}", disk.id),
        }
    }
    unmounted
}

/// Strategy 2: non-online rows of the partitioning utility's disk list.
fn scan_utility(
    utility: &dyn DiskUtility,
    catalog: &dyn DiskCatalog,
    config: &EjectorConfig,
) -> Vec<UnmountedDisk> {
    let output = match utility.run_script("list disk\n", config.list_timeout) {
        Ok(out) => out,
        Err(e) => {
            warn!("Partitioning utility failed: {e}");
            return Vec::new();
        }
    };
    debug!("list disk output:\n{output}");

    parse_disk_list(&output)
        .into_iter()
        .filter(|row| !row.is_online())
        .filter(|row| catalog.is_usb_disk(row.index))
        .map(|row| {
            info!("Unmounted USB disk (utility): Disk {}", row.index);
            UnmountedDisk::new(Some(row.index), &format!("Disk {}", row.index), row.size_bytes)
        })
        .collect()
}

/// Strategy 3: probe raw physical drive names.
fn scan_raw(
    drives: &dyn DriveApi,
    catalog: &dyn DiskCatalog,
    config: &EjectorConfig,
) -> Vec<UnmountedDisk> {
    (0..config.raw_probe_count)
        .filter(|&i| drives.physical_drive_exists(i))
        .filter(|&i| catalog.is_usb_disk(i))
        .filter(|&i| {
            // A disk whose volumes cannot be listed counts as unmounted.
            match catalog.letters_of_disk(&physical_drive_id(i)) {
                Ok(letters) => letters.is_empty(),
                Err(e) => {
                    debug!("PhysicalDrive{i}: volumes not listable ({e}), reporting it");
                    true
                }
            }
        })
        .map(|i| {
            info!("Unmounted USB disk (raw probe): PhysicalDrive{i}");
            UnmountedDisk::new(Some(i), &format!("PhysicalDrive{i}"), 0)
        })
        .collect()
}

/// List attached USB disks that carry no mounted volume.
pub fn list_unmounted_usb_disks(
    drives: &dyn DriveApi,
    catalog: &dyn DiskCatalog,
    utility: &dyn DiskUtility,
    config: &EjectorConfig,
) -> Vec<UnmountedDisk> {
    let mut found = scan_catalog(catalog);

    if found.is_empty() {
        debug!("Catalog found no unmounted disks, trying partitioning utility");
        found = scan_utility(utility, catalog, config);
    }

    if found.is_empty() {
        debug!("Partitioning utility found no unmounted disks, probing raw drives");
        found = scan_raw(drives, catalog, config);
    }

    info!("{} unmounted USB disk(s)", found.len());
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIST_DISK: &str = "\
Microsoft DiskPart version 10.0.22621.1

Copyright (C) Microsoft Corporation.
On computer: DESKTOP

  Disk ###  Status         Size     Free     Dyn  Gpt
  --------  -------------  -------  -------  ---  ---
  Disk 0    Online          476 GB      0 B        *
  Disk 1    Offline          14 GB      0 B
* Disk 2    Online          512 MB  1024 KB
  Disk 3    No Media           0 B      0 B
";

    #[test]
    fn parses_disk_rows() {
        let rows = parse_disk_list(LIST_DISK);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].index, 0);
        assert!(rows[0].is_online());
        assert_eq!(rows[0].size_bytes, 476 * 1024 * 1024 * 1024);
        assert_eq!(rows[1].index, 1);
        assert_eq!(rows[1].status, "Offline");
        assert!(!rows[1].is_online());
        assert_eq!(rows[1].size_bytes, 14 * 1024 * 1024 * 1024);
        assert_eq!(rows[2].index, 2);
        assert_eq!(rows[2].size_bytes, 512 * 1024 * 1024);
    }

    #[test]
    fn ignores_headers_and_noise() {
        assert!(parse_disk_list("Disk ###  Status\n-----\nnothing here").is_empty());
        assert!(parse_disk_list("").is_empty());
    }
}
