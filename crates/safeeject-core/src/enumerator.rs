/// Removable volume discovery.
///
/// Three independent strategies each propose drive letters:
///
/// 1. **Instrumentation**: USB disks with removable media, walked through
///    the disk → partition → logical volume chain.
/// 2. **Partition table**: mounted partitions flagged removable.
/// 3. **Drive scan**: every assigned letter whose drive type is removable.
///
/// The strategies run concurrently and each is its own error boundary: a
/// failing strategy contributes nothing and the others are unaffected. The
/// union is re-validated letter by letter, then each survivor is turned
/// into a [`Volume`]. Phantom letters (metadata unreadable or zero capacity,
/// typical right after a stick is pulled) are dropped.
use crate::error::OsError;
use crate::model::{DiscoverySource, Volume};
use crate::system::{DiskCatalog, DriveApi, DriveKind, InterfaceKind, PartitionTable};
use crate::validator::is_ejectable_volume;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// A letter proposed by one strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub letter: char,
    pub source: DiscoverySource,
    pub disk_index: Option<u32>,
}

impl Candidate {
    fn new(letter: char, source: DiscoverySource) -> Self {
        Self {
            letter: letter.to_ascii_uppercase(),
            source,
            disk_index: None,
        }
    }
}

/// Outcome of one strategy.
pub type StrategyResult = Result<Vec<Candidate>, OsError>;

/// Strategy 1: USB removable-media disks through the association chain.
pub fn instrumentation_strategy(catalog: &dyn DiskCatalog) -> StrategyResult {
    let mut found = Vec::new();
    for disk in catalog.disks_by_interface(InterfaceKind::Usb)? {
        if !disk.removable_media {
            continue;
        }
        let letters = match catalog.letters_of_disk(&disk.id) {
            Ok(letters) => letters,
            Err(e) => {
                debug!("Partitions of {} not readable: {e}", disk.id);
                continue;
            }
        };
        found.extend(letters.into_iter().map(|letter| Candidate {
            disk_index: disk.index,
            ..Candidate::new(letter, DiscoverySource::Instrumentation)
        }));
    }
    Ok(found)
}

/// Strategy 2: mounted partitions flagged removable, minus the boot volume.
pub fn partition_strategy(partitions: &dyn PartitionTable, boot: char) -> StrategyResult {
    Ok(partitions
        .mounted_partitions()?
        .into_iter()
        .filter(|p| p.removable && !p.letter.eq_ignore_ascii_case(&boot))
        .map(|p| Candidate::new(p.letter, DiscoverySource::PartitionTable))
        .collect())
}

/// Strategy 3: every assigned letter whose drive type is removable.
pub fn drive_scan_strategy(drives: &dyn DriveApi, boot: char) -> StrategyResult {
    Ok(drives
        .logical_drive_letters()?
        .into_iter()
        .filter(|l| !l.eq_ignore_ascii_case(&boot))
        .filter(|&l| drives.drive_kind(l) == DriveKind::Removable)
        .map(|l| Candidate::new(l, DiscoverySource::DriveScan))
        .collect())
}

/// Union of all strategy outcomes keyed by letter.
///
/// Failed strategies contribute nothing. When several strategies report
/// the same letter the earliest source wins and any known disk index is kept.
pub fn union_candidates<I>(results: I) -> BTreeMap<char, Candidate>
where
    I: IntoIterator<Item = StrategyResult>,
{
    let mut merged: BTreeMap<char, Candidate> = BTreeMap::new();
    for result in results {
        let candidates = match result {
            Ok(c) => c,
            Err(e) => {
                debug!("Discovery strategy failed: {e}");
                continue;
            }
        };
        for c in candidates {
            merged
                .entry(c.letter)
                .and_modify(|existing| {
                    if c.source < existing.source {
                        existing.source = c.source;
                    }
                    existing.disk_index = existing.disk_index.or(c.disk_index);
                })
                .or_insert(c);
        }
    }
    merged
}

/// Read label, filesystem, and capacity for a validated letter.
///
/// Returns `None` for phantom entries.
pub fn build_volume(drives: &dyn DriveApi, candidate: &Candidate) -> Option<Volume> {
    let letter = candidate.letter;
    let info = drives
        .volume_info(letter)
        .map_err(|e| debug!("{letter}: dropped, volume info: {e}"))
        .ok()?;
    let space = drives
        .space(letter)
        .map_err(|e| debug!("{letter}: dropped, capacity: {e}"))
        .ok()?;
    if space.total_bytes == 0 {
        debug!("{letter}: dropped, zero capacity");
        return None;
    }
    Some(
        Volume::new(
            letter,
            &info.label,
            &info.filesystem,
            space.total_bytes,
            space.free_bytes,
            candidate.source,
        )
        .with_disk_index(candidate.disk_index),
    )
}

/// List every removable volume, sorted by letter.
pub fn list_removable_volumes(
    drives: &dyn DriveApi,
    catalog: &dyn DiskCatalog,
    partitions: &dyn PartitionTable,
) -> Vec<Volume> {
    let boot = drives.boot_letter();

    let ((by_catalog, by_partitions), by_scan) = rayon::join(
        || {
            rayon::join(
                || instrumentation_strategy(catalog),
                || partition_strategy(partitions, boot),
            )
        },
        || drive_scan_strategy(drives, boot),
    );

    let merged = union_candidates([by_catalog, by_partitions, by_scan]);

    let volumes: Vec<Volume> = merged
        .values()
        .filter(|c| is_ejectable_volume(drives, c.letter))
        .filter_map(|c| build_volume(drives, c))
        .collect();

    info!(
        "Discovered {} removable volume(s) from {} candidate letter(s)",
        volumes.len(),
        merged.len()
    );
    volumes
}
