/// Bringing an offline or letter-less USB disk back online.
///
/// The disk is set online and writable through the partitioning utility,
/// then the association chain is polled for a letter the OS assigned on
/// its own. If none appears, the lowest free letter in `D..=Z` is assigned
/// explicitly to the disk's first partition and confirmed by checking that
/// its root exists. A failed script only ends the mount when it was refused
/// for lack of privileges; otherwise the next step or letter is tried.
use crate::config::EjectorConfig;
use crate::error::{EjectError, ERROR_ACCESS_DENIED};
use crate::system::{physical_drive_id, DiskCatalog, DiskUtility, DriveApi};
use std::collections::BTreeSet;
use std::thread;
use tracing::{debug, info, warn};

/// Letters eligible for explicit assignment, in preference order.
pub const ASSIGNABLE_LETTERS: std::ops::RangeInclusive<char> = 'D'..='Z';

fn online_script(disk_index: u32) -> String {
    format!(
        "select disk {disk_index}\nonline disk\nattributes disk clear readonly\nrescan\n"
    )
}

fn assign_script(disk_index: u32, letter: char) -> String {
    format!("select disk {disk_index}\nselect partition 1\nassign letter={letter}\n")
}

/// Free letters in `D..=Z`, lowest first.
pub fn free_letters(in_use: &BTreeSet<char>) -> Vec<char> {
    ASSIGNABLE_LETTERS
        .filter(|l| !in_use.contains(l))
        .collect()
}

/// Letter currently reachable from `disk_index`, if any.
fn current_letter(catalog: &dyn DiskCatalog, disk_index: u32) -> Option<char> {
    match catalog.letters_of_disk(&physical_drive_id(disk_index)) {
        Ok(letters) => letters.into_iter().next().map(|l| l.to_ascii_uppercase()),
        Err(e) => {
            debug!("Disk {disk_index}: letter lookup failed: {e}");
            None
        }
    }
}

/// Assign the lowest free letter that the OS then confirms.
fn assign_letter(
    drives: &dyn DriveApi,
    utility: &dyn DiskUtility,
    disk_index: u32,
    config: &EjectorConfig,
) -> Result<char, EjectError> {
    let in_use: BTreeSet<char> = drives
        .logical_drive_letters()
        .map_err(|e| EjectError::unknown(format!("cannot list drive letters: {e}")))?
        .into_iter()
        .map(|l| l.to_ascii_uppercase())
        .collect();

    for letter in free_letters(&in_use) {
        debug!("Disk {disk_index}: trying letter {letter}:");
        if let Err(e) = utility.run_script(&assign_script(disk_index, letter), config.mount_timeout)
        {
            if e.code == ERROR_ACCESS_DENIED {
                return Err(EjectError::AccessDenied);
            }
            debug!("Disk {disk_index}: assigning {letter}: reported {e}");
        }
        thread::sleep(config.mount_settle);

        if drives.root_exists(letter) {
            info!("Disk {disk_index}: assigned {letter}:");
            return Ok(letter);
        }
        debug!("Disk {disk_index}: {letter}: did not appear");
    }

    Err(EjectError::AssignmentFailed)
}

/// Bring `disk_index` online and return the letter it ends up with.
pub fn mount_disk(
    drives: &dyn DriveApi,
    catalog: &dyn DiskCatalog,
    utility: &dyn DiskUtility,
    disk_index: u32,
    config: &EjectorConfig,
) -> Result<char, EjectError> {
    info!("Mounting disk {disk_index}");

    // An already-online disk makes the script fail; the letter checks
    // below still apply.
    match utility.run_script(&online_script(disk_index), config.mount_timeout) {
        Ok(output) => debug!("Online script output:\n{output}"),
        Err(e) if e.code == ERROR_ACCESS_DENIED => return Err(EjectError::AccessDenied),
        Err(e) => warn!("Disk {disk_index}: online script reported {e}, continuing"),
    }

    for attempt in 1..=config.mount_poll_attempts.max(1) {
        thread::sleep(config.mount_settle);
        if let Some(letter) = current_letter(catalog, disk_index) {
            info!("Disk {disk_index}: mounted as {letter}: (attempt {attempt})");
            return Ok(letter);
        }
    }

    warn!("Disk {disk_index}: online but no letter, assigning one");
    assign_letter(drives, utility, disk_index, config)
}
