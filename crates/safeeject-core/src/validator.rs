/// The single gatekeeper for drive letters.
///
/// Every other component re-checks letters here before trusting them. The
/// check is a pure read of OS state and may be repeated freely.
use crate::system::{DriveApi, DriveKind};
use tracing::debug;

/// Filesystem drivers that bridge network or user-mode storage. Such
/// volumes can report themselves as local, removable drives.
const VIRTUAL_FILESYSTEMS: &[&str] = &["fuse", "winfsp", "dokan", "webdav"];

/// Whether `letter` names a genuine, local, ejectable volume.
///
/// Rejects network, optical, RAM-disk, unknown, and rootless drives; volumes
/// served by a virtual filesystem driver; and anything whose label,
/// filesystem, or capacity cannot be read or reports zero capacity.
pub fn is_ejectable_volume(drives: &dyn DriveApi, letter: char) -> bool {
    if !letter.is_ascii_alphabetic() {
        return false;
    }
    let letter = letter.to_ascii_uppercase();

    let kind = drives.drive_kind(letter);
    if !matches!(kind, DriveKind::Removable | DriveKind::Fixed) {
        debug!("{letter}: rejected, drive type {}", kind.label());
        return false;
    }

    let info = match drives.volume_info(letter) {
        Ok(info) => info,
        Err(e) => {
            debug!("{letter}: rejected, volume info unreadable: {e}");
            return false;
        }
    };

    let fs = info.filesystem.to_ascii_lowercase();
    if VIRTUAL_FILESYSTEMS.iter().any(|v| fs.contains(v)) {
        debug!("{letter}: rejected, virtual filesystem {}", info.filesystem);
        return false;
    }

    match drives.space(letter) {
        Ok(space) if space.total_bytes > 0 => true,
        Ok(_) => {
            debug!("{letter}: rejected, zero capacity");
            false
        }
        Err(e) => {
            debug!("{letter}: rejected, capacity unreadable: {e}");
            false
        }
    }
}
