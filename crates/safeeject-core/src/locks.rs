/// Detection of processes that hold files open on a volume.
///
/// For each running process the scanner checks its open handles and stops
/// at the first one on the target volume: a single match already blocks
/// ejection. It then checks whether the process image itself lives on the
/// volume. Processes that cannot be inspected are skipped silently.
use crate::error::{EjectError, OsError, ERROR_ACCESS_DENIED, ERROR_FILE_NOT_FOUND};
use crate::model::LockingProcess;
use crate::system::ProcessTable;
use compact_str::CompactString;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Whether `path` lies on the volume mounted at `letter`.
///
/// Accepts both `E:\dir\file` and the extended `\\?\E:\dir\file` form.
pub fn is_on_volume(path: &str, letter: char) -> bool {
    let path = path.strip_prefix(r"\\?\").unwrap_or(path);
    let mut chars = path.chars();
    matches!(
        (chars.next(), chars.next(), chars.next()),
        (Some(l), Some(':'), Some('\\' | '/')) if l.eq_ignore_ascii_case(&letter)
    )
}

/// Every process holding at least one file open on `letter`.
pub fn find_locking_processes(processes: &dyn ProcessTable, letter: char) -> Vec<LockingProcess> {
    let letter = letter.to_ascii_uppercase();
    let mut locking = Vec::new();

    for entry in processes.processes() {
        let mut files = Vec::new();

        match processes.open_files(entry.pid) {
            Ok(mut open) => {
                if let Some(path) = open.find(|p| is_on_volume(p, letter)) {
                    files.push(path);
                }
            }
            Err(e) => debug!("pid {}: handles not readable: {e}", entry.pid),
        }

        let exe = entry.exe.unwrap_or_default();
        let exe_str = exe.to_string_lossy().into_owned();
        if !exe_str.is_empty() && is_on_volume(&exe_str, letter) {
            files.push(exe_str);
        }

        if !files.is_empty() {
            locking.push(LockingProcess {
                pid: entry.pid,
                name: if entry.name.is_empty() {
                    CompactString::from("Unknown")
                } else {
                    CompactString::from(entry.name)
                },
                exe,
                files,
            });
        }
    }

    if locking.is_empty() {
        debug!("{letter}: no locking processes");
    } else {
        warn!("{letter}: {} process(es) holding files", locking.len());
    }
    locking
}

/// Terminate `pid`, force-killing it if it outlives `grace`.
pub fn kill_process(
    processes: &dyn ProcessTable,
    pid: u32,
    grace: Duration,
) -> Result<(), EjectError> {
    match processes.terminate(pid, grace) {
        Ok(()) => {
            info!("Terminated pid {pid}");
            Ok(())
        }
        Err(OsError {
            code: ERROR_FILE_NOT_FOUND,
        }) => Err(EjectError::unknown(format!("no process with pid {pid}"))),
        Err(OsError {
            code: ERROR_ACCESS_DENIED,
        }) => Err(EjectError::AccessDenied),
        Err(e) => Err(EjectError::unknown(format!(
            "could not terminate pid {pid}: {e}"
        ))),
    }
}
