/// Process table backed by `sysinfo`, with open files from the handle table.
///
/// `processes()` also snapshots the system handle table; `open_files()`
/// reads from that snapshot, so one scan costs one kernel query.
use super::handles::{self, HandleTable, OpenFileIter};
use crate::error::{OsError, ERROR_ACCESS_DENIED, ERROR_FILE_NOT_FOUND};
use crate::system::{OpenFiles, ProcessEntry, ProcessTable};
use parking_lot::Mutex;
use std::thread;
use std::time::{Duration, Instant};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Default)]
pub struct SystemProcesses {
    handles: Mutex<HandleTable>,
}

fn is_alive(sys: &mut System, pid: Pid) -> bool {
    sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    sys.process(pid).is_some()
}

impl ProcessTable for SystemProcesses {
    fn processes(&self) -> Vec<ProcessEntry> {
        match handles::snapshot() {
            Ok(table) => *self.handles.lock() = table,
            Err(e) => {
                warn!("Handle table unavailable: {e}");
                self.handles.lock().clear();
            }
        }

        let mut sys = System::new();
        sys.refresh_processes(ProcessesToUpdate::All, true);
        sys.processes()
            .iter()
            .map(|(pid, process)| ProcessEntry {
                pid: pid.as_u32(),
                name: process.name().to_string_lossy().into_owned(),
                exe: process.exe().map(|p| p.to_path_buf()),
            })
            .collect()
    }

    fn open_files(&self, pid: u32) -> Result<OpenFiles<'_>, OsError> {
        let handles = self.handles.lock().get(&pid).cloned().unwrap_or_default();
        if handles.is_empty() {
            return Ok(Box::new(std::iter::empty()));
        }
        Ok(Box::new(OpenFileIter::open(pid, handles)?))
    }

    fn terminate(&self, pid: u32, grace: Duration) -> Result<(), OsError> {
        let pid = Pid::from_u32(pid);
        let mut sys = System::new();
        if !is_alive(&mut sys, pid) {
            return Err(OsError::new(ERROR_FILE_NOT_FOUND));
        }

        if let Some(process) = sys.process(pid) {
            process.kill();
        }

        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if !is_alive(&mut sys, pid) {
                debug!("Process {pid} exited");
                return Ok(());
            }
            thread::sleep(POLL_INTERVAL);
        }

        // Still running after the grace period.
        if let Some(process) = sys.process(pid) {
            process.kill();
        }
        if is_alive(&mut sys, pid) {
            Err(OsError::new(ERROR_ACCESS_DENIED))
        } else {
            Ok(())
        }
    }
}
