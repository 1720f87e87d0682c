/// Synchronous entry points the presentation layer calls.
///
/// Each method blocks on OS I/O; the [`crate::coordinator::Coordinator`]
/// runs them on worker threads. Enumeration and lock scanning degrade to
/// partial results. Eject and mount return one classified [`EjectError`].
use crate::config::EjectorConfig;
use crate::eject::eject_volume;
use crate::enumerator::list_removable_volumes;
use crate::error::{EjectError, OsError};
use crate::locks::{find_locking_processes, kill_process};
use crate::model::{EjectPolicy, LockingProcess, UnmountedDisk, Volume};
use crate::monitor::{DeviceChangeMonitor, DeviceEvent};
use crate::mount::mount_disk;
use crate::system::SystemContext;
use crate::unmounted::list_unmounted_usb_disks;
use crate::validator::is_ejectable_volume;
use std::thread;
use tracing::{info, warn};

pub struct Ejector {
    system: SystemContext,
    config: EjectorConfig,
}

impl Ejector {
    pub fn new(system: SystemContext, config: EjectorConfig) -> Self {
        Self { system, config }
    }

    pub fn config(&self) -> &EjectorConfig {
        &self.config
    }

    pub fn system(&self) -> &SystemContext {
        &self.system
    }

    /// Mounted removable volumes, sorted by letter.
    pub fn list_volumes(&self) -> Vec<Volume> {
        list_removable_volumes(
            self.system.drives.as_ref(),
            self.system.catalog.as_ref(),
            self.system.partitions.as_ref(),
        )
    }

    /// Attached USB disks without a mounted volume.
    pub fn list_unmounted_disks(&self) -> Vec<UnmountedDisk> {
        list_unmounted_usb_disks(
            self.system.drives.as_ref(),
            self.system.catalog.as_ref(),
            self.system.utility.as_ref(),
            &self.config,
        )
    }

    pub fn is_ejectable(&self, letter: char) -> bool {
        is_ejectable_volume(self.system.drives.as_ref(), letter)
    }

    pub fn find_locks(&self, letter: char) -> Vec<LockingProcess> {
        find_locking_processes(self.system.processes.as_ref(), letter)
    }

    /// Check that `letter` is a valid volume with no process holding files.
    pub fn verify_safe_to_eject(&self, letter: char) -> Result<(), EjectError> {
        let letter = letter.to_ascii_uppercase();
        info!("Verifying {letter}:");
        if !self.is_ejectable(letter) {
            return Err(EjectError::VolumeInaccessible(letter));
        }
        let locking = self.find_locks(letter);
        if !locking.is_empty() {
            return Err(EjectError::LockedByProcess(locking));
        }
        info!("{letter}: safe to eject");
        Ok(())
    }

    /// Eject `letter`. The verified policy checks for locking processes first.
    pub fn eject(
        &self,
        letter: char,
        policy: EjectPolicy,
        on_progress: &mut dyn FnMut(u8),
    ) -> Result<String, EjectError> {
        if policy == EjectPolicy::Verified {
            self.verify_safe_to_eject(letter)?;
        }
        eject_volume(self.system.volumes.as_ref(), letter, policy, on_progress)
    }

    /// Terminate every process locking `letter`, then eject it quickly.
    pub fn force_eject(
        &self,
        letter: char,
        on_progress: &mut dyn FnMut(u8),
    ) -> Result<String, EjectError> {
        let locking = self.find_locks(letter);
        for process in &locking {
            if let Err(e) = self.kill_process(process.pid) {
                warn!("Could not terminate {} ({}): {e}", process.name, process.pid);
            }
            thread::sleep(self.config.kill_pause);
        }
        eject_volume(
            self.system.volumes.as_ref(),
            letter,
            EjectPolicy::Fast,
            on_progress,
        )
    }

    /// Bring `disk_index` online, returning its letter.
    pub fn mount(&self, disk_index: u32) -> Result<char, EjectError> {
        mount_disk(
            self.system.drives.as_ref(),
            self.system.catalog.as_ref(),
            self.system.utility.as_ref(),
            disk_index,
            &self.config,
        )
    }

    pub fn kill_process(&self, pid: u32) -> Result<(), EjectError> {
        kill_process(self.system.processes.as_ref(), pid, self.config.kill_grace)
    }

    /// Start watching for device arrival and removal.
    pub fn start_monitor<F>(&self, callback: F) -> Result<DeviceChangeMonitor, OsError>
    where
        F: FnMut(DeviceEvent) + Send + 'static,
    {
        DeviceChangeMonitor::start(
            self.system.notifier.as_ref(),
            self.config.device_change_debounce,
            callback,
        )
    }
}
