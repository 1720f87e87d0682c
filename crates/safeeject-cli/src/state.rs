/// Session state for the command-line frontend.
///
/// Wraps a [`Coordinator`] and mirrors what it reports: the current device
/// list, per-letter progress, the last result of each operation, and the
/// most recent lock scan. Worker threads communicate through the
/// coordinator's channel; state changes happen in [`Session::process_events`],
/// which the command loops call between waits.
use crossbeam_channel::TryRecvError;
use safeeject_core::model::{EjectPolicy, LockingProcess, UnmountedDisk, Volume};
use safeeject_core::{Coordinator, CoordinatorEvent, EjectError, Ejector};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Maximum coordinator events handled per [`Session::process_events`] call.
///
/// A long burst (device storms while `watch` is running) cannot starve the
/// caller's own loop.
const MAX_EVENTS_PER_PASS: usize = 256;

/// How long a blocking wait sleeps on the channel before re-checking.
const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Outcome of the most recent operation on a letter or disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Ejected(String),
    EjectFailed(EjectError),
    Mounted(char),
    MountFailed(EjectError),
}

/// What happened during one [`Session::process_events`] pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassSummary {
    /// `(letter, percent)` in arrival order.
    pub progress: Vec<(char, u8)>,
    pub finished_letters: Vec<char>,
    pub finished_disks: Vec<u32>,
    pub lock_scans: Vec<char>,
    pub devices_changed: bool,
    pub refreshed: bool,
}

impl PassSummary {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

pub struct Session {
    coordinator: Coordinator,

    // ── Devices ────────────────────────────────────────
    pub volumes: Vec<Volume>,
    pub unmounted: Vec<UnmountedDisk>,
    pub last_refresh: Option<chrono::DateTime<chrono::Local>>,

    // ── Operations ─────────────────────────────────────
    pub progress: BTreeMap<char, u8>,
    pub eject_results: BTreeMap<char, Outcome>,
    pub mount_results: BTreeMap<u32, Outcome>,
    pub locks: BTreeMap<char, Vec<LockingProcess>>,
}

impl Session {
    pub fn new(ejector: Ejector) -> Self {
        Self {
            coordinator: Coordinator::new(ejector),
            volumes: Vec::new(),
            unmounted: Vec::new(),
            last_refresh: None,
            progress: BTreeMap::new(),
            eject_results: BTreeMap::new(),
            mount_results: BTreeMap::new(),
            locks: BTreeMap::new(),
        }
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn ejector(&self) -> &Ejector {
        self.coordinator.ejector()
    }

    /// Rebuild the device list. Unmounted disks are only listed on request
    /// because the fallback scans can take seconds.
    pub fn refresh(&mut self, include_unmounted: bool) {
        self.volumes = self.ejector().list_volumes();
        self.unmounted = if include_unmounted {
            self.ejector().list_unmounted_disks()
        } else {
            Vec::new()
        };
        self.last_refresh = Some(chrono::Local::now());
        tracing::debug!(
            "Refreshed: {} volume(s), {} unmounted disk(s)",
            self.volumes.len(),
            self.unmounted.len()
        );
    }

    pub fn eject(&mut self, letter: char, policy: EjectPolicy) -> bool {
        let accepted = self.coordinator.request_eject(letter, policy);
        if accepted {
            self.begin(letter);
        }
        accepted
    }

    pub fn force_eject(&mut self, letter: char) -> bool {
        let accepted = self.coordinator.request_force_eject(letter);
        if accepted {
            self.begin(letter);
        }
        accepted
    }

    fn begin(&mut self, letter: char) {
        let letter = letter.to_ascii_uppercase();
        self.progress.insert(letter, 0);
        self.eject_results.remove(&letter);
    }

    pub fn mount(&mut self, disk_index: u32) {
        self.mount_results.remove(&disk_index);
        self.coordinator.request_mount(disk_index);
    }

    pub fn scan_locks(&mut self, letter: char) {
        self.locks.remove(&letter.to_ascii_uppercase());
        self.coordinator.request_lock_scan(letter);
    }

    pub fn start_watching(&mut self) -> Result<(), safeeject_core::OsError> {
        self.coordinator.start_monitor()
    }

    pub fn stop_watching(&mut self) {
        self.coordinator.stop_monitor();
    }

    /// Drain pending coordinator events without blocking.
    ///
    /// `RefreshRequested` rebuilds the mounted-volume list once per pass,
    /// however many requests arrived.
    pub fn process_events(&mut self) -> PassSummary {
        let mut summary = PassSummary::default();
        let mut wants_refresh = false;

        for _ in 0..MAX_EVENTS_PER_PASS {
            match self.coordinator.events().try_recv() {
                Ok(event) => self.apply(event, &mut summary, &mut wants_refresh),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    tracing::warn!("Coordinator event channel closed");
                    break;
                }
            }
        }

        if wants_refresh {
            let include_unmounted = !self.unmounted.is_empty();
            self.refresh(include_unmounted);
            summary.refreshed = true;
        }
        summary
    }

    fn apply(&mut self, event: CoordinatorEvent, summary: &mut PassSummary, refresh: &mut bool) {
        match event {
            CoordinatorEvent::Progress { letter, percent } => {
                let entry = self.progress.entry(letter).or_insert(0);
                *entry = (*entry).max(percent);
                summary.progress.push((letter, percent));
            }
            CoordinatorEvent::EjectFinished { letter, result } => {
                self.progress.remove(&letter);
                let outcome = match result {
                    Ok(msg) => Outcome::Ejected(msg),
                    Err(e) => {
                        if let EjectError::LockedByProcess(procs) = &e {
                            self.locks.insert(letter, procs.clone());
                        }
                        Outcome::EjectFailed(e)
                    }
                };
                self.eject_results.insert(letter, outcome);
                summary.finished_letters.push(letter);
            }
            CoordinatorEvent::MountFinished { disk_index, result } => {
                let outcome = match result {
                    Ok(letter) => Outcome::Mounted(letter),
                    Err(e) => Outcome::MountFailed(e),
                };
                self.mount_results.insert(disk_index, outcome);
                summary.finished_disks.push(disk_index);
            }
            CoordinatorEvent::LocksFound { letter, processes } => {
                self.locks.insert(letter, processes);
                summary.lock_scans.push(letter);
            }
            CoordinatorEvent::DevicesChanged(event) => {
                tracing::info!("Device {:?} at {}", event.kind, event.at.format("%H:%M:%S"));
                summary.devices_changed = true;
            }
            CoordinatorEvent::RefreshRequested => *refresh = true,
        }
    }

    /// Process events until `done` holds or `timeout` passes, calling
    /// `on_pass` after every non-empty pass. Returns whether `done` held.
    pub fn wait_until(
        &mut self,
        timeout: Duration,
        mut done: impl FnMut(&Session) -> bool,
        mut on_pass: impl FnMut(&Session, &PassSummary),
    ) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let summary = self.process_events();
            if !summary.is_empty() {
                on_pass(self, &summary);
            }
            if done(self) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep(WAIT_SLICE.min(deadline - now));
        }
    }
}
