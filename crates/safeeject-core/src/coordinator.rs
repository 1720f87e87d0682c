/// Coordinating layer between the presentation layer and the blocking core.
///
/// Every eject, mount, and lock scan runs on its own short-lived worker
/// thread. Results come back to the owner as [`CoordinatorEvent`]s on a
/// crossbeam channel; the owner drains it from a single thread.
///
/// Per-letter eject state lives in one [`OperationTable`] behind a
/// `parking_lot::Mutex`, injected at construction. All read-modify-write
/// happens under that one lock, so workers finishing concurrently cannot
/// lose each other's updates.
///
/// # Debounce
///
/// A request for a letter is ignored while that letter is in progress, or
/// within `eject_debounce` of the last accepted request for it, whichever
/// holds. Ignored requests start no thread and emit no events. Once a
/// sequence has started it runs to completion; its state leaves
/// `InProgress` on every exit path.
use crate::ejector::Ejector;
use crate::error::{EjectError, OsError};
use crate::model::{EjectPolicy, EjectState, LockingProcess};
use crate::monitor::{DeviceChangeMonitor, DeviceEvent};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Messages delivered from worker threads to the owner of the coordinator.
#[derive(Debug, Clone)]
pub enum CoordinatorEvent {
    /// An eject sequence reached `percent`.
    Progress { letter: char, percent: u8 },
    EjectFinished {
        letter: char,
        result: Result<String, EjectError>,
    },
    MountFinished {
        disk_index: u32,
        result: Result<char, EjectError>,
    },
    LocksFound {
        letter: char,
        processes: Vec<LockingProcess>,
    },
    /// A debounced burst of device arrivals/removals.
    DevicesChanged(DeviceEvent),
    /// The device list is stale and should be rebuilt.
    RefreshRequested,
}

/// In-flight eject state per letter.
#[derive(Debug, Default)]
pub struct OperationTable {
    states: HashMap<char, EjectState>,
    last_accepted: HashMap<char, Instant>,
}

impl OperationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a request for `letter` unless it is in flight or debounced.
    pub fn try_begin(&mut self, letter: char, now: Instant, window: Duration) -> bool {
        if self.state(letter).is_in_progress() {
            debug!("{letter}: request ignored, already in progress");
            return false;
        }
        if let Some(&last) = self.last_accepted.get(&letter) {
            if now.saturating_duration_since(last) < window {
                debug!("{letter}: request ignored, debounced");
                return false;
            }
        }
        self.last_accepted.insert(letter, now);
        self.states.insert(letter, EjectState::InProgress(0));
        true
    }

    /// Record progress for an in-flight letter. Never moves backwards.
    pub fn set_progress(&mut self, letter: char, percent: u8) {
        if let Some(EjectState::InProgress(current)) = self.states.get_mut(&letter) {
            *current = (*current).max(percent.min(100));
        }
    }

    pub fn finish(&mut self, letter: char, outcome: EjectState) {
        debug_assert!(!outcome.is_in_progress());
        self.states.insert(letter, outcome);
    }

    pub fn state(&self, letter: char) -> EjectState {
        self.states.get(&letter).cloned().unwrap_or(EjectState::Idle)
    }

    pub fn progress(&self, letter: char) -> Option<u8> {
        match self.states.get(&letter) {
            Some(EjectState::InProgress(p)) => Some(*p),
            _ => None,
        }
    }

    /// Letters with a sequence currently running, sorted.
    pub fn in_flight(&self) -> Vec<char> {
        let mut letters: Vec<char> = self
            .states
            .iter()
            .filter(|(_, s)| s.is_in_progress())
            .map(|(l, _)| *l)
            .collect();
        letters.sort_unstable();
        letters
    }
}

pub type SharedTable = Arc<Mutex<OperationTable>>;

/// Moves a letter out of `InProgress` when dropped, whatever happened.
struct InFlight {
    table: SharedTable,
    letter: char,
    outcome: Option<EjectState>,
}

impl InFlight {
    fn complete(&mut self, result: &Result<String, EjectError>) {
        self.outcome = Some(match result {
            Ok(_) => EjectState::Succeeded,
            Err(e) => EjectState::Failed(e.to_string()),
        });
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let outcome = self
            .outcome
            .take()
            .unwrap_or_else(|| EjectState::Failed("sequence aborted".into()));
        self.table.lock().finish(self.letter, outcome);
    }
}

pub struct Coordinator {
    ejector: Arc<Ejector>,
    table: SharedTable,
    tx: Sender<CoordinatorEvent>,
    rx: Receiver<CoordinatorEvent>,
    monitor: Option<DeviceChangeMonitor>,
}

impl Coordinator {
    pub fn new(ejector: Ejector) -> Self {
        Self::with_table(ejector, Arc::new(Mutex::new(OperationTable::new())))
    }

    /// Build a coordinator around an existing operation table.
    pub fn with_table(ejector: Ejector, table: SharedTable) -> Self {
        let (tx, rx) = unbounded();
        Self {
            ejector: Arc::new(ejector),
            table,
            tx,
            rx,
            monitor: None,
        }
    }

    pub fn ejector(&self) -> &Ejector {
        &self.ejector
    }

    pub fn table(&self) -> &SharedTable {
        &self.table
    }

    /// Receiver for worker results. Drain from one thread only.
    pub fn events(&self) -> &Receiver<CoordinatorEvent> {
        &self.rx
    }

    /// Current state of `letter`.
    pub fn state(&self, letter: char) -> EjectState {
        self.table.lock().state(letter.to_ascii_uppercase())
    }

    /// Start an eject on a worker thread. Returns `false` if debounced.
    pub fn request_eject(&self, letter: char, policy: EjectPolicy) -> bool {
        self.spawn_eject(letter, move |ejector, letter, progress| {
            ejector.eject(letter, policy, progress)
        })
    }

    /// Kill every locking process, then eject quickly. Returns `false` if
    /// debounced.
    pub fn request_force_eject(&self, letter: char) -> bool {
        self.spawn_eject(letter, |ejector, letter, progress| {
            ejector.force_eject(letter, progress)
        })
    }

    fn spawn_eject<F>(&self, letter: char, run: F) -> bool
    where
        F: FnOnce(&Ejector, char, &mut dyn FnMut(u8)) -> Result<String, EjectError>
            + Send
            + 'static,
    {
        let letter = letter.to_ascii_uppercase();
        let window = self.ejector.config().eject_debounce;
        if !self.table.lock().try_begin(letter, Instant::now(), window) {
            return false;
        }

        let ejector = Arc::clone(&self.ejector);
        let table = Arc::clone(&self.table);
        let tx = self.tx.clone();

        let spawned = thread::Builder::new()
            .name(format!("safeeject-eject-{letter}"))
            .spawn(move || {
                let mut guard = InFlight {
                    table: Arc::clone(&table),
                    letter,
                    outcome: None,
                };

                let mut on_progress = |percent: u8| {
                    table.lock().set_progress(letter, percent);
                    let _ = tx.send(CoordinatorEvent::Progress { letter, percent });
                };
                let result = run(&*ejector, letter, &mut on_progress);

                guard.complete(&result);
                drop(guard);

                match &result {
                    Ok(msg) => info!("{msg}"),
                    Err(e) => warn!("{letter}: eject failed: {e}"),
                }
                let _ = tx.send(CoordinatorEvent::EjectFinished { letter, result });
                let _ = tx.send(CoordinatorEvent::RefreshRequested);
            });

        if let Err(e) = spawned {
            let err = EjectError::unknown(format!("cannot start eject worker: {e}"));
            self.table
                .lock()
                .finish(letter, EjectState::Failed(err.to_string()));
            let _ = self.tx.send(CoordinatorEvent::EjectFinished {
                letter,
                result: Err(err),
            });
        }
        true
    }

    /// Mount `disk_index` on a worker thread.
    pub fn request_mount(&self, disk_index: u32) {
        let ejector = Arc::clone(&self.ejector);
        let tx = self.tx.clone();
        self.spawn_worker(format!("safeeject-mount-{disk_index}"), move || {
            let result = ejector.mount(disk_index);
            let _ = tx.send(CoordinatorEvent::MountFinished { disk_index, result });
            let _ = tx.send(CoordinatorEvent::RefreshRequested);
        });
    }

    /// Scan for locking processes on a worker thread.
    pub fn request_lock_scan(&self, letter: char) {
        let letter = letter.to_ascii_uppercase();
        let ejector = Arc::clone(&self.ejector);
        let tx = self.tx.clone();
        self.spawn_worker(format!("safeeject-locks-{letter}"), move || {
            let processes = ejector.find_locks(letter);
            let _ = tx.send(CoordinatorEvent::LocksFound { letter, processes });
        });
    }

    fn spawn_worker(&self, name: String, work: impl FnOnce() + Send + 'static) {
        if let Err(e) = thread::Builder::new().name(name.clone()).spawn(work) {
            warn!("Cannot start worker {name}: {e}");
            let _ = self.tx.send(CoordinatorEvent::RefreshRequested);
        }
    }

    /// Forward debounced device changes as events. Idempotent.
    pub fn start_monitor(&mut self) -> Result<(), OsError> {
        if self.monitor.is_some() {
            return Ok(());
        }
        let tx = self.tx.clone();
        let monitor = self.ejector.start_monitor(move |event| {
            let _ = tx.send(CoordinatorEvent::DevicesChanged(event));
            let _ = tx.send(CoordinatorEvent::RefreshRequested);
        })?;
        self.monitor = Some(monitor);
        Ok(())
    }

    pub fn stop_monitor(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.stop();
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor.is_some()
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.stop_monitor();
    }
}
