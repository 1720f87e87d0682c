/// Device-change monitor: re-enumerate when hardware comes and goes.
///
/// A [`DeviceNotifier`] runs the OS listener on its own thread and forwards
/// arrival/removal events into a channel. The monitor feeds that channel
/// through a [`Debouncer`] so a burst of notifications (one per interface,
/// partition, and volume of a single stick) triggers one callback.
///
/// # Usage
///
/// ```ignore
/// let monitor = DeviceChangeMonitor::start(notifier.as_ref(), delay, |ev| refresh(ev))?;
/// // ...
/// monitor.stop();
/// ```
pub mod debounce;

pub use debounce::Debouncer;

use crate::error::OsError;
use crossbeam_channel::Sender;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info};

// WM_DEVICECHANGE wParam values.
const DBT_DEVICEARRIVAL: u32 = 0x8000;
const DBT_DEVICEREMOVECOMPLETE: u32 = 0x8004;

/// What happened to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEventKind {
    Arrival,
    Removal,
}

impl DeviceEventKind {
    /// Classify a device-change broadcast code. Other codes are ignored.
    pub fn from_broadcast(code: u32) -> Option<Self> {
        match code {
            DBT_DEVICEARRIVAL => Some(Self::Arrival),
            DBT_DEVICEREMOVECOMPLETE => Some(Self::Removal),
            _ => None,
        }
    }
}

/// A device arrival or removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEvent {
    pub kind: DeviceEventKind,
    pub at: chrono::DateTime<chrono::Local>,
}

impl DeviceEvent {
    pub fn now(kind: DeviceEventKind) -> Self {
        Self {
            kind,
            at: chrono::Local::now(),
        }
    }
}

/// Handle to a running OS listener thread.
pub struct NotifierHandle {
    shutdown: Option<Box<dyn FnOnce() + Send>>,
    thread: Option<JoinHandle<()>>,
}

impl NotifierHandle {
    /// `shutdown` must make the listener thread return.
    pub fn new(shutdown: Box<dyn FnOnce() + Send>, thread: JoinHandle<()>) -> Self {
        Self {
            shutdown: Some(shutdown),
            thread: Some(thread),
        }
    }

    /// Ask the listener to exit and wait for it.
    pub fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            shutdown();
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for NotifierHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Source of OS device arrival/removal notifications.
pub trait DeviceNotifier: Send + Sync {
    /// Start listening on a dedicated thread, sending every arrival or
    /// removal to `sink` until the returned handle is stopped.
    fn spawn(&self, sink: Sender<DeviceEvent>) -> Result<NotifierHandle, OsError>;
}

/// A running device-change monitor.
pub struct DeviceChangeMonitor {
    notifier: NotifierHandle,
    debouncer: Debouncer<DeviceEvent>,
}

impl DeviceChangeMonitor {
    /// Start listening; `callback` runs on the debounce thread once per burst.
    pub fn start<F>(
        notifier: &dyn DeviceNotifier,
        delay: Duration,
        callback: F,
    ) -> Result<Self, OsError>
    where
        F: FnMut(DeviceEvent) + Send + 'static,
    {
        let debouncer = Debouncer::spawn(delay, callback)?;
        let sink = debouncer
            .sender()
            .ok_or_else(|| OsError::new(0))?;
        let notifier = notifier.spawn(sink)?;
        info!("Device-change monitor started (debounce {delay:?})");
        Ok(Self {
            notifier,
            debouncer,
        })
    }

    /// Stop the OS listener, then the debounce thread.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.notifier.stop();
        self.debouncer.stop();
        debug!("Device-change monitor stopped");
    }
}

impl Drop for DeviceChangeMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
