/// Timing and probing parameters shared by the core components.
///
/// Nothing is persisted between runs; the frontend may override fields
/// from its command line before handing the config to the coordinator.
use std::time::Duration;

/// Minimum time between two accepted eject requests for the same letter.
pub const EJECT_DEBOUNCE: Duration = Duration::from_millis(1_500);

/// Delay between the last device-change notification and the refresh.
pub const DEVICE_CHANGE_DEBOUNCE: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EjectorConfig {
    /// Window after an accepted eject request during which a repeat request
    /// for the same letter is ignored.
    pub eject_debounce: Duration,
    /// Quiet period that collapses bursts of device-change notifications.
    pub device_change_debounce: Duration,
    /// Pause after bringing a disk online before looking for its letter.
    pub mount_settle: Duration,
    /// How many times to look for an auto-assigned letter after mounting.
    pub mount_poll_attempts: u32,
    /// Timeout for `list disk`.
    pub list_timeout: Duration,
    /// Timeout for online/assign scripts.
    pub mount_timeout: Duration,
    /// Physical drive indices probed by the last-resort unmounted scan.
    pub raw_probe_count: u32,
    /// Time a process gets to exit politely before being force-killed.
    pub kill_grace: Duration,
    /// Pause between successive kills during a force eject.
    pub kill_pause: Duration,
}

impl Default for EjectorConfig {
    fn default() -> Self {
        Self {
            eject_debounce: EJECT_DEBOUNCE,
            device_change_debounce: DEVICE_CHANGE_DEBOUNCE,
            mount_settle: Duration::from_millis(100),
            mount_poll_attempts: 5,
            list_timeout: Duration::from_secs(10),
            mount_timeout: Duration::from_secs(15),
            raw_probe_count: 10,
            kill_grace: Duration::from_secs(1),
            kill_pause: Duration::from_millis(100),
        }
    }
}

impl EjectorConfig {
    /// A config with every wait shortened, for tests and simulation.
    pub fn immediate() -> Self {
        Self {
            mount_settle: Duration::ZERO,
            kill_grace: Duration::ZERO,
            kill_pause: Duration::ZERO,
            device_change_debounce: Duration::from_millis(50),
            ..Self::default()
        }
    }
}
