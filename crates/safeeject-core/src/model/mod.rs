/// Value objects produced by enumeration, lock scanning, and ejection.
///
/// Every entity is rebuilt on each refresh; nothing here carries identity
/// across calls.
pub mod process;
pub mod size;
pub mod volume;

pub use process::LockingProcess;
pub use volume::{
    DiscoverySource, EjectPolicy, EjectState, UnmountedDisk, UsageLevel, Volume,
    UNMOUNTED_FILESYSTEM, UNMOUNTED_LETTER,
};
