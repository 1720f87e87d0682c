/// SafeEject Core - discovery, lock detection, eject and mount sequencing.
///
/// This crate contains all business logic with zero UI dependencies.
/// Every OS call goes through the traits in [`system`], so the same logic
/// drives the real Windows backend and the in-memory `sim` backend (behind
/// the `sim` feature).
///
/// # Modules
///
/// - [`model`] - Volumes, unmounted disks, locking processes, eject state.
/// - [`validator`] - Which lettered roots are real, ejectable volumes.
/// - [`enumerator`] - Removable volume discovery from three sources.
/// - [`unmounted`] - USB disks with no mounted volume.
/// - [`locks`] - Processes holding files open on a volume.
/// - [`eject`] - The flush/lock/dismount/eject sequence.
/// - [`mount`] - Bringing an offline disk online with a letter.
/// - [`monitor`] - Debounced device arrival/removal notifications.
/// - [`ejector`] / [`coordinator`] - Synchronous API and its worker threads.
/// - [`platform`] - Windows implementations of the [`system`] traits.
pub mod config;
pub mod coordinator;
pub mod eject;
pub mod ejector;
pub mod enumerator;
pub mod error;
pub mod locks;
pub mod model;
pub mod monitor;
pub mod mount;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod system;
pub mod unmounted;
pub mod validator;

#[cfg(windows)]
pub mod platform;

pub use config::EjectorConfig;
pub use coordinator::{Coordinator, CoordinatorEvent};
pub use ejector::Ejector;
pub use error::{EjectError, OsError};
pub use system::SystemContext;
