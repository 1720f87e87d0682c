use compact_str::CompactString;
use serde::Serialize;
use std::path::PathBuf;

/// A running process holding at least one file open on a target volume.
///
/// Recomputed on every lock check; never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockingProcess {
    pub pid: u32,
    pub name: CompactString,
    /// Executable image path; empty when it could not be read.
    pub exe: PathBuf,
    /// Paths on the volume held by this process, in discovery order.
    pub files: Vec<String>,
}
