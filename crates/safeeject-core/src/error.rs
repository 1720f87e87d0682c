/// Failure taxonomy shared by every eject, mount, and lock-check operation.
///
/// Enumeration and lock scanning never surface these; they degrade to
/// partial results instead. Eject and mount return exactly one classified
/// reason, never a bare OS error code.
use crate::model::LockingProcess;
use thiserror::Error;

// Win32 error codes that drive classification.
pub const ERROR_FILE_NOT_FOUND: u32 = 2;
pub const ERROR_PATH_NOT_FOUND: u32 = 3;
pub const ERROR_ACCESS_DENIED: u32 = 5;
pub const ERROR_SHARING_VIOLATION: u32 = 32;
pub const ERROR_LOCK_VIOLATION: u32 = 33;

/// A raw error code reported by the OS through one of the seam traits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("OS error {code}")]
pub struct OsError {
    pub code: u32,
}

impl OsError {
    pub fn new(code: u32) -> Self {
        Self { code }
    }

    /// Capture the calling thread's last OS error.
    pub fn last() -> Self {
        let code = std::io::Error::last_os_error()
            .raw_os_error()
            .unwrap_or_default();
        Self { code: code as u32 }
    }
}

impl From<std::io::Error> for OsError {
    fn from(e: std::io::Error) -> Self {
        match e.raw_os_error() {
            Some(code) => Self::new(code as u32),
            None if e.kind() == std::io::ErrorKind::PermissionDenied => {
                Self::new(ERROR_ACCESS_DENIED)
            }
            None if e.kind() == std::io::ErrorKind::NotFound => Self::new(ERROR_FILE_NOT_FOUND),
            None => Self::new(0),
        }
    }
}

/// Classified failure returned to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EjectError {
    #[error("{0}: is not accessible")]
    VolumeInaccessible(char),
    #[error("device is in use")]
    DeviceBusy,
    #[error("access denied")]
    AccessDenied,
    #[error("{} process(es) have files open", .0.len())]
    LockedByProcess(Vec<LockingProcess>),
    #[error("device refused the request (error {0})")]
    SequenceStepFailed(u32),
    #[error("could not assign a drive letter")]
    AssignmentFailed,
    #[error("unexpected failure: {0}")]
    Unknown(String),
}

impl EjectError {
    /// Build an [`EjectError::Unknown`], logging the detail.
    pub fn unknown(detail: impl Into<String>) -> Self {
        let detail = detail.into();
        tracing::error!("Unclassified failure: {detail}");
        Self::Unknown(detail)
    }

    /// Classify an OS error raised while opening or controlling `letter`.
    pub fn from_os(letter: char, err: OsError) -> Self {
        match err.code {
            ERROR_SHARING_VIOLATION | ERROR_LOCK_VIOLATION => Self::DeviceBusy,
            ERROR_ACCESS_DENIED => Self::AccessDenied,
            ERROR_FILE_NOT_FOUND | ERROR_PATH_NOT_FOUND => Self::VolumeInaccessible(letter),
            code => Self::SequenceStepFailed(code),
        }
    }

    /// Short label for status lines ("in use", "access denied", ...).
    pub fn short_label(&self) -> &'static str {
        match self {
            Self::VolumeInaccessible(_) => "inaccessible",
            Self::DeviceBusy => "in use",
            Self::AccessDenied => "access denied",
            Self::LockedByProcess(_) => "locked by process",
            Self::SequenceStepFailed(_) => "refused by device",
            Self::AssignmentFailed => "no letter",
            Self::Unknown(_) => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_sharing_violation_as_busy() {
        assert_eq!(
            EjectError::from_os('E', OsError::new(ERROR_SHARING_VIOLATION)),
            EjectError::DeviceBusy
        );
        assert_eq!(
            EjectError::from_os('E', OsError::new(ERROR_LOCK_VIOLATION)),
            EjectError::DeviceBusy
        );
    }

    #[test]
    fn classifies_access_denied() {
        assert_eq!(
            EjectError::from_os('E', OsError::new(ERROR_ACCESS_DENIED)),
            EjectError::AccessDenied
        );
    }

    #[test]
    fn classifies_missing_volume_as_inaccessible() {
        assert_eq!(
            EjectError::from_os('F', OsError::new(ERROR_FILE_NOT_FOUND)),
            EjectError::VolumeInaccessible('F')
        );
    }

    #[test]
    fn other_codes_keep_the_code() {
        assert_eq!(
            EjectError::from_os('E', OsError::new(1117)),
            EjectError::SequenceStepFailed(1117)
        );
    }

    #[test]
    fn messages_are_distinct_per_variant() {
        let all = [
            EjectError::VolumeInaccessible('E'),
            EjectError::DeviceBusy,
            EjectError::AccessDenied,
            EjectError::LockedByProcess(Vec::new()),
            EjectError::SequenceStepFailed(1),
            EjectError::AssignmentFailed,
            EjectError::Unknown("x".into()),
        ];
        let labels: std::collections::HashSet<_> = all.iter().map(|e| e.short_label()).collect();
        let messages: std::collections::HashSet<_> = all.iter().map(|e| e.to_string()).collect();
        assert_eq!(labels.len(), all.len());
        assert_eq!(messages.len(), all.len());
    }
}
