use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error taxonomy for the recovery and extraction engine
///
/// Wrong passwords, exhausted candidate lists and cancellation are outcomes,
/// not errors; they never appear here.
#[derive(Error, Debug)]
pub enum UnpickError {
    #[error("Not a supported archive: {path}: {reason}")]
    NotAnArchive { path: PathBuf, reason: String },

    #[error("Cannot read archive {path}: {source}")]
    Unreadable { path: PathBuf, source: io::Error },

    #[error("Cannot read password list {path}: {source}")]
    ListUnreadable { path: PathBuf, source: io::Error },

    #[error("Corrupted archive {path}: {detail}")]
    Corrupt { path: PathBuf, detail: String },

    #[error("Another operation is in progress (state: {state})")]
    OperationInProgress { state: String },

    #[error("I/O failure while {stage} {path}: {source}")]
    IoFailure {
        path: PathBuf,
        stage: &'static str,
        source: io::Error,
    },

    #[error("Disk full while writing {path}")]
    DiskFull { path: PathBuf },

    #[error("No archive selected")]
    NoArchiveSelected,

    #[error("Invalid state: expected {expected}, currently {actual}")]
    InvalidState { expected: &'static str, actual: String },

    #[error("Unknown performance profile: {0}")]
    UnknownProfile(String),

    #[error("Failed to start worker pool: {0}")]
    WorkerPool(String),
}

impl UnpickError {
    /// Classify a write-side I/O error, separating a full disk from other failures
    pub fn from_write(path: &Path, stage: &'static str, err: io::Error) -> Self {
        if is_disk_full(&err) {
            UnpickError::DiskFull { path: path.to_path_buf() }
        } else {
            UnpickError::IoFailure { path: path.to_path_buf(), stage, source: err }
        }
    }

    pub fn corrupt(path: &Path, detail: impl Into<String>) -> Self {
        UnpickError::Corrupt { path: path.to_path_buf(), detail: detail.into() }
    }

    pub fn not_an_archive(path: &Path, reason: impl Into<String>) -> Self {
        UnpickError::NotAnArchive { path: path.to_path_buf(), reason: reason.into() }
    }
}

fn is_disk_full(err: &io::Error) -> bool {
    // ENOSPC on unix, ERROR_HANDLE_DISK_FULL / ERROR_DISK_FULL on windows
    match err.raw_os_error() {
        #[cfg(unix)]
        Some(28) => true,
        #[cfg(windows)]
        Some(39) | Some(112) => true,
        _ => false,
    }
}

// Convert to string for Tauri (commands must return Result<T, String>)
impl From<UnpickError> for String {
    fn from(err: UnpickError) -> String {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_path_and_stage() {
        let err = UnpickError::IoFailure {
            path: PathBuf::from("/out/a.txt"),
            stage: "writing",
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        let msg: String = err.into();
        assert!(msg.contains("/out/a.txt"));
        assert!(msg.contains("writing"));
    }

    #[cfg(unix)]
    #[test]
    fn test_from_write_detects_disk_full() {
        let err = UnpickError::from_write(
            Path::new("/out/big.bin"),
            "writing",
            io::Error::from_raw_os_error(28),
        );
        assert!(matches!(err, UnpickError::DiskFull { .. }));

        let err = UnpickError::from_write(
            Path::new("/out/big.bin"),
            "writing",
            io::Error::new(io::ErrorKind::Other, "boom"),
        );
        assert!(matches!(err, UnpickError::IoFailure { stage: "writing", .. }));
    }
}
