// Archive handling: format handlers, the shared handle and staged extraction
pub mod common;
pub mod staging;
pub mod zip_handler;

#[path = "7z_handler.rs"]
pub mod sevenz_handler;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use crate::core::cancel::CancelToken;
use crate::core::candidates::Candidate;
use crate::models::{ArchiveInfo, UnpickError};
use common::{ArchiveHandler, ExtractStatus, PasswordProbe, Verdict};
use sevenz_handler::SevenZHandler;
use staging::Staging;
use zip_handler::ZipHandler;

/// Unlock state of an archive handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UnlockState {
    Locked = 0,
    Unlocking = 1,
    Unlocked = 2,
    Failed = 3,
}

impl UnlockState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => UnlockState::Locked,
            1 => UnlockState::Unlocking,
            2 => UnlockState::Unlocked,
            _ => UnlockState::Failed,
        }
    }
}

/// A loaded archive and its unlock state
///
/// Any number of workers may test candidates against the handle at once;
/// exactly one of them can move it from `Locked` to `Unlocked`.
pub struct ArchiveHandle {
    path: PathBuf,
    handler: Arc<dyn ArchiveHandler>,
    encrypted: bool,
    state: AtomicU8,
    password: OnceLock<Candidate>,
}

impl ArchiveHandle {
    pub fn new(path: &Path, handler: Arc<dyn ArchiveHandler>, encrypted: bool) -> Self {
        let initial = if encrypted { UnlockState::Locked } else { UnlockState::Unlocked };
        Self {
            path: path.to_path_buf(),
            handler,
            encrypted,
            state: AtomicU8::new(initial as u8),
            password: OnceLock::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> &'static str {
        self.handler.format_tag()
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    pub fn unlock_state(&self) -> UnlockState {
        UnlockState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlock_state() == UnlockState::Unlocked
    }

    /// Password that unlocked the archive, if any
    pub fn password(&self) -> Option<&Candidate> {
        self.password.get()
    }

    pub fn info(&self) -> ArchiveInfo {
        ArchiveInfo {
            path: self.path.clone(),
            format: self.format().to_string(),
            encrypted: self.encrypted,
        }
    }

    /// Open a checker owned by a single worker
    pub fn probe(&self) -> Result<Box<dyn PasswordProbe>, UnpickError> {
        self.handler.probe(&self.path)
    }

    /// Fully test one candidate without a time limit; does not change the unlock state
    pub fn try_password(&self, candidate: &Candidate, cancel: &CancelToken) -> Result<Verdict, UnpickError> {
        let mut probe = self.probe()?;
        probe.check(candidate, Instant::now() + Duration::from_secs(24 * 60 * 60), cancel)
    }

    /// Record `candidate` as the unlocking password
    ///
    /// Returns `true` for the single caller that performed the transition;
    /// every other caller (racing or late) gets `false` and must discard its result.
    pub fn commit_unlock(&self, candidate: &Candidate) -> bool {
        if self
            .state
            .compare_exchange(
                UnlockState::Locked as u8,
                UnlockState::Unlocking as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return false;
        }
        let _ = self.password.set(candidate.clone());
        self.state.store(UnlockState::Unlocked as u8, Ordering::Release);
        true
    }

    /// Mark a locked handle as unusable
    pub fn mark_failed(&self) {
        let _ = self.state.compare_exchange(
            UnlockState::Locked as u8,
            UnlockState::Failed as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Extract into `dest_dir` through a staging directory
    ///
    /// Nothing appears under `dest_dir` unless every entry was written;
    /// cancellation or failure removes the staged files.
    pub fn extract(&self, dest_dir: &Path, cancel: &CancelToken) -> Result<ExtractStatus, UnpickError> {
        if !self.is_unlocked() {
            return Err(UnpickError::InvalidState {
                expected: "unlocked archive",
                actual: format!("{:?}", self.unlock_state()),
            });
        }

        let staging = Staging::new(dest_dir)?;
        let password = self.password().map(|c| c.as_bytes());
        let status = self.handler.extract(&self.path, password, staging.path(), cancel)?;

        match status {
            ExtractStatus::Completed(report) => {
                if cancel.is_cancelled() {
                    return Ok(ExtractStatus::Cancelled);
                }
                staging.promote()?;
                Ok(ExtractStatus::Completed(report))
            }
            ExtractStatus::Cancelled => Ok(ExtractStatus::Cancelled),
        }
    }
}

/// Registry of format handlers; resolves a path to a handler and opens handles
///
/// Workflow:
/// 1. Auto-detect archive type based on extension
/// 2. Confirm the signature and probe for encryption
/// 3. Return a handle the coordinator owns for the rest of the run
pub struct ArchiveRegistry {
    handlers: Vec<Arc<dyn ArchiveHandler>>,
}

impl ArchiveRegistry {
    /// Create a registry with all built-in handlers
    pub fn new() -> Self {
        let handlers: Vec<Arc<dyn ArchiveHandler>> = vec![
            Arc::new(ZipHandler::new()),
            Arc::new(SevenZHandler::new()),
        ];

        Self { handlers }
    }

    /// Add a handler; later registrations take precedence
    pub fn register(&mut self, handler: Arc<dyn ArchiveHandler>) {
        self.handlers.insert(0, handler);
    }

    fn get_handler(&self, archive_path: &Path) -> Result<Arc<dyn ArchiveHandler>, UnpickError> {
        for handler in &self.handlers {
            if handler.supports(archive_path) {
                return Ok(Arc::clone(handler));
            }
        }

        let ext = archive_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("unknown");

        Err(UnpickError::not_an_archive(
            archive_path,
            format!("unsupported archive format: .{}", ext),
        ))
    }

    /// Load an archive: `NotAnArchive` for unknown or malformed files,
    /// `Unreadable` when the file cannot be read at all
    pub fn open(&self, archive_path: &Path) -> Result<ArchiveHandle, UnpickError> {
        let metadata = fs::metadata(archive_path).map_err(|e| UnpickError::Unreadable {
            path: archive_path.to_path_buf(),
            source: e,
        })?;
        if !metadata.is_file() {
            return Err(UnpickError::not_an_archive(archive_path, "not a regular file"));
        }

        let handler = self.get_handler(archive_path)?;
        let encrypted = handler.inspect(archive_path)?;
        Ok(ArchiveHandle::new(archive_path, handler, encrypted))
    }

    /// Check if a file is a supported archive format
    pub fn is_supported(&self, path: &Path) -> bool {
        self.handlers.iter().any(|h| h.supports(path))
    }

    /// RAR needs the proprietary unrar library and is not handled.
    pub fn supported_extensions() -> Vec<&'static str> {
        vec!["zip", "7z"]
    }
}

impl Default for ArchiveRegistry {
    fn default() -> Self {
        Self::new()
    }
}
