// Archive handler trait for different compression formats

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use std::time::Instant;
use crate::core::cancel::CancelToken;
use crate::core::candidates::Candidate;
use crate::models::UnpickError;

/// Size of one extraction copy step; cancellation is checked between steps
pub const COPY_CHUNK: usize = 64 * 1024;

/// Result of testing one candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Unlocked,
    WrongPassword,
    /// The attempt ran past its deadline; counted as a miss
    TimedOut,
}

/// Totals for a finished extraction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractReport {
    pub files: usize,
    pub bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractStatus {
    Completed(ExtractReport),
    Cancelled,
}

/// Per-worker password checker bound to one archive
///
/// Each worker owns its probe, so attempts run concurrently without sharing
/// reader state. A check has two stages: `try_password` is the bounded
/// header check, `confirm` the full integrity check for candidates that pass it.
pub trait PasswordProbe: Send {
    /// Quick check of a candidate, giving up once `deadline` has passed
    ///
    /// `Unlocked` here only means the candidate was not ruled out.
    /// `Err(Corrupt)` reports a damaged entry and is not fatal for the caller;
    /// any other error means the archive itself can no longer be read.
    fn try_password(&mut self, candidate: &Candidate, deadline: Instant) -> Result<Verdict, UnpickError>;

    /// Full check of a candidate that passed `try_password`
    ///
    /// Not bound by the attempt deadline. Gives up with `WrongPassword` once
    /// `cancel` fires, so callers check the token before trusting a miss.
    fn confirm(&mut self, _candidate: &Candidate, _cancel: &CancelToken) -> Result<Verdict, UnpickError> {
        Ok(Verdict::Unlocked)
    }

    /// Both stages: `Unlocked` only when the candidate survives the full check
    fn check(&mut self, candidate: &Candidate, deadline: Instant, cancel: &CancelToken) -> Result<Verdict, UnpickError> {
        match self.try_password(candidate, deadline)? {
            Verdict::Unlocked => self.confirm(candidate, cancel),
            other => Ok(other),
        }
    }
}

/// Trait for handling different archive formats
pub trait ArchiveHandler: Send + Sync {
    /// Short format tag ("zip", "7z")
    fn format_tag(&self) -> &'static str;

    /// Check if this handler supports the given file
    fn supports(&self, archive_path: &Path) -> bool;

    /// Validate the container and report whether a password is needed
    fn inspect(&self, archive_path: &Path) -> Result<bool, UnpickError>;

    /// Open a password checker for one worker
    fn probe(&self, archive_path: &Path) -> Result<Box<dyn PasswordProbe>, UnpickError>;

    /// Extract every entry into `dest_dir`, stopping between chunks when cancelled
    fn extract(
        &self,
        archive_path: &Path,
        password: Option<&[u8]>,
        dest_dir: &Path,
        cancel: &CancelToken,
    ) -> Result<ExtractStatus, UnpickError>;
}

/// Check extension against a list, ignoring case
pub fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.iter().any(|x| e.eq_ignore_ascii_case(x)))
        .unwrap_or(false)
}

/// Confirm the file starts with one of the given signatures
pub fn check_magic(path: &Path, signatures: &[&[u8]], format: &str) -> Result<(), UnpickError> {
    let mut file = File::open(path).map_err(|e| UnpickError::Unreadable {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut head = [0u8; 8];
    let mut filled = 0;
    while filled < head.len() {
        match file.read(&mut head[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) => {
                return Err(UnpickError::Unreadable {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        }
    }

    if signatures.iter().any(|sig| head[..filled].starts_with(sig)) {
        Ok(())
    } else {
        Err(UnpickError::not_an_archive(path, format!("missing {} signature", format)))
    }
}

/// Copy `reader` into a new file at `out_path` one chunk at a time
///
/// Returns `None` when cancelled part-way; the caller discards the staging
/// directory, so the partial file never reaches the output directory.
pub fn copy_chunked<R: Read + ?Sized>(
    reader: &mut R,
    out_path: &Path,
    entry_name: &str,
    archive_path: &Path,
    cancel: &CancelToken,
) -> Result<Option<u64>, UnpickError> {
    let mut output = File::create(out_path)
        .map_err(|e| UnpickError::from_write(out_path, "creating", e))?;

    let mut buf = vec![0u8; COPY_CHUNK];
    let mut written = 0u64;
    loop {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        let n = reader.read(&mut buf).map_err(|e| {
            UnpickError::corrupt(archive_path, format!("failed to read entry {}: {}", entry_name, e))
        })?;
        if n == 0 {
            break;
        }
        output
            .write_all(&buf[..n])
            .map_err(|e| UnpickError::from_write(out_path, "writing", e))?;
        written += n as u64;
    }

    output
        .flush()
        .map_err(|e| UnpickError::from_write(out_path, "writing", e))?;
    Ok(Some(written))
}

/// Read an entry to the end so its CRC or MAC gets checked
///
/// A read error or a short entry means the key was wrong. Stops with
/// `WrongPassword` when cancelled.
pub fn read_to_check<R: Read + ?Sized>(
    reader: &mut R,
    expected_len: u64,
    buf: &mut [u8],
    cancel: &CancelToken,
) -> Verdict {
    let mut total = 0u64;
    loop {
        if cancel.is_cancelled() {
            return Verdict::WrongPassword;
        }
        match reader.read(buf) {
            Ok(0) if total == expected_len => return Verdict::Unlocked,
            Ok(0) => return Verdict::WrongPassword,
            Ok(n) => total += n as u64,
            Err(_) => return Verdict::WrongPassword,
        }
    }
}

/// Reduce an entry name to a relative path that stays inside the destination
pub fn sanitize_entry_name(name: &str) -> Option<PathBuf> {
    let normalized = name.replace('\\', "/");
    let mut out = PathBuf::new();
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}
