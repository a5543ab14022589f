use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Instant;
use sevenz_rust::{Archive, BlockDecoder, Password, SevenZArchiveEntry, SevenZReader};
use crate::core::archive::common::{
    check_magic, copy_chunked, has_extension, read_to_check, sanitize_entry_name, ArchiveHandler,
    ExtractReport, ExtractStatus, PasswordProbe, Verdict,
};
use crate::core::cancel::CancelToken;
use crate::core::candidates::Candidate;
use crate::models::UnpickError;

const SEVENZ_SIGNATURE: &[u8] = b"7z\xBC\xAF\x27\x1C";
/// 7zAES coder method id prefix
const AES_METHOD_ID: [u8; 4] = [0x06, 0xF1, 0x07, 0x01];

/// 7z archive handler
///
/// Handles extraction of 7z archives using sevenz-rust, including AES-256
/// encrypted content and encrypted headers.
pub struct SevenZHandler;

impl SevenZHandler {
    pub fn new() -> Self {
        Self
    }

    fn open_file(archive_path: &Path) -> Result<(File, u64), UnpickError> {
        let file = File::open(archive_path).map_err(|e| UnpickError::Unreadable {
            path: archive_path.to_path_buf(),
            source: e,
        })?;
        let len = file
            .metadata()
            .map_err(|e| UnpickError::Unreadable {
                path: archive_path.to_path_buf(),
                source: e,
            })?
            .len();
        Ok((file, len))
    }
}

fn is_password_error(err: &sevenz_rust::Error) -> bool {
    if matches!(err, sevenz_rust::Error::MaybeBadPassword(_)) {
        return true;
    }
    let text = format!("{:?}", err).to_ascii_lowercase();
    text.contains("password") || text.contains("encrypted")
}

fn is_checksum_error(err: &sevenz_rust::Error) -> bool {
    let text = format!("{:?}", err).to_ascii_lowercase();
    text.contains("checksum") || text.contains("crc")
}

impl ArchiveHandler for SevenZHandler {
    fn format_tag(&self) -> &'static str {
        "7z"
    }

    /// Returns true for files with .7z extension (case-insensitive)
    fn supports(&self, archive_path: &Path) -> bool {
        has_extension(archive_path, &["7z"])
    }

    fn inspect(&self, archive_path: &Path) -> Result<bool, UnpickError> {
        check_magic(archive_path, &[SEVENZ_SIGNATURE], "7z")?;
        let (file, len) = Self::open_file(archive_path)?;

        match SevenZReader::new(file, len, Password::empty()) {
            Ok(reader) => {
                let encrypted = reader.archive().folders.iter().any(|folder| {
                    folder
                        .coders
                        .iter()
                        .any(|coder| coder.decompression_method_id().starts_with(&AES_METHOD_ID))
                });
                Ok(encrypted)
            }
            // Header itself is encrypted
            Err(e) if is_password_error(&e) => Ok(true),
            Err(e) => Err(UnpickError::not_an_archive(
                archive_path,
                format!("failed to read 7z header: {}", e),
            )),
        }
    }

    fn probe(&self, archive_path: &Path) -> Result<Box<dyn PasswordProbe>, UnpickError> {
        let (_, len) = Self::open_file(archive_path)?;
        Ok(Box::new(SevenZProbe {
            path: archive_path.to_path_buf(),
            len,
        }))
    }

    /// Extract 7z archive to destination directory
    ///
    /// # Behavior
    /// - Preserves directory hierarchy
    /// - Creates parent directories as needed
    /// - Entries with absolute or `..` names are skipped
    fn extract(
        &self,
        archive_path: &Path,
        password: Option<&[u8]>,
        dest_dir: &Path,
        cancel: &CancelToken,
    ) -> Result<ExtractStatus, UnpickError> {
        let (file, len) = Self::open_file(archive_path)?;
        let password = match password {
            Some(pw) => Password::from(&*String::from_utf8_lossy(pw)),
            None => Password::empty(),
        };

        let mut reader = SevenZReader::new(file, len, password).map_err(|e| {
            UnpickError::corrupt(archive_path, format!("failed to read 7z archive: {}", e))
        })?;

        let mut report = ExtractReport::default();
        let mut failure: Option<UnpickError> = None;
        let mut cancelled = false;

        let result = reader.for_each_entries(|entry, entry_reader| {
            // A stop only ends the current folder; later folders still call in
            if cancelled || failure.is_some() {
                return Ok(false);
            }
            if cancel.is_cancelled() {
                cancelled = true;
                return Ok(false);
            }

            let relative = match sanitize_entry_name(entry.name()) {
                Some(path) => path,
                None => return Ok(true),
            };
            let output_path = dest_dir.join(&relative);

            if entry.is_directory() {
                if let Err(e) = fs::create_dir_all(&output_path) {
                    failure = Some(UnpickError::from_write(&output_path, "creating directory", e));
                    return Ok(false);
                }
                return Ok(true);
            }

            if let Some(parent) = output_path.parent() {
                if let Err(e) = fs::create_dir_all(parent) {
                    failure = Some(UnpickError::from_write(parent, "creating directory", e));
                    return Ok(false);
                }
            }

            match copy_chunked(entry_reader, &output_path, entry.name(), archive_path, cancel) {
                Ok(Some(written)) => {
                    report.files += 1;
                    report.bytes += written;
                    Ok(true)
                }
                Ok(None) => {
                    cancelled = true;
                    Ok(false)
                }
                Err(e) => {
                    failure = Some(e);
                    Ok(false)
                }
            }
        });

        if let Some(err) = failure {
            return Err(err);
        }
        if cancelled {
            return Ok(ExtractStatus::Cancelled);
        }
        result.map_err(|e| {
            UnpickError::corrupt(archive_path, format!("failed to extract 7z archive: {}", e))
        })?;

        Ok(ExtractStatus::Completed(report))
    }
}

impl Default for SevenZHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// Reopens the archive per attempt: with encrypted headers the password is
/// needed before the entry table can even be parsed
struct SevenZProbe {
    path: PathBuf,
    len: u64,
}

impl SevenZProbe {
    /// Parse the archive with `password`; `None` when the key garbles the header
    fn open(&self, password: &Password) -> Result<Option<(File, Archive)>, UnpickError> {
        let mut file = File::open(&self.path).map_err(|e| UnpickError::Unreadable {
            path: self.path.clone(),
            source: e,
        })?;
        match Archive::read(&mut file, self.len, password.as_slice()) {
            Ok(archive) => Ok(Some((file, archive))),
            Err(e) => {
                tracing::trace!(archive = %self.path.display(), "7z header rejected candidate: {}", e);
                Ok(None)
            }
        }
    }

    /// Run `check` on the first entry with data, decoding only its folder
    fn check_first_entry(
        &self,
        candidate: &Candidate,
        mut check: impl FnMut(&mut dyn Read, u64) -> Verdict,
    ) -> Result<Verdict, UnpickError> {
        let password = Password::from(&*candidate.as_str());
        let (mut file, archive) = match self.open(&password)? {
            Some(opened) => opened,
            None => return Ok(Verdict::WrongPassword),
        };

        let folder = archive
            .files
            .iter()
            .zip(&archive.stream_map.file_folder_index)
            .find_map(|(entry, folder)| if entry.has_stream && entry.size > 0 { *folder } else { None });
        let folder = match folder {
            Some(folder) => folder,
            None => return Ok(Verdict::Unlocked),
        };

        let mut verdict = None;
        let mut each = |entry: &SevenZArchiveEntry, reader: &mut dyn Read| -> Result<bool, sevenz_rust::Error> {
            if entry.is_directory() || entry.size == 0 {
                return Ok(true);
            }
            verdict = Some(check(reader, entry.size));
            Ok(false)
        };
        let result = BlockDecoder::new(folder, &archive, password.as_slice(), &mut file).for_each_entries(&mut each);

        match result {
            Ok(_) => Ok(verdict.unwrap_or(Verdict::Unlocked)),
            Err(e) if is_password_error(&e) || is_checksum_error(&e) => Ok(Verdict::WrongPassword),
            Err(e) => Err(UnpickError::corrupt(&self.path, e.to_string())),
        }
    }
}

impl PasswordProbe for SevenZProbe {
    fn try_password(&mut self, candidate: &Candidate, deadline: Instant) -> Result<Verdict, UnpickError> {
        if Instant::now() >= deadline {
            return Ok(Verdict::TimedOut);
        }
        let mut buf = vec![0u8; 16 * 1024];
        self.check_first_entry(candidate, |reader, _| match reader.read(&mut buf) {
            Ok(_) => Verdict::Unlocked,
            Err(_) => Verdict::WrongPassword,
        })
    }

    /// Decoding the first entry to the end verifies its CRC
    fn confirm(&mut self, candidate: &Candidate, cancel: &CancelToken) -> Result<Verdict, UnpickError> {
        let mut buf = vec![0u8; 16 * 1024];
        self.check_first_entry(candidate, |reader, size| read_to_check(reader, size, &mut buf, cancel))
    }
}
