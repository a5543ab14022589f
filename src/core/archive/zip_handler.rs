use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Instant;
use zip::result::ZipError;
use zip::ZipArchive;
use crate::core::archive::common::{
    check_magic, copy_chunked, has_extension, read_to_check, ArchiveHandler, ExtractReport,
    ExtractStatus, PasswordProbe, Verdict,
};
use crate::core::cancel::CancelToken;
use crate::core::candidates::Candidate;
use crate::models::UnpickError;

const ZIP_SIGNATURES: &[&[u8]] = &[b"PK\x03\x04", b"PK\x05\x06", b"PK\x07\x08"];

/// ZIP archive handler
///
/// Handles ZipCrypto and WinZip AES entries. Password checks run against the
/// smallest encrypted entry: a bounded header check first, then a full
/// decrypt so the CRC (or AES authentication code) confirms the match.
pub struct ZipHandler;

impl ZipHandler {
    pub fn new() -> Self {
        Self
    }

    fn open(archive_path: &Path) -> Result<ZipArchive<File>, UnpickError> {
        let file = File::open(archive_path).map_err(|e| UnpickError::Unreadable {
            path: archive_path.to_path_buf(),
            source: e,
        })?;

        ZipArchive::new(file).map_err(|e| match e {
            ZipError::Io(source) => UnpickError::Unreadable {
                path: archive_path.to_path_buf(),
                source,
            },
            other => UnpickError::not_an_archive(
                archive_path,
                format!("failed to read ZIP directory: {}", other),
            ),
        })
    }
}

impl ArchiveHandler for ZipHandler {
    fn format_tag(&self) -> &'static str {
        "zip"
    }

    /// Returns true for ZIP files (.zip, case-insensitive)
    fn supports(&self, archive_path: &Path) -> bool {
        has_extension(archive_path, &["zip"])
    }

    fn inspect(&self, archive_path: &Path) -> Result<bool, UnpickError> {
        check_magic(archive_path, ZIP_SIGNATURES, "ZIP")?;
        let mut archive = Self::open(archive_path)?;

        for i in 0..archive.len() {
            let entry = archive.by_index_raw(i).map_err(|e| {
                UnpickError::not_an_archive(archive_path, format!("failed to read entry {}: {}", i, e))
            })?;
            if entry.encrypted() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn probe(&self, archive_path: &Path) -> Result<Box<dyn PasswordProbe>, UnpickError> {
        let mut archive = Self::open(archive_path)?;

        // Smallest non-empty encrypted file is the cheapest full verification.
        // An empty entry has no CRC to catch a ZipCrypto check-byte collision,
        // so it is used only when nothing else is encrypted.
        let mut target: Option<(usize, bool, u64)> = None;
        for i in 0..archive.len() {
            let entry = archive
                .by_index_raw(i)
                .map_err(|e| UnpickError::corrupt(archive_path, e.to_string()))?;
            if !entry.encrypted() || entry.is_dir() {
                continue;
            }
            let key = (entry.size() == 0, entry.compressed_size());
            if target.map(|(_, empty, size)| key < (empty, size)).unwrap_or(true) {
                target = Some((i, key.0, key.1));
            }
        }

        Ok(Box::new(ZipProbe {
            path: archive_path.to_path_buf(),
            archive,
            target: target.map(|(i, _, _)| i),
            buf: vec![0u8; 16 * 1024],
        }))
    }

    /// Extract ZIP archive to destination directory
    ///
    /// # Behavior
    /// - Preserves directory hierarchy
    /// - Skips entries whose names would escape `dest_dir`
    /// - Sets file permissions on Unix systems
    fn extract(
        &self,
        archive_path: &Path,
        password: Option<&[u8]>,
        dest_dir: &Path,
        cancel: &CancelToken,
    ) -> Result<ExtractStatus, UnpickError> {
        let mut archive = Self::open(archive_path)?;
        let mut report = ExtractReport::default();

        for i in 0..archive.len() {
            if cancel.is_cancelled() {
                return Ok(ExtractStatus::Cancelled);
            }

            let encrypted = archive
                .by_index_raw(i)
                .map(|entry| entry.encrypted())
                .map_err(|e| UnpickError::corrupt(archive_path, format!("entry {}: {}", i, e)))?;

            let entry = match (encrypted, password) {
                (true, Some(pw)) => archive.by_index_decrypt(i, pw),
                _ => archive.by_index(i),
            };
            let mut file = entry.map_err(|e| {
                UnpickError::corrupt(archive_path, format!("failed to open entry {}: {}", i, e))
            })?;

            let relative: PathBuf = match file.enclosed_name() {
                Some(path) => path.to_owned(),
                None => continue, // Skip files with invalid names
            };
            let output_path = dest_dir.join(&relative);

            if file.is_dir() {
                fs::create_dir_all(&output_path)
                    .map_err(|e| UnpickError::from_write(&output_path, "creating directory", e))?;
                continue;
            }

            if let Some(parent) = output_path.parent() {
                fs::create_dir_all(parent)
                    .map_err(|e| UnpickError::from_write(parent, "creating directory", e))?;
            }

            let name = relative.display().to_string();
            let written = match copy_chunked(&mut file, &output_path, &name, archive_path, cancel)? {
                Some(n) => n,
                None => return Ok(ExtractStatus::Cancelled),
            };
            report.files += 1;
            report.bytes += written;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Some(mode) = file.unix_mode() {
                    // Keep the owner able to read/write what was extracted
                    let mode = (mode & 0o777) | 0o600;
                    fs::set_permissions(&output_path, fs::Permissions::from_mode(mode))
                        .map_err(|e| UnpickError::from_write(&output_path, "setting permissions on", e))?;
                }
            }
        }

        Ok(ExtractStatus::Completed(report))
    }
}

impl Default for ZipHandler {
    fn default() -> Self {
        Self::new()
    }
}

struct ZipProbe {
    path: PathBuf,
    archive: ZipArchive<File>,
    target: Option<usize>,
    buf: Vec<u8>,
}

impl PasswordProbe for ZipProbe {
    fn try_password(&mut self, candidate: &Candidate, deadline: Instant) -> Result<Verdict, UnpickError> {
        if Instant::now() >= deadline {
            return Ok(Verdict::TimedOut);
        }
        let index = match self.target {
            Some(index) => index,
            None => return Ok(Verdict::Unlocked),
        };

        let mut file = match self.archive.by_index_decrypt(index, candidate.as_bytes()) {
            Ok(file) => file,
            Err(ZipError::InvalidPassword) => return Ok(Verdict::WrongPassword),
            Err(e) => return Err(UnpickError::corrupt(&self.path, e.to_string())),
        };

        // A wrong key usually breaks the deflate stream within the first chunk
        match file.read(&mut self.buf) {
            Ok(_) => Ok(Verdict::Unlocked),
            Err(_) => Ok(Verdict::WrongPassword),
        }
    }

    /// ZipCrypto's check byte passes 1 in 256 wrong passwords; reading the
    /// entry to the end runs the CRC / HMAC check that settles it
    fn confirm(&mut self, candidate: &Candidate, cancel: &CancelToken) -> Result<Verdict, UnpickError> {
        let index = match self.target {
            Some(index) => index,
            None => return Ok(Verdict::Unlocked),
        };

        let mut file = match self.archive.by_index_decrypt(index, candidate.as_bytes()) {
            Ok(file) => file,
            Err(ZipError::InvalidPassword) => return Ok(Verdict::WrongPassword),
            Err(e) => return Err(UnpickError::corrupt(&self.path, e.to_string())),
        };
        let expected_len = file.size();
        Ok(read_to_check(&mut file, expected_len, &mut self.buf, cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::TempDir;
    use zip::unstable::write::FileOptionsExt;
    use zip::write::SimpleFileOptions;
    use zip::{CompressionMethod, ZipWriter};

    fn write_zip(path: &Path, password: Option<&str>, files: &[(&str, &[u8])]) {
        let mut zip = ZipWriter::new(File::create(path).unwrap());
        for (name, data) in files {
            let mut opts = SimpleFileOptions::default();
            if let Some(pw) = password {
                opts = opts.with_deprecated_encryption(pw.as_bytes());
            }
            zip.start_file(*name, opts).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(30)
    }

    #[test]
    fn test_supports() {
        let handler = ZipHandler::new();
        assert!(handler.supports(Path::new("archive.zip")));
        assert!(handler.supports(Path::new("ARCHIVE.ZIP")));
        assert!(!handler.supports(Path::new("archive.7z")));
        assert!(!handler.supports(Path::new("archive.rar")));
        assert!(!handler.supports(Path::new("noextension")));
    }

    #[test]
    fn test_inspect_reports_encryption() {
        let temp = TempDir::new().unwrap();
        let plain = temp.path().join("plain.zip");
        let locked = temp.path().join("locked.zip");
        write_zip(&plain, None, &[("a.txt", b"hello")]);
        write_zip(&locked, Some("s3cret"), &[("a.txt", b"hello")]);

        let handler = ZipHandler::new();
        assert!(!handler.inspect(&plain).unwrap());
        assert!(handler.inspect(&locked).unwrap());
    }

    #[test]
    fn test_inspect_rejects_non_zip() {
        let temp = TempDir::new().unwrap();
        let fake = temp.path().join("fake.zip");
        fs::write(&fake, b"this is not a zip file").unwrap();

        let result = ZipHandler::new().inspect(&fake);
        assert!(matches!(result, Err(UnpickError::NotAnArchive { .. })));
    }

    #[test]
    fn test_probe_accepts_only_the_right_password() {
        let temp = TempDir::new().unwrap();
        let locked = temp.path().join("locked.zip");
        write_zip(
            &locked,
            Some("s3cret"),
            &[("big.txt", &[b'x'; 4096]), ("small.txt", b"tiny")],
        );

        let cancel = CancelToken::new();
        let mut probe = ZipHandler::new().probe(&locked).unwrap();
        for wrong in ["", "secret", "s3cret ", "S3CRET", "123456"] {
            let verdict = probe
                .check(&Candidate::manual(wrong), far_deadline(), &cancel)
                .unwrap();
            assert_eq!(verdict, Verdict::WrongPassword, "accepted {:?}", wrong);
        }
        let verdict = probe
            .check(&Candidate::manual("s3cret"), far_deadline(), &cancel)
            .unwrap();
        assert_eq!(verdict, Verdict::Unlocked);
    }

    #[test]
    fn test_empty_entry_is_not_the_check_target() {
        let temp = TempDir::new().unwrap();
        let mixed = temp.path().join("mixed.zip");
        write_zip(
            &mixed,
            Some("realpass"),
            &[("empty.txt", b""), ("data.txt", b"payload that has a crc")],
        );

        // Enough wrong keys that some pass the ZipCrypto check byte
        let cancel = CancelToken::new();
        let mut probe = ZipHandler::new().probe(&mixed).unwrap();
        for i in 0..3000 {
            let wrong = Candidate::manual(&format!("wrong{}", i));
            let verdict = probe.check(&wrong, far_deadline(), &cancel).unwrap();
            assert_eq!(verdict, Verdict::WrongPassword, "accepted {:?}", wrong.as_str());
        }
        let verdict = probe
            .check(&Candidate::manual("realpass"), far_deadline(), &cancel)
            .unwrap();
        assert_eq!(verdict, Verdict::Unlocked);
    }

    #[test]
    fn test_quick_check_does_not_decode_whole_entry() {
        let temp = TempDir::new().unwrap();
        let large = temp.path().join("large.zip");
        let mut zip = ZipWriter::new(File::create(&large).unwrap());
        let opts = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Stored)
            .with_deprecated_encryption(b"right");
        zip.start_file("blob.bin", opts).unwrap();
        let block = vec![0x5Au8; 1024 * 1024];
        for _ in 0..32 {
            zip.write_all(&block).unwrap();
        }
        zip.finish().unwrap();

        let mut probe = ZipHandler::new().probe(&large).unwrap();
        let right = Candidate::manual("right");
        let verdict = probe
            .try_password(&right, Instant::now() + Duration::from_millis(500))
            .unwrap();
        assert_eq!(verdict, Verdict::Unlocked);
        assert_eq!(probe.confirm(&right, &CancelToken::new()).unwrap(), Verdict::Unlocked);

        let cancel = CancelToken::new();
        cancel.cancel();
        assert_eq!(probe.confirm(&right, &cancel).unwrap(), Verdict::WrongPassword);
    }

    #[test]
    fn test_probe_times_out_past_deadline() {
        let temp = TempDir::new().unwrap();
        let locked = temp.path().join("locked.zip");
        write_zip(&locked, Some("pw"), &[("a.txt", b"hello")]);

        let mut probe = ZipHandler::new().probe(&locked).unwrap();
        let verdict = probe
            .try_password(&Candidate::manual("pw"), Instant::now() - Duration::from_millis(1))
            .unwrap();
        assert_eq!(verdict, Verdict::TimedOut);
    }

    #[test]
    fn test_extract_with_password_preserves_hierarchy() {
        let temp = TempDir::new().unwrap();
        let locked = temp.path().join("locked.zip");
        let dest = temp.path().join("out");
        write_zip(
            &locked,
            Some("pw"),
            &[("a/b/c/deep.txt", b"deep file"), ("top.txt", b"top")],
        );

        let status = ZipHandler::new()
            .extract(&locked, Some(b"pw"), &dest, &CancelToken::new())
            .unwrap();

        assert_eq!(status, ExtractStatus::Completed(ExtractReport { files: 2, bytes: 12 }));
        assert_eq!(fs::read_to_string(dest.join("a/b/c/deep.txt")).unwrap(), "deep file");
        assert_eq!(fs::read_to_string(dest.join("top.txt")).unwrap(), "top");
    }

    #[test]
    fn test_extract_stops_when_cancelled() {
        let temp = TempDir::new().unwrap();
        let plain = temp.path().join("plain.zip");
        write_zip(&plain, None, &[("a.txt", b"a"), ("b.txt", b"b")]);

        let cancel = CancelToken::new();
        cancel.cancel();
        let status = ZipHandler::new()
            .extract(&plain, None, &temp.path().join("out"), &cancel)
            .unwrap();
        assert_eq!(status, ExtractStatus::Cancelled);
    }

    #[test]
    fn test_extract_nonexistent_archive() {
        let temp = TempDir::new().unwrap();
        let result = ZipHandler::new().extract(
            Path::new("/nonexistent.zip"),
            None,
            temp.path(),
            &CancelToken::new(),
        );
        assert!(matches!(result, Err(UnpickError::Unreadable { .. })));
    }
}
