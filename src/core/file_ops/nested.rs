use std::path::{Path, PathBuf};
use std::time::Instant;
use walkdir::WalkDir;
use crate::core::archive::common::{ExtractStatus, Verdict};
use crate::core::archive::{ArchiveHandle, ArchiveRegistry};
use crate::core::cancel::CancelToken;
use crate::core::candidates::{Candidate, WordListSource};
use crate::core::guess::{GuessPool, PoolOutcome};
use crate::models::{PerformanceProfile, UnpickError};
use crate::utils::events::EventSink;

/// Prefix of directories nested archives are extracted into
pub const EXTRACTED_PREFIX: &str = "extracted_";
const STAGING_PREFIX: &str = ".unpick-staging-";

/// What a nested scan did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NestedReport {
    pub extracted: Vec<PathBuf>,
    /// Archives that could not be unlocked or read
    pub skipped: Vec<PathBuf>,
    pub cancelled: bool,
}

/// Follows archives found inside an extraction output
///
/// Each nested archive is tried without a password, then with the word
/// list, and extracted into `extracted_<stem>` beside it. Nothing here ever
/// asks for a manual password; archives that stay locked are reported.
pub struct NestedScan<'a> {
    registry: &'a ArchiveRegistry,
    profile: &'a PerformanceProfile,
    word_list: Option<&'a Path>,
    exclude: Option<&'a Path>,
    sink: &'a EventSink,
    cancel: &'a CancelToken,
    max_depth: usize,
}

impl<'a> NestedScan<'a> {
    pub fn new(
        registry: &'a ArchiveRegistry,
        profile: &'a PerformanceProfile,
        sink: &'a EventSink,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            registry,
            profile,
            word_list: None,
            exclude: None,
            sink,
            cancel,
            max_depth: 1,
        }
    }

    pub fn word_list(mut self, word_list: Option<&'a Path>) -> Self {
        self.word_list = word_list;
        self
    }

    /// Never reopen this archive, typically the one that produced the output
    pub fn exclude(mut self, archive: &'a Path) -> Self {
        self.exclude = Some(archive);
        self
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn run(&self, root: &Path) -> NestedReport {
        let mut report = NestedReport::default();
        if self.max_depth > 0 {
            self.scan(root, 1, &mut report);
        }
        report
    }

    /// Supported archives under `dir`, sorted, ignoring staging leftovers
    pub fn find_archives(&self, dir: &Path) -> Vec<PathBuf> {
        let mut archives: Vec<PathBuf> = WalkDir::new(dir)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| !entry.file_name().to_string_lossy().starts_with(STAGING_PREFIX))
            .filter_map(|e| e.ok())
            .filter(|entry| entry.file_type().is_file() && self.registry.is_supported(entry.path()))
            .map(|entry| entry.into_path())
            .filter(|path| self.exclude != Some(path.as_path()))
            .collect();
        archives.sort();
        archives
    }

    fn scan(&self, dir: &Path, depth: usize, report: &mut NestedReport) {
        for archive in self.find_archives(dir) {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                return;
            }

            match self.process(&archive) {
                Ok(Some(dest)) => {
                    report.extracted.push(archive);
                    if depth < self.max_depth {
                        self.scan(&dest, depth + 1, report);
                    }
                }
                Ok(None) if self.cancel.is_cancelled() => {
                    report.cancelled = true;
                    return;
                }
                Ok(None) => report.skipped.push(archive),
                Err(e) => {
                    tracing::warn!(archive = %archive.display(), "nested archive failed: {}", e);
                    self.sink.log(format!("Skipping nested archive {}: {}", archive.display(), e));
                    report.skipped.push(archive);
                }
            }
        }
    }

    /// Unlock and extract one archive; `Ok(None)` when it stays locked or the scan was cancelled
    fn process(&self, archive: &Path) -> Result<Option<PathBuf>, UnpickError> {
        self.sink.log(format!("Found nested archive: {}", archive.display()));
        let handle = self.registry.open(archive)?;

        if handle.is_encrypted() && !self.unlock(&handle)? {
            if !self.cancel.is_cancelled() {
                self.sink.log(format!(
                    "Nested archive {} needs manual handling: no password matched",
                    archive.display()
                ));
            }
            return Ok(None);
        }

        let dest = extracted_dir(archive);
        match handle.extract(&dest, self.cancel)? {
            ExtractStatus::Completed(report) => {
                self.sink.log(format!(
                    "Extracted nested archive {} ({} files) to {}",
                    archive.display(),
                    report.files,
                    dest.display()
                ));
                Ok(Some(dest))
            }
            ExtractStatus::Cancelled => Ok(None),
        }
    }

    fn unlock(&self, handle: &ArchiveHandle) -> Result<bool, UnpickError> {
        let empty = Candidate::manual("");
        let mut probe = handle.probe()?;
        match probe.check(&empty, Instant::now() + self.profile.attempt_timeout, self.cancel) {
            Ok(Verdict::Unlocked) => return Ok(handle.commit_unlock(&empty) || handle.is_unlocked()),
            Ok(_) | Err(UnpickError::Corrupt { .. }) => {}
            Err(e) => return Err(e),
        }

        let list = match self.word_list {
            Some(list) => list,
            None => return Ok(false),
        };
        let source = WordListSource::open(list)?;
        let report = GuessPool::new(self.profile.clone()).run(handle, Box::new(source), self.cancel, self.sink)?;
        match report.outcome {
            PoolOutcome::Unlocked(_) => Ok(true),
            PoolOutcome::Corrupt(reason) => Err(UnpickError::corrupt(handle.path(), reason)),
            PoolOutcome::Exhausted | PoolOutcome::Cancelled => Ok(false),
        }
    }
}

/// `<dir>/extracted_<stem>` for an archive at `<dir>/<stem>.<ext>`
pub fn extracted_dir(archive: &Path) -> PathBuf {
    let stem = archive
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_string());
    let parent = archive.parent().unwrap_or_else(|| Path::new("."));
    parent.join(format!("{}{}", EXTRACTED_PREFIX, stem))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::TempDir;
    use zip::unstable::write::FileOptionsExt;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;
    use crate::core::fixtures::EventCollector;
    use crate::utils::events;

    fn zip_bytes(files: &[(&str, &[u8])], password: Option<&str>) -> Vec<u8> {
        let mut zip = ZipWriter::new(std::io::Cursor::new(Vec::new()));
        for (name, data) in files {
            let mut opts = SimpleFileOptions::default();
            if let Some(pw) = password {
                opts = opts.with_deprecated_encryption(pw.as_bytes());
            }
            zip.start_file(*name, opts).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    fn profile() -> PerformanceProfile {
        PerformanceProfile::custom("test", 2, Duration::from_secs(5))
    }

    #[test]
    fn test_extracted_dir_naming() {
        assert_eq!(
            extracted_dir(Path::new("/out/docs/inner.zip")),
            PathBuf::from("/out/docs/extracted_inner")
        );
    }

    #[test]
    fn test_follows_plain_and_listed_archives_recursively() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("out");
        fs::create_dir_all(root.join("sub")).unwrap();

        let deepest = zip_bytes(&[("deep.txt", b"deep")], None);
        let middle = zip_bytes(&[("deeper.zip", &deepest)], Some("letmein"));
        fs::write(root.join("sub/middle.zip"), middle).unwrap();
        fs::write(root.join("notes.txt"), b"not an archive").unwrap();

        let list = temp.path().join("list.txt");
        fs::write(&list, "nope\nletmein\n").unwrap();

        let registry = ArchiveRegistry::new();
        let profile = profile();
        let (sink, stream) = events::channel(64);
        let _collector = EventCollector::spawn(stream);
        let cancel = CancelToken::new();

        let report = NestedScan::new(&registry, &profile, &sink, &cancel)
            .word_list(Some(&list))
            .max_depth(4)
            .run(&root);

        assert_eq!(report.extracted.len(), 2);
        assert!(report.skipped.is_empty());
        assert_eq!(
            fs::read_to_string(root.join("sub/extracted_middle/extracted_deeper/deep.txt")).unwrap(),
            "deep"
        );
    }

    #[test]
    fn test_locked_archive_is_reported_not_prompted() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("out");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("locked.zip"), zip_bytes(&[("a.txt", b"a")], Some("secret"))).unwrap();

        let registry = ArchiveRegistry::new();
        let profile = profile();
        let (sink, stream) = events::channel(64);
        let collector = EventCollector::spawn(stream);
        let cancel = CancelToken::new();

        let report = NestedScan::new(&registry, &profile, &sink, &cancel)
            .max_depth(2)
            .run(&root);
        drop(sink);

        assert_eq!(report.skipped, vec![root.join("locked.zip")]);
        assert!(!root.join("extracted_locked").exists());
        let prompts_before = collector.prompts();
        let logs = collector.finish();
        assert_eq!(prompts_before, 0);
        assert!(logs.iter().any(|l| l.contains("needs manual handling")));
    }

    #[test]
    fn test_depth_zero_disables_scan() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("inner.zip"), zip_bytes(&[("a.txt", b"a")], None)).unwrap();

        let registry = ArchiveRegistry::new();
        let profile = profile();
        let (sink, _stream) = events::channel(64);
        let cancel = CancelToken::new();

        let report = NestedScan::new(&registry, &profile, &sink, &cancel)
            .max_depth(0)
            .run(temp.path());
        assert_eq!(report, NestedReport::default());
        assert!(!temp.path().join("extracted_inner").exists());
    }

    #[test]
    fn test_staging_leftovers_are_ignored() {
        let temp = TempDir::new().unwrap();
        let staged = temp.path().join(".unpick-staging-abc");
        fs::create_dir_all(&staged).unwrap();
        fs::write(staged.join("inner.zip"), zip_bytes(&[("a.txt", b"a")], None)).unwrap();

        let registry = ArchiveRegistry::new();
        let profile = profile();
        let (sink, _stream) = events::channel(64);
        let cancel = CancelToken::new();

        let scan = NestedScan::new(&registry, &profile, &sink, &cancel);
        assert!(scan.find_archives(temp.path()).is_empty());
    }
}
