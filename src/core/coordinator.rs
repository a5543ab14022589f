use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use crossbeam_channel::{unbounded, Receiver, Sender};
use crate::core::archive::common::{ExtractStatus, Verdict};
use crate::core::archive::{ArchiveHandle, ArchiveRegistry};
use crate::core::cancel::CancelToken;
use crate::core::candidates::{Candidate, CandidateSource, ChainSource, GeneratedSource, WordListSource};
use crate::core::file_ops::{password_book, NestedScan};
use crate::core::guess::{GuessPool, PoolOutcome};
use crate::models::{
    ArchiveInfo, CoordinatorOptions, JobOutcome, JobState, PerformanceProfile, UnpickError,
    VersionInfo, WordListInfo,
};
use crate::utils::events::{self, EngineEvent, EventSink, EventStream};

/// Extraction coordinator
///
/// Owns the selected archive, the uploaded word list and the output
/// directory, and drives one job at a time through
/// `ArchiveSelected -> Guessing -> AwaitingManualPassword -> Unlocking -> Extracting`
/// to a terminal state. Calls return immediately; progress is reported
/// through the [`EventStream`] returned by the constructor.
///
/// The stream must be drained on a thread that does not itself call into
/// the coordinator, since state changes wait for room in the channel.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Shared>,
}

struct Shared {
    registry: ArchiveRegistry,
    sink: EventSink,
    options: CoordinatorOptions,
    /// Serializes transitions so state events leave in transition order
    order: Mutex<()>,
    session: Mutex<Session>,
    changed: Condvar,
}

struct Session {
    state: JobState,
    handle: Option<Arc<ArchiveHandle>>,
    word_list: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    job: Option<ActiveJob>,
    next_job_id: u64,
    outcome: JobOutcome,
}

struct ActiveJob {
    id: u64,
    cancel: CancelToken,
    commands: Sender<JobCommand>,
    _thread: JoinHandle<()>,
}

enum JobCommand {
    ManualPassword(String),
    Cancel,
}

/// Events produced while the session lock is held, sent once it is released
#[derive(Default)]
struct Outbox(Vec<EngineEvent>);

impl Outbox {
    fn log(&mut self, message: impl Into<String>) {
        self.0.push(EngineEvent::Log(message.into()));
    }

    fn prompt(&mut self) {
        self.0.push(EngineEvent::NeedPassword);
    }
}

impl Session {
    fn set_state(&mut self, state: JobState, out: &mut Outbox) {
        if self.state == state {
            return;
        }
        tracing::info!(from = %self.state, to = %state, "state transition");
        self.outcome = match &state {
            JobState::Completed => JobOutcome::Succeeded,
            JobState::Cancelled => JobOutcome::Cancelled,
            JobState::Failed(reason) => JobOutcome::Failed(reason.clone()),
            JobState::ArchiveSelected => JobOutcome::Pending,
            _ => self.outcome.clone(),
        };
        self.state = state.clone();
        out.0.push(EngineEvent::StateChanged(state));
    }

    /// The job is still the current one and has not reached a terminal state
    fn owns(&self, job_id: u64) -> bool {
        self.job.as_ref().map(|job| job.id) == Some(job_id) && !self.state.is_terminal()
    }

    fn busy(&self) -> UnpickError {
        UnpickError::OperationInProgress {
            state: self.state.to_string(),
        }
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mutate the session, then publish what the change produced
    fn update<T>(&self, f: impl FnOnce(&mut Session, &mut Outbox) -> T) -> T {
        let _order = self.order.lock().unwrap_or_else(|e| e.into_inner());
        let mut out = Outbox::default();
        let result = {
            let mut session = self.lock();
            let result = f(&mut session, &mut out);
            self.changed.notify_all();
            result
        };
        for event in out.0 {
            self.sink.emit(event);
        }
        result
    }

    /// Move a live job to `state`; false once the job was cancelled or replaced
    fn advance(&self, job_id: u64, state: JobState, message: Option<String>) -> bool {
        self.update(|session, out| {
            if !session.owns(job_id) {
                return false;
            }
            if let Some(message) = message {
                out.log(message);
            }
            session.set_state(state, out);
            true
        })
    }

    fn finish(&self, job_id: u64, state: JobState, message: String) {
        self.update(|session, out| {
            if session.owns(job_id) {
                out.log(message);
                session.set_state(state, out);
            }
        });
    }

    fn fail(&self, job_id: u64, err: &UnpickError) {
        tracing::warn!(job_id, "job failed: {}", err);
        self.finish(job_id, JobState::Failed(err.to_string()), format!("Extraction failed: {}", err));
    }
}

impl Coordinator {
    /// Create a coordinator with the built-in ZIP and 7z handlers
    pub fn new(options: CoordinatorOptions) -> (Self, EventStream) {
        Self::with_registry(ArchiveRegistry::new(), options)
    }

    pub fn with_registry(registry: ArchiveRegistry, options: CoordinatorOptions) -> (Self, EventStream) {
        let (sink, stream) = events::channel(options.event_capacity);
        let shared = Shared {
            registry,
            sink,
            options,
            order: Mutex::new(()),
            session: Mutex::new(Session {
                state: JobState::Idle,
                handle: None,
                word_list: None,
                output_dir: None,
                job: None,
                next_job_id: 1,
                outcome: JobOutcome::Pending,
            }),
            changed: Condvar::new(),
        };
        (Self { inner: Arc::new(shared) }, stream)
    }

    pub fn state(&self) -> JobState {
        self.inner.lock().state.clone()
    }

    pub fn outcome(&self) -> JobOutcome {
        self.inner.lock().outcome.clone()
    }

    pub fn archive(&self) -> Option<ArchiveInfo> {
        self.inner.lock().handle.as_ref().map(|h| h.info())
    }

    pub fn word_list(&self) -> Option<PathBuf> {
        self.inner.lock().word_list.clone()
    }

    /// Output directory the next extraction writes to
    pub fn output_dir(&self) -> Option<PathBuf> {
        let session = self.inner.lock();
        match (&session.output_dir, &session.handle) {
            (Some(dir), _) => Some(dir.clone()),
            (None, Some(handle)) => Some(default_output_dir(handle.path())),
            (None, None) => None,
        }
    }

    /// Every log line produced so far, in order
    pub fn log_history(&self) -> Vec<String> {
        self.inner.sink.history()
    }

    pub fn version_info(&self) -> VersionInfo {
        VersionInfo::current()
    }

    /// Load an archive and make it the current selection
    pub fn select_archive(&self, path: &Path) -> Result<ArchiveInfo, UnpickError> {
        {
            let session = self.inner.lock();
            if !session.state.accepts_selection() {
                return Err(session.busy());
            }
        }

        let handle = match self.inner.registry.open(path) {
            Ok(handle) => Arc::new(handle),
            Err(e) => {
                self.inner.sink.log(format!("Cannot open {}: {}", path.display(), e));
                return Err(e);
            }
        };
        let info = handle.info();

        self.inner.update(|session, out| {
            // Re-check: another selection or start may have run while opening
            if !session.state.accepts_selection() {
                return Err(session.busy());
            }
            session.handle = Some(handle);
            session.job = None;
            out.log(format!(
                "Selected archive: {} ({}, {})",
                info.path.display(),
                info.format,
                if info.encrypted { "encrypted" } else { "not encrypted" }
            ));
            session.set_state(JobState::ArchiveSelected, out);
            Ok(info)
        })
    }

    /// Drop the current selection, cancelling its job if one is running
    ///
    /// A running job ends `Cancelled` before the state returns to `Idle`,
    /// so its outcome stays readable.
    pub fn cancel_archive(&self) -> Result<(), UnpickError> {
        self.inner.update(|session, out| {
            if let Some(job) = session.job.take() {
                if session.state.is_running() {
                    job.cancel.cancel();
                    let _ = job.commands.send(JobCommand::Cancel);
                    out.log("Extraction cancelled");
                    session.set_state(JobState::Cancelled, out);
                }
            }
            if session.handle.take().is_some() {
                out.log("Archive selection cleared");
            }
            session.set_state(JobState::Idle, out);
        });
        Ok(())
    }

    /// Use `path` as the word list for the next extraction
    pub fn upload_password_list(&self, path: &Path) -> Result<WordListInfo, UnpickError> {
        if path.is_dir() {
            return Err(UnpickError::ListUnreadable {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "is a directory"),
            });
        }
        WordListSource::open(path)?;

        self.inner.update(|session, out| {
            session.word_list = Some(path.to_path_buf());
            out.log(format!("Password list loaded: {}", path.display()));
        });
        Ok(WordListInfo {
            path: path.to_path_buf(),
        })
    }

    pub fn select_output_dir(&self, path: &Path) -> Result<(), UnpickError> {
        self.inner.update(|session, out| {
            session.output_dir = Some(path.to_path_buf());
            out.log(format!("Output directory: {}", path.display()));
        });
        Ok(())
    }

    /// Start unlocking and extracting the selected archive in the background
    pub fn start_extraction(&self, profile_name: &str) -> Result<(), UnpickError> {
        let profile = PerformanceProfile::from_name(profile_name)?;
        self.start_with_profile(profile)
    }

    pub fn start_with_profile(&self, profile: PerformanceProfile) -> Result<(), UnpickError> {
        let shared = Arc::clone(&self.inner);

        self.inner.update(|session, out| {
            if session.state.is_running() {
                return Err(session.busy());
            }
            let handle = match &session.handle {
                Some(handle) => Arc::clone(handle),
                None => return Err(UnpickError::NoArchiveSelected),
            };
            if session.state != JobState::ArchiveSelected {
                return Err(UnpickError::InvalidState {
                    expected: "archive selected",
                    actual: session.state.to_string(),
                });
            }

            let output_dir = session
                .output_dir
                .clone()
                .unwrap_or_else(|| default_output_dir(handle.path()));
            let word_list = session.word_list.clone();
            let first = if handle.is_unlocked() {
                JobState::Unlocking
            } else if word_list.is_some() || profile.keyspace.is_some() {
                JobState::Guessing
            } else {
                JobState::AwaitingManualPassword
            };

            let profile_name = profile.name.clone();
            let id = session.next_job_id;
            session.next_job_id += 1;
            let cancel = CancelToken::new();
            let (tx, rx) = unbounded();

            let job = Job {
                shared,
                id,
                handle,
                profile,
                word_list,
                output_dir,
                cancel: cancel.clone(),
                commands: rx,
            };
            let thread = thread::Builder::new()
                .name(format!("unpick-job-{}", id))
                .spawn(move || job.run())
                .map_err(|e| UnpickError::WorkerPool(e.to_string()))?;

            session.job = Some(ActiveJob {
                id,
                cancel,
                commands: tx,
                _thread: thread,
            });
            session.outcome = JobOutcome::Pending;
            out.log(format!("Extraction started with profile \"{}\"", profile_name));
            session.set_state(first.clone(), out);
            if first == JobState::AwaitingManualPassword {
                out.log("No password list available; enter the password manually");
                out.prompt();
            }
            Ok(())
        })
    }

    /// Try a password typed by the user
    ///
    /// Only valid while awaiting a manual password. The check runs on the job
    /// thread: a wrong password re-prompts, a correct one moves on to extraction.
    pub fn submit_manual_password(&self, password: &str) -> Result<(), UnpickError> {
        let session = self.inner.lock();
        if session.state != JobState::AwaitingManualPassword {
            return Err(UnpickError::InvalidState {
                expected: "awaiting manual password",
                actual: session.state.to_string(),
            });
        }
        if let Some(job) = &session.job {
            let _ = job.commands.send(JobCommand::ManualPassword(password.to_string()));
        }
        Ok(())
    }

    /// Give up on manual entry; the job ends as cancelled
    pub fn cancel_password_input(&self) -> Result<(), UnpickError> {
        self.cancel_with("Password input cancelled");
        Ok(())
    }

    /// Cancel the current job; calling it again has no further effect
    pub fn cancel_extraction(&self) -> Result<(), UnpickError> {
        self.cancel_with("Extraction cancelled");
        Ok(())
    }

    fn cancel_with(&self, message: &str) -> bool {
        self.inner.update(|session, out| {
            if session.state.is_terminal() || session.state == JobState::Idle {
                return false;
            }
            if let Some(job) = &session.job {
                job.cancel.cancel();
                let _ = job.commands.send(JobCommand::Cancel);
            }
            out.log(message);
            session.set_state(JobState::Cancelled, out);
            true
        })
    }

    /// Block until `predicate` holds for the state or `timeout` passes
    pub fn wait_for(&self, timeout: Duration, predicate: impl Fn(&JobState) -> bool) -> Option<JobState> {
        let session = self.inner.lock();
        let (session, _) = self
            .inner
            .changed
            .wait_timeout_while(session, timeout, |s| !predicate(&s.state))
            .unwrap_or_else(|e| e.into_inner());
        if predicate(&session.state) {
            Some(session.state.clone())
        } else {
            None
        }
    }

    /// Block until the job reaches `Completed`, `Cancelled` or `Failed`
    pub fn wait_until_finished(&self, timeout: Duration) -> Option<JobState> {
        self.wait_for(timeout, JobState::is_terminal)
    }
}

/// `<archive dir>/<archive stem>`
pub fn default_output_dir(archive: &Path) -> PathBuf {
    let stem = archive
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "extracted".to_string());
    archive.parent().unwrap_or_else(|| Path::new(".")).join(stem)
}

/// One run of guess, unlock and extract on a background thread
struct Job {
    shared: Arc<Shared>,
    id: u64,
    handle: Arc<ArchiveHandle>,
    profile: PerformanceProfile,
    word_list: Option<PathBuf>,
    output_dir: PathBuf,
    cancel: CancelToken,
    commands: Receiver<JobCommand>,
}

impl Job {
    fn run(self) {
        tracing::info!(job_id = self.id, archive = %self.handle.path().display(), "job started");

        if !self.handle.is_unlocked() {
            match self.unlock() {
                Ok(true) => {}
                Ok(false) => return,
                Err(e) => return self.shared.fail(self.id, &e),
            }
        }

        let unlocked = self.handle.is_encrypted().then(|| "Archive unlocked".to_string());
        if !self.shared.advance(self.id, JobState::Unlocking, unlocked) {
            return;
        }
        self.extract();
    }

    /// Guess, then fall back to manual entry; false when the job ended early
    fn unlock(&self) -> Result<bool, UnpickError> {
        let sources = self.sources()?;
        if !sources.is_empty() {
            let pool = GuessPool::new(self.profile.clone());
            self.shared.sink.log(format!(
                "Trying passwords with {} worker(s)...",
                pool.worker_count()
            ));
            let report = pool.run(&self.handle, Box::new(ChainSource::new(sources)), &self.cancel, &self.shared.sink)?;

            match report.outcome {
                PoolOutcome::Unlocked(candidate) => {
                    self.shared.sink.log(format!(
                        "Password found after {} attempts: {}",
                        report.attempts,
                        candidate.as_str()
                    ));
                    return Ok(true);
                }
                PoolOutcome::Cancelled => return Ok(false),
                PoolOutcome::Corrupt(reason) => {
                    return Err(UnpickError::corrupt(self.handle.path(), reason));
                }
                PoolOutcome::Exhausted => {
                    let attempts = report.attempts;
                    let waiting = self.shared.update(|session, out| {
                        if !session.owns(self.id) {
                            return false;
                        }
                        out.log(format!(
                            "No password matched after {} attempts; enter the password manually",
                            attempts
                        ));
                        session.set_state(JobState::AwaitingManualPassword, out);
                        out.prompt();
                        true
                    });
                    if !waiting {
                        return Ok(false);
                    }
                }
            }
        }

        self.await_manual()
    }

    fn sources(&self) -> Result<Vec<Box<dyn CandidateSource>>, UnpickError> {
        let mut sources: Vec<Box<dyn CandidateSource>> = Vec::new();
        if let Some(list) = &self.word_list {
            sources.push(Box::new(WordListSource::open(list)?));
        }
        if let Some(keyspace) = &self.profile.keyspace {
            sources.push(Box::new(GeneratedSource::new(keyspace)));
        }
        Ok(sources)
    }

    fn await_manual(&self) -> Result<bool, UnpickError> {
        loop {
            let password = match self.commands.recv() {
                Ok(JobCommand::ManualPassword(password)) => password,
                Ok(JobCommand::Cancel) | Err(_) => return Ok(false),
            };
            if self.cancel.is_cancelled() {
                return Ok(false);
            }

            // A manual entry is a single attempt, so the per-attempt timeout does not apply
            let candidate = Candidate::manual(&password);
            let verdict = match self.handle.try_password(&candidate, &self.cancel) {
                Ok(verdict) => verdict,
                Err(UnpickError::Corrupt { detail, .. }) => {
                    self.shared.sink.log(format!("Password check failed: {}", detail));
                    Verdict::WrongPassword
                }
                Err(e) => return Err(e),
            };
            if self.cancel.is_cancelled() {
                return Ok(false);
            }

            let retry = match verdict {
                Verdict::Unlocked if self.handle.commit_unlock(&candidate) => {
                    self.remember(&password);
                    return Ok(true);
                }
                Verdict::Unlocked => return Ok(self.handle.is_unlocked()),
                Verdict::WrongPassword => "Wrong password, please try again",
                Verdict::TimedOut => "Password check did not finish, please try again",
            };

            let still_waiting = self.shared.update(|session, out| {
                if !session.owns(self.id) {
                    return false;
                }
                out.log(retry);
                out.prompt();
                true
            });
            if !still_waiting {
                return Ok(false);
            }
        }
    }

    fn remember(&self, password: &str) {
        if !self.shared.options.remember_manual_passwords {
            return;
        }
        let book = match self.word_list.clone().or_else(password_book::default_book_path) {
            Some(book) => book,
            None => return,
        };
        match password_book::remember(&book, password) {
            Ok(true) => self.shared.sink.log(format!("Password saved to {}", book.display())),
            Ok(false) => {}
            Err(e) => {
                tracing::warn!("could not update password book: {}", e);
                self.shared.sink.log(format!("Could not save password: {}", e));
            }
        }
    }

    fn extract(&self) {
        let message = format!("Extracting to {}", self.output_dir.display());
        if !self.shared.advance(self.id, JobState::Extracting, Some(message)) {
            return;
        }

        let report = match self.handle.extract(&self.output_dir, &self.cancel) {
            Ok(ExtractStatus::Completed(report)) => report,
            Ok(ExtractStatus::Cancelled) => return,
            Err(e) => return self.shared.fail(self.id, &e),
        };
        self.shared.sink.log(format!(
            "Extracted {} files ({} bytes)",
            report.files, report.bytes
        ));

        let depth = self.shared.options.nested_depth;
        if depth > 0 && !self.cancel.is_cancelled() {
            let nested = NestedScan::new(&self.shared.registry, &self.profile, &self.shared.sink, &self.cancel)
                .word_list(self.word_list.as_deref())
                .exclude(self.handle.path())
                .max_depth(depth)
                .run(&self.output_dir);
            if !nested.skipped.is_empty() {
                self.shared.sink.log(format!(
                    "{} nested archive(s) left for manual handling",
                    nested.skipped.len()
                ));
            }
        }

        tracing::info!(job_id = self.id, files = report.files, bytes = report.bytes, "job completed");
        self.shared.finish(self.id, JobState::Completed, "Extraction completed".to_string());
    }
}
