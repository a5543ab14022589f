use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;
use crate::core::archive::common::Verdict;
use crate::core::archive::{ArchiveHandle, UnlockState};
use crate::core::cancel::CancelToken;
use crate::core::candidates::{Candidate, CandidateSource, SharedCursor};
use crate::models::{PerformanceProfile, UnpickError};
use crate::utils::events::EventSink;

/// Emit a progress line every this many attempts
const PROGRESS_EVERY: u64 = 500;

/// How a guessing run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolOutcome {
    Unlocked(Candidate),
    /// Every candidate was tried without success
    Exhausted,
    Cancelled,
    /// The archive could not be read; guessing halted
    Corrupt(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolReport {
    pub outcome: PoolOutcome,
    pub attempts: u64,
    /// Reopen the source at this index to continue where the run stopped
    pub resume_point: u64,
}

/// Fixed-size set of workers testing candidates against one archive
///
/// Uses a dedicated Rayon thread pool sized by the performance profile.
/// Workers pull from a shared cursor, so no candidate is tried twice.
pub struct GuessPool {
    profile: PerformanceProfile,
}

struct RunContext<'a> {
    handle: &'a ArchiveHandle,
    cursor: SharedCursor,
    cancel: &'a CancelToken,
    sink: &'a EventSink,
    profile: &'a PerformanceProfile,
    stop: AtomicBool,
    attempts: AtomicU64,
    fatal: Mutex<Option<String>>,
}

impl GuessPool {
    pub fn new(profile: PerformanceProfile) -> Self {
        Self { profile }
    }

    pub fn worker_count(&self) -> usize {
        self.profile.workers.max(1)
    }

    /// Test candidates from `source` until one unlocks the handle, the source
    /// runs dry, the archive proves unreadable, or `cancel` fires
    ///
    /// Once cancellation is observed the run never reports `Unlocked`, even
    /// if a worker finishes a matching attempt afterwards.
    pub fn run(
        &self,
        handle: &ArchiveHandle,
        source: Box<dyn CandidateSource>,
        cancel: &CancelToken,
        sink: &EventSink,
    ) -> Result<PoolReport, UnpickError> {
        let workers = self.worker_count();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("unpick-guess-{}", i))
            .build()
            .map_err(|e| UnpickError::WorkerPool(e.to_string()))?;

        let ctx = RunContext {
            handle,
            cursor: SharedCursor::new(source),
            cancel,
            sink,
            profile: &self.profile,
            stop: AtomicBool::new(false),
            attempts: AtomicU64::new(0),
            fatal: Mutex::new(None),
        };

        tracing::info!(
            archive = %handle.path().display(),
            workers,
            timeout_ms = self.profile.attempt_timeout.as_millis() as u64,
            "guess pool started"
        );
        let started = Instant::now();

        pool.scope(|scope| {
            for worker in 0..workers {
                let ctx = &ctx;
                scope.spawn(move |_| ctx.work(worker));
            }
        });

        let attempts = ctx.attempts.load(Ordering::SeqCst);
        let resume_point = ctx.cursor.resume_point();
        let fatal = ctx.fatal.lock().unwrap_or_else(|e| e.into_inner()).take();

        let outcome = if cancel.is_cancelled() {
            PoolOutcome::Cancelled
        } else if let (UnlockState::Unlocked, Some(winner)) = (handle.unlock_state(), handle.password()) {
            PoolOutcome::Unlocked(winner.clone())
        } else if let Some(reason) = fatal {
            handle.mark_failed();
            PoolOutcome::Corrupt(reason)
        } else {
            PoolOutcome::Exhausted
        };

        tracing::info!(
            attempts,
            elapsed_ms = started.elapsed().as_millis() as u64,
            outcome = ?outcome,
            "guess pool finished"
        );

        Ok(PoolReport {
            outcome,
            attempts,
            resume_point,
        })
    }
}

impl RunContext<'_> {
    fn halted(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
            || self.cancel.is_cancelled()
            || self.handle.unlock_state() != UnlockState::Locked
    }

    fn fail(&self, reason: String) {
        let mut fatal = self.fatal.lock().unwrap_or_else(|e| e.into_inner());
        if fatal.is_none() {
            *fatal = Some(reason);
        }
        self.stop.store(true, Ordering::SeqCst);
    }

    fn work(&self, worker: usize) {
        let mut probe = match self.handle.probe() {
            Ok(probe) => probe,
            Err(e) => {
                self.fail(e.to_string());
                return;
            }
        };

        while !self.halted() {
            let candidate = match self.cursor.pull() {
                Ok(Some(candidate)) => candidate,
                Ok(None) => break,
                Err(e) => {
                    self.fail(e.to_string());
                    break;
                }
            };

            let tried = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if tried % PROGRESS_EVERY == 0 {
                self.sink.log(format!("Tried {} passwords...", tried));
            }

            let deadline = Instant::now() + self.profile.attempt_timeout;
            match probe.check(&candidate, deadline, self.cancel) {
                Ok(Verdict::Unlocked) => {
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    if self.handle.commit_unlock(&candidate) {
                        self.stop.store(true, Ordering::SeqCst);
                        tracing::debug!(worker, position = ?candidate.position(), "candidate unlocked archive");
                    }
                    break;
                }
                Ok(Verdict::WrongPassword) => {}
                Ok(Verdict::TimedOut) => {
                    self.sink.log(format!(
                        "Attempt with \"{}\" exceeded {} ms, skipped",
                        candidate.as_str(),
                        self.profile.attempt_timeout.as_millis()
                    ));
                }
                Err(UnpickError::Corrupt { detail, .. }) => {
                    tracing::warn!(worker, "attempt failed on damaged entry: {}", detail);
                    self.sink.log(format!("Attempt with \"{}\" failed: {}", candidate.as_str(), detail));
                }
                Err(e) => {
                    self.fail(e.to_string());
                    break;
                }
            }
        }
    }
}
