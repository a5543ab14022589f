// Test doubles shared by the engine's unit tests

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use crate::core::archive::common::{
    has_extension, ArchiveHandler, ExtractReport, ExtractStatus, PasswordProbe, Verdict,
};
use crate::core::archive::ArchiveHandle;
use crate::core::cancel::CancelToken;
use crate::core::candidates::Candidate;
use crate::models::{JobState, UnpickError};
use crate::utils::events::{EngineEvent, EventStream};

/// Handler for `.mock` files with a scripted password check
#[derive(Clone)]
pub struct ScriptedHandler {
    password: Vec<u8>,
    encrypted: bool,
    attempt_delay: Duration,
    extract_chunks: usize,
    extract_delay: Duration,
    corrupt_candidate: Option<Vec<u8>>,
    unreadable: bool,
    attempts: Arc<AtomicU64>,
}

impl ScriptedHandler {
    pub fn new(password: &str) -> Self {
        Self {
            password: password.as_bytes().to_vec(),
            encrypted: true,
            attempt_delay: Duration::ZERO,
            extract_chunks: 1,
            extract_delay: Duration::ZERO,
            corrupt_candidate: None,
            unreadable: false,
            attempts: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn plain() -> Self {
        Self {
            encrypted: false,
            ..Self::new("")
        }
    }

    pub fn with_attempt_delay(mut self, delay: Duration) -> Self {
        self.attempt_delay = delay;
        self
    }

    /// Extraction writes `chunks` chunks, sleeping `delay` before each
    pub fn with_slow_extract(mut self, chunks: usize, delay: Duration) -> Self {
        self.extract_chunks = chunks.max(1);
        self.extract_delay = delay;
        self
    }

    pub fn with_corrupt_candidate(mut self, candidate: &str) -> Self {
        self.corrupt_candidate = Some(candidate.as_bytes().to_vec());
        self
    }

    pub fn with_unreadable_probe(mut self) -> Self {
        self.unreadable = true;
        self
    }

    /// Completed password checks so far
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Create `<dir>/<name>.mock` so the registry accepts it
    pub fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(format!("{}.mock", name));
        fs::write(&path, b"MOCK").unwrap();
        path
    }

    pub fn open_handle(&self, dir: &Path) -> ArchiveHandle {
        let path = Self::touch(dir, "scripted");
        ArchiveHandle::new(&path, Arc::new(self.clone()), self.encrypted)
    }
}

impl ArchiveHandler for ScriptedHandler {
    fn format_tag(&self) -> &'static str {
        "mock"
    }

    fn supports(&self, archive_path: &Path) -> bool {
        has_extension(archive_path, &["mock"])
    }

    fn inspect(&self, _archive_path: &Path) -> Result<bool, UnpickError> {
        Ok(self.encrypted)
    }

    fn probe(&self, archive_path: &Path) -> Result<Box<dyn PasswordProbe>, UnpickError> {
        if self.unreadable {
            return Err(UnpickError::Unreadable {
                path: archive_path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "scripted"),
            });
        }
        Ok(Box::new(ScriptedProbe {
            path: archive_path.to_path_buf(),
            script: self.clone(),
        }))
    }

    fn extract(
        &self,
        archive_path: &Path,
        password: Option<&[u8]>,
        dest_dir: &Path,
        cancel: &CancelToken,
    ) -> Result<ExtractStatus, UnpickError> {
        if self.encrypted && password != Some(self.password.as_slice()) {
            return Err(UnpickError::corrupt(archive_path, "extracted with the wrong key"));
        }

        let out_path = dest_dir.join("payload.txt");
        let mut out = fs::File::create(&out_path)
            .map_err(|e| UnpickError::from_write(&out_path, "creating", e))?;
        let mut bytes = 0u64;
        for chunk in 0..self.extract_chunks {
            if cancel.is_cancelled() {
                return Ok(ExtractStatus::Cancelled);
            }
            thread::sleep(self.extract_delay);
            let line = format!("chunk {}\n", chunk);
            out.write_all(line.as_bytes())
                .map_err(|e| UnpickError::from_write(&out_path, "writing", e))?;
            bytes += line.len() as u64;
        }

        Ok(ExtractStatus::Completed(ExtractReport { files: 1, bytes }))
    }
}

struct ScriptedProbe {
    path: PathBuf,
    script: ScriptedHandler,
}

impl PasswordProbe for ScriptedProbe {
    fn try_password(&mut self, candidate: &Candidate, deadline: Instant) -> Result<Verdict, UnpickError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        thread::sleep(self.script.attempt_delay.min(remaining));
        if Instant::now() >= deadline {
            return Ok(Verdict::TimedOut);
        }

        self.script.attempts.fetch_add(1, Ordering::SeqCst);
        if self.script.corrupt_candidate.as_deref() == Some(candidate.as_bytes()) {
            return Err(UnpickError::corrupt(&self.path, "bad entry header"));
        }
        if candidate.as_bytes() == self.script.password.as_slice() {
            Ok(Verdict::Unlocked)
        } else {
            Ok(Verdict::WrongPassword)
        }
    }
}

/// `word-0`, `word-1`, ... with an optional replacement at one index
pub fn numbered_words(count: usize, replace: Option<(usize, &str)>) -> Vec<String> {
    (0..count)
        .map(|i| match replace {
            Some((at, word)) if at == i => word.to_string(),
            _ => format!("word-{}", i),
        })
        .collect()
}

pub fn write_word_list(dir: &Path, words: &[String]) -> PathBuf {
    let path = dir.join("passwords.txt");
    fs::write(&path, words.join("\n")).unwrap();
    path
}

/// Drains an event stream on a background thread
pub struct EventCollector {
    events: Arc<Mutex<Vec<EngineEvent>>>,
    thread: JoinHandle<()>,
}

impl EventCollector {
    pub fn spawn(stream: EventStream) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let thread = thread::spawn(move || {
            for event in stream {
                sink.lock().unwrap().push(event);
            }
        });
        Self { events, thread }
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn prompts(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, EngineEvent::NeedPassword))
            .count()
    }

    pub fn states(&self) -> Vec<JobState> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                EngineEvent::StateChanged(state) => Some(state),
                _ => None,
            })
            .collect()
    }

    /// Poll until `done` holds for the events received so far
    pub fn wait_until(&self, timeout: Duration, done: impl Fn(&[EngineEvent]) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if done(&self.events()) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    pub fn wait_for_state(&self, state: JobState) -> bool {
        self.wait_until(Duration::from_secs(10), |events| {
            events.contains(&EngineEvent::StateChanged(state.clone()))
        })
    }

    /// Wait until exactly `count` prompts arrived
    pub fn wait_for_prompts(&self, count: usize) -> bool {
        self.wait_until(Duration::from_secs(10), |events| {
            events.iter().filter(|e| matches!(e, EngineEvent::NeedPassword)).count() >= count
        }) && self.prompts() == count
    }

    /// Wait for every sink to go away, then return the log lines received
    pub fn finish(self) -> Vec<String> {
        self.thread.join().unwrap();
        let events = self.events.lock().unwrap();
        events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::Log(line) => Some(line.clone()),
                _ => None,
            })
            .collect()
    }
}
