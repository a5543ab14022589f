use std::borrow::Cow;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use encoding_rs::GBK;
use crate::models::{Keyspace, UnpickError};

/// Where a candidate came from
///
/// Word-list positions are zero-based line numbers, so blank lines still
/// occupy a position and a resumed run lines up with the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Position {
    WordList(u64),
    Generated(u64),
    Manual,
}

/// One password candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    secret: Arc<[u8]>,
    position: Position,
}

impl Candidate {
    pub fn new(secret: impl Into<Vec<u8>>, position: Position) -> Self {
        Self {
            secret: Arc::from(secret.into()),
            position,
        }
    }

    pub fn manual(password: &str) -> Self {
        Self::new(password.as_bytes().to_vec(), Position::Manual)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.secret
    }

    pub fn as_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.secret)
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn is_empty(&self) -> bool {
        self.secret.is_empty()
    }
}

/// Lazy, finite, ordered sequence of candidates
pub trait CandidateSource: Send {
    /// Produce the next candidate, or `None` once the source is exhausted
    fn next_candidate(&mut self) -> Result<Option<Candidate>, UnpickError>;

    /// Index of the next unconsumed item; reopening at this index resumes the source
    fn resume_point(&self) -> u64;
}

/// Word list read line by line from disk
pub struct WordListSource {
    path: PathBuf,
    reader: BufReader<File>,
    next_index: u64,
    line: Vec<u8>,
}

impl WordListSource {
    pub fn open(path: &Path) -> Result<Self, UnpickError> {
        Self::open_at(path, 0)
    }

    /// Open a word list and skip the first `start` lines
    pub fn open_at(path: &Path, start: u64) -> Result<Self, UnpickError> {
        let file = File::open(path).map_err(|e| UnpickError::ListUnreadable {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mut source = Self {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            next_index: 0,
            line: Vec::new(),
        };

        while source.next_index < start {
            if !source.read_line()? {
                break;
            }
        }

        Ok(source)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_line(&mut self) -> Result<bool, UnpickError> {
        self.line.clear();
        let read = self
            .reader
            .read_until(b'\n', &mut self.line)
            .map_err(|e| UnpickError::ListUnreadable {
                path: self.path.clone(),
                source: e,
            })?;
        if read == 0 {
            return Ok(false);
        }
        self.next_index += 1;
        Ok(true)
    }
}

impl CandidateSource for WordListSource {
    fn next_candidate(&mut self) -> Result<Option<Candidate>, UnpickError> {
        loop {
            let index = self.next_index;
            if !self.read_line()? {
                return Ok(None);
            }

            let text = decode_line(&self.line, index == 0);
            let password = text.trim();
            if password.is_empty() {
                continue;
            }
            return Ok(Some(Candidate::new(
                password.as_bytes().to_vec(),
                Position::WordList(index),
            )));
        }
    }

    fn resume_point(&self) -> u64 {
        self.next_index
    }
}

/// Decode one raw line: UTF-8 when valid, otherwise GBK
fn decode_line(raw: &[u8], first: bool) -> Cow<'_, str> {
    let decoded = match std::str::from_utf8(raw) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => GBK.decode_without_bom_handling(raw).0,
    };
    if first {
        if let Some(stripped) = decoded.strip_prefix('\u{feff}') {
            return Cow::Owned(stripped.to_string());
        }
    }
    decoded
}

/// Single manually entered password
pub struct ManualSource {
    candidate: Option<Candidate>,
}

impl ManualSource {
    pub fn new(password: &str) -> Self {
        Self {
            candidate: Some(Candidate::manual(password)),
        }
    }
}

impl CandidateSource for ManualSource {
    fn next_candidate(&mut self) -> Result<Option<Candidate>, UnpickError> {
        Ok(self.candidate.take())
    }

    fn resume_point(&self) -> u64 {
        if self.candidate.is_some() { 0 } else { 1 }
    }
}

/// Every string over a charset within a length range, shortest first
pub struct GeneratedSource {
    charset: Vec<char>,
    min_len: usize,
    max_len: usize,
    next_index: u64,
    total: u64,
}

impl GeneratedSource {
    pub fn new(keyspace: &Keyspace) -> Self {
        Self::starting_at(keyspace, 0)
    }

    pub fn starting_at(keyspace: &Keyspace, start: u64) -> Self {
        let mut charset: Vec<char> = Vec::new();
        for c in keyspace.charset.chars() {
            if !charset.contains(&c) {
                charset.push(c);
            }
        }

        let base = charset.len() as u64;
        let total = if base == 0 {
            0
        } else {
            (keyspace.min_len..=keyspace.max_len)
                .map(|len| base.saturating_pow(len as u32))
                .fold(0u64, |acc, n| acc.saturating_add(n))
        };

        Self {
            charset,
            min_len: keyspace.min_len,
            max_len: keyspace.max_len,
            next_index: start.min(total),
            total,
        }
    }

    pub fn len(&self) -> u64 {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    fn render(&self, mut index: u64) -> String {
        let base = self.charset.len() as u64;
        let mut len = self.min_len;
        while len < self.max_len {
            let span = base.saturating_pow(len as u32);
            if index < span {
                break;
            }
            index -= span;
            len += 1;
        }

        let mut out = vec![self.charset[0]; len];
        for slot in out.iter_mut().rev() {
            *slot = self.charset[(index % base) as usize];
            index /= base;
        }
        out.into_iter().collect()
    }
}

impl CandidateSource for GeneratedSource {
    fn next_candidate(&mut self) -> Result<Option<Candidate>, UnpickError> {
        if self.next_index >= self.total {
            return Ok(None);
        }
        let index = self.next_index;
        self.next_index += 1;
        Ok(Some(Candidate::new(
            self.render(index).into_bytes(),
            Position::Generated(index),
        )))
    }

    fn resume_point(&self) -> u64 {
        self.next_index
    }
}

/// Sources consumed one after another
pub struct ChainSource {
    sources: Vec<Box<dyn CandidateSource>>,
    current: usize,
    consumed: u64,
}

impl ChainSource {
    pub fn new(sources: Vec<Box<dyn CandidateSource>>) -> Self {
        Self {
            sources,
            current: 0,
            consumed: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl CandidateSource for ChainSource {
    fn next_candidate(&mut self) -> Result<Option<Candidate>, UnpickError> {
        while let Some(source) = self.sources.get_mut(self.current) {
            if let Some(candidate) = source.next_candidate()? {
                self.consumed += 1;
                return Ok(Some(candidate));
            }
            self.current += 1;
        }
        Ok(None)
    }

    fn resume_point(&self) -> u64 {
        self.consumed
    }
}

/// Thread-safe cursor shared by guess workers
///
/// Each pull hands out a distinct candidate; once the source reports
/// exhaustion every later pull returns `None` immediately.
pub struct SharedCursor {
    inner: Mutex<CursorState>,
}

struct CursorState {
    source: Box<dyn CandidateSource>,
    done: bool,
}

impl SharedCursor {
    pub fn new(source: Box<dyn CandidateSource>) -> Self {
        Self {
            inner: Mutex::new(CursorState { source, done: false }),
        }
    }

    pub fn pull(&self) -> Result<Option<Candidate>, UnpickError> {
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if state.done {
            return Ok(None);
        }
        match state.source.next_candidate() {
            Ok(Some(candidate)) => Ok(Some(candidate)),
            Ok(None) => {
                state.done = true;
                Ok(None)
            }
            Err(e) => {
                state.done = true;
                Err(e)
            }
        }
    }

    pub fn resume_point(&self) -> u64 {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .source
            .resume_point()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::fs;
    use std::thread;
    use tempfile::TempDir;

    fn collect(source: &mut dyn CandidateSource) -> Vec<Candidate> {
        let mut out = Vec::new();
        while let Some(c) = source.next_candidate().unwrap() {
            out.push(c);
        }
        out
    }

    #[test]
    fn test_word_list_keeps_file_order_and_skips_blank_lines() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("words.txt");
        fs::write(&path, "alpha\n\n  beta  \r\n\t\ngamma").unwrap();

        let mut source = WordListSource::open(&path).unwrap();
        let items = collect(&mut source);

        let words: Vec<String> = items.iter().map(|c| c.as_str().into_owned()).collect();
        assert_eq!(words, vec!["alpha", "beta", "gamma"]);
        assert_eq!(items[1].position(), Position::WordList(2));
        assert_eq!(items[2].position(), Position::WordList(4));
        assert_eq!(source.resume_point(), 5);
    }

    #[test]
    fn test_word_list_resumes_from_position() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("words.txt");
        fs::write(&path, "a\nb\nc\nd\n").unwrap();

        let mut first = WordListSource::open(&path).unwrap();
        first.next_candidate().unwrap();
        first.next_candidate().unwrap();
        let resume = first.resume_point();
        assert_eq!(resume, 2);

        let mut resumed = WordListSource::open_at(&path, resume).unwrap();
        let rest: Vec<String> = collect(&mut resumed).iter().map(|c| c.as_str().into_owned()).collect();
        assert_eq!(rest, vec!["c", "d"]);
    }

    #[test]
    fn test_word_list_decodes_gbk_lines() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("gbk.txt");
        let (encoded, _, _) = GBK.encode("密码123");
        let mut bytes = encoded.into_owned();
        bytes.extend_from_slice(b"\nplain\n");
        fs::write(&path, bytes).unwrap();

        let mut source = WordListSource::open(&path).unwrap();
        let words: Vec<String> = collect(&mut source).iter().map(|c| c.as_str().into_owned()).collect();
        assert_eq!(words, vec!["密码123", "plain"]);
    }

    #[test]
    fn test_word_list_strips_utf8_bom() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bom.txt");
        fs::write(&path, "\u{feff}first\nsecond\n").unwrap();

        let mut source = WordListSource::open(&path).unwrap();
        assert_eq!(source.next_candidate().unwrap().unwrap().as_bytes(), b"first");
    }

    #[test]
    fn test_missing_word_list_is_unreadable() {
        let result = WordListSource::open(Path::new("/nonexistent/words.txt"));
        assert!(matches!(result, Err(UnpickError::ListUnreadable { .. })));
    }

    #[test]
    fn test_manual_source_yields_once() {
        let mut source = ManualSource::new("hunter2");
        let first = source.next_candidate().unwrap().unwrap();
        assert_eq!(first.as_bytes(), b"hunter2");
        assert_eq!(first.position(), Position::Manual);
        assert!(source.next_candidate().unwrap().is_none());
    }

    #[test]
    fn test_generated_source_order_and_resume() {
        let keyspace = Keyspace::new("ab", 1, 2);
        let mut source = GeneratedSource::new(&keyspace);
        assert_eq!(source.len(), 6);
        let words: Vec<String> = collect(&mut source).iter().map(|c| c.as_str().into_owned()).collect();
        assert_eq!(words, vec!["a", "b", "aa", "ab", "ba", "bb"]);

        let mut resumed = GeneratedSource::starting_at(&keyspace, 4);
        let rest: Vec<String> = collect(&mut resumed).iter().map(|c| c.as_str().into_owned()).collect();
        assert_eq!(rest, vec!["ba", "bb"]);
    }

    #[test]
    fn test_chain_source_runs_sources_in_order() {
        let mut chain = ChainSource::new(vec![
            Box::new(ManualSource::new("x")),
            Box::new(GeneratedSource::new(&Keyspace::new("01", 1, 1))),
        ]);
        let words: Vec<String> = collect(&mut chain).iter().map(|c| c.as_str().into_owned()).collect();
        assert_eq!(words, vec!["x", "0", "1"]);
        assert_eq!(chain.resume_point(), 3);
    }

    #[test]
    fn test_shared_cursor_hands_out_each_candidate_once() {
        let cursor = Arc::new(SharedCursor::new(Box::new(GeneratedSource::new(
            &Keyspace::new("0123456789", 3, 3),
        ))));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cursor = Arc::clone(&cursor);
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    while let Some(c) = cursor.pull().unwrap() {
                        seen.push(c.as_str().into_owned());
                    }
                    seen
                })
            })
            .collect();

        let mut all = HashSet::new();
        let mut count = 0;
        for handle in handles {
            for word in handle.join().unwrap() {
                all.insert(word);
                count += 1;
            }
        }
        assert_eq!(count, 1000);
        assert_eq!(all.len(), 1000);
        assert!(cursor.pull().unwrap().is_none());
    }
}
