use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use crate::core::candidates::{CandidateSource, WordListSource};
use crate::models::UnpickError;

/// File name of the password book in the home directory
pub const DEFAULT_BOOK_NAME: &str = "passwords.txt";

/// Password book used when no word list was uploaded
pub fn default_book_path() -> Option<PathBuf> {
    home::home_dir().map(|home| home.join(DEFAULT_BOOK_NAME))
}

/// Check whether `password` already has a line of its own in the book
///
/// A missing book contains nothing. The book is read line by line, so large
/// lists are never loaded whole.
pub fn contains(book: &Path, password: &str) -> Result<bool, UnpickError> {
    if !book.exists() {
        return Ok(false);
    }
    let mut source = WordListSource::open(book)?;
    while let Some(candidate) = source.next_candidate()? {
        if candidate.as_bytes() == password.as_bytes() {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Append a working password to the book
///
/// Creates the book if needed and starts a new line when the file does not
/// already end with one. Returns `false` when the password was already listed.
pub fn remember(book: &Path, password: &str) -> Result<bool, UnpickError> {
    let password = password.trim();
    if password.is_empty() || contains(book, password)? {
        return Ok(false);
    }

    if let Some(parent) = book.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .map_err(|e| UnpickError::from_write(parent, "creating directory for", e))?;
        }
    }

    let needs_newline = ends_without_newline(book)
        .map_err(|e| UnpickError::from_write(book, "reading password book", e))?;

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(book)
        .map_err(|e| UnpickError::from_write(book, "opening password book", e))?;

    let mut line = String::with_capacity(password.len() + 2);
    if needs_newline {
        line.push('\n');
    }
    line.push_str(password);
    line.push('\n');

    file.write_all(line.as_bytes())
        .map_err(|e| UnpickError::from_write(book, "appending to password book", e))?;

    tracing::info!(book = %book.display(), "password added to book");
    Ok(true)
}

/// True when the file has content whose last byte is not a newline
fn ends_without_newline(path: &Path) -> std::io::Result<bool> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}
