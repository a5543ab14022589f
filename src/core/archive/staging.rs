use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use walkdir::WalkDir;
use crate::models::UnpickError;

/// Hidden scratch directory inside the output directory
///
/// Entries are extracted here first and moved into place only once the whole
/// archive has been written. Dropping the staging area without promoting it
/// removes everything it holds.
pub struct Staging {
    dir: TempDir,
    dest: PathBuf,
}

impl Staging {
    pub fn new(dest: &Path) -> Result<Self, UnpickError> {
        fs::create_dir_all(dest)
            .map_err(|e| UnpickError::from_write(dest, "creating output directory", e))?;

        // Same filesystem as the destination so promotion is a rename
        let dir = tempfile::Builder::new()
            .prefix(".unpick-staging-")
            .tempdir_in(dest)
            .map_err(|e| UnpickError::from_write(dest, "creating staging directory in", e))?;

        Ok(Self {
            dir,
            dest: dest.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Move every staged entry into the destination, replacing existing files
    pub fn promote(self) -> Result<(), UnpickError> {
        let root = self.dir.path();
        let entries: Vec<_> = WalkDir::new(root)
            .min_depth(1)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .collect();

        for entry in entries {
            let relative = match entry.path().strip_prefix(root) {
                Ok(rel) => rel,
                Err(_) => continue,
            };
            let target = self.dest.join(relative);

            if entry.file_type().is_dir() {
                fs::create_dir_all(&target)
                    .map_err(|e| UnpickError::from_write(&target, "creating directory", e))?;
                continue;
            }

            if target.is_file() {
                fs::remove_file(&target)
                    .map_err(|e| UnpickError::from_write(&target, "replacing", e))?;
            }
            fs::rename(entry.path(), &target)
                .map_err(|e| UnpickError::from_write(&target, "moving into place", e))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_promote_moves_tree_and_removes_staging() {
        let dest = TempDir::new().unwrap();
        let staging = Staging::new(dest.path()).unwrap();
        let staged_root = staging.path().to_path_buf();

        fs::create_dir_all(staging.path().join("a/b")).unwrap();
        fs::write(staging.path().join("a/b/file.txt"), b"payload").unwrap();
        fs::write(staging.path().join("top.txt"), b"top").unwrap();
        staging.promote().unwrap();

        assert_eq!(fs::read_to_string(dest.path().join("a/b/file.txt")).unwrap(), "payload");
        assert_eq!(fs::read_to_string(dest.path().join("top.txt")).unwrap(), "top");
        assert!(!staged_root.exists());
    }

    #[test]
    fn test_promote_replaces_existing_files() {
        let dest = TempDir::new().unwrap();
        fs::write(dest.path().join("same.txt"), b"old").unwrap();

        let staging = Staging::new(dest.path()).unwrap();
        fs::write(staging.path().join("same.txt"), b"new").unwrap();
        staging.promote().unwrap();

        assert_eq!(fs::read_to_string(dest.path().join("same.txt")).unwrap(), "new");
    }

    #[test]
    fn test_dropped_staging_leaves_destination_untouched() {
        let dest = TempDir::new().unwrap();
        {
            let staging = Staging::new(dest.path()).unwrap();
            fs::write(staging.path().join("partial.bin"), b"half").unwrap();
        }
        assert_eq!(fs::read_dir(dest.path()).unwrap().count(), 0);
    }
}
