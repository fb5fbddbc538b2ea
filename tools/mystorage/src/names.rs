//! Collision-free file names inside a scoped directory.
//!
//! ```no_run
//! use mystorage::names::NameDir;
//!
//! # fn main() -> mystorage::names::Result<()> {
//! // Temporary directory, removed when `dir` goes out of scope.
//! let mut dir = NameDir::temporary()?;
//! let file_1 = dir.next_name("")?; // publish a name, no file is created
//! std::fs::write(&file_1, "")?;
//! let listing = dir.ls("*")?;
//! # let _ = listing;
//!
//! // Persistent directory: created files and directories are kept.
//! let mut kept = NameDir::persistent("your_dir", true)?;
//! let _ = kept.touch(".txt")?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use tempfile::TempDir;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum NamesError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Directory: {} already exists. Pass ignore_exists to reuse it", .0.display())]
    DirectoryAlreadyExists(PathBuf),

    #[error("Must be a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("Suffix must not contain path separators: {0:?}")]
    InvalidSuffix(String),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

pub type Result<T> = std::result::Result<T, NamesError>;

#[derive(Debug)]
enum Backing {
    Temporary(TempDir),
    Persistent,
}

/// A directory that hands out names nobody has used yet.
///
/// Construction enters the scope and dropping the value exits it. Only the
/// temporary variant removes its directory on exit.
#[derive(Debug)]
pub struct NameDir {
    dirname: PathBuf,
    published: BTreeSet<PathBuf>,
    backing: Backing,
}

impl NameDir {
    /// Enter a fresh temporary directory.
    pub fn temporary() -> Result<Self> {
        let tmp = TempDir::new()?;
        let dirname = tmp.path().to_path_buf();
        debug!("Entered temporary name directory {}", dirname.display());
        Ok(Self {
            dirname,
            published: BTreeSet::new(),
            backing: Backing::Temporary(tmp),
        })
    }

    /// Enter `dirname`, creating it if needed. Its content outlives the scope.
    pub fn persistent(dirname: impl Into<PathBuf>, ignore_exists: bool) -> Result<Self> {
        let dirname = dirname.into();

        if dirname.exists() {
            if !ignore_exists {
                return Err(NamesError::DirectoryAlreadyExists(dirname));
            }
            if !dirname.is_dir() {
                return Err(NamesError::NotADirectory(dirname));
            }
        } else {
            fs::create_dir_all(&dirname)?;
        }

        debug!("Entered persistent name directory {}", dirname.display());
        Ok(Self {
            dirname,
            published: BTreeSet::new(),
            backing: Backing::Persistent,
        })
    }

    pub fn dirname(&self) -> &Path {
        &self.dirname
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self.backing, Backing::Temporary(_))
    }

    /// Names published so far in this scope.
    pub fn names(&self) -> impl Iterator<Item = &Path> {
        self.published.iter().map(PathBuf::as_path)
    }

    /// Publish a path that neither exists on disk nor was handed out before.
    /// The file itself is not created.
    pub fn next_name(&mut self, suffix: &str) -> Result<PathBuf> {
        if suffix.chars().any(std::path::is_separator) {
            return Err(NamesError::InvalidSuffix(suffix.to_string()));
        }
        Ok(self.publish(suffix))
    }

    fn publish(&mut self, suffix: &str) -> PathBuf {
        loop {
            let candidate = self.dirname.join(format!("{}{}", Uuid::new_v4(), suffix));
            if !candidate.exists() && !self.published.contains(&candidate) {
                self.published.insert(candidate.clone());
                return candidate;
            }
        }
    }

    /// Endless stream of fresh names without a suffix.
    pub fn iter(&mut self) -> impl Iterator<Item = PathBuf> + '_ {
        std::iter::repeat_with(move || self.publish(""))
    }

    /// Publish a name and create an empty file there.
    pub fn touch(&mut self, suffix: &str) -> Result<PathBuf> {
        let filename = self.next_name(suffix)?;
        fs::File::create(&filename)?;
        Ok(filename)
    }

    /// Entries directly inside the directory matching a shell glob, sorted.
    pub fn ls(&self, pattern: &str) -> Result<Vec<PathBuf>> {
        let pattern = glob::Pattern::new(pattern)?;
        let mut matches = Vec::new();
        for entry in fs::read_dir(&self.dirname)? {
            let entry = entry?;
            if pattern.matches(&entry.file_name().to_string_lossy()) {
                matches.push(entry.path());
            }
        }
        matches.sort();
        Ok(matches)
    }

    /// Exit the scope, reporting a failure to remove a temporary directory.
    pub fn close(mut self) -> Result<()> {
        let backing = std::mem::replace(&mut self.backing, Backing::Persistent);
        match backing {
            Backing::Temporary(tmp) => Ok(tmp.close()?),
            Backing::Persistent => Ok(()),
        }
    }
}

impl Drop for NameDir {
    fn drop(&mut self) {
        if let Backing::Temporary(tmp) = std::mem::replace(&mut self.backing, Backing::Persistent) {
            if let Err(e) = tmp.close() {
                warn!("Failed to remove {}: {}", self.dirname.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_name_is_unique_and_fresh() {
        let mut dir = NameDir::temporary().unwrap();
        let mut seen = BTreeSet::new();
        for _ in 0..200 {
            let name = dir.next_name(".txt").unwrap();
            assert!(!name.exists());
            assert!(name.starts_with(dir.dirname()));
            assert!(name.to_string_lossy().ends_with(".txt"));
            assert!(seen.insert(name));
        }
        assert_eq!(dir.names().count(), 200);
    }

    #[test]
    fn test_next_name_does_not_create_files() {
        let mut dir = NameDir::temporary().unwrap();
        dir.next_name("").unwrap();
        assert!(dir.ls("*").unwrap().is_empty());
    }

    #[test]
    fn test_touch_creates_empty_file() {
        let mut dir = NameDir::temporary().unwrap();
        let path = dir.touch(".log").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"");
        assert_eq!(dir.ls("*.log").unwrap(), vec![path]);
        assert!(dir.ls("*.txt").unwrap().is_empty());
    }

    #[test]
    fn test_iter_yields_distinct_names() {
        let mut dir = NameDir::temporary().unwrap();
        let names: BTreeSet<PathBuf> = dir.iter().take(10).collect();
        assert_eq!(names.len(), 10);
    }

    #[test]
    fn test_temporary_is_removed_on_drop() {
        let dir = NameDir::temporary().unwrap();
        let path = dir.dirname().to_path_buf();
        assert!(dir.is_temporary());
        drop(dir);
        assert!(!path.exists());
    }

    #[test]
    fn test_close_reports_success() {
        let mut dir = NameDir::temporary().unwrap();
        let path = dir.dirname().to_path_buf();
        dir.touch("").unwrap();
        dir.close().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_suffix_cannot_leave_directory() {
        let mut dir = NameDir::temporary().unwrap();
        for suffix in ["/../x", "/etc", "a/b"] {
            let err = dir.next_name(suffix).unwrap_err();
            assert!(matches!(err, NamesError::InvalidSuffix(_)), "{suffix}");
        }
        assert!(matches!(dir.touch("/x").unwrap_err(), NamesError::InvalidSuffix(_)));
        assert_eq!(dir.names().count(), 0);

        // Dots alone stay inside the directory.
        let name = dir.next_name("..").unwrap();
        assert_eq!(name.parent(), Some(dir.dirname()));
    }

    #[test]
    fn test_bad_glob_is_an_error() {
        let dir = NameDir::temporary().unwrap();
        assert!(matches!(dir.ls("[").unwrap_err(), NamesError::Pattern(_)));
    }
}
