mod local;
pub mod webdav;

pub use local::LocalProvider;
pub use webdav::WebdavProvider;

use std::io::{Read, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Path error: {0}")]
    PathError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{method} {path} failed with status {status}")]
    Status {
        method: String,
        path: String,
        status: u16,
    },

    #[error("Malformed response: {0}")]
    Malformed(String),
}

/// Backend-independent classification of a [`StorageError`].
///
/// Two backends agree on a failure when they fail with the same kind, even if
/// the messages differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Io,
    Path,
    NotFound,
    AlreadyExists,
    InvalidTarget,
    Http,
    Status,
    Malformed,
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::Io(_) => ErrorKind::Io,
            StorageError::PathError(_) => ErrorKind::Path,
            StorageError::NotFound(_) => ErrorKind::NotFound,
            StorageError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            StorageError::InvalidTarget(_) => ErrorKind::InvalidTarget,
            StorageError::Http(_) => ErrorKind::Http,
            StorageError::Status { .. } => ErrorKind::Status,
            StorageError::Malformed(_) => ErrorKind::Malformed,
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    NoExists,
    Directory,
    File,
    StorageRoot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub name: String,
    pub size: u64,
    pub etag: String,
    pub content_type: String,
    pub is_dir: bool,
    pub path: String,
}

/// The part of a [`FileInfo`] every backend must report identically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileShape {
    pub path: String,
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
}

impl FileInfo {
    pub fn shape(&self) -> FileShape {
        FileShape {
            path: self.path.clone(),
            name: self.name.clone(),
            size: self.size,
            is_dir: self.is_dir,
        }
    }

    pub fn resource_type(&self) -> ResourceType {
        if self.is_dir {
            ResourceType::Directory
        } else {
            ResourceType::File
        }
    }
}

/// Normalize a provider path: strip surrounding slashes, collapse empty and
/// `.` segments, and reject `..`.
pub fn normalize(path: &str) -> Result<String> {
    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                return Err(StorageError::PathError(format!(
                    "parent segments are not allowed: {path}"
                )))
            }
            s => segments.push(s),
        }
    }
    Ok(segments.join("/"))
}

/// Last segment of a normalized path ("" for the root).
pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Parent of a normalized path ("" for top-level entries and the root).
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

pub fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

/// Refuse to delete the storage root. `path` must be normalized.
pub fn check_deletable(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(StorageError::PathError("refusing to delete the storage root".to_string()));
    }
    Ok(())
}

/// Validate a move or copy between two normalized paths: neither end may be
/// the storage root and `dest` may not lie inside `src`.
pub fn check_transfer(src: &str, dest: &str) -> Result<()> {
    if src.is_empty() || dest.is_empty() {
        return Err(StorageError::PathError(format!(
            "the storage root cannot be moved or overwritten: {src:?} -> {dest:?}"
        )));
    }
    if dest == src || dest.starts_with(&format!("{src}/")) {
        return Err(StorageError::PathError(format!("{dest} is inside of {src}")));
    }
    Ok(())
}

/// Check an existing transfer destination against the source kind. A
/// destination of the same kind gets replaced; a different kind is an
/// `InvalidTarget`.
pub fn check_replaceable(dest: &str, src_is_dir: bool, dest_is_dir: bool) -> Result<()> {
    if src_is_dir != dest_is_dir {
        return Err(StorageError::InvalidTarget(dest.to_string()));
    }
    Ok(())
}

pub trait Provider: Send + Sync {
    /// Short label used in logs and divergence reports.
    fn name(&self) -> &str;

    fn exists(&self, path: &str) -> Result<bool>;

    fn resource_type(&self, path: &str) -> Result<ResourceType>;

    /// Fails with `NotFound` when nothing exists at `path`.
    fn info(&self, path: &str) -> Result<FileInfo>;

    /// Names of the immediate children of `path`, sorted.
    fn ls(&self, path: &str) -> Result<Vec<String>>;

    /// Metadata of the immediate children of `path`, sorted by name.
    fn ll(&self, path: &str) -> Result<Vec<FileInfo>>;

    /// Stream the content of the file at `path` into `buf`, returning the
    /// number of bytes written. Directories fail with `PathError`.
    fn read(&self, path: &str, buf: &mut dyn Write) -> Result<u64>;

    /// Create or overwrite a file. Fails with `InvalidTarget` on directories.
    fn put(&self, path: &str, buf: &mut dyn Read) -> Result<FileInfo>;

    /// Create a new file. Fails with `AlreadyExists` if anything is at `path`.
    fn create(&self, path: &str, buf: &mut dyn Read) -> Result<FileInfo>;

    fn mkdir(&self, path: &str) -> Result<FileInfo>;

    /// Remove a file or a directory tree. The storage root is refused with
    /// `PathError`.
    fn delete(&self, path: &str) -> Result<()>;

    /// Move `src` to `dest`, replacing a destination of the same kind.
    ///
    /// Fails with `NotFound` for a missing source or destination parent,
    /// `PathError` when `dest` is `src` or lies inside it, and
    /// `InvalidTarget` when `dest` exists with the other kind.
    fn move_to(&self, src: &str, dest: &str) -> Result<()>;

    /// Same rules as [`Provider::move_to`], keeping the source.
    fn copy(&self, src: &str, dest: &str) -> Result<()>;

    /// Rename `src` within its parent directory. Only the last segment of
    /// `name` is used.
    fn rename(&self, src: &str, name: &str) -> Result<()>;

    fn download(&self, remote_path: &str, local_path: &Path) -> Result<()>;

    fn upload(&self, local_path: &Path, remote_path: &str) -> Result<()>;

    fn is_dir(&self, path: &str) -> Result<bool> {
        Ok(self.resource_type(path)? == ResourceType::Directory)
    }

    fn info_or_none(&self, path: &str) -> Result<Option<FileInfo>> {
        if self.exists(path)? {
            self.info(path).map(Some)
        } else {
            Ok(None)
        }
    }

    fn ll_files(&self, path: &str) -> Result<Vec<FileInfo>> {
        Ok(self.ll(path)?.into_iter().filter(|x| !x.is_dir).collect())
    }

    fn ll_dirs(&self, path: &str) -> Result<Vec<FileInfo>> {
        Ok(self.ll(path)?.into_iter().filter(|x| x.is_dir).collect())
    }

    fn ls_files(&self, path: &str) -> Result<Vec<String>> {
        Ok(self.ll_files(path)?.into_iter().map(|x| x.name).collect())
    }

    fn ls_dirs(&self, path: &str) -> Result<Vec<String>> {
        Ok(self.ll_dirs(path)?.into_iter().map(|x| x.name).collect())
    }

    fn read_bytes(&self, path: &str) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.read(path, &mut buf)?;
        Ok(buf)
    }

    fn read_text(&self, path: &str) -> Result<String> {
        String::from_utf8(self.read_bytes(path)?)
            .map_err(|e| StorageError::Malformed(format!("{path} is not valid UTF-8: {e}")))
    }

    fn put_bytes(&self, path: &str, data: &[u8]) -> Result<FileInfo> {
        self.put(path, &mut &data[..])
    }

    fn create_bytes(&self, path: &str, data: &[u8]) -> Result<FileInfo> {
        self.create(path, &mut &data[..])
    }

    fn touch(&self, path: &str) -> Result<FileInfo> {
        self.create(path, &mut std::io::empty())
    }
}

impl<P: Provider + ?Sized> Provider for Box<P> {
    fn name(&self) -> &str {
        (**self).name()
    }
    fn exists(&self, path: &str) -> Result<bool> {
        (**self).exists(path)
    }
    fn resource_type(&self, path: &str) -> Result<ResourceType> {
        (**self).resource_type(path)
    }
    fn info(&self, path: &str) -> Result<FileInfo> {
        (**self).info(path)
    }
    fn ls(&self, path: &str) -> Result<Vec<String>> {
        (**self).ls(path)
    }
    fn ll(&self, path: &str) -> Result<Vec<FileInfo>> {
        (**self).ll(path)
    }
    fn read(&self, path: &str, buf: &mut dyn Write) -> Result<u64> {
        (**self).read(path, buf)
    }
    fn put(&self, path: &str, buf: &mut dyn Read) -> Result<FileInfo> {
        (**self).put(path, buf)
    }
    fn create(&self, path: &str, buf: &mut dyn Read) -> Result<FileInfo> {
        (**self).create(path, buf)
    }
    fn mkdir(&self, path: &str) -> Result<FileInfo> {
        (**self).mkdir(path)
    }
    fn delete(&self, path: &str) -> Result<()> {
        (**self).delete(path)
    }
    fn move_to(&self, src: &str, dest: &str) -> Result<()> {
        (**self).move_to(src, dest)
    }
    fn copy(&self, src: &str, dest: &str) -> Result<()> {
        (**self).copy(src, dest)
    }
    fn rename(&self, src: &str, name: &str) -> Result<()> {
        (**self).rename(src, name)
    }
    fn download(&self, remote_path: &str, local_path: &Path) -> Result<()> {
        (**self).download(remote_path, local_path)
    }
    fn upload(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        (**self).upload(local_path, remote_path)
    }
}
