use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use log::{debug, info};
use walkdir::WalkDir;

use super::{
    basename, check_deletable, check_replaceable, check_transfer, normalize, parent, FileInfo,
    Provider, ResourceType, Result, StorageError,
};

/// Provider over a directory of the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalProvider {
    root: PathBuf,
}

impl LocalProvider {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let metadata = match fs::metadata(&root) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(root.display().to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        if !metadata.is_dir() {
            return Err(StorageError::PathError(format!(
                "storage root must be a directory: {}",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a provider path to its location on disk.
    pub fn abspath(&self, path: &str) -> Result<PathBuf> {
        let path = normalize(path)?;
        if path.is_empty() {
            Ok(self.root.clone())
        } else {
            Ok(self.root.join(path))
        }
    }

    fn metadata_or_none(&self, path: &Path) -> Result<Option<fs::Metadata>> {
        match fs::metadata(path) {
            Ok(m) => Ok(Some(m)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn file_info(&self, rel: String, metadata: &fs::Metadata) -> FileInfo {
        // Fall back to the current time where the platform has no timestamps.
        let modified = metadata.modified().unwrap_or_else(|_| SystemTime::now());
        let created = metadata.created().unwrap_or(modified);
        let size = if metadata.is_dir() { 0 } else { metadata.len() };
        let mtime = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        FileInfo {
            created: DateTime::<Utc>::from(created),
            modified: DateTime::<Utc>::from(modified),
            name: basename(&rel).to_string(),
            size,
            etag: format!("{mtime:x}-{size:x}"),
            content_type: String::new(),
            is_dir: metadata.is_dir(),
            path: rel,
        }
    }

    fn require_exists(&self, path: &str) -> Result<PathBuf> {
        let abs = self.abspath(path)?;
        if !abs.exists() {
            return Err(StorageError::NotFound(path.to_string()));
        }
        Ok(abs)
    }

    /// Resolve both ends of a move or copy and clear a replaceable
    /// destination.
    fn prepare_transfer(&self, src: &str, dest: &str) -> Result<(PathBuf, PathBuf)> {
        let src = normalize(src)?;
        let dest = normalize(dest)?;
        let from = self.require_exists(&src)?;
        check_transfer(&src, &dest)?;

        let to = self.abspath(&dest)?;
        match self.metadata_or_none(&to)? {
            Some(m) => {
                check_replaceable(&dest, from.is_dir(), m.is_dir())?;
                remove_any(&to)?;
            }
            None => {
                let dir = parent(&dest);
                if !self.abspath(dir)?.is_dir() {
                    return Err(StorageError::NotFound(dir.to_string()));
                }
            }
        }
        Ok((from, to))
    }

    fn write_file(&self, path: &str, abs: &Path, mut file: File, buf: &mut dyn Read) -> Result<FileInfo> {
        io::copy(buf, &mut file)?;
        file.flush()?;
        drop(file);
        info!("Wrote: {}", abs.display());
        self.info(path)
    }
}

fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    for entry in WalkDir::new(from).sort_by_file_name() {
        let entry = entry.map_err(|e| StorageError::Io(e.into()))?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| StorageError::PathError(e.to_string()))?;
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Map a "no such file" error on a write to `NotFound` for the parent.
fn missing_parent(path: &str, e: io::Error) -> StorageError {
    if e.kind() == io::ErrorKind::NotFound {
        let path = normalize(path).unwrap_or_else(|_| path.to_string());
        StorageError::NotFound(parent(&path).to_string())
    } else {
        e.into()
    }
}

fn remove_any(path: &Path) -> io::Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

impl Provider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.abspath(path)?.exists())
    }

    fn resource_type(&self, path: &str) -> Result<ResourceType> {
        if normalize(path)?.is_empty() {
            return Ok(ResourceType::StorageRoot);
        }
        let abs = self.abspath(path)?;
        Ok(match self.metadata_or_none(&abs)? {
            None => ResourceType::NoExists,
            Some(m) if m.is_dir() => ResourceType::Directory,
            Some(_) => ResourceType::File,
        })
    }

    fn info(&self, path: &str) -> Result<FileInfo> {
        let rel = normalize(path)?;
        let abs = self.abspath(&rel)?;
        let metadata = self
            .metadata_or_none(&abs)?
            .ok_or_else(|| StorageError::NotFound(rel.clone()))?;
        Ok(self.file_info(rel, &metadata))
    }

    fn ls(&self, path: &str) -> Result<Vec<String>> {
        Ok(self.ll(path)?.into_iter().map(|x| x.name).collect())
    }

    fn ll(&self, path: &str) -> Result<Vec<FileInfo>> {
        let rel = normalize(path)?;
        let abs = self.abspath(&rel)?;
        if abs.is_file() {
            return Err(StorageError::PathError(format!("not a directory: {rel}")));
        }

        let entries = match fs::read_dir(&abs) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(rel))
            }
            Err(e) => return Err(e.into()),
        };

        let mut results = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let metadata = entry.metadata()?;
            results.push(self.file_info(super::join(&rel, &name), &metadata));
        }
        results.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(results)
    }

    fn read(&self, path: &str, buf: &mut dyn Write) -> Result<u64> {
        let abs = self.abspath(path)?;
        if abs.is_dir() {
            return Err(StorageError::PathError(format!("not a file: {path}")));
        }
        let mut file = match File::open(&abs) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(path.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(io::copy(&mut file, buf)?)
    }

    fn put(&self, path: &str, buf: &mut dyn Read) -> Result<FileInfo> {
        let abs = self.abspath(path)?;
        if abs.is_dir() {
            return Err(StorageError::InvalidTarget(path.to_string()));
        }
        let file = File::create(&abs).map_err(|e| missing_parent(path, e))?;
        self.write_file(path, &abs, file, buf)
    }

    fn create(&self, path: &str, buf: &mut dyn Read) -> Result<FileInfo> {
        let abs = self.abspath(path)?;
        if abs.exists() {
            return Err(StorageError::AlreadyExists(path.to_string()));
        }
        let file = match OpenOptions::new().write(true).create_new(true).open(&abs) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(StorageError::AlreadyExists(path.to_string()))
            }
            Err(e) => return Err(missing_parent(path, e)),
        };
        self.write_file(path, &abs, file, buf)
    }

    fn mkdir(&self, path: &str) -> Result<FileInfo> {
        let abs = self.abspath(path)?;
        match fs::create_dir(&abs) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(StorageError::AlreadyExists(path.to_string()))
            }
            Err(e) => return Err(missing_parent(path, e)),
        }
        info!("Created directory: {}", abs.display());
        self.info(path)
    }

    fn delete(&self, path: &str) -> Result<()> {
        check_deletable(&normalize(path)?)?;
        let abs = self.require_exists(path)?;
        remove_any(&abs)?;
        info!("Deleted: {}", abs.display());
        Ok(())
    }

    fn move_to(&self, src: &str, dest: &str) -> Result<()> {
        let (from, to) = self.prepare_transfer(src, dest)?;
        debug!("Moving {} -> {}", from.display(), to.display());
        fs::rename(&from, &to)?;
        Ok(())
    }

    fn copy(&self, src: &str, dest: &str) -> Result<()> {
        let (from, to) = self.prepare_transfer(src, dest)?;
        debug!("Copying {} -> {}", from.display(), to.display());
        if from.is_dir() {
            copy_tree(&from, &to)
        } else {
            fs::copy(&from, &to)?;
            Ok(())
        }
    }

    fn rename(&self, src: &str, name: &str) -> Result<()> {
        let src = normalize(src)?;
        let dest = super::join(parent(&src), basename(&normalize(name)?));
        self.move_to(&src, &dest)
    }

    fn download(&self, remote_path: &str, local_path: &Path) -> Result<()> {
        let from = self.require_exists(remote_path)?;
        if from.is_dir() {
            if local_path.exists() {
                remove_any(local_path)?;
            }
            copy_tree(&from, local_path)
        } else {
            // Ensure parent directory exists
            if let Some(parent) = local_path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(&from, local_path)?;
            Ok(())
        }
    }

    fn upload(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        if !local_path.exists() {
            return Err(StorageError::NotFound(local_path.display().to_string()));
        }
        let to = self.abspath(remote_path)?;
        if local_path.is_dir() {
            if to.exists() {
                check_deletable(&normalize(remote_path)?)?;
                remove_any(&to)?;
            }
            copy_tree(local_path, &to)
        } else {
            let mut file = File::open(local_path)?;
            self.put(remote_path, &mut file).map(|_| ())
        }
    }
}
