use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use crate::provider::{
    basename, check_deletable, check_replaceable, check_transfer, join, normalize, parent,
    FileInfo, Provider, ResourceType, Result, StorageError,
};

#[derive(Debug, Clone)]
struct MockFile {
    content: Vec<u8>,
    created: DateTime<Utc>,
    modified: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Namespace {
    files: BTreeMap<String, MockFile>,
    directories: BTreeSet<String>,
}

impl Namespace {
    fn is_dir(&self, path: &str) -> bool {
        path.is_empty() || self.directories.contains(path)
    }

    fn exists(&self, path: &str) -> bool {
        self.is_dir(path) || self.files.contains_key(path)
    }

    fn require_parent(&self, path: &str) -> Result<()> {
        let parent = parent(path);
        if self.is_dir(parent) {
            Ok(())
        } else {
            Err(StorageError::NotFound(parent.to_string()))
        }
    }

    fn info(&self, path: &str) -> Option<FileInfo> {
        if let Some(file) = self.files.get(path) {
            Some(FileInfo {
                created: file.created,
                modified: file.modified,
                name: basename(path).to_string(),
                size: file.content.len() as u64,
                etag: format!("{:x}-{:x}", file.modified.timestamp(), file.content.len()),
                content_type: String::new(),
                is_dir: false,
                path: path.to_string(),
            })
        } else if self.is_dir(path) {
            let now = Utc::now();
            Some(FileInfo {
                created: now,
                modified: now,
                name: basename(path).to_string(),
                size: 0,
                etag: String::new(),
                content_type: String::new(),
                is_dir: true,
                path: path.to_string(),
            })
        } else {
            None
        }
    }

    /// Every file and directory below `path`, excluding `path` itself.
    fn descendants(&self, path: &str) -> (Vec<String>, Vec<String>) {
        let prefix = format!("{path}/");
        let below = |p: &&String| path.is_empty() || p.starts_with(&prefix);
        (
            self.files.keys().filter(below).cloned().collect(),
            self.directories.iter().filter(below).cloned().collect(),
        )
    }

    fn remove(&mut self, path: &str) {
        let (files, dirs) = self.descendants(path);
        for f in files {
            self.files.remove(&f);
        }
        for d in dirs {
            self.directories.remove(&d);
        }
        self.files.remove(path);
        self.directories.remove(path);
    }

    fn copy_tree(&mut self, src: &str, dest: &str) {
        let rebase = |p: &str| format!("{dest}{}", &p[src.len()..]);
        if let Some(file) = self.files.get(src).cloned() {
            self.files.insert(dest.to_string(), file);
            return;
        }
        let (files, dirs) = self.descendants(src);
        self.directories.insert(dest.to_string());
        for d in dirs {
            self.directories.insert(rebase(&d));
        }
        for f in files {
            if let Some(file) = self.files.get(&f).cloned() {
                self.files.insert(rebase(&f), file);
            }
        }
    }
}

/// In-memory provider. Clones share one namespace.
#[derive(Debug, Clone)]
pub struct MemoryProvider {
    label: String,
    namespace: Arc<Mutex<Namespace>>,
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::named("memory")
    }

    pub fn named(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            namespace: Arc::new(Mutex::new(Namespace::default())),
        }
    }

    fn namespace(&self) -> MutexGuard<'_, Namespace> {
        self.namespace.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_file(&self, path: &str, content: Vec<u8>, modified: DateTime<Utc>) {
        let mut ns = self.namespace();
        ns.files.insert(
            path.trim_matches('/').to_string(),
            MockFile {
                content,
                created: modified,
                modified,
            },
        );
    }

    pub fn add_directory(&self, path: &str) {
        self.namespace().directories.insert(path.trim_matches('/').to_string());
    }

    pub fn get_file_content(&self, path: &str) -> Option<Vec<u8>> {
        self.namespace()
            .files
            .get(path.trim_matches('/'))
            .map(|f| f.content.clone())
    }

    pub fn list_all_files(&self) -> Vec<String> {
        self.namespace().files.keys().cloned().collect()
    }

    fn write(&self, path: &str, buf: &mut dyn Read, must_be_new: bool) -> Result<FileInfo> {
        let rel = normalize(path)?;
        let mut content = Vec::new();

        let mut ns = self.namespace();
        if must_be_new && ns.exists(&rel) {
            return Err(StorageError::AlreadyExists(rel));
        }
        if ns.is_dir(&rel) {
            return Err(StorageError::InvalidTarget(rel));
        }
        ns.require_parent(&rel)?;

        buf.read_to_end(&mut content)?;
        let now = Utc::now();
        let created = ns.files.get(&rel).map_or(now, |f| f.created);
        ns.files.insert(
            rel.clone(),
            MockFile {
                content,
                created,
                modified: now,
            },
        );
        ns.info(&rel).ok_or(StorageError::NotFound(rel))
    }

    fn transfer(&self, src: &str, dest: &str, keep_source: bool) -> Result<()> {
        let src = normalize(src)?;
        let dest = normalize(dest)?;
        let mut ns = self.namespace();
        if !ns.exists(&src) {
            return Err(StorageError::NotFound(src));
        }
        check_transfer(&src, &dest)?;

        if ns.exists(&dest) {
            check_replaceable(&dest, ns.is_dir(&src), ns.is_dir(&dest))?;
            ns.remove(&dest);
        } else {
            ns.require_parent(&dest)?;
        }
        ns.copy_tree(&src, &dest);
        if !keep_source {
            ns.remove(&src);
        }
        Ok(())
    }
}

impl Provider for MemoryProvider {
    fn name(&self) -> &str {
        &self.label
    }

    fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.namespace().exists(&normalize(path)?))
    }

    fn resource_type(&self, path: &str) -> Result<ResourceType> {
        let rel = normalize(path)?;
        let ns = self.namespace();
        Ok(if rel.is_empty() {
            ResourceType::StorageRoot
        } else if ns.directories.contains(&rel) {
            ResourceType::Directory
        } else if ns.files.contains_key(&rel) {
            ResourceType::File
        } else {
            ResourceType::NoExists
        })
    }

    fn info(&self, path: &str) -> Result<FileInfo> {
        let rel = normalize(path)?;
        self.namespace()
            .info(&rel)
            .ok_or(StorageError::NotFound(rel))
    }

    fn ls(&self, path: &str) -> Result<Vec<String>> {
        Ok(self.ll(path)?.into_iter().map(|x| x.name).collect())
    }

    fn ll(&self, path: &str) -> Result<Vec<FileInfo>> {
        let rel = normalize(path)?;
        let ns = self.namespace();
        if ns.files.contains_key(&rel) {
            return Err(StorageError::PathError(format!("not a directory: {rel}")));
        }
        if !ns.is_dir(&rel) {
            return Err(StorageError::NotFound(rel));
        }

        let children: BTreeSet<&String> = ns
            .files
            .keys()
            .chain(ns.directories.iter())
            .filter(|p| !p.is_empty() && parent(p) == rel)
            .collect();

        let mut listing: Vec<FileInfo> = children.into_iter().filter_map(|p| ns.info(p)).collect();
        listing.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(listing)
    }

    fn read(&self, path: &str, buf: &mut dyn Write) -> Result<u64> {
        let rel = normalize(path)?;
        let ns = self.namespace();
        if ns.is_dir(&rel) {
            return Err(StorageError::PathError(format!("not a file: {rel}")));
        }
        let content = ns
            .files
            .get(&rel)
            .map(|f| f.content.clone())
            .ok_or(StorageError::NotFound(rel))?;
        drop(ns);
        buf.write_all(&content)?;
        Ok(content.len() as u64)
    }

    fn put(&self, path: &str, buf: &mut dyn Read) -> Result<FileInfo> {
        self.write(path, buf, false)
    }

    fn create(&self, path: &str, buf: &mut dyn Read) -> Result<FileInfo> {
        self.write(path, buf, true)
    }

    fn mkdir(&self, path: &str) -> Result<FileInfo> {
        let rel = normalize(path)?;
        let mut ns = self.namespace();
        if ns.exists(&rel) {
            return Err(StorageError::AlreadyExists(rel));
        }
        ns.require_parent(&rel)?;
        ns.directories.insert(rel.clone());
        ns.info(&rel).ok_or(StorageError::NotFound(rel))
    }

    fn delete(&self, path: &str) -> Result<()> {
        let rel = normalize(path)?;
        check_deletable(&rel)?;
        let mut ns = self.namespace();
        if !ns.exists(&rel) {
            return Err(StorageError::NotFound(rel));
        }
        ns.remove(&rel);
        Ok(())
    }

    fn move_to(&self, src: &str, dest: &str) -> Result<()> {
        self.transfer(src, dest, false)
    }

    fn copy(&self, src: &str, dest: &str) -> Result<()> {
        self.transfer(src, dest, true)
    }

    fn rename(&self, src: &str, name: &str) -> Result<()> {
        let src = normalize(src)?;
        let dest = join(parent(&src), basename(&normalize(name)?));
        self.move_to(&src, &dest)
    }

    fn download(&self, remote_path: &str, local_path: &Path) -> Result<()> {
        let info = self.info(remote_path)?;
        if info.is_dir {
            if local_path.is_dir() {
                fs::remove_dir_all(local_path)?;
            } else if local_path.exists() {
                fs::remove_file(local_path)?;
            }
            fs::create_dir_all(local_path)?;
            for child in self.ll(&info.path)? {
                self.download(&child.path, &local_path.join(&child.name))?;
            }
        } else {
            if let Some(parent) = local_path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(local_path, self.read_bytes(&info.path)?)?;
        }
        Ok(())
    }

    fn upload(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        if !local_path.exists() {
            return Err(StorageError::NotFound(local_path.display().to_string()));
        }
        if local_path.is_dir() {
            if self.exists(remote_path)? {
                self.delete(remote_path)?;
            }
            self.mkdir(remote_path)?;
            for entry in fs::read_dir(local_path)? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().into_owned();
                self.upload(&entry.path(), &join(&normalize(remote_path)?, &name))?;
            }
            Ok(())
        } else {
            let mut file = fs::File::open(local_path)?;
            self.put(remote_path, &mut file).map(|_| ())
        }
    }
}
