mod client;
pub mod propfind;

pub use client::DavClient;

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use log::{debug, info};
use percent_encoding::percent_decode_str;
use reqwest::header::HeaderMap;

use self::propfind::{convert_info, href_to_path, parse_multistatus, RawEntry, PROPFIND_BODY, QUOTA_BODY};
use super::{
    basename, check_deletable, check_replaceable, check_transfer, join, normalize, parent,
    FileInfo, Provider, ResourceType, Result, StorageError,
};

/// Provider backed by a remote WebDAV server.
#[derive(Debug, Clone)]
pub struct WebdavProvider {
    client: DavClient,
    base_path: String,
}

impl WebdavProvider {
    pub fn new(client: DavClient) -> Result<Self> {
        let base_path = percent_decode_str(client.base().path())
            .decode_utf8()
            .map_err(|e| StorageError::PathError(e.to_string()))?
            .trim_matches('/')
            .to_string();
        Ok(Self { client, base_path })
    }

    pub fn client(&self) -> &DavClient {
        &self.client
    }

    /// Verify the credentials. The protocol has no dedicated call for this,
    /// so a quota lookup stands in; a rejected login surfaces as a 401
    /// status error.
    pub fn login(&self) -> Result<bool> {
        self.free().map(|_| true)
    }

    /// Available quota in bytes, if the server reports one.
    pub fn free(&self) -> Result<Option<u64>> {
        let body = self.client.propfind("", 0, QUOTA_BODY)?;
        let entries = parse_multistatus(&body)?;
        let available = entries
            .first()
            .and_then(|e| e.quota_available.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty());

        match available {
            None => Ok(None),
            Some(value) => value
                .parse::<i64>()
                .map(|v| u64::try_from(v).ok())
                .map_err(|e| StorageError::Malformed(format!("bad quota {value}: {e}"))),
        }
    }

    /// Response headers of an OPTIONS request (`DAV`, `Allow`, ...).
    pub fn options(&self, path: &str) -> Result<HeaderMap> {
        self.client.options(path)
    }

    fn propfind(&self, path: &str, depth: u8) -> Result<Vec<(String, RawEntry)>> {
        let body = self.client.propfind(path, depth, PROPFIND_BODY)?;
        parse_multistatus(&body)?
            .into_iter()
            .map(|raw| Ok((href_to_path(&raw.href, &self.base_path)?, raw)))
            .collect()
    }

    /// Metadata for `path`, treating a 404 as absence.
    fn stat(&self, path: &str) -> Result<Option<FileInfo>> {
        let rel = normalize(path)?;
        let entries = match self.propfind(&rel, 0) {
            Ok(entries) => entries,
            Err(StorageError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let (found, raw) = entries
            .into_iter()
            .next()
            .ok_or_else(|| StorageError::Malformed(format!("empty multistatus for {rel}")))?;
        debug!("stat {} -> {}", rel, found);
        convert_info(&raw, rel).map(Some)
    }

    /// Check both ends of a move or copy before the request is sent. The
    /// server replaces a destination of the same kind (`Overwrite: T`).
    fn prepare_transfer(&self, src: &str, dest: &str) -> Result<(String, String)> {
        let src = normalize(src)?;
        let dest = normalize(dest)?;
        let source = self
            .stat(&src)?
            .ok_or_else(|| StorageError::NotFound(src.clone()))?;
        check_transfer(&src, &dest)?;
        if let Some(target) = self.stat(&dest)? {
            check_replaceable(&dest, source.is_dir, target.is_dir)?;
        }
        Ok((src, dest))
    }

    fn upload_to(&self, buf: &mut dyn Read, path: &str) -> Result<FileInfo> {
        let mut data = Vec::new();
        buf.read_to_end(&mut data)?;
        self.client.put(path, data)?;
        info!("Uploaded: {}", path);
        self.info(path)
    }
}

impl Provider for WebdavProvider {
    fn name(&self) -> &str {
        "webdav"
    }

    fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.stat(path)?.is_some())
    }

    fn resource_type(&self, path: &str) -> Result<ResourceType> {
        if normalize(path)?.is_empty() {
            return Ok(ResourceType::StorageRoot);
        }
        Ok(match self.stat(path)? {
            None => ResourceType::NoExists,
            Some(info) => info.resource_type(),
        })
    }

    fn info(&self, path: &str) -> Result<FileInfo> {
        self.stat(path)?
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    fn ls(&self, path: &str) -> Result<Vec<String>> {
        Ok(self.ll(path)?.into_iter().map(|x| x.name).collect())
    }

    fn ll(&self, path: &str) -> Result<Vec<FileInfo>> {
        let rel = normalize(path)?;
        let mut listing = Vec::new();
        let mut is_dir = rel.is_empty();

        for (child, raw) in self.propfind(&rel, 1)? {
            if child == rel {
                is_dir = is_dir || raw.is_dir == Some(true);
                continue;
            }
            let mut info = convert_info(&raw, child)?;
            // Listings are keyed by path segment, never by display name.
            info.name = basename(&info.path).to_string();
            listing.push(info);
        }

        if !is_dir && listing.is_empty() {
            return Err(StorageError::PathError(format!("not a directory: {rel}")));
        }
        listing.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(listing)
    }

    fn read(&self, path: &str, buf: &mut dyn Write) -> Result<u64> {
        self.client.get(path, buf)
    }

    fn put(&self, path: &str, buf: &mut dyn Read) -> Result<FileInfo> {
        // A missing resource stats as NoExists rather than an error.
        match self.resource_type(path)? {
            ResourceType::Directory | ResourceType::StorageRoot => {
                Err(StorageError::InvalidTarget(path.to_string()))
            }
            _ => self.upload_to(buf, path),
        }
    }

    fn create(&self, path: &str, buf: &mut dyn Read) -> Result<FileInfo> {
        if self.exists(path)? {
            return Err(StorageError::AlreadyExists(path.to_string()));
        }
        self.upload_to(buf, path)
    }

    fn mkdir(&self, path: &str) -> Result<FileInfo> {
        self.client.mkcol(path)?;
        info!("Created directory: {}", path);
        self.info(path)
    }

    fn delete(&self, path: &str) -> Result<()> {
        check_deletable(&normalize(path)?)?;
        self.client.delete(path)?;
        info!("Deleted: {}", path);
        Ok(())
    }

    fn move_to(&self, src: &str, dest: &str) -> Result<()> {
        let (src, dest) = self.prepare_transfer(src, dest)?;
        self.client.move_to(&src, &dest)
    }

    fn copy(&self, src: &str, dest: &str) -> Result<()> {
        let (src, dest) = self.prepare_transfer(src, dest)?;
        self.client.copy(&src, &dest)
    }

    fn rename(&self, src: &str, name: &str) -> Result<()> {
        let src = normalize(src)?;
        let dest = join(parent(&src), basename(&normalize(name)?));
        self.move_to(&src, &dest)
    }

    fn download(&self, remote_path: &str, local_path: &Path) -> Result<()> {
        let info = self.info(remote_path)?;
        if info.is_dir {
            if local_path.exists() {
                if local_path.is_dir() {
                    fs::remove_dir_all(local_path)?;
                } else {
                    fs::remove_file(local_path)?;
                }
            }
            fs::create_dir_all(local_path)?;
            for child in self.ll(&info.path)? {
                self.download(&child.path, &local_path.join(&child.name))?;
            }
            Ok(())
        } else {
            if let Some(parent) = local_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = File::create(local_path)?;
            self.client.get(&info.path, &mut file)?;
            file.flush()?;
            debug!("Downloaded {} -> {}", info.path, local_path.display());
            Ok(())
        }
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

            let mut entries = fs::read_dir(local_path)?.collect::<std::io::Result<Vec<_>>>()?;
            entries.sort_by_key(|e| e.file_name());
            for entry in entries {
                let name = entry.file_name().to_string_lossy().into_owned();
                self.upload(&entry.path(), &join(&normalize(remote_path)?, &name))?;
            }
            Ok(())
        } else {
            let mut file = File::open(local_path)?;
            self.put(remote_path, &mut file).map(|_| ())
        }
    }
}
