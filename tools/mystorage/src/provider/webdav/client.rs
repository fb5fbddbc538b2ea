use std::io::Write;

use log::debug;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use url::Url;

use crate::provider::{normalize, parent, Result, StorageError};

/// Minimal blocking WebDAV client: one method per verb the provider needs.
///
/// Status codes are mapped to [`StorageError`] here so the provider only sees
/// the storage taxonomy.
#[derive(Debug, Clone)]
pub struct DavClient {
    http: Client,
    base: Url,
    user: String,
    password: String,
}

impl DavClient {
    pub fn new(base: Url, user: &str, password: &str, verify: bool) -> Result<Self> {
        if base.cannot_be_a_base() {
            return Err(StorageError::PathError(format!("not a base URL: {base}")));
        }
        let http = Client::builder()
            .danger_accept_invalid_certs(!verify)
            .build()?;
        Ok(Self {
            http,
            base,
            user: user.to_string(),
            password: password.to_string(),
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// URL of a provider path below the base URL, with each segment
    /// percent-encoded.
    pub fn url(&self, path: &str) -> Result<Url> {
        let path = normalize(path)?;
        let mut url = self.base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| StorageError::PathError(format!("not a base URL: {}", self.base)))?;
            segments.pop_if_empty();
            for segment in path.split('/').filter(|s| !s.is_empty()) {
                segments.push(segment);
            }
        }
        Ok(url)
    }

    fn collection_url(&self, path: &str) -> Result<Url> {
        let mut url = self.url(path)?;
        if !url.path().ends_with('/') {
            url.path_segments_mut()
                .map_err(|_| StorageError::PathError(format!("not a base URL: {}", self.base)))?
                .push("");
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http
            .request(method, url)
            .basic_auth(&self.user, Some(&self.password))
    }

    fn send(&self, method: &Method, path: &str, request: RequestBuilder) -> Result<Response> {
        debug!("{} {}", method, path);
        let response = request.send()?;
        debug!("{} {} -> {}", method, path, response.status());
        Ok(response)
    }

    fn method(name: &'static [u8]) -> Result<Method> {
        Method::from_bytes(name).map_err(|e| StorageError::PathError(e.to_string()))
    }

    /// Issue a PROPFIND and return the multistatus body, or `NotFound`.
    pub fn propfind(&self, path: &str, depth: u8, body: &'static str) -> Result<String> {
        let method = Self::method(b"PROPFIND")?;
        let request = self
            .request(method.clone(), self.url(path)?)
            .header("Depth", depth.to_string())
            .header("Content-Type", "application/xml")
            .body(body);
        let response = self.send(&method, path, request)?;
        let response = check(&method, path, response)?;
        Ok(response.text()?)
    }

    pub fn get(&self, path: &str, buf: &mut dyn Write) -> Result<u64> {
        let request = self.request(Method::GET, self.url(path)?);
        let response = self.send(&Method::GET, path, request)?;
        let mut response = check(&Method::GET, path, response)?;
        Ok(response.copy_to(buf)?)
    }

    pub fn put(&self, path: &str, data: Vec<u8>) -> Result<()> {
        let request = self.request(Method::PUT, self.url(path)?).body(data);
        let response = self.send(&Method::PUT, path, request)?;
        if response.status() == StatusCode::CONFLICT {
            return Err(missing_parent(path));
        }
        check(&Method::PUT, path, response).map(|_| ())
    }

    pub fn mkcol(&self, path: &str) -> Result<()> {
        let method = Self::method(b"MKCOL")?;
        let request = self.request(method.clone(), self.collection_url(path)?);
        let response = self.send(&method, path, request)?;
        match response.status() {
            StatusCode::METHOD_NOT_ALLOWED => Err(StorageError::AlreadyExists(path.to_string())),
            StatusCode::CONFLICT => Err(missing_parent(path)),
            _ => check(&method, path, response).map(|_| ()),
        }
    }

    pub fn delete(&self, path: &str) -> Result<()> {
        let request = self.request(Method::DELETE, self.url(path)?);
        let response = self.send(&Method::DELETE, path, request)?;
        check(&Method::DELETE, path, response).map(|_| ())
    }

    pub fn move_to(&self, src: &str, dest: &str) -> Result<()> {
        self.transfer(b"MOVE", src, dest)
    }

    pub fn copy(&self, src: &str, dest: &str) -> Result<()> {
        self.transfer(b"COPY", src, dest)
    }

    fn transfer(&self, verb: &'static [u8], src: &str, dest: &str) -> Result<()> {
        let method = Self::method(verb)?;
        let request = self
            .request(method.clone(), self.url(src)?)
            .header("Destination", self.url(dest)?.as_str())
            .header("Overwrite", "T")
            .header("Depth", "infinity");
        let response = self.send(&method, src, request)?;
        if response.status() == StatusCode::CONFLICT {
            return Err(missing_parent(dest));
        }
        check(&method, src, response).map(|_| ())
    }

    pub fn options(&self, path: &str) -> Result<HeaderMap> {
        let request = self.request(Method::OPTIONS, self.url(path)?);
        let response = self.send(&Method::OPTIONS, path, request)?;
        let response = check(&Method::OPTIONS, path, response)?;
        Ok(response.headers().clone())
    }
}

fn missing_parent(path: &str) -> StorageError {
    let path = normalize(path).unwrap_or_else(|_| path.to_string());
    StorageError::NotFound(parent(&path).to_string())
}

fn check(method: &Method, path: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else if status == StatusCode::NOT_FOUND {
        Err(StorageError::NotFound(path.to_string()))
    } else {
        Err(StorageError::Status {
            method: method.to_string(),
            path: path.to_string(),
            status: status.as_u16(),
        })
    }
}
