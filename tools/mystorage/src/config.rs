use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::provider::{webdav::DavClient, LocalProvider, Provider, StorageError, WebdavProvider};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "MYSTORAGE_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid WebDAV URL {url}: {source}")]
    Url { url: String, source: url::ParseError },

    #[error("No {0} backend configured")]
    Missing(&'static str),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub local: Option<LocalConfig>,
    pub webdav: Option<WebdavConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalConfig {
    pub root: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebdavConfig {
    pub user: String,
    pub password: String,
    pub protocol: String,
    pub host: String,
    pub port: u16,
    /// Check TLS certificates.
    pub verify: bool,
    pub base_path: String,
    pub webdav_root: String,
}

impl Default for WebdavConfig {
    fn default() -> Self {
        Self {
            user: "admin".to_string(),
            password: "admin".to_string(),
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 8080,
            verify: false,
            base_path: "remote.php/dav/files".to_string(),
            webdav_root: "/".to_string(),
        }
    }
}

impl WebdavConfig {
    /// `{protocol}://{host}:{port}/{base_path}/{user}`
    pub fn url(&self) -> String {
        format!(
            "{}://{}:{}/{}/{}",
            self.protocol, self.host, self.port, self.base_path, self.user
        )
    }

    /// The URL every request path is resolved against.
    pub fn endpoint(&self) -> Result<Url> {
        let root = self.webdav_root.trim_matches('/');
        let url = if root.is_empty() {
            format!("{}/", self.url())
        } else {
            format!("{}/{}/", self.url(), root)
        };
        Url::parse(&url).map_err(|source| ConfigError::Url { url, source })
    }

    pub fn client(&self) -> Result<DavClient> {
        Ok(DavClient::new(self.endpoint()?, &self.user, &self.password, self.verify)?)
    }

    pub fn provider(&self) -> Result<WebdavProvider> {
        Ok(WebdavProvider::new(self.client()?)?)
    }
}

impl LocalConfig {
    pub fn provider(&self) -> Result<LocalProvider> {
        Ok(LocalProvider::new(&self.root)?)
    }
}

impl Config {
    pub fn from_toml(text: &str, path: &Path) -> Result<Self> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text, path)
    }

    /// `<config dir>/mystorage/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("mystorage").join("config.toml"))
    }

    /// Load from `explicit`, else `$MYSTORAGE_CONFIG`, else the default
    /// location. Only a missing default file falls back to defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            return Self::load(Path::new(&env_path));
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => {
                debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Every configured backend, local first.
    pub fn providers(&self) -> Result<Vec<Box<dyn Provider>>> {
        let mut providers: Vec<Box<dyn Provider>> = Vec::new();
        if let Some(local) = &self.local {
            providers.push(Box::new(local.provider()?));
        }
        if let Some(webdav) = &self.webdav {
            providers.push(Box::new(webdav.provider()?));
        }
        Ok(providers)
    }
}
