pub mod config;
pub mod diff;
pub mod provider;

pub mod mock;
pub mod names;

pub use config::{Config, ConfigError, LocalConfig, WebdavConfig};
pub use diff::{CleanupPolicy, DiffError, DiffHarness, DiffScope};
pub use mock::MemoryProvider;
pub use names::{NameDir, NamesError};
pub use provider::{
    ErrorKind, FileInfo, FileShape, LocalProvider, Provider, ResourceType, StorageError,
    WebdavProvider,
};
