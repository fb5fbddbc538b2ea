//! Differential testing across providers.
//!
//! A [`DiffHarness`] runs the same call against every provider it wraps and
//! fails with [`DiffError::Divergence`] as soon as one answers differently
//! from the first.

mod scenario;

pub use scenario::run_scenario;

use std::collections::HashSet;
use std::fmt;
use std::ops::Deref;

use log::{debug, warn};
use thiserror::Error;

use crate::provider::{join, normalize, FileShape, Provider, ResourceType, StorageError};

#[derive(Debug, Error)]
pub enum DiffError {
    #[error("Harness root must not be empty")]
    EmptyRoot,

    #[error("At least two providers are required, got {0}")]
    TooFewProviders(usize),

    #[error("{provider}.{operation}({args}) actual != expect: {actual} != {expect} (reference: {reference})")]
    Divergence {
        reference: String,
        provider: String,
        operation: String,
        args: String,
        actual: String,
        expect: String,
    },

    #[error("Unexpected result from {operation}: {message}")]
    Expectation { operation: String, message: String },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, DiffError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CleanupPolicy {
    /// Remove the root when the scope is entered and again when it ends.
    #[default]
    EnterAndExit,
    /// Remove the root only on entry, leaving artifacts for inspection.
    EnterOnly,
}

/// Run `f` against each labelled implementation in order and check that every
/// result equals the first one. Returns the first result.
///
/// Works for any set of implementations of any contract; `compare = false`
/// still runs every call but skips the equality check.
pub fn compare_all<P, T, F>(
    operation: &str,
    args: &str,
    impls: &[(&str, &P)],
    compare: bool,
    mut f: F,
) -> Result<T>
where
    P: ?Sized,
    T: PartialEq + fmt::Debug,
    F: FnMut(&P) -> T,
{
    let mut iter = impls.iter();
    let &(reference, first) = iter.next().ok_or(DiffError::TooFewProviders(0))?;
    let actual = f(first);

    for &(label, imp) in iter {
        let expect = f(imp);
        if compare && actual != expect {
            return Err(DiffError::Divergence {
                reference: reference.to_string(),
                provider: label.to_string(),
                operation: operation.to_string(),
                args: args.to_string(),
                actual: format!("{actual:?}"),
                expect: format!("{expect:?}"),
            });
        }
    }

    Ok(actual)
}

/// A provider call's result: successes compare by value, failures by
/// [`ErrorKind`](crate::provider::ErrorKind).
pub struct Outcome<T>(pub std::result::Result<T, StorageError>);

impl<T: PartialEq> PartialEq for Outcome<T> {
    fn eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (Ok(a), Ok(b)) => a == b,
            (Err(a), Err(b)) => a.kind() == b.kind(),
            _ => false,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Outcome<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Ok(value) => write!(f, "{value:?}"),
            Err(e) => write!(f, "{:?} error ({e})", e.kind()),
        }
    }
}

/// Delete `root` from every provider where it exists. Failures are logged
/// and otherwise ignored.
pub fn cleanup<'a>(root: &str, providers: impl IntoIterator<Item = &'a dyn Provider>) {
    for provider in providers {
        let result = provider.exists(root).and_then(|exists| {
            if exists {
                provider.delete(root)
            } else {
                Ok(())
            }
        });
        match result {
            Ok(()) => debug!("Cleaned up {} on {}", root, provider.name()),
            Err(e) => warn!("Cleanup of {} on {} failed: {}", root, provider.name(), e),
        }
    }
}

/// Scope guard that cleans `root` on one provider.
pub struct Cleanup<'a> {
    root: String,
    provider: &'a dyn Provider,
    policy: CleanupPolicy,
}

impl<'a> Cleanup<'a> {
    pub fn new(root: impl Into<String>, provider: &'a dyn Provider, policy: CleanupPolicy) -> Self {
        let root = root.into();
        cleanup(&root, [provider]);
        Self {
            root,
            provider,
            policy,
        }
    }
}

impl Drop for Cleanup<'_> {
    fn drop(&mut self) {
        if self.policy == CleanupPolicy::EnterAndExit {
            cleanup(&self.root, [self.provider]);
        }
    }
}

pub struct DiffHarness {
    root: String,
    providers: Vec<Box<dyn Provider>>,
    ignore: HashSet<String>,
    policy: CleanupPolicy,
}

impl fmt::Debug for DiffHarness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiffHarness")
            .field("root", &self.root)
            .field("providers", &self.providers.iter().map(|p| p.name()).collect::<Vec<_>>())
            .field("ignore", &self.ignore)
            .field("policy", &self.policy)
            .finish()
    }
}

impl DiffHarness {
    pub fn new(root: impl Into<String>, providers: Vec<Box<dyn Provider>>) -> Result<Self> {
        // Cleanup deletes the root, so it must name something below the
        // storage root on every provider.
        let root = normalize(&root.into())?;
        if root.is_empty() {
            return Err(DiffError::EmptyRoot);
        }
        if providers.len() < 2 {
            return Err(DiffError::TooFewProviders(providers.len()));
        }
        Ok(Self {
            root,
            providers,
            ignore: HashSet::new(),
            policy: CleanupPolicy::default(),
        })
    }

    /// Operations whose results are allowed to differ between providers.
    pub fn ignore<I, S>(mut self, operations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore.extend(operations.into_iter().map(Into::into));
        self
    }

    pub fn policy(mut self, policy: CleanupPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// `root` joined with `name`.
    pub fn path(&self, name: &str) -> String {
        join(&self.root, name.trim_start_matches('/'))
    }

    pub fn providers(&self) -> impl Iterator<Item = &dyn Provider> {
        self.providers.iter().map(|p| p.as_ref())
    }

    /// Clean the root on every provider and return a guard that cleans it
    /// again when dropped (unless the policy is `EnterOnly`).
    pub fn enter(&self) -> DiffScope<'_> {
        cleanup(&self.root, self.providers());
        DiffScope { harness: self }
    }

    /// Run `f` on every provider and compare the outcomes unless `operation`
    /// is ignored. Returns the first provider's outcome.
    pub fn iterate<T, F>(&self, operation: &str, args: &str, mut f: F) -> Result<T>
    where
        T: PartialEq + fmt::Debug,
        F: FnMut(&dyn Provider) -> crate::provider::Result<T>,
    {
        let labelled: Vec<(&str, &dyn Provider)> =
            self.providers().map(|p| (p.name(), p)).collect();
        let compare = !self.ignore.contains(operation);
        debug!("{}({}) on {} providers", operation, args, labelled.len());

        let outcome = compare_all(operation, args, &labelled, compare, |p| Outcome(f(p)))?;
        outcome.0.map_err(DiffError::Storage)
    }

    pub fn exists(&self, path: &str) -> Result<bool> {
        self.iterate("exists", &format!("{path:?}"), |p| p.exists(path))
    }

    pub fn resource_type(&self, path: &str) -> Result<ResourceType> {
        self.iterate("resource_type", &format!("{path:?}"), |p| p.resource_type(path))
    }

    pub fn info(&self, path: &str) -> Result<FileShape> {
        self.iterate("info", &format!("{path:?}"), |p| p.info(path).map(|i| i.shape()))
    }

    pub fn ls(&self, path: &str) -> Result<Vec<String>> {
        self.iterate("ls", &format!("{path:?}"), |p| p.ls(path))
    }

    pub fn ll(&self, path: &str) -> Result<Vec<FileShape>> {
        self.iterate("ll", &format!("{path:?}"), |p| {
            p.ll(path).map(|xs| xs.iter().map(|x| x.shape()).collect())
        })
    }

    pub fn read_bytes(&self, path: &str) -> Result<Vec<u8>> {
        self.iterate("read_bytes", &format!("{path:?}"), |p| p.read_bytes(path))
    }

    pub fn put_bytes(&self, path: &str, data: &[u8]) -> Result<FileShape> {
        let args = format!("{path:?}, {} bytes", data.len());
        self.iterate("put_bytes", &args, |p| p.put_bytes(path, data).map(|i| i.shape()))
    }

    pub fn create_bytes(&self, path: &str, data: &[u8]) -> Result<FileShape> {
        let args = format!("{path:?}, {} bytes", data.len());
        self.iterate("create_bytes", &args, |p| p.create_bytes(path, data).map(|i| i.shape()))
    }

    pub fn touch(&self, path: &str) -> Result<FileShape> {
        self.iterate("touch", &format!("{path:?}"), |p| p.touch(path).map(|i| i.shape()))
    }

    pub fn mkdir(&self, path: &str) -> Result<FileShape> {
        self.iterate("mkdir", &format!("{path:?}"), |p| p.mkdir(path).map(|i| i.shape()))
    }

    pub fn delete(&self, path: &str) -> Result<()> {
        self.iterate("delete", &format!("{path:?}"), |p| p.delete(path))
    }

    pub fn move_to(&self, src: &str, dest: &str) -> Result<()> {
        self.iterate("move_to", &format!("{src:?}, {dest:?}"), |p| p.move_to(src, dest))
    }

    pub fn copy(&self, src: &str, dest: &str) -> Result<()> {
        self.iterate("copy", &format!("{src:?}, {dest:?}"), |p| p.copy(src, dest))
    }

    pub fn rename(&self, src: &str, name: &str) -> Result<()> {
        self.iterate("rename", &format!("{src:?}, {name:?}"), |p| p.rename(src, name))
    }
}

/// Live harness scope; see [`DiffHarness::enter`].
pub struct DiffScope<'a> {
    harness: &'a DiffHarness,
}

impl Deref for DiffScope<'_> {
    type Target = DiffHarness;

    fn deref(&self) -> &DiffHarness {
        self.harness
    }
}

impl Drop for DiffScope<'_> {
    fn drop(&mut self) {
        if self.harness.policy == CleanupPolicy::EnterAndExit {
            cleanup(&self.harness.root, self.harness.providers());
        }
    }
}
