//! Modification-time probes
//!
//! A target's timestamp is `None` when it has never been produced; such a
//! target is always out of date.

use std::future::Future;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::Result;

/// Last time a target's artifacts were modified; `None` is the zero time.
pub type Timestamp = Option<SystemTime>;

/// Stat a file. A missing file is `Ok(None)`, other failures are errors.
pub fn file_mod_time(path: impl AsRef<Path>) -> Result<Timestamp> {
    match std::fs::metadata(path) {
        Ok(meta) => Ok(Some(meta.modified()?)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Custom probe overriding the default "stat a file named like the task".
#[derive(Clone)]
pub struct ModTime(Arc<dyn Fn() -> BoxFuture<'static, Result<Timestamp>> + Send + Sync>);

impl ModTime {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Timestamp>> + Send + 'static,
    {
        Self(Arc::new(move || f().boxed()))
    }

    pub async fn probe(&self) -> Result<Timestamp> {
        (self.0)().await
    }
}

impl std::fmt::Debug for ModTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModTime").finish_non_exhaustive()
    }
}

/// Probe shared by a multi-target task; receives the target name.
#[derive(Clone)]
pub struct TargetModTime(Arc<dyn Fn(String) -> BoxFuture<'static, Result<Timestamp>> + Send + Sync>);

impl TargetModTime {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Timestamp>> + Send + 'static,
    {
        Self(Arc::new(move |name| f(name).boxed()))
    }

    pub fn for_target(&self, name: &str) -> ModTime {
        let inner = Arc::clone(&self.0);
        let name = name.to_string();
        ModTime(Arc::new(move || inner(name.clone())))
    }
}
