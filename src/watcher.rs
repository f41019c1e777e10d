//! Change notification sources for watch loops
//!
//! The watch loop only needs two things: a way to subscribe to a path and a
//! stream of changed-path events. [`FsWatcherFactory`] provides both on top of
//! the `notify` crate; tests plug in their own [`WatcherFactory`].

use std::path::{Path, PathBuf};

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::error::{MkrunError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Create,
    Modify,
    Remove,
    Other,
}

impl From<&EventKind> for ChangeKind {
    fn from(kind: &EventKind) -> Self {
        match kind {
            EventKind::Create(_) => Self::Create,
            EventKind::Modify(_) => Self::Modify,
            EventKind::Remove(_) => Self::Remove,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

impl ChangeEvent {
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// Events delivered to a watch loop; errors are reported but not fatal.
pub type ChangeMessage = std::result::Result<ChangeEvent, MkrunError>;

/// Subscription side of a change source. Dropping it unsubscribes everything.
pub trait PathWatcher: Send {
    fn watch(&mut self, path: &Path) -> Result<()>;
}

/// Creates a subscription together with the channel its events arrive on.
pub trait WatcherFactory: Send + Sync {
    fn create(&self) -> Result<(Box<dyn PathWatcher>, mpsc::UnboundedReceiver<ChangeMessage>)>;
}

/// OS file notifications through `notify`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsWatcherFactory;

struct FsWatcher {
    inner: RecommendedWatcher,
}

impl PathWatcher for FsWatcher {
    fn watch(&mut self, path: &Path) -> Result<()> {
        self.inner.watch(path, RecursiveMode::NonRecursive)?;
        Ok(())
    }
}

impl WatcherFactory for FsWatcherFactory {
    fn create(&self) -> Result<(Box<dyn PathWatcher>, mpsc::UnboundedReceiver<ChangeMessage>)> {
        let (tx, rx) = mpsc::unbounded_channel();

        // Called synchronously by notify whenever an event arrives.
        let inner = notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
            Ok(event) => {
                let kind = ChangeKind::from(&event.kind);
                for path in event.paths {
                    let _ = tx.send(Ok(ChangeEvent { path, kind }));
                }
            }
            Err(err) => {
                let _ = tx.send(Err(err.into()));
            }
        })?;

        Ok((Box::new(FsWatcher { inner }), rx))
    }
}
