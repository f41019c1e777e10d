//! Jobs: the opaque actions that bring a target up to date

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::{MkrunError, Result};
use crate::signal::StopSignal;

pub type JobFuture = BoxFuture<'static, Result<()>>;

/// An operation in a build.
#[derive(Clone)]
pub struct Job(Arc<dyn Fn() -> JobFuture + Send + Sync>);

impl Job {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self(Arc::new(move || f().boxed()))
    }

    /// Wrap a synchronous closure; it runs on tokio's blocking pool.
    pub fn blocking<F>(f: F) -> Self
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self::new(move || {
            let f = Arc::clone(&f);
            async move {
                tokio::task::spawn_blocking(move || f())
                    .await
                    .map_err(|e| MkrunError::job(format!("blocking job panicked: {e}")))?
            }
        })
    }

    pub fn call(&self) -> JobFuture {
        (self.0)()
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job").finish_non_exhaustive()
    }
}

/// Job shared by every target of a multi-target task; receives the target name.
#[derive(Clone)]
pub struct TargetJob(Arc<dyn Fn(String) -> JobFuture + Send + Sync>);

impl TargetJob {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self(Arc::new(move |name| f(name).boxed()))
    }

    /// Bind the job to one target.
    pub fn for_target(&self, name: &str) -> Job {
        let inner = Arc::clone(&self.0);
        let name = name.to_string();
        Job(Arc::new(move || inner(name.clone())))
    }
}

/// Job that keeps running until it finishes on its own or its stop signal fires.
#[derive(Clone)]
pub struct LongRunningJob(Arc<dyn Fn(StopSignal) -> JobFuture + Send + Sync>);

impl LongRunningJob {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(StopSignal) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self(Arc::new(move |stop| f(stop).boxed()))
    }

    pub fn call(&self, stop: StopSignal) -> JobFuture {
        (self.0)(stop)
    }

    /// Turn into an ordinary job observing `stop`.
    pub fn bind(&self, stop: StopSignal) -> Job {
        let inner = Arc::clone(&self.0);
        Job(Arc::new(move || inner(stop.clone())))
    }
}
