//! Tasks and the per-task staleness state machine
//!
//! A [`Task`] is resolved at most once per generation: the first caller holds
//! the task lock while dependencies are resolved and the job runs, every later
//! caller gets the cached result until [`Target::reset`] is called.

use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::dependency::Dependencies;
use crate::error::{MkrunError, Result};
use crate::job::Job;
use crate::modtime::{file_mod_time, ModTime, Timestamp};
use crate::runner::Runner;
use crate::tasks::Tasks;

/// Behaviour shared by every kind of target the resolver can drive.
pub trait Target: Send + Sync {
    /// Bring the target and its dependencies up to date, returning the
    /// target's timestamp.
    fn run<'a>(&'a self, tasks: &'a Tasks, runner: &'a Runner) -> BoxFuture<'a, Result<Timestamp>>;

    fn depends_on(&self) -> Option<Arc<dyn Dependencies>>;

    /// Forget the cached result so the next `run` re-evaluates.
    fn reset(&self) -> BoxFuture<'_, ()>;
}

/// Provides one or more named targets to a [`Tasks`] registry.
pub trait TaskGetter: Send + Sync {
    fn names(&self) -> Vec<String>;

    fn get_task(&self, name: &str) -> Option<&dyn Target>;
}

#[derive(Debug, Default)]
struct TaskState {
    mod_time: Timestamp,
    done: bool,
    err: Option<MkrunError>,
}

impl TaskState {
    fn result(&self) -> Result<Timestamp> {
        match &self.err {
            Some(err) => Err(err.clone()),
            None => Ok(self.mod_time),
        }
    }
}

enum Resolved {
    Time(Timestamp),
    Failed(String),
}

/// A named build target.
///
/// Like make, if a file named like the task exists it is taken to be the
/// task's output and its modification time is compared with those of the
/// dependencies. A custom [`ModTime`] probe replaces that check.
pub struct Task {
    name: String,
    dependencies: Option<Arc<dyn Dependencies>>,
    job: Option<Job>,
    mod_time: Option<ModTime>,
    state: Mutex<TaskState>,
}

impl Task {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dependencies: None,
            job: None,
            mod_time: None,
            state: Mutex::new(TaskState::default()),
        }
    }

    pub fn with_dependencies(mut self, deps: impl Dependencies + 'static) -> Self {
        self.dependencies = Some(Arc::new(deps));
        self
    }

    pub(crate) fn with_dependency_source(mut self, deps: Option<Arc<dyn Dependencies>>) -> Self {
        self.dependencies = deps;
        self
    }

    pub fn with_job(mut self, job: Job) -> Self {
        self.job = Some(job);
        self
    }

    pub fn with_mod_time(mut self, probe: ModTime) -> Self {
        self.mod_time = Some(probe);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn probe(&self) -> Result<Timestamp> {
        match &self.mod_time {
            Some(probe) => probe.probe().await,
            None => file_mod_time(&self.name),
        }
    }

    async fn resolve(&self, tasks: &Tasks, runner: &Runner, own: Timestamp, deps: &[String]) -> Result<Timestamp> {
        let resolutions = deps.iter().map(|dep| async move {
            let resolved: Result<Resolved> = match tasks.get_task(dep) {
                Some(task) => match task.run(tasks, runner).await {
                    Ok(t) => Ok(Resolved::Time(t)),
                    Err(err) if err.is_definition_error() => Err(err),
                    Err(_) => Ok(Resolved::Failed(dep.clone())),
                },
                // missing files fail the dependency, other stat errors fail the task
                None => tasks.mod_times().get(dep).map(|t| match t {
                    Some(t) => Resolved::Time(Some(t)),
                    None => Resolved::Failed(dep.clone()),
                }),
            };
            resolved
        });

        let mut timestamps = Vec::with_capacity(deps.len());
        let mut failed = Vec::new();
        for resolution in join_all(resolutions).await {
            match resolution? {
                Resolved::Time(t) => timestamps.push(t),
                Resolved::Failed(name) => failed.push(name),
            }
        }

        if !failed.is_empty() {
            return Err(MkrunError::UnsatisfiedDependencies {
                task: self.name.clone(),
                dependencies: failed,
            });
        }

        // zero time is always out of date
        let up_to_date = own.is_some() && timestamps.iter().all(|t| own >= *t);
        if up_to_date {
            info!(task = %self.name, "task {} is up to date", self.name);
            return Ok(own);
        }

        info!(task = %self.name, "building {}", self.name);
        if let Some(job) = &self.job {
            runner.put(job.clone()).await?;
        }
        self.probe().await
    }
}

impl Task {
    /// Own timestamp and dependency list, evaluated fresh on every generation.
    async fn prepare(&self) -> Result<(Timestamp, Vec<String>)> {
        let deps = match &self.dependencies {
            Some(deps) => deps.get()?,
            None => Vec::new(),
        };
        let own = self.probe().await?;
        if deps.iter().any(|d| *d == self.name) {
            return Err(MkrunError::SelfDependency {
                name: self.name.clone(),
            });
        }
        Ok((own, deps))
    }
}

impl Target for Task {
    fn run<'a>(&'a self, tasks: &'a Tasks, runner: &'a Runner) -> BoxFuture<'a, Result<Timestamp>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if state.done {
                return state.result();
            }

            let deps = match self.prepare().await {
                Ok((own, deps)) => {
                    state.mod_time = own;
                    deps
                }
                Err(err) => {
                    error!(task = %self.name, "{err}");
                    return Err(err);
                }
            };

            match self.resolve(tasks, runner, state.mod_time, &deps).await {
                Ok(t) => {
                    state.mod_time = t;
                    state.err = None;
                }
                Err(err) => {
                    error!(task = %self.name, "{err}");
                    state.err = Some(err);
                }
            }
            state.done = true;
            state.result()
        })
    }

    fn depends_on(&self) -> Option<Arc<dyn Dependencies>> {
        self.dependencies.clone()
    }

    fn reset(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.state.lock().await.done = false;
        })
    }
}

impl TaskGetter for Task {
    fn names(&self) -> Vec<String> {
        vec![self.name.clone()]
    }

    fn get_task(&self, name: &str) -> Option<&dyn Target> {
        (name == self.name).then_some(self as &dyn Target)
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("has_job", &self.job.is_some())
            .finish_non_exhaustive()
    }
}
