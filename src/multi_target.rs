//! Families of targets sharing one job, probe and dependency shape

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use crate::dependency::TargetDependencies;
use crate::job::TargetJob;
use crate::modtime::TargetModTime;
use crate::task::{Target, Task, TaskGetter};

/// A group of targets built the same way, e.g. one object file per source.
///
/// The concrete [`Task`] for a name is created on first lookup and kept for
/// the lifetime of the group, so later lookups (including resets from a watch
/// loop) see the same state.
pub struct MultiTargetTask {
    names: Vec<String>,
    job: Option<TargetJob>,
    mod_time: Option<TargetModTime>,
    dependencies: Option<Arc<dyn TargetDependencies>>,
    tasks: HashMap<String, OnceLock<Task>>,
}

impl MultiTargetTask {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let tasks = names.iter().map(|n| (n.clone(), OnceLock::new())).collect();
        Self {
            names,
            job: None,
            mod_time: None,
            dependencies: None,
            tasks,
        }
    }

    pub fn with_job(mut self, job: TargetJob) -> Self {
        self.job = Some(job);
        self
    }

    pub fn with_mod_time(mut self, probe: TargetModTime) -> Self {
        self.mod_time = Some(probe);
        self
    }

    pub fn with_dependencies(mut self, deps: impl TargetDependencies + 'static) -> Self {
        self.dependencies = Some(Arc::new(deps));
        self
    }

    fn create_task(&self, name: &str) -> Task {
        let mut task = Task::new(name)
            .with_dependency_source(self.dependencies.as_ref().map(|d| d.for_target(name)));
        if let Some(job) = &self.job {
            task = task.with_job(job.for_target(name));
        }
        if let Some(probe) = &self.mod_time {
            task = task.with_mod_time(probe.for_target(name));
        }
        task
    }

    /// The concrete task for `name`, if it belongs to this group.
    pub fn task(&self, name: &str) -> Option<&Task> {
        self.tasks
            .get(name)
            .map(|slot| slot.get_or_init(|| self.create_task(name)))
    }
}

impl TaskGetter for MultiTargetTask {
    fn names(&self) -> Vec<String> {
        self.names.clone()
    }

    fn get_task(&self, name: &str) -> Option<&dyn Target> {
        self.task(name).map(|t| t as &dyn Target)
    }
}
