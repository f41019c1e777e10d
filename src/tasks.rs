//! The task registry and top-level build entry point

use std::collections::HashSet;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::cache::ModTimeCache;
use crate::error::{MkrunError, Result};
use crate::runner::{Parallelism, Runner};
use crate::task::{Target, TaskGetter};

/// Default quiescence window of watch loops.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(1);

/// Every task defined for a build, in definition order.
///
/// The registry also owns the build-wide settings and the shared file
/// timestamp cache.
pub struct Tasks {
    getters: Vec<Box<dyn TaskGetter>>,
    mod_times: ModTimeCache,
    parallelism: Parallelism,
    debounce: Duration,
}

impl Tasks {
    pub fn new() -> Self {
        Self {
            getters: Vec::new(),
            mod_times: ModTimeCache::new(),
            parallelism: Parallelism::default(),
            debounce: DEFAULT_DEBOUNCE,
        }
    }

    pub fn with(mut self, getter: impl TaskGetter + 'static) -> Self {
        self.push(getter);
        self
    }

    pub fn push(&mut self, getter: impl TaskGetter + 'static) {
        self.getters.push(Box::new(getter));
    }

    pub fn with_parallelism(mut self, parallelism: Parallelism) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_mod_times(mut self, cache: ModTimeCache) -> Self {
        self.mod_times = cache;
        self
    }

    pub fn parallelism(&self) -> Parallelism {
        self.parallelism
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    pub fn mod_times(&self) -> &ModTimeCache {
        &self.mod_times
    }

    /// Look a target up by name; the first provider defining it wins.
    pub fn get_task(&self, name: &str) -> Option<&dyn Target> {
        self.getters.iter().find_map(|g| g.get_task(name))
    }

    /// All defined names in definition order, rejecting duplicates.
    pub fn defined_tasks(&self) -> Result<Vec<String>> {
        let mut seen = HashSet::new();
        let mut names = Vec::new();
        for getter in &self.getters {
            for name in getter.names() {
                if !seen.insert(name.clone()) {
                    return Err(MkrunError::TaskRedefined { name });
                }
                names.push(name);
            }
        }
        Ok(names)
    }

    /// Build the named targets concurrently. With no names, like make, the
    /// first defined task is built.
    pub async fn run<S: AsRef<str>>(&self, names: &[S]) -> Result<()> {
        let defined = self.defined_tasks()?;
        let Some(first) = defined.first() else {
            warn!("no tasks defined");
            return Ok(());
        };

        let requested: Vec<&str> = if names.is_empty() {
            vec![first.as_str()]
        } else {
            names.iter().map(AsRef::as_ref).collect()
        };

        let mut targets = Vec::with_capacity(requested.len());
        for name in &requested {
            let task = self.get_task(name).ok_or_else(|| MkrunError::TaskNotFound {
                name: name.to_string(),
                available: defined.clone(),
            })?;
            targets.push((*name, task));
        }

        let runner = Runner::new(self.parallelism);
        runner.start()?;
        let results = {
            let runner = &runner;
            join_all(
                targets
                    .iter()
                    .map(|&(name, task)| async move { (name, task.run(self, runner).await) }),
            )
            .await
        };
        runner.stop().await;

        let mut failed = Vec::new();
        for (name, result) in results {
            match result {
                Ok(_) => {}
                Err(err) if err.is_definition_error() => return Err(err),
                Err(err) => {
                    debug!(task = %name, error = %err, "target failed");
                    failed.push(name.to_string());
                }
            }
        }

        if failed.is_empty() {
            info!(tasks = ?requested, "build finished");
            Ok(())
        } else {
            error!(tasks = ?failed, "build failed");
            Err(MkrunError::TasksFailed { tasks: failed })
        }
    }
}

impl Default for Tasks {
    fn default() -> Self {
        Self::new()
    }
}
