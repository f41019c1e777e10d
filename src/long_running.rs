//! Long running targets: servers, dev watchers and other jobs that only end
//! when asked to.

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::dependency::Dependencies;
use crate::error::{MkrunError, Result};
use crate::job::{Job, LongRunningJob};
use crate::modtime::Timestamp;
use crate::runner::Runner;
use crate::signal::{stop_pair, StopHandle, StopSignal};
use crate::task::{Target, Task, TaskGetter};
use crate::tasks::Tasks;
use crate::watch::{Closure, WatchLoop};
use crate::watcher::{FsWatcherFactory, WatcherFactory};

/// Long running target stopped by an externally supplied signal.
///
/// Dependencies are built first, then the job runs through the runner like
/// any other job until it returns or observes the stop signal.
pub struct StoppableLongRunning {
    name: String,
    dependencies: Option<Arc<dyn Dependencies>>,
    job: LongRunningJob,
    stop: StopSignal,
}

impl StoppableLongRunning {
    pub fn new(name: impl Into<String>, job: LongRunningJob, stop: StopSignal) -> Self {
        Self {
            name: name.into(),
            dependencies: None,
            job,
            stop,
        }
    }

    pub fn with_dependencies(mut self, deps: impl Dependencies + 'static) -> Self {
        self.dependencies = Some(Arc::new(deps));
        self
    }
}

async fn run_until_stopped(
    name: &str,
    dependencies: Option<Arc<dyn Dependencies>>,
    job: &LongRunningJob,
    stop: StopSignal,
    tasks: &Tasks,
    runner: &Runner,
) -> Result<Timestamp> {
    let task = Task::new(name)
        .with_dependency_source(dependencies)
        .with_job(job.bind(stop));
    task.run(tasks, runner).await
}

impl Target for StoppableLongRunning {
    fn run<'a>(&'a self, tasks: &'a Tasks, runner: &'a Runner) -> BoxFuture<'a, Result<Timestamp>> {
        Box::pin(run_until_stopped(
            &self.name,
            self.dependencies.clone(),
            &self.job,
            self.stop.clone(),
            tasks,
            runner,
        ))
    }

    fn depends_on(&self) -> Option<Arc<dyn Dependencies>> {
        self.dependencies.clone()
    }

    fn reset(&self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

/// Long running target stopped by the process interrupt.
pub struct LongRunning {
    name: String,
    dependencies: Option<Arc<dyn Dependencies>>,
    job: LongRunningJob,
}

impl LongRunning {
    pub fn new(name: impl Into<String>, job: LongRunningJob) -> Self {
        Self {
            name: name.into(),
            dependencies: None,
            job,
        }
    }

    pub fn with_dependencies(mut self, deps: impl Dependencies + 'static) -> Self {
        self.dependencies = Some(Arc::new(deps));
        self
    }
}

impl Target for LongRunning {
    fn run<'a>(&'a self, tasks: &'a Tasks, runner: &'a Runner) -> BoxFuture<'a, Result<Timestamp>> {
        Box::pin(async move {
            let stop = StopSignal::ctrl_c();
            run_until_stopped(&self.name, self.dependencies.clone(), &self.job, stop, tasks, runner).await
        })
    }

    fn depends_on(&self) -> Option<Arc<dyn Dependencies>> {
        self.dependencies.clone()
    }

    fn reset(&self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

/// A long running job that is restarted whenever its dependencies change.
pub struct NotifyLongRunning {
    name: String,
    dependencies: Option<Arc<dyn Dependencies>>,
    job: LongRunningJob,
    stop: Option<StopSignal>,
    watcher: Arc<dyn WatcherFactory>,
    rebuild: Mutex<()>,
}

impl NotifyLongRunning {
    pub fn new(name: impl Into<String>, job: LongRunningJob) -> Self {
        Self {
            name: name.into(),
            dependencies: None,
            job,
            stop: None,
            watcher: Arc::new(FsWatcherFactory),
            rebuild: Mutex::new(()),
        }
    }

    pub fn with_dependencies(mut self, deps: impl Dependencies + 'static) -> Self {
        self.dependencies = Some(Arc::new(deps));
        self
    }

    /// Stop on this signal instead of the process interrupt.
    pub fn with_stop(mut self, stop: StopSignal) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn with_watcher(mut self, watcher: Arc<dyn WatcherFactory>) -> Self {
        self.watcher = watcher;
        self
    }

    async fn watch(&self, tasks: &Tasks, runner: &Runner) -> Result<Timestamp> {
        let stop = self.stop.clone().unwrap_or_else(StopSignal::ctrl_c);

        // dependencies must be current before the first launch
        Task::new(&self.name)
            .with_dependency_source(self.dependencies.clone())
            .run(tasks, runner)
            .await?;

        let (restart_tx, restart_rx) = mpsc::channel::<()>(1);
        let trigger = Task::new(&self.name)
            .with_dependency_source(self.dependencies.clone())
            .with_job(Job::new(move || {
                let restart = restart_tx.clone();
                async move {
                    restart
                        .send(())
                        .await
                        .map_err(|_| MkrunError::job("long running job is no longer supervised"))
                }
            }));
        let closure = Closure::of(tasks, &trigger)?;

        let supervisor = tokio::spawn(supervise(self.name.clone(), self.job.clone(), restart_rx));

        let watch = WatchLoop {
            tasks,
            runner,
            target: &trigger,
            closure: &closure,
            rebuild: &self.rebuild,
            debounce: tasks.debounce(),
        };
        let result = watch.run(self.watcher.as_ref(), &stop).await;

        // closing the restart channel shuts the job down
        drop(trigger);
        if let Err(err) = supervisor.await {
            error!(task = %self.name, error = %err, "long running job supervisor failed");
        }
        result.map(|()| None)
    }
}

impl Target for NotifyLongRunning {
    fn run<'a>(&'a self, tasks: &'a Tasks, runner: &'a Runner) -> BoxFuture<'a, Result<Timestamp>> {
        Box::pin(self.watch(tasks, runner))
    }

    fn depends_on(&self) -> Option<Arc<dyn Dependencies>> {
        self.dependencies.clone()
    }

    fn reset(&self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

macro_rules! single_target_getter {
    ($($ty:ty),*) => {
        $(
            impl TaskGetter for $ty {
                fn names(&self) -> Vec<String> {
                    vec![self.name.clone()]
                }

                fn get_task(&self, name: &str) -> Option<&dyn Target> {
                    (name == self.name).then_some(self as &dyn Target)
                }
            }
        )*
    };
}

single_target_getter!(StoppableLongRunning, LongRunning, NotifyLongRunning);

/// A running instance of a long running job.
struct Supervised {
    name: String,
    job: LongRunningJob,
    current: Option<(StopHandle, JoinHandle<()>)>,
}

impl Supervised {
    fn start(&mut self) {
        let (handle, stop) = stop_pair();
        let run = self.job.call(stop);
        let name = self.name.clone();
        let join = tokio::spawn(async move {
            if let Err(err) = run.await {
                error!(task = %name, "{err}");
            }
        });
        self.current = Some((handle, join));
    }

    /// Signal the running instance to stop and wait until it exits.
    async fn wait(&mut self) {
        if let Some((handle, join)) = self.current.take() {
            handle.stop();
            let _ = join.await;
        }
    }
}

/// Keep one instance of `job` alive, restarting it on every pulse until the
/// restart channel closes.
async fn supervise(name: String, job: LongRunningJob, mut restart: mpsc::Receiver<()>) {
    let mut supervised = Supervised {
        name,
        job,
        current: None,
    };
    supervised.start();
    while restart.recv().await.is_some() {
        info!(task = %supervised.name, "restarting {}", supervised.name);
        supervised.wait().await;
        supervised.start();
    }
    supervised.wait().await;
}
