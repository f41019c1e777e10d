//! File watching for automatic rebuilds
//!
//! A [`Notify`] target watches every file its wrapped task depends on,
//! directly or through other tasks, and rebuilds the task whenever those
//! files change. Bursts of events are coalesced: a rebuild starts only once
//! no new change has arrived for the debounce window.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::dependency::Dependencies;
use crate::error::{MkrunError, Result};
use crate::modtime::Timestamp;
use crate::runner::Runner;
use crate::signal::StopSignal;
use crate::task::{Target, TaskGetter};
use crate::tasks::Tasks;
use crate::watcher::{ChangeKind, FsWatcherFactory, WatcherFactory};

/// Files and tasks reachable from a target through its dependencies.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Closure {
    pub files: Vec<String>,
    pub tasks: Vec<String>,
}

impl Closure {
    pub fn of(tasks: &Tasks, target: &dyn Target) -> Result<Self> {
        let mut closure = Self::default();
        let mut seen_files = HashSet::new();
        let mut seen_tasks = HashSet::new();
        closure.collect(tasks, target, &mut seen_files, &mut seen_tasks)?;
        Ok(closure)
    }

    fn collect(
        &mut self,
        tasks: &Tasks,
        target: &dyn Target,
        seen_files: &mut HashSet<String>,
        seen_tasks: &mut HashSet<String>,
    ) -> Result<()> {
        let Some(deps) = target.depends_on() else {
            return Ok(());
        };
        for dep in deps.get()? {
            match tasks.get_task(&dep) {
                Some(task) => {
                    if seen_tasks.insert(dep.clone()) {
                        self.tasks.push(dep);
                        self.collect(tasks, task, seen_files, seen_tasks)?;
                    }
                }
                None => {
                    if seen_files.insert(dep.clone()) {
                        self.files.push(dep);
                    }
                }
            }
        }
        Ok(())
    }
}

/// A blocking target that rebuilds another task whenever the files it
/// depends on change. It only returns once stopped.
pub struct Notify {
    name: String,
    target: String,
    stop: Option<StopSignal>,
    watcher: Arc<dyn WatcherFactory>,
    rebuild: Mutex<()>,
}

impl Notify {
    pub fn new(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            stop: None,
            watcher: Arc::new(FsWatcherFactory),
            rebuild: Mutex::new(()),
        }
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

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Target for Notify {
    fn run<'a>(&'a self, tasks: &'a Tasks, runner: &'a Runner) -> BoxFuture<'a, Result<Timestamp>> {
        Box::pin(async move {
            let target = tasks
                .get_task(&self.target)
                .ok_or_else(|| MkrunError::TaskNotFound {
                    name: self.target.clone(),
                    available: tasks.defined_tasks().unwrap_or_default(),
                })?;
            let closure = Closure::of(tasks, target)?;
            let stop = self.stop.clone().unwrap_or_else(StopSignal::ctrl_c);

            let watch = WatchLoop {
                tasks,
                runner,
                target,
                closure: &closure,
                rebuild: &self.rebuild,
                debounce: tasks.debounce(),
            };
            watch.run(self.watcher.as_ref(), &stop).await?;
            // a watcher is always out of date
            Ok(None)
        })
    }

    fn depends_on(&self) -> Option<Arc<dyn Dependencies>> {
        None
    }

    fn reset(&self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

impl TaskGetter for Notify {
    fn names(&self) -> Vec<String> {
        vec![self.name.clone()]
    }

    fn get_task(&self, name: &str) -> Option<&dyn Target> {
        (name == self.name).then_some(self as &dyn Target)
    }
}

pub(crate) struct WatchLoop<'a> {
    pub tasks: &'a Tasks,
    pub runner: &'a Runner,
    pub target: &'a dyn Target,
    pub closure: &'a Closure,
    pub rebuild: &'a Mutex<()>,
    pub debounce: Duration,
}

impl WatchLoop<'_> {
    /// Watch until `stop` fires or the change source fails.
    pub async fn run(&self, factory: &dyn WatcherFactory, stop: &StopSignal) -> Result<()> {
        let (mut watcher, mut events) = factory.create()?;

        // several spellings of one path share a single watch
        let mut files: HashMap<PathBuf, Vec<&str>> = HashMap::new();
        for file in &self.closure.files {
            files.entry(absolute(Path::new(file))).or_default().push(file.as_str());
        }
        for path in files.keys() {
            watcher.watch(path)?;
        }
        // Some editors replace a file instead of writing it in place, which is
        // only visible on the directory.
        for dir in parent_dirs(&files) {
            watcher.watch(&dir)?;
        }
        info!(
            files = files.len(),
            tasks = self.closure.tasks.len(),
            "watching for changes"
        );

        let mut deadline: Option<Instant> = None;
        loop {
            tokio::select! {
                _ = stop.stopped() => {
                    debug!("watch loop stopped");
                    return Ok(());
                }
                message = events.recv() => match message {
                    None => return Err(MkrunError::WatcherClosed),
                    Some(Err(err)) => warn!(error = %err, "file watcher reported an error"),
                    Some(Ok(event)) => {
                        let path = absolute(&event.path);
                        let Some(deps) = files.get(&path) else {
                            continue;
                        };
                        debug!(path = %path.display(), kind = ?event.kind, "dependency changed");
                        for dep in deps {
                            self.tasks.mod_times().invalidate(dep);
                        }
                        if event.kind == ChangeKind::Create {
                            if let Err(err) = watcher.watch(&path) {
                                warn!(path = %path.display(), error = %err, "failed to re-watch file");
                            }
                        }
                        deadline = Some(Instant::now() + self.debounce);
                    }
                },
                _ = quiescence(deadline) => {
                    deadline = None;
                    self.rebuild().await;
                }
            }
        }
    }

    async fn rebuild(&self) {
        for name in &self.closure.tasks {
            if let Some(task) = self.tasks.get_task(name) {
                task.reset().await;
            }
        }

        let _guard = self.rebuild.lock().await;
        self.target.reset().await;
        if let Err(err) = self.target.run(self.tasks, self.runner).await {
            error!(error = %err, "rebuild failed");
        }
    }
}

async fn quiescence(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

fn parent_dirs<V>(files: &HashMap<PathBuf, V>) -> BTreeSet<PathBuf> {
    files
        .keys()
        .filter_map(|f| f.parent())
        .filter(|dir| !files.contains_key(*dir))
        .map(Path::to_path_buf)
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::dependency::StaticDependencies;
    use crate::job::Job;
    use crate::signal::stop_pair;
    use crate::task::Task;
    use crate::watcher::{ChangeEvent, ChangeMessage, PathWatcher};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Change source driven by the test through a channel.
    pub(crate) struct FakeWatcherFactory {
        events: std::sync::Mutex<Option<tokio::sync::mpsc::UnboundedReceiver<ChangeMessage>>>,
        pub watched: Arc<std::sync::Mutex<Vec<PathBuf>>>,
    }

    impl FakeWatcherFactory {
        pub(crate) fn new() -> (tokio::sync::mpsc::UnboundedSender<ChangeMessage>, Arc<Self>) {
            let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
            let factory = Self {
                events: std::sync::Mutex::new(Some(rx)),
                watched: Arc::default(),
            };
            (tx, Arc::new(factory))
        }
    }

    struct FakeWatcher(Arc<std::sync::Mutex<Vec<PathBuf>>>);

    impl PathWatcher for FakeWatcher {
        fn watch(&mut self, path: &Path) -> Result<()> {
            self.0.lock().unwrap().push(path.to_path_buf());
            Ok(())
        }
    }

    impl WatcherFactory for FakeWatcherFactory {
        fn create(&self) -> Result<(Box<dyn PathWatcher>, tokio::sync::mpsc::UnboundedReceiver<ChangeMessage>)> {
            let rx = self
                .events
                .lock()
                .unwrap()
                .take()
                .ok_or(MkrunError::WatcherClosed)?;
            Ok((Box::new(FakeWatcher(Arc::clone(&self.watched))), rx))
        }
    }

    fn counting_job(counter: &Arc<AtomicUsize>) -> Job {
        let counter = Arc::clone(counter);
        Job::new(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    #[test]
    fn test_closure_follows_task_dependencies() {
        let tasks = Tasks::new()
            .with(Task::new("app").with_dependencies(StaticDependencies::new(["lib", "main.c", "lib"])))
            .with(Task::new("lib").with_dependencies(StaticDependencies::new(["lib.c", "main.c", "gen"])))
            .with(Task::new("gen").with_dependencies(StaticDependencies::new(["schema.json"])));

        let closure = Closure::of(&tasks, tasks.get_task("app").unwrap()).unwrap();

        assert_eq!(closure.tasks, vec!["lib", "gen"]);
        assert_eq!(closure.files, vec!["lib.c", "main.c", "schema.json"]);
    }

    #[test]
    fn test_parent_dirs_skip_watched_dirs() {
        let files: HashMap<PathBuf, Vec<&str>> = [
            (PathBuf::from("/p/src"), vec!["src"]),
            (PathBuf::from("/p/src/a.c"), vec!["src/a.c", "./src/a.c"]),
            (PathBuf::from("/p/b.c"), vec!["b.c"]),
        ]
        .into_iter()
        .collect();

        let dirs: Vec<_> = parent_dirs(&files).into_iter().collect();
        assert_eq!(dirs, vec![PathBuf::from("/p")]);
    }

    #[tokio::test]
    async fn test_missing_target() {
        let tasks = Tasks::new().with(Notify::new("watch", "nothing").with_stop(StopSignal::never()));
        let err = tasks.run(&["watch"]).await.unwrap_err();
        assert!(matches!(err, MkrunError::TasksFailed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_changes_triggers_one_rebuild() {
        let temp = tempfile::tempdir().unwrap();
        let src = temp.path().join("src.txt");
        std::fs::write(&src, "v1").unwrap();
        let out = temp.path().join("out").to_string_lossy().into_owned();

        let counter = Arc::new(AtomicUsize::new(0));
        let (events, factory) = FakeWatcherFactory::new();
        let (handle, stop) = stop_pair();
        let tasks = Arc::new(
            Tasks::new()
                .with(
                    Task::new(out.clone())
                        .with_dependencies(StaticDependencies::new([src.to_string_lossy()]))
                        .with_job(counting_job(&counter)),
                )
                .with(
                    Notify::new("watch", out)
                        .with_stop(stop)
                        .with_watcher(factory.clone()),
                ),
        );

        let build = tokio::spawn({
            let tasks = Arc::clone(&tasks);
            async move { tasks.run(&["watch"]).await }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(factory.watched.lock().unwrap().contains(&src));
        assert!(factory.watched.lock().unwrap().contains(&temp.path().to_path_buf()));

        for _ in 0..3 {
            events.send(Ok(ChangeEvent::new(&src, ChangeKind::Modify))).unwrap();
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // unrelated paths are ignored
        events
            .send(Ok(ChangeEvent::new(temp.path().join("other"), ChangeKind::Modify)))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        events.send(Ok(ChangeEvent::new(&src, ChangeKind::Modify))).unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        handle.stop();
        build.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_source_ends_watch() {
        let temp = tempfile::tempdir().unwrap();
        let src = temp.path().join("src.txt");
        std::fs::write(&src, "").unwrap();

        let (events, factory) = FakeWatcherFactory::new();
        let tasks = Tasks::new()
            .with(Task::new("out").with_dependencies(StaticDependencies::new([src.to_string_lossy()])))
            .with(
                Notify::new("watch", "out")
                    .with_stop(StopSignal::never())
                    .with_watcher(factory),
            );
        drop(events);

        let runner = Runner::new(tasks.parallelism());
        runner.start().unwrap();
        let err = tasks
            .get_task("watch")
            .unwrap()
            .run(&tasks, &runner)
            .await
            .unwrap_err();
        runner.stop().await;

        assert!(matches!(err, MkrunError::WatcherClosed));
    }

    fn file_at(path: &Path, secs: u64) {
        let when = std::time::SystemTime::UNIX_EPOCH + Duration::from_secs(secs);
        std::fs::File::create(path).unwrap().set_modified(when).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_change_invalidates_cached_time_and_create_rewatches() {
        let temp = tempfile::tempdir().unwrap();
        let src = temp.path().join("src.txt");
        let out = temp.path().join("out");
        file_at(&src, 100);
        file_at(&out, 200);
        let out = out.to_string_lossy().into_owned();

        let counter = Arc::new(AtomicUsize::new(0));
        let (events, factory) = FakeWatcherFactory::new();
        let (handle, stop) = stop_pair();
        let tasks = Arc::new(
            Tasks::new()
                .with(
                    Task::new(out.clone())
                        .with_dependencies(StaticDependencies::new([src.to_string_lossy()]))
                        .with_job(counting_job(&counter)),
                )
                .with(
                    Notify::new("watch", out.clone())
                        .with_stop(stop)
                        .with_watcher(factory.clone()),
                ),
        );

        tasks.run(&[out]).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        let build = tokio::spawn({
            let tasks = Arc::clone(&tasks);
            async move { tasks.run(&["watch"]).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        // the editor replaced the file with a newer one
        file_at(&src, 300);
        events.send(Ok(ChangeEvent::new(&src, ChangeKind::Create))).unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        let watches = factory.watched.lock().unwrap().iter().filter(|p| **p == src).count();
        assert_eq!(watches, 2);

        handle.stop();
        build.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_spelling_of_a_changed_file_is_invalidated() {
        let temp = tempfile::tempdir().unwrap();
        let src = temp.path().join("src.txt");
        let plain = src.to_string_lossy().into_owned();
        let dotted = format!("{}/./src.txt", temp.path().display());
        let a = temp.path().join("a");
        let b = temp.path().join("b");
        file_at(&src, 100);
        file_at(&a, 200);
        file_at(&b, 200);
        let (a, b) = (a.to_string_lossy().into_owned(), b.to_string_lossy().into_owned());

        let a_runs = Arc::new(AtomicUsize::new(0));
        let b_runs = Arc::new(AtomicUsize::new(0));
        let (events, factory) = FakeWatcherFactory::new();
        let (handle, stop) = stop_pair();
        let tasks = Arc::new(
            Tasks::new()
                .with(Task::new("everything").with_dependencies(StaticDependencies::new([a.clone(), b.clone()])))
                .with(
                    Task::new(a)
                        .with_dependencies(StaticDependencies::new([plain.clone()]))
                        .with_job(counting_job(&a_runs)),
                )
                .with(
                    Task::new(b)
                        .with_dependencies(StaticDependencies::new([dotted.clone()]))
                        .with_job(counting_job(&b_runs)),
                )
                .with(
                    Notify::new("watch", "everything")
                        .with_stop(stop)
                        .with_watcher(factory.clone()),
                ),
        );

        tasks.run(&["everything"]).await.unwrap();
        assert_eq!(a_runs.load(Ordering::SeqCst), 0);
        assert_eq!(b_runs.load(Ordering::SeqCst), 0);
        assert!(tasks.mod_times().contains(&plain));
        assert!(tasks.mod_times().contains(&dotted));

        let build = tokio::spawn({
            let tasks = Arc::clone(&tasks);
            async move { tasks.run(&["watch"]).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        file_at(&src, 300);
        events.send(Ok(ChangeEvent::new(&src, ChangeKind::Modify))).unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(a_runs.load(Ordering::SeqCst), 1);
        assert_eq!(b_runs.load(Ordering::SeqCst), 1);
        // one watch serves both spellings
        let watches = factory.watched.lock().unwrap().iter().filter(|p| **p == src).count();
        assert_eq!(watches, 1);

        handle.stop();
        build.await.unwrap().unwrap();
    }
}
