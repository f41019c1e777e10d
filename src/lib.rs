//! mkrun - a make-like build orchestrator
//!
//! This crate provides both a CLI tool and a library for declaring build
//! targets in code or in a `mkrun.toml`.
//!
//! # Features
//!
//! - **make semantics** - a target is rebuilt when a dependency is newer than it
//! - **Concurrent resolution** - dependencies resolve in parallel, each task at most once per build
//! - **Bounded jobs** - real work goes through one worker pool
//! - **Live rebuilds** - `notify` targets rebuild on change, long running jobs restart
//!
//! # Example
//!
//! ```toml
//! # mkrun.toml
//!
//! [[tasks]]
//! name = "bin/app"
//! sources = ["src/**/*.go"]
//! run = ["go build -o bin/app ./cmd/app"]
//!
//! [[tasks]]
//! name = "dev"
//! kind = "notify"
//! target = "bin/app"
//! ```
//!
//! # Library Usage
//!
//! ```rust,ignore
//! use mkrun::{glob_files, Job, Task, Tasks};
//!
//! #[tokio::main]
//! async fn main() -> mkrun::Result<()> {
//!     let tasks = Tasks::new().with(
//!         Task::new("bin/app")
//!             .with_dependencies(glob_files("src/**/*.go"))
//!             .with_job(Job::new(|| async { Ok(()) })),
//!     );
//!     tasks.run(&["bin/app"]).await
//! }
//! ```

pub mod cache;
pub mod command;
pub mod config;
pub mod dependency;
pub mod error;
pub mod graph;
pub mod job;
pub mod logging;
pub mod long_running;
pub mod modtime;
pub mod multi_target;
pub mod runner;
pub mod signal;
pub mod task;
pub mod tasks;
pub mod watch;
pub mod watcher;

// Re-export main types
pub use cache::ModTimeCache;
pub use command::{command_job, command_mod_time, long_running_command, CommandSpec};
pub use config::Config;
pub use dependency::{
    glob_files, Dependencies, DependenciesList, DependencyFn, NameFormat, StaticDependencies,
    TargetDependencies, TargetDependencyFn, TargetDependencyList,
};
pub use error::{MkrunError, Result};
pub use graph::{TaskGraph, TaskNode};
pub use job::{Job, LongRunningJob, TargetJob};
pub use long_running::{LongRunning, NotifyLongRunning, StoppableLongRunning};
pub use modtime::{file_mod_time, ModTime, TargetModTime, Timestamp};
pub use multi_target::MultiTargetTask;
pub use runner::{Parallelism, Runner};
pub use signal::{stop_pair, StopHandle, StopSignal};
pub use task::{Target, Task, TaskGetter};
pub use tasks::Tasks;
pub use watch::Notify;
pub use watcher::{ChangeEvent, ChangeKind, FsWatcherFactory, PathWatcher, WatcherFactory};
