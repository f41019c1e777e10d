//! Error types for mkrun
//!
//! Uses `miette` for pretty error reporting with help text. The error is
//! `Clone` because a finished task hands the same cached error to every
//! caller until it is reset.

use miette::Diagnostic;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Main error type for mkrun operations
#[derive(Error, Diagnostic, Debug, Clone)]
pub enum MkrunError {
    #[error("Configuration file not found")]
    #[diagnostic(
        code(mkrun::config::not_found),
        help("Create a mkrun.toml in your project root, or specify one with --config")
    )]
    ConfigNotFound { searched: Vec<PathBuf> },

    #[error("Failed to parse configuration {}", path.display())]
    #[diagnostic(code(mkrun::config::parse))]
    ConfigParse {
        #[source]
        source: Arc<toml::de::Error>,
        path: PathBuf,
    },

    #[error("Invalid task '{task}': {reason}")]
    #[diagnostic(code(mkrun::config::invalid_task))]
    InvalidTask { task: String, reason: String },

    #[error("Circular dependency detected: {cycle}")]
    #[diagnostic(
        code(mkrun::task::cycle),
        help("Check the 'depends' field in your task definitions")
    )]
    CyclicDependency { cycle: String },

    #[error("task {name} redefined")]
    #[diagnostic(code(mkrun::task::redefined))]
    TaskRedefined { name: String },

    #[error("task {name} not found")]
    #[diagnostic(
        code(mkrun::task::not_found),
        help("Run `mkrun list` to see available tasks")
    )]
    TaskNotFound { name: String, available: Vec<String> },

    #[error("task {name} depends on itself")]
    #[diagnostic(code(mkrun::task::self_dependency))]
    SelfDependency { name: String },

    #[error("task {task}: dependencies {dependencies:?} could not be satisfied")]
    #[diagnostic(code(mkrun::task::unsatisfied))]
    UnsatisfiedDependencies {
        task: String,
        dependencies: Vec<String>,
    },

    #[error("tasks {tasks:?} failed")]
    #[diagnostic(code(mkrun::build::failed))]
    TasksFailed { tasks: Vec<String> },

    #[error("Invalid glob pattern '{pattern}': {message}")]
    #[diagnostic(code(mkrun::dependency::glob))]
    Glob { pattern: String, message: String },

    #[error("Command '{command}' failed with exit code {code}")]
    #[diagnostic(code(mkrun::exec::failed))]
    CommandFailed { command: String, code: i32 },

    #[error("Command not found: {command}")]
    #[diagnostic(
        code(mkrun::exec::command_not_found),
        help("Ensure the command is installed and in your PATH")
    )]
    CommandNotFound { command: String },

    #[error("Cannot parse '{value}' as a time with format '{format}'")]
    #[diagnostic(code(mkrun::mod_time::parse))]
    ModTimeParse {
        value: String,
        format: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("{message}")]
    #[diagnostic(code(mkrun::job))]
    Job { message: String },

    #[error("runner is running")]
    #[diagnostic(code(mkrun::runner::running))]
    RunnerRunning,

    #[error("runner is not running")]
    #[diagnostic(code(mkrun::runner::stopped))]
    RunnerStopped,

    #[error("I/O error: {0}")]
    #[diagnostic(code(mkrun::io))]
    Io(#[source] Arc<std::io::Error>),

    #[error("Watch error: {source}")]
    #[diagnostic(code(mkrun::watch))]
    Watch {
        #[source]
        source: Arc<notify::Error>,
    },

    #[error("watcher error: change notifications stopped")]
    #[diagnostic(code(mkrun::watch::closed))]
    WatcherClosed,
}

impl MkrunError {
    /// Failure of a job that has nothing better than a message to report
    pub fn job(message: impl Into<String>) -> Self {
        Self::Job {
            message: message.into(),
        }
    }

    /// Errors in how tasks are defined abort the whole build instead of
    /// being collected as a failed dependency.
    pub fn is_definition_error(&self) -> bool {
        matches!(
            self,
            Self::SelfDependency { .. } | Self::TaskRedefined { .. }
        )
    }
}

impl From<std::io::Error> for MkrunError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<notify::Error> for MkrunError {
    fn from(err: notify::Error) -> Self {
        Self::Watch {
            source: Arc::new(err),
        }
    }
}

/// Result type alias for mkrun operations
pub type Result<T> = std::result::Result<T, MkrunError>;
