//! Configuration parsing for mkrun.toml
//!
//! Loads, validates and turns the task definitions into a [`Tasks`] registry.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::command::{command_job, command_mod_time, long_running_command, CommandSpec};
use crate::dependency::{
    glob_files, Dependencies, DependenciesList, NameFormat, StaticDependencies,
    TargetDependencyFn, TargetDependencyList,
};
use crate::error::{MkrunError, Result};
use crate::graph::TaskGraph;
use crate::job::TargetJob;
use crate::long_running::{LongRunning, NotifyLongRunning};
use crate::modtime::TargetModTime;
use crate::multi_target::MultiTargetTask;
use crate::runner::Parallelism;
use crate::task::Task;
use crate::tasks::Tasks;
use crate::watch::Notify;

/// Default config file names to search for
pub const CONFIG_FILES: &[&str] = &["mkrun.toml", "Mkrun.toml"];

/// Placeholder replaced by the target name in multi-target tasks
pub const NAME_PLACEHOLDER: &str = "{name}";

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,

    /// Task definitions; the first one is built when no target is given
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

/// Build-wide settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Maximum concurrent jobs; zero or less is unbounded, absent is the CPU count
    #[serde(default)]
    pub jobs: Option<i64>,

    /// Quiescence window of watch loops in milliseconds
    #[serde(default = "default_debounce")]
    pub debounce_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            jobs: None,
            debounce_ms: default_debounce(),
        }
    }
}

fn default_debounce() -> u64 {
    1000
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    /// Runs its commands when out of date
    #[default]
    Task,
    /// Rebuilds `target` whenever one of its inputs changes
    Notify,
    /// A single command running until interrupted
    LongRunning,
    /// A single command restarted whenever its inputs change
    NotifyLongRunning,
}

impl TaskKind {
    pub fn is_long_running(self) -> bool {
        matches!(self, Self::LongRunning | Self::NotifyLongRunning)
    }
}

/// Configuration for a single task
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TaskConfig {
    #[serde(default)]
    pub name: Option<String>,

    /// Targets built by one shared definition
    #[serde(default)]
    pub names: Vec<String>,

    /// Human-readable description
    #[serde(default)]
    pub desc: Option<String>,

    #[serde(default)]
    pub kind: TaskKind,

    /// Tasks or files this task is built from
    #[serde(default)]
    pub depends: Vec<String>,

    /// Glob patterns, expanded on every build
    #[serde(default)]
    pub sources: Vec<String>,

    /// Commands to run, one after another
    #[serde(default)]
    pub run: Vec<String>,

    /// Task-specific environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Working directory for this task's commands
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Use shell to execute commands
    #[serde(default)]
    pub shell: bool,

    /// Task watched by a `notify` task
    #[serde(default)]
    pub target: Option<String>,

    /// Custom staleness probe
    #[serde(default)]
    pub mod_time: Option<ModTimeConfig>,
}

/// A command printing the target's modification time
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ModTimeConfig {
    pub command: String,

    /// `chrono` format of the command output
    pub format: String,
}

impl TaskConfig {
    /// Every name this entry defines.
    pub fn names(&self) -> Vec<String> {
        self.name.iter().chain(&self.names).cloned().collect()
    }

    /// Name used in error messages.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.names.join(","),
        }
    }

    fn command(&self, line: impl Into<String>) -> CommandSpec {
        CommandSpec::new(line)
            .with_env(self.env.clone())
            .with_cwd(self.cwd.clone())
            .with_shell(self.shell)
    }

    fn first_command(&self) -> &str {
        self.run.first().map(String::as_str).unwrap_or_default()
    }

    fn invalid(&self, reason: impl Into<String>) -> MkrunError {
        MkrunError::InvalidTask {
            task: self.label(),
            reason: reason.into(),
        }
    }

    fn validate(&self) -> Result<()> {
        match (&self.name, self.names.is_empty()) {
            (Some(_), false) => return Err(self.invalid("Task cannot have both 'name' and 'names'")),
            (None, true) => return Err(self.invalid("Task must have 'name' or 'names'")),
            _ => {}
        }

        if !self.names.is_empty() && self.kind != TaskKind::Task {
            return Err(self.invalid("'names' is only supported by plain tasks"));
        }

        match self.kind {
            TaskKind::Notify => {
                if self.target.is_none() {
                    return Err(self.invalid("Notify task must have a 'target'"));
                }
                if !self.run.is_empty() {
                    return Err(self.invalid("Notify task cannot have 'run' commands"));
                }
                let unused = [
                    ("depends", !self.depends.is_empty()),
                    ("sources", !self.sources.is_empty()),
                    ("env", !self.env.is_empty()),
                    ("cwd", self.cwd.is_some()),
                    ("shell", self.shell),
                    ("mod_time", self.mod_time.is_some()),
                ];
                if let Some((field, _)) = unused.iter().find(|(_, set)| *set) {
                    return Err(self.invalid(format!("Notify task cannot have '{field}'")));
                }
            }
            kind => {
                if self.target.is_some() {
                    return Err(self.invalid("'target' is only valid for notify tasks"));
                }
                if kind.is_long_running() && self.run.len() != 1 {
                    return Err(self.invalid("Long running task must have exactly one 'run' command"));
                }
            }
        }

        for name in self.names() {
            let depends_on_self = self
                .depends
                .iter()
                .any(|dep| dep.replace(NAME_PLACEHOLDER, &name) == name);
            if depends_on_self {
                return Err(MkrunError::InvalidTask {
                    task: name,
                    reason: "Task cannot depend on itself".to_string(),
                });
            }
        }

        Ok(())
    }

    fn dependencies(&self) -> DependenciesList {
        let mut list = DependenciesList::new();
        if !self.depends.is_empty() {
            list = list.with(StaticDependencies::new(self.depends.iter().cloned()));
        }
        for pattern in &self.sources {
            list = list.with(glob_files(pattern.clone()));
        }
        list
    }

    fn build(&self, tasks: &mut Tasks) {
        let deps = self.dependencies();
        let name = self.name.clone().unwrap_or_default();

        match self.kind {
            TaskKind::Task if !self.names.is_empty() => tasks.push(self.build_multi_target()),
            TaskKind::Task => {
                let mut task = Task::new(name);
                if !deps.is_empty() {
                    task = task.with_dependencies(deps);
                }
                if !self.run.is_empty() {
                    let commands = self.run.iter().map(|line| self.command(line.as_str())).collect();
                    task = task.with_job(command_job(commands));
                }
                if let Some(mod_time) = &self.mod_time {
                    task = task.with_mod_time(command_mod_time(
                        self.command(mod_time.command.as_str()),
                        mod_time.format.clone(),
                    ));
                }
                tasks.push(task);
            }
            TaskKind::Notify => {
                let target = self.target.clone().unwrap_or_default();
                tasks.push(Notify::new(name, target));
            }
            TaskKind::LongRunning => {
                let job = long_running_command(self.command(self.first_command()));
                tasks.push(LongRunning::new(name, job).with_dependencies(deps));
            }
            TaskKind::NotifyLongRunning => {
                let job = long_running_command(self.command(self.first_command()));
                tasks.push(NotifyLongRunning::new(name, job).with_dependencies(deps));
            }
        }
    }

    fn build_multi_target(&self) -> MultiTargetTask {
        let mut deps = TargetDependencyList::new().with(NameFormat::new(self.depends.iter().cloned()));
        for pattern in &self.sources {
            let pattern = pattern.clone();
            deps = deps.with(TargetDependencyFn::new(move |name| {
                Arc::new(glob_files(pattern.replace(NAME_PLACEHOLDER, name))) as Arc<dyn Dependencies>
            }));
        }

        let mut task = MultiTargetTask::new(self.names.iter().cloned()).with_dependencies(deps);

        if !self.run.is_empty() {
            let template = self.clone();
            task = task.with_job(TargetJob::new(move |name: String| {
                let commands: Vec<CommandSpec> = template
                    .run
                    .iter()
                    .map(|line| template.command(line.replace(NAME_PLACEHOLDER, &name)))
                    .collect();
                command_job(commands).call()
            }));
        }

        if let Some(mod_time) = &self.mod_time {
            let command = self.command(mod_time.command.as_str());
            let format = mod_time.format.clone();
            task = task.with_mod_time(TargetModTime::new(move |name: String| {
                let mut command = command.clone();
                command.line = command.line.replace(NAME_PLACEHOLDER, &name);
                let probe = command_mod_time(command, format.clone());
                async move { probe.probe().await }
            }));
        }

        task
    }
}

impl Config {
    /// Load configuration from the specified path or search for it
    pub fn load(path: Option<&Path>) -> Result<(Self, PathBuf)> {
        let config_path = match path {
            Some(p) => {
                if p.exists() {
                    p.to_path_buf()
                } else {
                    return Err(MkrunError::ConfigNotFound {
                        searched: vec![p.to_path_buf()],
                    });
                }
            }
            None => Self::find_config()?,
        };

        let content = std::fs::read_to_string(&config_path)?;
        let config = Self::parse(&content, &config_path)?;

        Ok((config, config_path))
    }

    /// Parse and validate configuration text read from `path`.
    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(|e| MkrunError::ConfigParse {
            source: Arc::new(e),
            path: path.to_path_buf(),
        })?;

        config.validate()?;

        Ok(config)
    }

    /// Search for config file starting from current directory
    fn find_config() -> Result<PathBuf> {
        let mut current = std::env::current_dir()?;
        let mut searched = Vec::new();

        loop {
            for name in CONFIG_FILES {
                let candidate = current.join(name);
                searched.push(candidate.clone());
                if candidate.exists() {
                    return Ok(candidate);
                }
            }

            if !current.pop() {
                break;
            }
        }

        Err(MkrunError::ConfigNotFound { searched })
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for task in &self.tasks {
            task.validate()?;
            for name in task.names() {
                if !seen.insert(name.clone()) {
                    return Err(MkrunError::TaskRedefined { name });
                }
            }
        }

        // unknown notify targets and static cycles
        TaskGraph::from_config(self)?;

        Ok(())
    }

    /// Get the entry defining `name`
    pub fn get_task(&self, name: &str) -> Option<&TaskConfig> {
        self.tasks
            .iter()
            .find(|t| t.name.as_deref() == Some(name) || t.names.iter().any(|n| n == name))
    }

    /// All defined names in definition order
    pub fn task_names(&self) -> Vec<String> {
        self.tasks.iter().flat_map(TaskConfig::names).collect()
    }

    pub fn parallelism(&self) -> Parallelism {
        self.settings
            .jobs
            .map(Parallelism::from_jobs)
            .unwrap_or_default()
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.settings.debounce_ms)
    }

    /// Build the task registry described by this configuration.
    pub fn to_tasks(&self) -> Tasks {
        let mut tasks = Tasks::new()
            .with_parallelism(self.parallelism())
            .with_debounce(self.debounce());
        for task in &self.tasks {
            task.build(&mut tasks);
        }
        tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> Result<Config> {
        Config::parse(toml, Path::new("mkrun.toml"))
    }

    fn invalid_reason(toml: &str) -> String {
        match parse(toml) {
            Err(MkrunError::InvalidTask { reason, .. }) => reason,
            other => panic!("expected invalid task, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_simple_config() {
        let config = parse(
            r#"
            [settings]
            jobs = 2
            debounce_ms = 250

            [[tasks]]
            name = "app"
            desc = "Build the app"
            depends = ["lib"]
            sources = ["src/**/*.rs"]
            run = ["cargo build"]

            [[tasks]]
            name = "lib"
            run = ["cargo build -p lib"]
            "#,
        )
        .unwrap();

        assert_eq!(config.task_names(), vec!["app", "lib"]);
        assert_eq!(config.settings.jobs, Some(2));
        assert_eq!(config.debounce(), Duration::from_millis(250));
        assert_eq!(config.get_task("app").unwrap().desc.as_deref(), Some("Build the app"));
    }

    #[test]
    fn test_defaults() {
        let config = parse("[[tasks]]\nname = \"all\"\n").unwrap();
        assert_eq!(config.settings.debounce_ms, 1000);
        assert_eq!(config.parallelism(), Parallelism::default());
        assert_eq!(config.tasks[0].kind, TaskKind::Task);
    }

    #[test]
    fn test_jobs_zero_is_unbounded() {
        let config = parse("[settings]\njobs = 0\n").unwrap();
        assert_eq!(config.parallelism(), Parallelism::Unbounded);
    }

    #[test]
    fn test_parse_kinds() {
        let config = parse(
            r#"
            [[tasks]]
            name = "serve"
            kind = "notify-long-running"
            sources = ["src/*.go"]
            run = ["go run ."]

            [[tasks]]
            name = "dev"
            kind = "notify"
            target = "serve"
            "#,
        )
        .unwrap();
        assert_eq!(config.tasks[0].kind, TaskKind::NotifyLongRunning);
        assert_eq!(config.tasks[1].kind, TaskKind::Notify);
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let err = parse("[[tasks]]\nname = \"a\"\nparallel = true\n").unwrap_err();
        assert!(matches!(err, MkrunError::ConfigParse { .. }));
    }

    #[test]
    fn test_name_and_names_are_exclusive() {
        assert_eq!(
            invalid_reason("[[tasks]]\nname = \"a\"\nnames = [\"b\"]\n"),
            "Task cannot have both 'name' and 'names'"
        );
        assert_eq!(invalid_reason("[[tasks]]\ndesc = \"nameless\"\n"), "Task must have 'name' or 'names'");
    }

    #[test]
    fn test_notify_validation() {
        assert_eq!(
            invalid_reason("[[tasks]]\nname = \"w\"\nkind = \"notify\"\n"),
            "Notify task must have a 'target'"
        );
        assert_eq!(
            invalid_reason(
                "[[tasks]]\nname = \"w\"\nkind = \"notify\"\ntarget = \"b\"\nrun = [\"make\"]\n\n[[tasks]]\nname = \"b\"\n"
            ),
            "Notify task cannot have 'run' commands"
        );

        let watch = |field: &str| {
            invalid_reason(&format!(
                "[[tasks]]\nname = \"w\"\nkind = \"notify\"\ntarget = \"b\"\n{field}\n\n[[tasks]]\nname = \"b\"\n"
            ))
        };
        assert_eq!(watch("depends = [\"b\"]"), "Notify task cannot have 'depends'");
        assert_eq!(watch("sources = [\"*.c\"]"), "Notify task cannot have 'sources'");
        assert_eq!(watch("env = { A = \"1\" }"), "Notify task cannot have 'env'");
        assert_eq!(watch("cwd = \"sub\""), "Notify task cannot have 'cwd'");
        assert_eq!(watch("shell = true"), "Notify task cannot have 'shell'");
        assert_eq!(
            watch("mod_time = { command = \"date\", format = \"%s\" }"),
            "Notify task cannot have 'mod_time'"
        );

        let err = parse("[[tasks]]\nname = \"w\"\nkind = \"notify\"\ntarget = \"missing\"\n").unwrap_err();
        assert!(matches!(err, MkrunError::TaskNotFound { ref name, .. } if name == "missing"));
    }

    #[test]
    fn test_long_running_needs_one_command() {
        assert_eq!(
            invalid_reason("[[tasks]]\nname = \"s\"\nkind = \"long-running\"\nrun = [\"a\", \"b\"]\n"),
            "Long running task must have exactly one 'run' command"
        );
    }

    #[test]
    fn test_self_dependency_is_rejected() {
        assert_eq!(
            invalid_reason("[[tasks]]\nname = \"a\"\ndepends = [\"a\"]\n"),
            "Task cannot depend on itself"
        );
        assert_eq!(
            invalid_reason("[[tasks]]\nnames = [\"x.o\"]\ndepends = [\"{name}\"]\n"),
            "Task cannot depend on itself"
        );
    }

    #[test]
    fn test_duplicate_names_are_redefinitions() {
        let err = parse("[[tasks]]\nname = \"a\"\n\n[[tasks]]\nnames = [\"b\", \"a\"]\n").unwrap_err();
        assert!(matches!(err, MkrunError::TaskRedefined { ref name } if name == "a"));
    }

    #[test]
    fn test_cycle_is_rejected() {
        let err = parse(
            "[[tasks]]\nname = \"a\"\ndepends = [\"b\"]\n\n[[tasks]]\nname = \"b\"\ndepends = [\"a\"]\n",
        )
        .unwrap_err();
        assert!(matches!(err, MkrunError::CyclicDependency { .. }));
    }

    #[test]
    fn test_to_tasks_registers_every_name() {
        let config = parse(
            r#"
            [settings]
            jobs = 3

            [[tasks]]
            name = "all"
            depends = ["a.o", "b.o"]

            [[tasks]]
            names = ["a.o", "b.o"]
            depends = ["{name}.c"]
            run = ["cc -c {name}.c"]

            [[tasks]]
            name = "serve"
            kind = "long-running"
            run = ["./server"]
            "#,
        )
        .unwrap();

        let tasks = config.to_tasks();
        assert_eq!(tasks.defined_tasks().unwrap(), vec!["all", "a.o", "b.o", "serve"]);
        assert_eq!(tasks.parallelism(), Parallelism::from_jobs(3));
        let deps = tasks.get_task("b.o").unwrap().depends_on().unwrap().get().unwrap();
        assert_eq!(deps, vec!["b.o.c"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_commands_build_outdated_targets() {
        let temp = tempfile::tempdir().unwrap();
        let out = temp.path().join("out.txt");
        let src = temp.path().join("in.txt");
        std::fs::write(&src, "hello").unwrap();

        let toml = format!(
            r#"
            [[tasks]]
            name = "{out}"
            depends = ["{src}"]
            shell = true
            run = ["cp {src} {out}"]
            "#,
            out = out.display(),
            src = src.display(),
        );
        let config = parse(&toml).unwrap();

        config.to_tasks().run::<&str>(&[]).await.unwrap();
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_multi_target_job_substitutes_name() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().display().to_string();

        let toml = format!(
            r#"
            [[tasks]]
            names = ["{dir}/a.txt", "{dir}/b.txt"]
            shell = true
            run = ["echo built > {{name}}"]
            "#
        );
        let config = parse(&toml).unwrap();
        let b = format!("{dir}/b.txt");

        config.to_tasks().run(&[b.as_str()]).await.unwrap();
        assert!(temp.path().join("b.txt").exists());
        assert!(!temp.path().join("a.txt").exists());
    }
}
