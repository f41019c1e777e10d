//! Command jobs
//!
//! Turns command lines into [`Job`]s, long running jobs and mod-time probes.
//! `${VAR}` references are expanded from the task environment first and the
//! process environment second.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::SystemTime;

use chrono::{DateTime, NaiveDateTime, Utc};
use tokio::process::Command;
use tracing::debug;

use crate::error::{MkrunError, Result};
use crate::job::{Job, LongRunningJob};
use crate::modtime::ModTime;
use crate::signal::StopSignal;

/// A command line together with the context it runs in.
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub line: String,
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
    /// Run through `sh -c` (`cmd /C` on Windows) instead of splitting
    pub shell: bool,
}

impl CommandSpec {
    pub fn new(line: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            ..Default::default()
        }
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_cwd(mut self, cwd: Option<PathBuf>) -> Self {
        self.cwd = cwd;
        self
    }

    pub fn with_shell(mut self, shell: bool) -> Self {
        self.shell = shell;
        self
    }

    /// The command line with environment references expanded.
    pub fn expanded(&self) -> String {
        shellexpand::env_with_context_no_errors(&self.line, |var: &str| {
            self.env.get(var).cloned().or_else(|| std::env::var(var).ok())
        })
        .into_owned()
    }

    fn command(&self) -> Result<Command> {
        let line = self.expanded();

        let mut command = if self.shell {
            let shell = if cfg!(windows) { "cmd" } else { "sh" };
            let flag = if cfg!(windows) { "/C" } else { "-c" };
            let mut c = Command::new(shell);
            c.arg(flag).arg(&line);
            c
        } else {
            let parts = parse_command(&line);
            let Some(program) = parts.first() else {
                return Err(MkrunError::job("empty command"));
            };
            let base = match &self.cwd {
                Some(cwd) => cwd.clone(),
                None => std::env::current_dir()?,
            };
            if which::which_in(program, std::env::var_os("PATH"), &base).is_err()
                && !base.join(program).exists()
            {
                return Err(MkrunError::CommandNotFound {
                    command: program.clone(),
                });
            }
            let mut c = Command::new(program);
            c.args(&parts[1..]);
            c
        };

        command.envs(&self.env);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        Ok(command)
    }

    /// Run to completion with inherited stdio.
    pub async fn run(&self) -> Result<()> {
        debug!(command = %self.line, "running command");
        let status = self.command()?.status().await?;
        self.check(status)
    }

    /// Run until the command exits or `stop` fires, killing it in the latter case.
    pub async fn run_until_stopped(&self, stop: StopSignal) -> Result<()> {
        debug!(command = %self.line, "starting long running command");
        let mut child = self.command()?.kill_on_drop(true).spawn()?;
        let exited = tokio::select! {
            status = child.wait() => Some(status?),
            _ = stop.stopped() => None,
        };
        match exited {
            Some(status) => self.check(status),
            None => {
                child.kill().await?;
                Ok(())
            }
        }
    }

    /// Captured stdout of a successful run.
    pub async fn output(&self) -> Result<String> {
        let output = self
            .command()?
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .output()
            .await?;
        self.check(output.status)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn check(&self, status: std::process::ExitStatus) -> Result<()> {
        if status.success() {
            Ok(())
        } else {
            Err(MkrunError::CommandFailed {
                command: self.line.clone(),
                code: status.code().unwrap_or(1),
            })
        }
    }
}

/// A job running the commands one after another, stopping at the first failure.
pub fn command_job(commands: Vec<CommandSpec>) -> Job {
    Job::new(move || {
        let commands = commands.clone();
        async move {
            for command in &commands {
                command.run().await?;
            }
            Ok(())
        }
    })
}

/// A long running job that kills the command when stopped.
pub fn long_running_command(command: CommandSpec) -> LongRunningJob {
    LongRunningJob::new(move |stop| {
        let command = command.clone();
        async move { command.run_until_stopped(stop).await }
    })
}

/// Probe whose time is the trimmed output of a command, parsed with a
/// `chrono` format. A failing command means the target was never built.
pub fn command_mod_time(command: CommandSpec, format: impl Into<String>) -> ModTime {
    let format = format.into();
    ModTime::new(move || {
        let command = command.clone();
        let format = format.clone();
        async move {
            match command.output().await {
                Ok(out) => parse_time(out.trim(), &format).map(Some),
                Err(err) => {
                    debug!(command = %command.line, error = %err, "mod time command failed");
                    Ok(None)
                }
            }
        }
    })
}

/// Parse a time, treating values without an offset as UTC.
pub fn parse_time(value: &str, format: &str) -> Result<SystemTime> {
    if let Ok(t) = DateTime::parse_from_str(value, format) {
        return Ok(SystemTime::from(t.with_timezone(&Utc)));
    }
    NaiveDateTime::parse_from_str(value, format)
        .map(|t| SystemTime::from(t.and_utc()))
        .map_err(|source| MkrunError::ModTimeParse {
            value: value.to_string(),
            format: format.to_string(),
            source,
        })
}

/// Split a command string into parts, honouring single and double quotes.
fn parse_command(cmd: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in cmd.chars() {
        match (quote, c) {
            (None, '"' | '\'') => quote = Some(c),
            (Some(q), c) if c == q => quote = None,
            (None, c) if c.is_whitespace() => {
                if !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }

    if !current.is_empty() {
        parts.push(current);
    }

    parts
}
