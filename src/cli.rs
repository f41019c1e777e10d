//! CLI command definitions
//!
//! Uses `clap` derive API for argument parsing.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// mkrun - make-style builds with parallel jobs and file watching
#[derive(Parser, Debug)]
#[command(name = "mkrun")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    /// Path to mkrun.toml config file
    #[arg(short, long, global = true, env = "MKRUN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only report warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Working directory
    #[arg(long, global = true)]
    pub cwd: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Targets to build (shorthand for `mkrun run <target>...`)
    #[arg(trailing_var_arg = true)]
    pub targets: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build targets; the first defined task when none are given
    Run {
        targets: Vec<String>,

        /// Maximum concurrent jobs (0 or less = unbounded)
        #[arg(short, long, allow_negative_numbers = true)]
        jobs: Option<i64>,
    },

    /// Rebuild a target whenever one of its inputs changes
    Watch {
        target: String,

        /// Maximum concurrent jobs (0 or less = unbounded)
        #[arg(short, long, allow_negative_numbers = true)]
        jobs: Option<i64>,
    },

    /// List available tasks
    List {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: ListFormat,

        /// Show task dependencies
        #[arg(long)]
        deps: bool,
    },

    /// Show task dependency graph
    Graph {
        /// Task to show graph for (all tasks if not specified)
        task: Option<String>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: GraphFormat,
    },

    /// Initialize a new mkrun.toml
    Init {
        /// Overwrite existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Validate mkrun.toml configuration
    Check,
}

#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum ListFormat {
    #[default]
    Table,
    Json,
    Plain,
}

#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum GraphFormat {
    #[default]
    Text,
    Dot,
    Json,
}

impl Cli {
    /// Get the effective command, treating bare target names as `run <target>...`
    pub fn effective_command(&self) -> EffectiveCommand<'_> {
        match &self.command {
            Some(cmd) => EffectiveCommand::Subcommand(cmd),
            None => EffectiveCommand::Build(&self.targets),
        }
    }
}

pub enum EffectiveCommand<'a> {
    Subcommand(&'a Commands),
    Build(&'a [String]),
}
