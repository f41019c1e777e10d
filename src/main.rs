//! mkrun - make-style builds for any toolchain
//!
//! - Targets and dependencies declared in mkrun.toml
//! - Modification-time staleness, like make
//! - Concurrent dependency resolution with a bounded job pool
//! - Live rebuilds and restarts on file changes

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use console::style;

mod cli;

use cli::{Cli, Commands, EffectiveCommand, GraphFormat, ListFormat};
use mkrun::config::{Config, TaskKind, CONFIG_FILES};
use mkrun::graph::TaskGraph;
use mkrun::runner::Parallelism;
use mkrun::watch::Notify;
use mkrun::{logging, MkrunError, Result};

#[tokio::main]
async fn main() -> ExitCode {
    // Set up panic handler for nice error messages
    miette::set_panic_hook();

    let cli = Cli::parse();

    logging::init_logging(cli.verbose, cli.quiet);

    if cli.no_color {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {:?}", style("error").red().bold(), miette::Report::new(e));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    if let Some(cwd) = &cli.cwd {
        std::env::set_current_dir(cwd)?;
    }

    match cli.effective_command() {
        EffectiveCommand::Subcommand(cmd) => run_command(cmd, &cli).await,
        EffectiveCommand::Build(targets) => build(targets, None, &cli).await,
    }
}

async fn run_command(cmd: &Commands, cli: &Cli) -> Result<()> {
    match cmd {
        Commands::Run { targets, jobs } => build(targets, *jobs, cli).await,

        Commands::Watch { target, jobs } => watch(target, *jobs, cli).await,

        Commands::List { format, deps } => {
            let config = load_config(cli)?;
            let graph = TaskGraph::from_config(&config)?;
            print_task_list(&graph, *format, *deps);
            Ok(())
        }

        Commands::Graph { task, format } => {
            let config = load_config(cli)?;
            let graph = TaskGraph::from_config(&config)?;
            print_graph(&graph, task.as_deref(), *format)
        }

        Commands::Init { force } => init_config(*force),

        Commands::Check => {
            let (config, path) = Config::load(cli.config.as_deref())?;
            let graph = TaskGraph::from_config(&config)?;

            println!(
                "{} {} is valid ({} tasks)",
                style("✓").green(),
                path.display(),
                graph.task_names().count()
            );
            Ok(())
        }
    }
}

/// Load the configuration and move into its directory so relative paths in
/// it resolve the same wherever mkrun is started from.
fn load_config(cli: &Cli) -> Result<Config> {
    let (config, path) = Config::load(cli.config.as_deref())?;
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::env::set_current_dir(dir)?;
    }
    Ok(config)
}

async fn build(targets: &[String], jobs: Option<i64>, cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let mut tasks = config.to_tasks();
    if let Some(jobs) = jobs {
        tasks = tasks.with_parallelism(Parallelism::from_jobs(jobs));
    }
    tasks.run(targets).await
}

async fn watch(target: &str, jobs: Option<i64>, cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    if config.get_task(target).is_none() {
        return Err(MkrunError::TaskNotFound {
            name: target.to_string(),
            available: config.task_names(),
        });
    }

    let mut tasks = config.to_tasks();
    if let Some(jobs) = jobs {
        tasks = tasks.with_parallelism(Parallelism::from_jobs(jobs));
    }

    let name = format!("watch:{target}");
    tasks.push(Notify::new(name.clone(), target));

    println!(
        "{} Watching {} (Ctrl+C to stop)",
        style("👀").cyan(),
        style(target).bold()
    );
    tasks.run(&[name]).await
}

fn kind_label(kind: TaskKind) -> Option<&'static str> {
    match kind {
        TaskKind::Task => None,
        TaskKind::Notify => Some("notify"),
        TaskKind::LongRunning => Some("long-running"),
        TaskKind::NotifyLongRunning => Some("notify-long-running"),
    }
}

fn print_task_list(graph: &TaskGraph, format: ListFormat, show_deps: bool) {
    match format {
        ListFormat::Table => {
            println!("{}", style("Available tasks:").bold());
            println!();

            let names: Vec<_> = graph.task_names().collect();
            let max_name_len = names.iter().map(|n| n.len()).max().unwrap_or(0);

            for (i, name) in names.into_iter().enumerate() {
                let Some(task) = graph.get_task(name) else {
                    continue;
                };

                print!(
                    "  {}{}  {}",
                    style(name).cyan().bold(),
                    " ".repeat(max_name_len - name.len()),
                    style(task.desc.as_deref().unwrap_or("")).dim()
                );

                if let Some(kind) = kind_label(task.kind) {
                    print!(" {}", style(format!("({kind})")).magenta());
                }

                if i == 0 {
                    print!(" {}", style("[default]").green());
                }

                if show_deps {
                    if let Some(deps) = graph.dependencies(name) {
                        if !deps.is_empty() {
                            print!(
                                " {}",
                                style(format!("[deps: {}]", deps.join(", "))).yellow().dim()
                            );
                        }
                    }
                }

                println!();
            }
        }

        ListFormat::Json => {
            let mut tasks = Vec::new();
            for name in graph.task_names() {
                if let Some(task) = graph.get_task(name) {
                    let mut obj = serde_json::Map::new();
                    obj.insert("name".to_string(), serde_json::json!(name));
                    obj.insert("kind".to_string(), serde_json::json!(task.kind));
                    if let Some(desc) = &task.desc {
                        obj.insert("description".to_string(), serde_json::json!(desc));
                    }
                    if show_deps {
                        if let Some(deps) = graph.dependencies(name) {
                            obj.insert("depends".to_string(), serde_json::json!(deps));
                        }
                    }
                    tasks.push(serde_json::Value::Object(obj));
                }
            }
            println!("{:#}", serde_json::Value::Array(tasks));
        }

        ListFormat::Plain => {
            for name in graph.task_names() {
                println!("{}", name);
            }
        }
    }
}

fn print_graph(graph: &TaskGraph, task: Option<&str>, format: GraphFormat) -> Result<()> {
    let tasks = if let Some(name) = task {
        graph.execution_order(name)?
    } else {
        graph.all_tasks_ordered()?
    };

    match format {
        GraphFormat::Text => {
            println!("{}", style("Task dependency graph:").bold());
            println!();

            for task_node in &tasks {
                let deps = graph.dependencies(&task_node.name).unwrap_or_default();

                if deps.is_empty() {
                    println!("  {}", style(&task_node.name).cyan().bold());
                } else {
                    println!(
                        "  {} {} {}",
                        style(&task_node.name).cyan().bold(),
                        style("←").dim(),
                        deps.join(", ")
                    );
                }
            }
        }

        GraphFormat::Dot => {
            println!("digraph mkrun {{");
            println!("  rankdir=LR;");
            println!("  node [shape=box];");

            for task_node in &tasks {
                if kind_label(task_node.kind).is_some() {
                    println!("  \"{}\" [style=dashed];", task_node.name);
                }
                for dep in graph.dependencies(&task_node.name).unwrap_or_default() {
                    println!("  \"{}\" -> \"{}\";", dep, task_node.name);
                }
            }

            println!("}}");
        }

        GraphFormat::Json => {
            let mut nodes = Vec::new();
            let mut edges = Vec::new();

            for task_node in &tasks {
                nodes.push(serde_json::json!({
                    "id": task_node.name,
                    "kind": task_node.kind,
                    "description": task_node.desc,
                }));

                for dep in graph.dependencies(&task_node.name).unwrap_or_default() {
                    edges.push(serde_json::json!({
                        "from": dep,
                        "to": task_node.name,
                    }));
                }
            }

            let output = serde_json::json!({
                "nodes": nodes,
                "edges": edges,
            });

            println!("{:#}", output);
        }
    }

    Ok(())
}

fn init_config(force: bool) -> Result<()> {
    let path = Path::new(CONFIG_FILES[0]);

    if path.exists() && !force {
        return Err(MkrunError::from(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            "mkrun.toml already exists (use --force to overwrite)",
        )));
    }

    let template = r#"# mkrun.toml - build configuration
#
# Tasks are built like make targets: a task whose name is an existing file is
# rebuilt only when one of its dependencies is newer. The first task is the
# default target.

[settings]
# jobs = 4            # Max concurrent jobs (absent = CPU count, 0 = unbounded)
# debounce_ms = 1000  # Quiet period before watch rebuilds

[[tasks]]
name = "build"
desc = "Build the project"
depends = ["bin/app"]

[[tasks]]
name = "bin/app"
desc = "Compile the binary"
sources = ["src/**/*.rs"]
run = ["cargo build --release", "mkdir -p bin", "cp target/release/app bin/app"]
shell = true

[[tasks]]
name = "dev"
desc = "Rebuild on every change"
kind = "notify"
target = "build"

[[tasks]]
name = "serve"
desc = "Run the app, restarting it when it is rebuilt"
kind = "notify-long-running"
depends = ["bin/app"]
run = ["./bin/app"]
"#;

    std::fs::write(path, template)?;

    println!(
        "{} Created {}",
        style("✓").green(),
        style(CONFIG_FILES[0]).bold()
    );

    Ok(())
}
