use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn mkrun(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("mkrun").unwrap();
    cmd.current_dir(dir)
        .env_remove("MKRUN_CONFIG")
        .env_remove("MKRUN_LOG")
        .env("NO_COLOR", "1");
    cmd
}

fn project(config: &str) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("mkrun.toml"), config).unwrap();
    dir
}

const COPY: &str = r#"
[[tasks]]
name = "out.txt"
desc = "Copy the input"
depends = ["in.txt"]
shell = true
run = ["cp in.txt out.txt"]

[[tasks]]
name = "clean"
shell = true
run = ["rm -f out.txt"]
"#;

#[test]
fn check_reports_valid_config() {
    let dir = project(COPY);
    mkrun(dir.path())
        .arg("check")
        .assert()
        .success()
        .stdout(predicate::str::contains("is valid (2 tasks)"));
}

#[test]
fn check_rejects_cycles() {
    let dir = project(
        "[[tasks]]\nname = \"a\"\ndepends = [\"b\"]\n\n[[tasks]]\nname = \"b\"\ndepends = [\"a\"]\n",
    );
    mkrun(dir.path())
        .arg("check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Circular dependency detected"));
}

#[test]
fn missing_config_fails() {
    let dir = tempfile::tempdir().unwrap();
    mkrun(dir.path())
        .args(["--config", "nowhere.toml", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Configuration file not found"));
}

#[test]
fn list_plain_keeps_definition_order() {
    let dir = project(COPY);
    mkrun(dir.path())
        .args(["list", "--format", "plain"])
        .assert()
        .success()
        .stdout("out.txt\nclean\n");
}

#[test]
fn list_json_includes_descriptions() {
    let dir = project(COPY);
    mkrun(dir.path())
        .args(["list", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"description\": \"Copy the input\""));
}

#[test]
fn graph_dot_has_edges() {
    let dir = project("[[tasks]]\nname = \"app\"\ndepends = [\"lib\"]\n\n[[tasks]]\nname = \"lib\"\n");
    mkrun(dir.path())
        .args(["graph", "--format", "dot"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"lib\" -> \"app\";"));
}

#[cfg(unix)]
#[test]
fn default_target_builds_then_is_up_to_date() {
    let dir = project(COPY);
    fs::write(dir.path().join("in.txt"), "payload").unwrap();

    mkrun(dir.path())
        .assert()
        .success()
        .stderr(predicate::str::contains("building out.txt"));
    assert_eq!(fs::read_to_string(dir.path().join("out.txt")).unwrap(), "payload");

    mkrun(dir.path())
        .arg("out.txt")
        .assert()
        .success()
        .stderr(predicate::str::contains("task out.txt is up to date"));
}

#[cfg(unix)]
#[test]
fn config_is_found_from_subdirectory() {
    let dir = project(COPY);
    fs::write(dir.path().join("in.txt"), "payload").unwrap();
    let sub = dir.path().join("nested/deeper");
    fs::create_dir_all(&sub).unwrap();

    mkrun(&sub).args(["run", "-j", "1", "out.txt"]).assert().success();
    assert!(dir.path().join("out.txt").exists());
}

#[cfg(unix)]
#[test]
fn missing_dependency_fails_the_build() {
    let dir = project(COPY);
    mkrun(dir.path())
        .arg("out.txt")
        .assert()
        .failure()
        .stderr(predicate::str::contains("tasks [\"out.txt\"] failed"));
    assert!(!dir.path().join("out.txt").exists());
}

#[cfg(unix)]
#[test]
fn failing_command_fails_the_build() {
    let dir = project("[[tasks]]\nname = \"broken\"\nshell = true\nrun = [\"exit 3\"]\n");
    mkrun(dir.path())
        .arg("broken")
        .assert()
        .failure()
        .stderr(predicate::str::contains("exit code 3"));
}

#[test]
fn unknown_target_fails() {
    let dir = project(COPY);
    mkrun(dir.path())
        .args(["run", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("task nope not found"));
}

#[test]
fn watch_unknown_target_fails() {
    let dir = project(COPY);
    mkrun(dir.path())
        .args(["watch", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("task nope not found"));
}

#[test]
fn init_refuses_to_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    mkrun(dir.path()).arg("init").assert().success();
    assert!(dir.path().join("mkrun.toml").exists());

    mkrun(dir.path())
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    mkrun(dir.path()).args(["init", "--force"]).assert().success();
    mkrun(dir.path()).arg("check").assert().success();
}
