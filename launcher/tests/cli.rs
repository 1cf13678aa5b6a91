#![cfg(unix)]

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::ffi::OsString;
use std::fs;
use std::os::unix::ffi::OsStringExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};

const DECLARATION: &str = "name: demo
channels:
  - defaults
dependencies:
  - python=3.11.4=h955ad1f_0
  - pip
prefix: /opt/conda/envs/demo
";

const EXPORT: &str = "name: demo
channels:
  - defaults
dependencies:
  - python=3.11.4=h955ad1f_0
  - numpy=1.26.0=py311h08b1b3b_0
  - pip
prefix: /opt/conda/envs/demo
";

// Records every invocation in calls.log. The environment counts as existing
// once state/created is present; `run` exits with $FAKE_APP_EXIT.
const FAKE_CONDA: &str = r##"#!/bin/sh
echo "$*" >> "$FAKE_HOME/calls.log"
case "$1" in
  --version)
    echo "conda 24.1.2"
    ;;
  env)
    case "$2" in
      list)
        echo "# conda environments:"
        echo "base                  /opt/conda"
        if [ -f "$FAKE_HOME/created" ]; then
          echo "demo                  /opt/conda/envs/demo"
        fi
        ;;
      create)
        cp "$4" "$FAKE_HOME/created_from.yml"
        touch "$FAKE_HOME/created"
        ;;
      export)
        cat "$FAKE_HOME/export.yml"
        ;;
    esac
    ;;
  run)
    exit "${FAKE_APP_EXIT:-0}"
    ;;
esac
exit 0
"##;

struct Fixture {
    root: TempDir,
    home: TempDir,
    tmp: TempDir,
    conda: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let root = tempdir().unwrap();
        let home = tempdir().unwrap();
        let tmp = tempdir().unwrap();
        fs::write(root.path().join("environment.yml"), DECLARATION).unwrap();
        fs::write(home.path().join("export.yml"), EXPORT).unwrap();
        let conda = home.path().join("conda");
        fs::write(&conda, FAKE_CONDA).unwrap();
        fs::set_permissions(&conda, fs::Permissions::from_mode(0o755)).unwrap();
        Self {
            root,
            home,
            tmp,
            conda,
        }
    }

    fn with_existing_env(self) -> Self {
        fs::write(self.home.path().join("created"), "").unwrap();
        self
    }

    fn bin(&self) -> Command {
        let path = assert_cmd::cargo::cargo_bin!("conda-launcher");
        let mut cmd = Command::new(path);
        cmd.env("CONDA_LAUNCHER_ROOT", self.root.path())
            .env("CONDA_LAUNCHER_CONDA", &self.conda)
            .env("FAKE_HOME", self.home.path())
            .env("TMPDIR", self.tmp.path())
            .env("LANG", "C")
            .env_remove("LC_ALL")
            .env_remove("LC_MESSAGES")
            .env_remove("RUST_LOG");
        cmd
    }

    fn calls(&self) -> Vec<String> {
        fs::read_to_string(self.home.path().join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn declaration(&self) -> String {
        fs::read_to_string(self.root.path().join("environment.yml")).unwrap()
    }

    fn leftover_copies(&self) -> Vec<String> {
        fs::read_dir(self.tmp.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .filter(|name| name.starts_with("environment-"))
            .collect()
    }

    fn entry_point(&self) -> String {
        self.root
            .path()
            .join("src/main.py")
            .to_string_lossy()
            .to_string()
    }
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).expect("json file")
}

#[test]
fn missing_conda_fails_before_touching_anything() {
    let fx = Fixture::new();
    fx.bin()
        .env("CONDA_LAUNCHER_CONDA", fx.home.path().join("no-such-conda"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains(
            "Conda is required to run this application",
        ));
    assert_eq!(fx.declaration(), DECLARATION);
    assert!(fx.leftover_copies().is_empty());
}

#[test]
fn first_launch_creates_environment_and_forwards_arguments() {
    let fx = Fixture::new();
    fx.bin()
        .args(["--debug", "scene.blend", "-v"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Starting Conda Launcher"));

    let calls = fx.calls();
    assert_eq!(calls[0], "--version");
    assert_eq!(calls[1], "env list");
    assert!(calls[2].starts_with("env create -f "));
    assert_eq!(
        calls[3],
        format!(
            "run --no-capture-output -n demo python {} --debug scene.blend -v",
            fx.entry_point()
        )
    );

    let created = fs::read_to_string(fx.home.path().join("created_from.yml")).unwrap();
    assert!(created.contains("  - python=3.11.4\n"));
    assert!(!created.contains("prefix:"));
    assert_eq!(fx.declaration(), DECLARATION);
    assert!(fx.leftover_copies().is_empty());
}

#[test]
fn existing_environment_is_launched_directly() {
    let fx = Fixture::new().with_existing_env();
    fx.bin().assert().success();
    let calls = fx.calls();
    assert_eq!(calls.len(), 3);
    assert!(calls[2].starts_with("run "));
}

#[test]
fn update_flag_updates_before_launch() {
    let fx = Fixture::new().with_existing_env();
    fx.bin().arg("--update").assert().success();
    let calls = fx.calls();
    assert!(calls[2].starts_with("env update -f "));
    assert!(calls[2].ends_with(" --prune"));
    assert!(calls[3].starts_with("run "));
}

#[test]
fn child_exit_code_is_propagated() {
    let fx = Fixture::new().with_existing_env();
    fx.bin()
        .env("FAKE_APP_EXIT", "3")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("exit code 3"));
    assert!(fx.leftover_copies().is_empty());
}

#[test]
fn install_requires_existing_environment() {
    let fx = Fixture::new();
    fx.bin()
        .args(["--install", "numpy"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("does not exist"));
    assert!(fx.calls().iter().all(|call| !call.starts_with("install")));
    assert_eq!(fx.declaration(), DECLARATION);
}

#[test]
fn install_records_normalized_snapshot() {
    let fx = Fixture::new().with_existing_env();
    fx.bin().args(["--install", "numpy"]).assert().success();

    let calls = fx.calls();
    assert!(calls.contains(&"install -n demo -y numpy".to_string()));
    assert!(calls.contains(&"env export -n demo".to_string()));
    assert!(calls.iter().all(|call| !call.starts_with("run")));
    assert_eq!(
        fx.declaration(),
        "name: demo\nchannels:\n  - defaults\ndependencies:\n  - python=3.11.4\n  - numpy=1.26.0\n  - pip\n"
    );
}

#[test]
fn uninstall_runs_remove_and_saves() {
    let fx = Fixture::new().with_existing_env();
    fx.bin().arg("--uninstall=numpy").assert().success();
    let calls = fx.calls();
    assert!(calls.contains(&"remove -n demo -y numpy".to_string()));
    assert!(calls.contains(&"env export -n demo".to_string()));
}

#[test]
fn save_environment_rewrites_declaration() {
    let fx = Fixture::new().with_existing_env();
    fx.bin().arg("save_environment").assert().success();
    let declaration = fx.declaration();
    assert!(declaration.contains("  - numpy=1.26.0\n"));
    assert!(!declaration.contains("prefix:"));
    assert!(fx.calls().iter().all(|call| !call.starts_with("run")));
}

#[test]
fn unreadable_declaration_is_reported() {
    let fx = Fixture::new();
    fs::remove_file(fx.root.path().join("environment.yml")).unwrap();
    fx.bin()
        .assert()
        .code(1)
        .stderr(predicate::str::contains("environment.yml"));
    assert!(fx.calls().is_empty());
}

#[test]
fn settings_files_are_created_on_first_run() {
    let fx = Fixture::new().with_existing_env();
    fx.bin().assert().success();
    let base = read_json(&fx.root.path().join("config.json"));
    assert_eq!(base["interpreter"], "python");
    assert_eq!(
        fs::read_to_string(fx.root.path().join("user_config.json")).unwrap(),
        "{}\n"
    );
}

#[test]
fn configured_interpreter_is_used() {
    let fx = Fixture::new().with_existing_env();
    fs::write(
        fx.root.path().join("user_config.json"),
        r#"{"interpreter": "python3", "no_capture_output": false}"#,
    )
    .unwrap();
    fx.bin().assert().success();
    let calls = fx.calls();
    assert_eq!(
        calls.last().unwrap(),
        &format!("run -n demo python3 {}", fx.entry_point())
    );
}

#[test]
fn log_file_mirrors_console_without_colors() {
    let fx = Fixture::new().with_existing_env();
    fs::write(
        fx.root.path().join("user_config.json"),
        r#"{"log_file": "logs/launcher.log"}"#,
    )
    .unwrap();
    fx.bin().assert().success();
    let log = fs::read_to_string(fx.root.path().join("logs/launcher.log")).unwrap();
    assert!(log.contains("[conda-launcher][I]"));
    assert!(log.contains("Starting Conda Launcher"));
    assert!(!log.contains('\u{1b}'));
}

#[test]
fn corrupt_settings_fall_back_to_defaults() {
    let fx = Fixture::new().with_existing_env();
    fs::write(
        fx.root.path().join("user_config.json"),
        r#"{ "interpreter": "#,
    )
    .unwrap();
    fx.bin()
        .assert()
        .success()
        .stdout(predicate::str::contains("using built-in defaults"));
    assert_eq!(
        fx.calls().last().unwrap(),
        &format!("run --no-capture-output -n demo python {}", fx.entry_point())
    );
    assert_eq!(
        fs::read_to_string(fx.root.path().join("user_config.json")).unwrap(),
        r#"{ "interpreter": "#
    );
}

#[test]
fn non_utf8_arguments_reach_the_application_unchanged() {
    let fx = Fixture::new().with_existing_env();
    let raw = OsString::from_vec(b"caf\xe9.txt".to_vec());
    fx.bin().arg(&raw).assert().success();
    let log = fs::read(fx.home.path().join("calls.log")).unwrap();
    let expected = [
        b"python ".as_slice(),
        fx.entry_point().as_bytes(),
        b" caf\xe9.txt\n".as_slice(),
    ]
    .concat();
    assert!(log.ends_with(&expected));
}
