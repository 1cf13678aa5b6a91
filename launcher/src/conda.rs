use std::env;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::LauncherError;
use crate::i18n::Translator;

/// Overrides the conda executable for every invocation.
pub const CONDA_ENV: &str = "CONDA_LAUNCHER_CONDA";

const DEFAULT_PROGRAM: &str = "conda";

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status_code == 0
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }
}

pub trait CondaRunner {
    /// Name used when rendering commands in messages.
    fn program(&self) -> &Path;

    fn run(&self, args: &[OsString], capture_output: bool) -> Result<CommandOutput, io::Error>;
}

#[derive(Debug, Clone)]
pub struct RealCondaRunner {
    program: PathBuf,
}

impl RealCondaRunner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// `CONDA_LAUNCHER_CONDA`, then the configured path, then `conda` on the
    /// search path. When nothing resolves the bare name is kept so the spawn
    /// itself reports the missing tool.
    pub fn resolve(configured: Option<&str>) -> Self {
        if let Ok(path) = env::var(CONDA_ENV) {
            if !path.trim().is_empty() {
                return Self::new(path);
            }
        }
        if let Some(path) = configured.filter(|p| !p.trim().is_empty()) {
            return Self::new(path);
        }
        match which::which(DEFAULT_PROGRAM) {
            Ok(path) => Self::new(path),
            Err(_) => Self::new(DEFAULT_PROGRAM),
        }
    }
}

impl CondaRunner for RealCondaRunner {
    fn program(&self) -> &Path {
        &self.program
    }

    fn run(&self, args: &[OsString], capture_output: bool) -> Result<CommandOutput, io::Error> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args);
        if capture_output {
            let output = cmd.stdin(Stdio::null()).output()?;
            let status_code = output
                .status
                .code()
                .unwrap_or(if output.status.success() { 0 } else { 1 });
            Ok(CommandOutput {
                status_code,
                stdout: output.stdout,
                stderr: output.stderr,
            })
        } else {
            let status = cmd.status()?;
            let status_code = status
                .code()
                .unwrap_or(if status.success() { 0 } else { 1 });
            Ok(CommandOutput {
                status_code,
                stdout: Vec::new(),
                stderr: Vec::new(),
            })
        }
    }
}

/// Typed calls into the package manager.
///
/// The two probes never fail: any problem is logged and reported as `false`.
/// Everything else surfaces as [`LauncherError::Process`].
pub struct Conda<'a, R: CondaRunner> {
    runner: &'a R,
    tr: &'a Translator,
}

impl<'a, R: CondaRunner> Conda<'a, R> {
    pub fn new(runner: &'a R, tr: &'a Translator) -> Self {
        Self { runner, tr }
    }

    pub fn tool_available(&self) -> bool {
        match self.execute(&args(&["--version"]), true) {
            Ok(output) => {
                let version = output.stdout_text().trim().to_string();
                tracing::info!(
                    "{}",
                    self.tr
                        .t_args("launcher.conda_detected", &[("version", version.as_str())])
                );
                true
            }
            Err(err) => {
                tracing::debug!("{err}");
                tracing::warn!("{}", self.tr.t("launcher.conda_not_found"));
                false
            }
        }
    }

    /// Whether `conda env list` shows `name`. Fails closed.
    pub fn environment_exists(&self, name: &str) -> bool {
        let output = match self.execute(&args(&["env", "list"]), true) {
            Ok(output) => output,
            Err(err) => {
                tracing::debug!("{err}");
                tracing::warn!("{}", self.tr.t("launcher.env_list_failed"));
                return false;
            }
        };
        let found = listing_contains(&output.stdout_text(), name);
        let key = if found {
            "launcher.env_found"
        } else {
            "launcher.env_not_found"
        };
        tracing::info!("{}", self.tr.t_args(key, &[("env", name)]));
        found
    }

    pub fn create(&self, file: &Path) -> Result<(), LauncherError> {
        let mut cmd = args(&["env", "create", "-f"]);
        cmd.push(file.as_os_str().to_owned());
        self.execute(&cmd, false).map(|_| ())
    }

    /// Apply `file` to the live environment, removing packages it no longer
    /// lists.
    pub fn update(&self, file: &Path) -> Result<(), LauncherError> {
        let mut cmd = args(&["env", "update", "-f"]);
        cmd.push(file.as_os_str().to_owned());
        cmd.push(OsString::from("--prune"));
        self.execute(&cmd, false).map(|_| ())
    }

    pub fn install(&self, env_name: &str, package: &str) -> Result<(), LauncherError> {
        self.execute(&args(&["install", "-n", env_name, "-y", package]), false)
            .map(|_| ())
    }

    pub fn remove(&self, env_name: &str, package: &str) -> Result<(), LauncherError> {
        self.execute(&args(&["remove", "-n", env_name, "-y", package]), false)
            .map(|_| ())
    }

    /// Raw `conda env export` output.
    pub fn export(&self, env_name: &str) -> Result<String, LauncherError> {
        let output = self.execute(&args(&["env", "export", "-n", env_name]), true)?;
        Ok(output.stdout_text())
    }

    pub fn render(&self, args: &[OsString]) -> String {
        render_command(self.runner.program(), args)
    }

    fn execute(&self, args: &[OsString], capture_output: bool) -> Result<CommandOutput, LauncherError> {
        let command = self.render(args);
        tracing::debug!("running `{command}`");
        let output = self.runner.run(args, capture_output).map_err(|err| {
            LauncherError::Process(format!("failed to run command `{command}`: {err}"))
        })?;
        if !output.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let mut message = format!(
                "command failed with status {} while running `{}`",
                output.status_code, command
            );
            if !stderr.is_empty() {
                message = format!("{message}: {stderr}");
            }
            return Err(LauncherError::Process(message));
        }
        Ok(output)
    }
}

/// True when a trimmed listing line is `name`, or starts with `name` followed
/// by a space or the active-environment marker.
pub fn listing_contains(listing: &str, name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    let spaced = format!("{name} ");
    let starred = format!("{name}*");
    listing.lines().any(|line| {
        let line = line.trim();
        line == name || line.starts_with(&spaced) || line.starts_with(&starred)
    })
}

pub fn render_command(program: &Path, args: &[OsString]) -> String {
    let mut parts = vec![program
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| program.display().to_string())];
    parts.extend(args.iter().map(|arg| arg.to_string_lossy().into_owned()));
    parts.join(" ")
}

fn args(items: &[&str]) -> Vec<OsString> {
    items.iter().map(|s| OsString::from(*s)).collect()
}
