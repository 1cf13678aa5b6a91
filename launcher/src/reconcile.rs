//! Decides what to do with the declared environment on this run.
//!
//! Exactly one operation runs per invocation. Conda must be present for any
//! of them; past that check every failure aborts the run without trying to
//! undo what the package manager already did.

use std::path::Path;

use crate::conda::{Conda, CondaRunner};
use crate::declaration::{read_environment_name, write_snapshot};
use crate::error::LauncherError;
use crate::i18n::Translator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum EnvCommand {
    UpdateEnvironment,
    SaveEnvironment,
}

impl EnvCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvCommand::UpdateEnvironment => "update_environment",
            EnvCommand::SaveEnvironment => "save_environment",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Install(String),
    Uninstall(String),
    Command(EnvCommand),
    /// Create the environment if needed, optionally update it, then launch.
    Launch { update: bool },
}

impl Operation {
    /// `--install` beats `--uninstall`, which beats a positional command,
    /// which beats the default launch.
    pub fn select(
        install: Option<String>,
        uninstall: Option<String>,
        command: Option<EnvCommand>,
        update: bool,
    ) -> Self {
        if let Some(package) = install {
            return Operation::Install(package);
        }
        if let Some(package) = uninstall {
            return Operation::Uninstall(package);
        }
        if let Some(command) = command {
            return Operation::Command(command);
        }
        Operation::Launch { update }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The operation is complete; nothing is launched.
    Finished,
    Launch { env_name: String },
}

pub struct Reconciler<'a, R: CondaRunner> {
    conda: Conda<'a, R>,
    tr: &'a Translator,
    project_name: &'a str,
    declaration: &'a Path,
    normalized: &'a Path,
}

impl<'a, R: CondaRunner> Reconciler<'a, R> {
    /// `declaration` is the file on disk, `normalized` its cleaned temporary
    /// copy used for create and update.
    pub fn new(
        runner: &'a R,
        tr: &'a Translator,
        project_name: &'a str,
        declaration: &'a Path,
        normalized: &'a Path,
    ) -> Self {
        Self {
            conda: Conda::new(runner, tr),
            tr,
            project_name,
            declaration,
            normalized,
        }
    }

    pub fn run(&self, operation: &Operation) -> Result<Outcome, LauncherError> {
        if !self.conda.tool_available() {
            return Err(LauncherError::Prerequisite(
                self.tr.t("launcher.conda_required"),
            ));
        }
        match operation {
            Operation::Install(package) => {
                self.install(package)?;
                Ok(Outcome::Finished)
            }
            Operation::Uninstall(package) => {
                self.uninstall(package)?;
                Ok(Outcome::Finished)
            }
            Operation::Command(command) => {
                tracing::info!(
                    "{}",
                    self.tr
                        .t_args("launcher.running_command", &[("command", command.as_str())])
                );
                match command {
                    EnvCommand::UpdateEnvironment => self.update()?,
                    EnvCommand::SaveEnvironment => {
                        let name = self.env_name()?;
                        self.save(&name)?;
                    }
                }
                Ok(Outcome::Finished)
            }
            Operation::Launch { update } => {
                tracing::info!(
                    "{}",
                    self.tr
                        .t_args("launcher.starting", &[("project", self.project_name)])
                );
                let name = self.env_name()?;
                if !self.conda.environment_exists(&name) {
                    self.create()?;
                }
                if *update {
                    self.update()?;
                }
                Ok(Outcome::Launch { env_name: name })
            }
        }
    }

    fn env_name(&self) -> Result<String, LauncherError> {
        read_environment_name(self.declaration)
            .ok_or_else(|| LauncherError::Declaration(self.tr.t("launcher.env_name_missing")))
    }

    fn install(&self, package: &str) -> Result<(), LauncherError> {
        let name = self.env_name()?;
        if !self.conda.environment_exists(&name) {
            return Err(LauncherError::Operation(self.tr.t_args(
                "launcher.env_missing_create_first",
                &[("env", name.as_str())],
            )));
        }
        let args = [("package", package), ("env", name.as_str())];
        tracing::info!("{}", self.tr.t_args("launcher.installing", &args));
        self.conda
            .install(&name, package)
            .map_err(|err| self.failed(err, self.tr.t_args("launcher.install_failed", &args)))?;
        tracing::info!("{}", self.tr.t_args("launcher.installed", &args));
        self.save(&name)?;
        tracing::info!("{}", self.tr.t("launcher.install_done"));
        Ok(())
    }

    fn uninstall(&self, package: &str) -> Result<(), LauncherError> {
        let name = self.env_name()?;
        if !self.conda.environment_exists(&name) {
            return Err(LauncherError::Operation(
                self.tr
                    .t_args("launcher.env_missing", &[("env", name.as_str())]),
            ));
        }
        let args = [("package", package), ("env", name.as_str())];
        tracing::info!("{}", self.tr.t_args("launcher.uninstalling", &args));
        self.conda
            .remove(&name, package)
            .map_err(|err| self.failed(err, self.tr.t_args("launcher.uninstall_failed", &args)))?;
        tracing::info!("{}", self.tr.t_args("launcher.uninstalled", &args));
        self.save(&name)?;
        tracing::info!("{}", self.tr.t("launcher.uninstall_done"));
        Ok(())
    }

    fn create(&self) -> Result<(), LauncherError> {
        tracing::info!("{}", self.tr.t("launcher.creating"));
        self.conda
            .create(self.normalized)
            .map_err(|err| self.failed(err, self.tr.t("launcher.create_failed")))?;
        tracing::info!("{}", self.tr.t("launcher.created"));
        Ok(())
    }

    fn update(&self) -> Result<(), LauncherError> {
        tracing::info!("{}", self.tr.t("launcher.updating"));
        self.conda
            .update(self.normalized)
            .map_err(|err| self.failed(err, self.tr.t("launcher.update_failed")))?;
        tracing::info!("{}", self.tr.t("launcher.updated"));
        Ok(())
    }

    /// Export the live environment and make it the new declaration.
    fn save(&self, name: &str) -> Result<(), LauncherError> {
        tracing::info!("{}", self.tr.t_args("launcher.saving", &[("env", name)]));
        let declaration = self
            .conda
            .export(name)
            .and_then(|snapshot| write_snapshot(self.declaration, &snapshot))
            .map_err(|err| self.failed(err, self.tr.t("launcher.save_failed")))?;
        tracing::debug!(
            "{} recorded with {} channels and {} dependencies",
            self.declaration.display(),
            declaration.channels.len(),
            declaration.dependencies.len()
        );
        tracing::info!("{}", self.tr.t("launcher.saved"));
        Ok(())
    }

    fn failed(&self, cause: LauncherError, message: String) -> LauncherError {
        tracing::error!("{cause}");
        LauncherError::Operation(message)
    }
}
