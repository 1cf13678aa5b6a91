use std::ffi::OsString;
use std::path::PathBuf;

use crate::conda::{render_command, CondaRunner};
use crate::error::LauncherError;
use crate::i18n::Translator;

/// What to start inside the environment.
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub env_name: String,
    pub interpreter: String,
    pub entry_point: PathBuf,
    pub no_capture_output: bool,
    /// Arguments the launcher did not recognize, in their original order.
    pub forwarded: Vec<OsString>,
}

impl LaunchPlan {
    pub fn args(&self) -> Vec<OsString> {
        let mut args = vec![OsString::from("run")];
        if self.no_capture_output {
            args.push(OsString::from("--no-capture-output"));
        }
        args.push(OsString::from("-n"));
        args.push(OsString::from(&self.env_name));
        args.push(OsString::from(&self.interpreter));
        args.push(self.entry_point.clone().into_os_string());
        args.extend(self.forwarded.iter().cloned());
        args
    }
}

/// Run the entry point with inherited stdio and wait for it.
///
/// A non-zero exit becomes [`LauncherError::Launch`] carrying the child's
/// code.
pub fn launch<R: CondaRunner>(
    runner: &R,
    tr: &Translator,
    plan: &LaunchPlan,
) -> Result<(), LauncherError> {
    tracing::info!("{}", tr.t("launcher.launching"));
    let args = plan.args();
    let command = render_command(runner.program(), &args);
    tracing::debug!("running `{command}`");
    let output = runner.run(&args, false).map_err(|err| LauncherError::Launch {
        message: format!("failed to run command `{command}`: {err}"),
        code: 1,
    })?;
    if !output.success() {
        let code = output.status_code;
        let code_text = code.to_string();
        return Err(LauncherError::Launch {
            message: tr.t_args("launcher.launch_failed", &[("code", code_text.as_str())]),
            code,
        });
    }
    Ok(())
}
