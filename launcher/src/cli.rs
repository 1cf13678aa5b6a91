use clap::Parser;
use std::ffi::OsString;
use std::path::PathBuf;

use crate::reconcile::EnvCommand;

pub const ROOT_ENV: &str = "CONDA_LAUNCHER_ROOT";

/// Options that take a value, either as the next argument or after `=`.
const VALUE_OPTIONS: &[&str] = &["--install", "--uninstall", "--root", "--log-level"];
const FLAG_OPTIONS: &[&str] = &["--update", "-h", "--help", "-V", "--version"];
const COMMANDS: &[&str] = &["update_environment", "save_environment"];

#[derive(Parser, Debug)]
#[command(
    name = "conda-launcher",
    version,
    about = "Create, maintain and run the application's conda environment",
    after_help = "Arguments not listed here are passed to the application unchanged."
)]
pub struct Cli {
    /// Maintenance command to run instead of launching.
    #[arg(value_enum)]
    pub command: Option<EnvCommand>,
    /// Install a package and record it in environment.yml.
    #[arg(long, value_name = "PACKAGE")]
    pub install: Option<String>,
    /// Uninstall a package and record the change in environment.yml.
    #[arg(long, value_name = "PACKAGE")]
    pub uninstall: Option<String>,
    /// Update the environment from environment.yml before launching.
    #[arg(long)]
    pub update: bool,
    #[arg(long, env = ROOT_ENV, hide = true)]
    pub root: Option<PathBuf>,
    /// Log filter, e.g. `debug`. Overrides RUST_LOG and the config file.
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,
    #[arg(skip)]
    pub forwarded: Vec<OsString>,
}

impl Cli {
    /// Parse the process arguments, keeping unrecognized ones for the
    /// launched program.
    pub fn parse_with_passthrough<I, T>(args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        let (known, forwarded) = split_known_args(args);
        let mut cli = Cli::parse_from(known);
        cli.forwarded = forwarded;
        cli
    }
}

/// Separate launcher arguments from those meant for the application.
///
/// The first element is the program name and always stays on the known side.
/// Everything after a bare `--` is forwarded; the `--` itself is dropped.
/// Arguments that are not valid UTF-8 are always forwarded, byte for byte.
pub fn split_known_args<I, T>(args: I) -> (Vec<OsString>, Vec<OsString>)
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let mut iter = args.into_iter().map(Into::<OsString>::into);
    let mut known: Vec<OsString> = iter.next().into_iter().collect();
    let mut forwarded = Vec::new();
    let mut command_seen = false;

    while let Some(arg) = iter.next() {
        let text = match arg.to_str() {
            Some(text) => text.to_owned(),
            None => {
                forwarded.push(arg);
                continue;
            }
        };
        let text = text.as_str();
        if text == "--" {
            forwarded.extend(iter.by_ref());
            break;
        }
        if VALUE_OPTIONS.contains(&text) {
            known.push(arg);
            if let Some(value) = iter.next() {
                known.push(value);
            }
            continue;
        }
        let inline_value = text
            .split_once('=')
            .is_some_and(|(name, _)| VALUE_OPTIONS.contains(&name));
        if inline_value || FLAG_OPTIONS.contains(&text) {
            known.push(arg);
            continue;
        }
        if !command_seen && COMMANDS.contains(&text) {
            command_seen = true;
            known.push(arg);
            continue;
        }
        forwarded.push(arg);
    }
    (known, forwarded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<OsString> {
        items.iter().map(|s| OsString::from(*s)).collect()
    }

    #[test]
    fn unknown_arguments_are_forwarded_in_order() {
        let (known, forwarded) = split_known_args(strings(&[
            "conda-launcher",
            "--debug",
            "--install",
            "numpy",
            "scene.blend",
            "-v",
        ]));
        assert_eq!(known, strings(&["conda-launcher", "--install", "numpy"]));
        assert_eq!(forwarded, strings(&["--debug", "scene.blend", "-v"]));
    }

    #[test]
    fn inline_values_are_recognized() {
        let (known, forwarded) =
            split_known_args(strings(&["x", "--uninstall=scipy", "--other=1"]));
        assert_eq!(known, strings(&["x", "--uninstall=scipy"]));
        assert_eq!(forwarded, strings(&["--other=1"]));
    }

    #[test]
    fn only_first_command_is_taken() {
        let (known, forwarded) = split_known_args(strings(&[
            "x",
            "save_environment",
            "update_environment",
        ]));
        assert_eq!(known, strings(&["x", "save_environment"]));
        assert_eq!(forwarded, strings(&["update_environment"]));
    }

    #[test]
    fn double_dash_forwards_the_rest() {
        let (known, forwarded) =
            split_known_args(strings(&["x", "--update", "--", "--install", "a"]));
        assert_eq!(known, strings(&["x", "--update"]));
        assert_eq!(forwarded, strings(&["--install", "a"]));
    }

    #[test]
    fn parsed_cli_carries_forwarded_arguments() {
        let cli = Cli::parse_with_passthrough(strings(&[
            "conda-launcher",
            "--frobnicate",
            "update_environment",
            "--install=numpy",
            "--update",
        ]));
        assert_eq!(cli.command, Some(EnvCommand::UpdateEnvironment));
        assert_eq!(cli.install.as_deref(), Some("numpy"));
        assert!(cli.update);
        assert_eq!(cli.forwarded, strings(&["--frobnicate"]));
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_arguments_are_forwarded_untouched() {
        use std::os::unix::ffi::OsStringExt;

        let raw = OsString::from_vec(vec![b'-', b'-', 0xfe, b'x']);
        let mut args = strings(&["x", "--update"]);
        args.push(raw.clone());
        args.push(OsString::from("tail"));
        let (known, forwarded) = split_known_args(args);
        assert_eq!(known, strings(&["x", "--update"]));
        assert_eq!(forwarded, vec![raw, OsString::from("tail")]);
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
