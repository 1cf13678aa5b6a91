use dirs::home_dir;
use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use conda_launcher::cli::Cli;
use conda_launcher::conda::RealCondaRunner;
use conda_launcher::config::Config;
use conda_launcher::declaration::{declaration_path, normalized_copy, DECLARATION_FILE};
use conda_launcher::error::{guard, LauncherError};
use conda_launcher::i18n::Translator;
use conda_launcher::launch::{launch, LaunchPlan};
use conda_launcher::logging::{self, LogSettings};
use conda_launcher::reconcile::{Operation, Outcome, Reconciler};

const LOCALES_DIR: &str = "locales";

struct Context {
    root: PathBuf,
    settings: LauncherSettings,
    tr: Translator,
}

/// Values the run needs from the merged configuration, with the built-in
/// defaults for anything missing or of the wrong type.
#[derive(Debug, Clone)]
struct LauncherSettings {
    project_name: String,
    interpreter: String,
    entry_point: String,
    no_capture_output: bool,
    conda_executable: Option<String>,
}

impl LauncherSettings {
    fn from_config(config: &Config) -> Self {
        let text = |key: &str, default: &str| {
            config
                .get_str(key)
                .filter(|value| !value.trim().is_empty())
                .unwrap_or(default)
                .to_string()
        };
        Self {
            project_name: text("project_name", "Conda Launcher"),
            interpreter: text("interpreter", "python"),
            entry_point: text("entry_point", "src/main.py"),
            no_capture_output: config.get_bool("no_capture_output").unwrap_or(true),
            conda_executable: config
                .get_str("conda_executable")
                .filter(|value| !value.trim().is_empty())
                .map(str::to_string),
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse_with_passthrough(env::args_os());
    let code = guard(|| {
        let ctx = build_context(&cli)?;
        run(&ctx, &cli)
    });
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

fn build_context(cli: &Cli) -> Result<Context, LauncherError> {
    let root = resolve_root(cli.root.as_ref());
    let (config, config_err) = match Config::init_in(&root) {
        Ok(config) => (config, None),
        Err(err) => (Config::defaults_in(&root)?, Some(err)),
    };

    let settings = log_settings(&root, &config, cli.log_level.as_deref());
    if let Err(err) = logging::init(&settings) {
        let _ = logging::init(&LogSettings {
            file: None,
            ..settings.clone()
        });
        tracing::warn!("file logging disabled: {err}");
    }
    if let Some(err) = config_err {
        tracing::warn!("using built-in defaults: {err}");
    }
    tracing::debug!(
        "settings loaded from {} and {}: {}",
        config.base_path().display(),
        config.user_path().display(),
        config.get(None)?
    );

    let tr = load_translator(&root, &config);
    Ok(Context {
        settings: LauncherSettings::from_config(&config),
        root,
        tr,
    })
}

fn run(ctx: &Context, cli: &Cli) -> Result<(), LauncherError> {
    let declaration = declaration_path(&ctx.root);
    let normalized = normalized_copy(&declaration).map_err(|err| {
        tracing::error!("{err}");
        LauncherError::Declaration(ctx.tr.t("launcher.declaration_unreadable"))
    })?;
    tracing::debug!("normalized declaration at {}", normalized.path().display());

    let runner = RealCondaRunner::resolve(ctx.settings.conda_executable.as_deref());
    let operation = Operation::select(
        cli.install.clone(),
        cli.uninstall.clone(),
        cli.command,
        cli.update,
    );
    let reconciler = Reconciler::new(
        &runner,
        &ctx.tr,
        &ctx.settings.project_name,
        &declaration,
        normalized.path(),
    );

    match reconciler.run(&operation)? {
        Outcome::Finished => Ok(()),
        Outcome::Launch { env_name } => {
            let plan = LaunchPlan {
                env_name,
                interpreter: ctx.settings.interpreter.clone(),
                entry_point: ctx.root.join(&ctx.settings.entry_point),
                no_capture_output: ctx.settings.no_capture_output,
                forwarded: cli.forwarded.clone(),
            };
            launch(&runner, &ctx.tr, &plan)
        }
    }
}

/// `--root` or its environment variable, then the executable's directory
/// when it holds a declaration, then the working directory.
fn resolve_root(override_path: Option<&PathBuf>) -> PathBuf {
    if let Some(path) = override_path {
        return path.clone();
    }
    if let Ok(exe) = env::current_exe() {
        if let Some(dir) = exe.parent() {
            if dir.join(DECLARATION_FILE).exists() {
                return dir.to_path_buf();
            }
        }
    }
    env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

fn log_settings(root: &Path, config: &Config, cli_level: Option<&str>) -> LogSettings {
    let defaults = LogSettings::default();
    let (level, level_forced) = match cli_level {
        Some(level) => (level.to_string(), true),
        None => (
            config
                .get_str("log_level")
                .map(str::to_string)
                .unwrap_or(defaults.level),
            false,
        ),
    };
    LogSettings {
        level,
        level_forced,
        file: config
            .get_str("log_file")
            .filter(|path| !path.trim().is_empty())
            .map(|path| resolve_path(root, path)),
        max_bytes: config.get_u64("log_max_bytes").unwrap_or(defaults.max_bytes),
        backup_count: config
            .get_u64("log_backup_count")
            .and_then(|count| usize::try_from(count).ok())
            .unwrap_or(defaults.backup_count),
    }
}

fn resolve_path(root: &Path, input: &str) -> PathBuf {
    let expanded = expand_path(input);
    if expanded.is_absolute() {
        expanded
    } else {
        root.join(expanded)
    }
}

fn expand_path(input: &str) -> PathBuf {
    if let Some(stripped) = input.strip_prefix("~/") {
        if let Some(home) = home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(input)
}

fn load_translator(root: &Path, config: &Config) -> Translator {
    let language = config.get_str("language");
    let fallback = config.get_str("fallback_language");
    match Translator::load(&root.join(LOCALES_DIR), language, fallback) {
        Ok(tr) => {
            tracing::debug!(
                "language {} (fallback {}), available: {}",
                tr.language(),
                tr.fallback_language(),
                tr.available_languages().join(", ")
            );
            tr
        }
        Err(err) => {
            tracing::warn!("using built-in messages: {err}");
            Translator::builtin()
        }
    }
}
