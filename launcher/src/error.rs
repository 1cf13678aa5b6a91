use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;

use crate::config::ConfigError;
use crate::logging::{self, LogSettings};

#[derive(Debug, Error)]
pub enum LauncherError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("process error: {0}")]
    Process(String),
    #[error("{0}")]
    Declaration(String),
    #[error("{0}")]
    Prerequisite(String),
    #[error("{0}")]
    Operation(String),
    #[error("{message}")]
    Launch { message: String, code: i32 },
}

impl LauncherError {
    /// Exit code the process should terminate with for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            LauncherError::Launch { code, .. } if *code != 0 => *code,
            _ => 1,
        }
    }
}

/// Run `body` and turn whatever escapes it, error or panic, into a logged
/// message and a process exit code.
pub fn guard<F>(body: F) -> i32
where
    F: FnOnce() -> Result<(), LauncherError>,
{
    let result = panic::catch_unwind(AssertUnwindSafe(body));

    // No-op once the configured subscriber is installed.
    let _ = logging::init(&LogSettings::default());
    match result {
        Ok(Ok(())) => 0,
        Ok(Err(err)) => {
            tracing::error!("{err}");
            err.exit_code()
        }
        Err(payload) => {
            tracing::error!("unexpected failure: {}", panic_message(payload.as_ref()));
            1
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "panic".to_string()
    }
}
