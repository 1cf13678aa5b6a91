//! Keeps an application's conda environment in step with its
//! `environment.yml` and launches the application inside it.

pub mod cli;
pub mod conda;
pub mod config;
pub mod declaration;
pub mod error;
pub mod fsutil;
pub mod i18n;
pub mod launch;
pub mod logging;
pub mod reconcile;
pub mod snapshot;
