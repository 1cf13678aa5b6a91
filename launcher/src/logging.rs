//! Process-wide tracing setup.
//!
//! Console output is split by severity: ERROR goes to stderr, everything else
//! to stdout. An optional file mirror rotates by size.

use chrono::Local;
use colored::Colorize;
use regex::Regex;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

use crate::fsutil::ensure_parent;

pub const LOGGER_NAME: &str = "conda-launcher";

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone)]
pub struct LogSettings {
    /// Filter directive, e.g. `info` or `conda_launcher=debug`.
    pub level: String,
    /// Ignore `RUST_LOG` and use `level` as given.
    pub level_forced: bool,
    pub file: Option<PathBuf>,
    pub max_bytes: u64,
    pub backup_count: usize,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            level_forced: false,
            file: None,
            max_bytes: 100 * 1024,
            backup_count: 1,
        }
    }
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init(settings: &LogSettings) -> io::Result<()> {
    let filter = build_filter(settings);

    let console = tracing_subscriber::fmt::layer()
        .event_format(LineFormat)
        .with_ansi(io::stdout().is_terminal())
        .with_writer(io::stderr.with_max_level(Level::ERROR).or_else(io::stdout));

    let file = match &settings.file {
        Some(path) => {
            let writer =
                RotatingFile::open(path, settings.max_bytes, settings.backup_count)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .event_format(LineFormat)
                    .with_ansi(false)
                    .with_writer(Mutex::new(writer)),
            )
        }
        None => None,
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init();
    Ok(())
}

fn build_filter(settings: &LogSettings) -> EnvFilter {
    if !settings.level_forced {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return filter;
        }
    }
    EnvFilter::try_new(&settings.level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// `[2024-01-31 12:00:00][conda-launcher][I] » message`
struct LineFormat;

impl<S, N> FormatEvent<S, N> for LineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let level = *event.metadata().level();
        let header = format!(
            "[{}][{}][{}] {} ",
            Local::now().format(DATE_FORMAT),
            LOGGER_NAME,
            level_initial(level),
            separator()
        );
        if writer.has_ansi_escapes() {
            let mut body = String::new();
            ctx.field_format()
                .format_fields(Writer::new(&mut body), event)?;
            writeln!(writer, "{}", paint(level, &format!("{header}{body}")))
        } else {
            writer.write_str(&header)?;
            ctx.field_format().format_fields(writer.by_ref(), event)?;
            writeln!(writer)
        }
    }
}

fn level_initial(level: Level) -> char {
    match level {
        Level::TRACE => 'T',
        Level::DEBUG => 'D',
        Level::INFO => 'I',
        Level::WARN => 'W',
        Level::ERROR => 'E',
    }
}

fn separator() -> &'static str {
    // Some Windows consoles cannot render '»'.
    if cfg!(windows) {
        ">"
    } else {
        "»"
    }
}

fn paint(level: Level, text: &str) -> String {
    match level {
        Level::TRACE => text.dimmed().to_string(),
        Level::DEBUG => text.cyan().to_string(),
        Level::INFO => text.green().to_string(),
        Level::WARN => text.yellow().to_string(),
        Level::ERROR => text.red().bold().to_string(),
    }
}

/// Remove ANSI color sequences.
pub fn strip_ansi(text: &str) -> String {
    static ANSI: OnceLock<Regex> = OnceLock::new();
    let re = ANSI.get_or_init(|| Regex::new(r"\x1b\[[0-9;]*m").expect("static regex"));
    re.replace_all(text, "").into_owned()
}

/// Append-only log file rolled over once it would exceed `max_bytes`.
///
/// Backups are `<file>.1` (newest) up to `<file>.<backup_count>`. With no
/// backups, or a zero `max_bytes`, the file only grows.
pub struct RotatingFile {
    path: PathBuf,
    max_bytes: u64,
    backup_count: usize,
    file: File,
    size: u64,
}

impl RotatingFile {
    pub fn open(path: &Path, max_bytes: u64, backup_count: usize) -> io::Result<Self> {
        ensure_parent(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            max_bytes,
            backup_count,
            file,
            size,
        })
    }

    fn backup_path(&self, index: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".{index}"));
        PathBuf::from(name)
    }

    fn rollover(&mut self) -> io::Result<()> {
        self.file.flush()?;
        for index in (1..self.backup_count).rev() {
            let from = self.backup_path(index);
            if from.exists() {
                fs::rename(&from, self.backup_path(index + 1))?;
            }
        }
        fs::rename(&self.path, self.backup_path(1))?;
        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.size = 0;
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let cleaned = match std::str::from_utf8(buf) {
            Ok(text) if text.contains('\x1b') => strip_ansi(text).into_bytes(),
            _ => buf.to_vec(),
        };
        let incoming = cleaned.len() as u64;
        let rotating = self.max_bytes > 0 && self.backup_count > 0;
        if rotating && self.size > 0 && self.size + incoming > self.max_bytes {
            self.rollover()?;
        }
        self.file.write_all(&cleaned)?;
        self.size += incoming;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}
