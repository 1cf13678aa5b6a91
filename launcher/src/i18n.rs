//! Message tables keyed by translation id.
//!
//! Each language lives in `<locales>/<code>.json` as a flat object of
//! strings. English is compiled in, so the launcher can always talk to the
//! operator even without a locales directory on disk.

use std::collections::{BTreeMap, HashMap};
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_LANGUAGE: &str = "en";

const BUILTIN_EN_JSON: &str = include_str!("../locales/en.json");

type Table = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum I18nError {
    #[error("locales directory not found: {0}")]
    MissingDirectory(PathBuf),
    #[error("language file not found: {0}")]
    MissingLanguage(PathBuf),
    #[error("invalid JSON format in {path}: {source}")]
    InvalidJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct Translator {
    locales_dir: Option<PathBuf>,
    tables: HashMap<String, Table>,
    current: String,
    fallback: String,
}

impl Translator {
    /// English only, from the compiled-in table.
    pub fn builtin() -> Self {
        let mut tables = HashMap::new();
        tables.insert(DEFAULT_LANGUAGE.to_string(), builtin_table());
        Self {
            locales_dir: None,
            tables,
            current: DEFAULT_LANGUAGE.to_string(),
            fallback: DEFAULT_LANGUAGE.to_string(),
        }
    }

    /// Load `language` (detected from the environment when `None`) and
    /// `fallback` (English when `None`) from `locales_dir`.
    pub fn load(
        locales_dir: &Path,
        language: Option<&str>,
        fallback: Option<&str>,
    ) -> Result<Self, I18nError> {
        if !locales_dir.is_dir() {
            return Err(I18nError::MissingDirectory(locales_dir.to_path_buf()));
        }
        let language = language
            .map(str::to_string)
            .unwrap_or_else(system_language);
        let fallback = fallback.unwrap_or(DEFAULT_LANGUAGE);
        let mut translator = Self {
            locales_dir: Some(locales_dir.to_path_buf()),
            tables: HashMap::new(),
            current: String::new(),
            fallback: String::new(),
        };
        translator.set_language(&language, fallback)?;
        Ok(translator)
    }

    /// Switch the active and fallback languages, loading whichever is new.
    pub fn set_language(&mut self, language: &str, fallback: &str) -> Result<(), I18nError> {
        for code in [language, fallback] {
            if !self.tables.contains_key(code) {
                let table = self.read_table(code)?;
                self.tables.insert(code.to_string(), table);
            }
        }
        self.current = language.to_string();
        self.fallback = fallback.to_string();
        Ok(())
    }

    pub fn language(&self) -> &str {
        &self.current
    }

    pub fn fallback_language(&self) -> &str {
        &self.fallback
    }

    /// Language codes with a table in the locales directory, sorted.
    pub fn available_languages(&self) -> Vec<String> {
        let mut codes = Vec::new();
        if let Some(dir) = &self.locales_dir {
            if let Ok(entries) = fs::read_dir(dir) {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path.extension().and_then(|e| e.to_str()) == Some("json") {
                        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                            codes.push(stem.to_string());
                        }
                    }
                }
            }
        }
        if codes.is_empty() {
            codes.push(DEFAULT_LANGUAGE.to_string());
        }
        codes.sort();
        codes
    }

    /// Translate `key`; unknown keys come back unchanged.
    pub fn t(&self, key: &str) -> String {
        if let Some(text) = self.lookup(&self.current, key) {
            return text.to_string();
        }
        if let Some(text) = self.lookup(&self.fallback, key) {
            tracing::warn!(
                "Translation key '{}' not found in '{}', using fallback '{}'",
                key,
                self.current,
                self.fallback
            );
            return text.to_string();
        }
        tracing::warn!("Translation key not found in any language: '{}'", key);
        key.to_string()
    }

    /// Translate `key` and fill `{name}` placeholders.
    pub fn t_args(&self, key: &str, args: &[(&str, &str)]) -> String {
        let mut text = self.t(key);
        for (name, value) in args {
            text = text.replace(&format!("{{{name}}}"), value);
        }
        text
    }

    fn lookup(&self, language: &str, key: &str) -> Option<&str> {
        self.tables
            .get(language)
            .and_then(|table| table.get(key))
            .map(String::as_str)
    }

    fn read_table(&self, code: &str) -> Result<Table, I18nError> {
        let on_disk = self
            .locales_dir
            .as_ref()
            .map(|dir| dir.join(format!("{code}.json")));
        match on_disk {
            Some(path) if path.exists() => {
                let content = fs::read_to_string(&path).map_err(|source| I18nError::Io {
                    path: path.clone(),
                    source,
                })?;
                serde_json::from_str(&content)
                    .map_err(|source| I18nError::InvalidJson { path, source })
            }
            _ if code == DEFAULT_LANGUAGE => Ok(builtin_table()),
            Some(path) => Err(I18nError::MissingLanguage(path)),
            None => Err(I18nError::MissingLanguage(PathBuf::from(format!(
                "{code}.json"
            )))),
        }
    }
}

fn builtin_table() -> Table {
    serde_json::from_str(BUILTIN_EN_JSON).unwrap_or_default()
}

/// Language code from the process locale, `en` when unset or `C`/`POSIX`.
pub fn system_language() -> String {
    ["LC_ALL", "LC_MESSAGES", "LANG"]
        .iter()
        .filter_map(|var| env::var(var).ok())
        .find_map(|value| language_from_locale(&value))
        .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string())
}

fn language_from_locale(locale: &str) -> Option<String> {
    let code = locale
        .split(|c: char| c == '_' || c == '.' || c == '@' || c == '-')
        .next()
        .unwrap_or_default()
        .trim();
    if code.is_empty() || code == "C" || code == "POSIX" {
        return None;
    }
    Some(code.to_lowercase())
}
