//! Layered JSON settings.
//!
//! `config.json` holds the defaults shipped with the application and
//! `user_config.json` holds the operator's overrides. Reads see the merge of
//! both; writes only ever touch the override file, and only with the keys
//! whose value differs from the default.

use serde_json::{Map, Value};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::fsutil::{ensure_parent, write_atomic};

pub const DEFAULT_CONFIG_JSON: &str = include_str!("../config/default.json");

pub const BASE_CONFIG_FILE: &str = "config.json";
pub const USER_CONFIG_FILE: &str = "user_config.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration key '{0}' does not exist")]
    KeyNotFound(String),
    #[error("configuration key '{0}' does not exist in default configuration")]
    UnknownDefault(String),
    #[error("{path}: expected a JSON object")]
    NotAnObject { path: PathBuf },
    #[error("{path}: {source}")]
    Parse {
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
pub struct Config {
    base_path: PathBuf,
    user_path: PathBuf,
    base: Map<String, Value>,
    user: Map<String, Value>,
    merged: Map<String, Value>,
}

impl Config {
    /// Create any missing file and load both layers.
    ///
    /// A missing base file is seeded with the built-in defaults, a missing
    /// override file with an empty object.
    pub fn init(base_path: &Path, user_path: &Path) -> Result<Self, ConfigError> {
        if !base_path.exists() {
            write_file(base_path, DEFAULT_CONFIG_JSON)?;
        }
        if !user_path.exists() {
            write_file(user_path, "{}\n")?;
        }
        Self::load(base_path, user_path)
    }

    /// Load both layers without creating anything. A missing override file
    /// is treated as empty.
    pub fn load(base_path: &Path, user_path: &Path) -> Result<Self, ConfigError> {
        let base = read_object(base_path)?;
        let user = if user_path.exists() {
            read_object(user_path)?
        } else {
            Map::new()
        };
        let mut merged = base.clone();
        for (key, value) in &user {
            merged.insert(key.clone(), value.clone());
        }
        Ok(Self {
            base_path: base_path.to_path_buf(),
            user_path: user_path.to_path_buf(),
            base,
            user,
            merged,
        })
    }

    /// Settings files living under `dir`.
    pub fn init_in(dir: &Path) -> Result<Self, ConfigError> {
        Self::init(&dir.join(BASE_CONFIG_FILE), &dir.join(USER_CONFIG_FILE))
    }

    /// Built-in defaults only, nothing read from or written to disk.
    ///
    /// The paths still point at `dir` so a later `update` lands in the usual
    /// override file.
    pub fn defaults_in(dir: &Path) -> Result<Self, ConfigError> {
        let embedded = Path::new("config/default.json");
        let value: Value =
            serde_json::from_str(DEFAULT_CONFIG_JSON).map_err(|source| ConfigError::Parse {
                path: embedded.to_path_buf(),
                source,
            })?;
        let Value::Object(base) = value else {
            return Err(ConfigError::NotAnObject {
                path: embedded.to_path_buf(),
            });
        };
        Ok(Self {
            base_path: dir.join(BASE_CONFIG_FILE),
            user_path: dir.join(USER_CONFIG_FILE),
            merged: base.clone(),
            base,
            user: Map::new(),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn user_path(&self) -> &Path {
        &self.user_path
    }

    /// The merged view, or one value from it.
    pub fn get(&self, key: Option<&str>) -> Result<Value, ConfigError> {
        match key {
            None => Ok(Value::Object(self.merged.clone())),
            Some(key) => self
                .merged
                .get(key)
                .cloned()
                .ok_or_else(|| ConfigError::KeyNotFound(key.to_string())),
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.merged.get(key).and_then(Value::as_str)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.merged.get(key).and_then(Value::as_u64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.merged.get(key).and_then(Value::as_bool)
    }

    /// Set `key` and persist the overrides.
    ///
    /// The override file is rewritten from scratch with every key whose merged
    /// value differs from its default, so setting a key back to its default
    /// removes it from the file.
    pub fn update(&mut self, key: &str, value: Value) -> Result<(), ConfigError> {
        if !self.base.contains_key(key) {
            return Err(ConfigError::UnknownDefault(key.to_string()));
        }
        self.merged.insert(key.to_string(), value);
        let mut user = Map::new();
        for (k, v) in &self.merged {
            if let Some(default) = self.base.get(k) {
                if default != v {
                    user.insert(k.clone(), v.clone());
                }
            }
        }
        let mut text = serde_json::to_string_pretty(&Value::Object(user.clone())).map_err(
            |source| ConfigError::Parse {
                path: self.user_path.clone(),
                source,
            },
        )?;
        text.push('\n');
        write_atomic(&self.user_path, &text).map_err(|source| ConfigError::Io {
            path: self.user_path.clone(),
            source,
        })?;
        self.user = user;
        Ok(())
    }
}

fn read_object(path: &Path) -> Result<Map<String, Value>, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let value: Value = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(ConfigError::NotAnObject {
            path: path.to_path_buf(),
        }),
    }
}

fn write_file(path: &Path, content: &str) -> Result<(), ConfigError> {
    let io_err = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    ensure_parent(path).map_err(io_err)?;
    fs::write(path, content).map_err(io_err)
}
