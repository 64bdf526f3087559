//! User preferences: a string table persisted as an association list.
//!
//! Until the interpreter reports that its own preference code has booted,
//! reads and writes go to the host table loaded from disk. Afterwards they
//! are routed through the interpreter's `get-preference`, `set-preference`
//! and `notify-preference`.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::adapter::{Scheme, SchemeError};
use crate::object::SchemeExt;
use crate::reader::{Sexpr, parse_program, write_string_literal};

/// Value meaning "not set"
pub const DEFAULT_VALUE: &str = "default";

/// The host-side table and the file it lives in
#[derive(Debug, Default)]
pub struct UserPreferences {
    file: Option<PathBuf>,
    table: BTreeMap<String, String>,
    modified: bool,
}

impl UserPreferences {
    /// A table that is never persisted
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load `file`; a missing or unreadable file gives an empty table
    pub fn load(file: impl Into<PathBuf>) -> Self {
        let file = file.into();
        let table = match std::fs::read_to_string(&file) {
            Ok(text) => parse_table(&text).unwrap_or_else(|| {
                warn!(file = %file.display(), "ignoring malformed preferences file");
                BTreeMap::new()
            }),
            Err(err) => {
                debug!(file = %file.display(), %err, "no preferences loaded");
                BTreeMap::new()
            }
        };
        UserPreferences {
            file: Some(file),
            table,
            modified: false,
        }
    }

    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    pub fn get(&self, key: &str, default: &str) -> String {
        self.table.get(key).cloned().unwrap_or_else(|| default.to_owned())
    }

    /// Set `key`; the value `"default"` removes it
    pub fn set(&mut self, key: &str, value: &str) {
        let changed = if value == DEFAULT_VALUE {
            self.table.remove(key).is_some()
        } else {
            self.table.insert(key.to_owned(), value.to_owned()).as_deref() != Some(value)
        };
        self.modified |= changed;
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Write the table if it changed since loading; returns whether it wrote
    pub fn save(&mut self) -> Result<bool, SchemeError> {
        let Some(file) = self.file.as_ref().filter(|_| self.modified) else {
            return Ok(false);
        };
        let io_error = |source| SchemeError::Io {
            path: file.clone(),
            source,
        };
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
        std::fs::write(file, render_table(&self.table)).map_err(io_error)?;
        self.modified = false;
        Ok(true)
    }
}

fn parse_table(text: &str) -> Option<BTreeMap<String, String>> {
    let forms = parse_program(text).ok()?;
    let mut table = BTreeMap::new();
    for form in forms {
        match form {
            Sexpr::List(items, None) => match items.as_slice() {
                [Sexpr::Str(key), Sexpr::Str(value)] => {
                    table.insert(key.clone(), value.clone());
                }
                _ => debug!("skipping preference entry with unexpected shape"),
            },
            _ => debug!("skipping preference entry with unexpected shape"),
        }
    }
    Some(table)
}

fn render_table(table: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for (key, value) in table {
        // Writing into a String cannot fail
        let _ = out.write_char('(');
        let _ = write_string_literal(&mut out, key);
        let _ = out.write_char(' ');
        let _ = write_string_literal(&mut out, value);
        let _ = out.write_str(")\n");
    }
    out
}

/// Preference access that follows the interpreter once it is ready
#[derive(Debug)]
pub struct Preferences {
    user: Mutex<UserPreferences>,
    booted: AtomicBool,
}

impl Preferences {
    pub fn new(user: UserPreferences) -> Self {
        Preferences {
            user: Mutex::new(user),
            booted: AtomicBool::new(false),
        }
    }

    /// From now on defer to the interpreter's preference procedures
    pub fn notify_preferences_booted(&self) {
        debug!("interpreter preferences booted");
        self.booted.store(true, Ordering::Release);
    }

    pub fn is_booted(&self) -> bool {
        self.booted.load(Ordering::Acquire)
    }

    pub fn get_preference<S: Scheme + ?Sized>(&self, scheme: &S, key: &str, default: &str) -> String {
        if !self.is_booted() {
            return self.user.lock().get(key, default);
        }
        match SchemeExt::call(scheme, "get-preference", &[scheme.object(key)]) {
            Ok(value) if value.as_string() != DEFAULT_VALUE => value.as_string(),
            Ok(_) => default.to_owned(),
            Err(err) => {
                warn!(key, %err, "get-preference failed");
                default.to_owned()
            }
        }
    }

    pub fn set_preference<S: Scheme + ?Sized>(&self, scheme: &S, key: &str, value: &str) {
        if !self.is_booted() {
            self.user.lock().set(key, value);
            return;
        }
        let args = [scheme.object(key), scheme.object(value)];
        if let Err(err) = SchemeExt::call(scheme, "set-preference", &args) {
            warn!(key, %err, "set-preference failed");
        }
    }

    /// Run the interpreter's hooks for `key`; nothing happens before boot
    pub fn notify_preference<S: Scheme + ?Sized>(&self, scheme: &S, key: &str) {
        if !self.is_booted() {
            return;
        }
        if let Err(err) = SchemeExt::call(scheme, "notify-preference", &[scheme.object(key)]) {
            warn!(key, %err, "notify-preference failed");
        }
    }

    /// Host-side value, regardless of boot state
    pub fn user_preference(&self, key: &str, default: &str) -> String {
        self.user.lock().get(key, default)
    }

    pub fn save(&self) -> Result<bool, SchemeError> {
        self.user.lock().save()
    }
}
