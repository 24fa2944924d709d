use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::rule::Rule;

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Group name used for the top-level namespace.
pub const DEFAULT_GROUP: &str = "";

/// Identifies one configuration value by namespace and name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    pub group: String,
    pub name: String,
}

impl Key {
    pub fn new(group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
        }
    }

    /// A key in the default group.
    pub fn top(name: impl Into<String>) -> Self {
        Self::new(DEFAULT_GROUP, name)
    }

    /// Split a dotted path such as `"database.url"` into group and name.
    ///
    /// Only the last dot separates; anything before it is the group.
    pub fn parse(dotted: &str) -> Self {
        match dotted.rsplit_once('.') {
            Some((group, name)) => Self::new(group, name),
            None => Self::top(dotted),
        }
    }

    /// Render as `"group<sep>name"`, dropping the separator when either part is empty.
    pub fn join(&self, sep: &str) -> String {
        match (self.group.is_empty(), self.name.is_empty()) {
            (true, _) => self.name.clone(),
            (false, true) => self.group.clone(),
            (false, false) => format!("{}{sep}{}", self.group, self.name),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.join("."))
    }
}

/// A raw key/value pair as stored by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pair {
    pub key: Key,
    pub value: String,
}

impl Pair {
    pub fn new(key: Key, value: impl Into<String>) -> Self {
        Self {
            key,
            value: value.into(),
        }
    }
}

/// One mutation reported by a backend watch.
///
/// `rule` is filled in by the watch loop when the key belongs to a declared
/// rule; it stays `None` for keys the parser does not manage.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub key: Key,
    pub value: String,
    pub deleted: bool,
    pub rule: Option<Arc<Rule>>,
}

impl ChangeEvent {
    pub fn set(key: Key, value: impl Into<String>) -> Self {
        Self {
            key,
            value: value.into(),
            deleted: false,
            rule: None,
        }
    }

    pub fn deleted(key: Key) -> Self {
        Self {
            key,
            value: String::new(),
            deleted: true,
            rule: None,
        }
    }
}
