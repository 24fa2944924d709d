use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::options::Options;
use crate::types::Key;

#[derive(Debug, Error)]
pub enum ArgfigError {
    #[error("Duplicate rule '{0}' declared more than once")]
    DuplicateName(String),

    #[error("Duplicate alias '{alias}' used by both '{first}' and '{second}'")]
    DuplicateAlias {
        alias: String,
        first: String,
        second: String,
    },

    #[error("Invalid rule name '{0}': names may not contain quotes, brackets, whitespace or shell characters")]
    InvalidName(String),

    #[error("Ambiguous positional arguments: {0}")]
    AmbiguousGreedy(String),

    #[error("Invalid default for '{name}': {source}")]
    InvalidDefault {
        name: String,
        source: Box<ArgfigError>,
    },

    #[error("Conflicting modifiers on '{name}': {reason}")]
    ConflictingRule { name: String, reason: String },

    #[error("Expected an argument for '{flag}'")]
    MissingValue { flag: String },

    #[error("Unknown argument '{0}'")]
    UnknownArgument(String),

    #[error("Invalid value '{value}' for '{name}': {reason}")]
    Cast {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Option '{0}' is required")]
    Required(String),

    #[error("{}", summarize(.errors))]
    Unresolved {
        errors: Vec<ArgfigError>,
        partial: Arc<Options>,
    },

    #[error("Key not found: {0}")]
    KeyNotFound(Key),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Failed to parse INI: {0}")]
    Ini(String),

    #[error("Watch error: {0}")]
    Watch(String),

    #[error("No command was matched on the command line")]
    NoCommand,
}

impl ArgfigError {
    pub(crate) fn cast(name: &str, value: impl Into<String>, reason: impl Into<String>) -> Self {
        ArgfigError::Cast {
            name: name.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// The snapshot published alongside an `Unresolved` error, if any.
    pub fn partial(&self) -> Option<&Arc<Options>> {
        match self {
            ArgfigError::Unresolved { partial, .. } => Some(partial),
            _ => None,
        }
    }
}

fn summarize(errors: &[ArgfigError]) -> String {
    let details: Vec<String> = errors.iter().map(ToString::to_string).collect();
    format!(
        "Failed to resolve {} option(s): {}",
        errors.len(),
        details.join("; ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_alias_names_both_rules() {
        let err = ArgfigError::DuplicateAlias {
            alias: "-p".into(),
            first: "power-level".into(),
            second: "port".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("-p"));
        assert!(msg.contains("power-level"));
        assert!(msg.contains("port"));
    }

    #[test]
    fn cast_error_carries_name_and_value() {
        let err = ArgfigError::cast("port", "eighty", "invalid digit found in string");
        let msg = err.to_string();
        assert!(msg.contains("port"));
        assert!(msg.contains("eighty"));
    }

    #[test]
    fn unresolved_lists_every_error() {
        let err = ArgfigError::Unresolved {
            errors: vec![
                ArgfigError::Required("endpoint".into()),
                ArgfigError::Required("token".into()),
            ],
            partial: Arc::new(Options::new()),
        };
        let msg = err.to_string();
        assert!(msg.contains("2 option(s)"));
        assert!(msg.contains("endpoint"));
        assert!(msg.contains("token"));
        assert!(err.partial().is_some());
    }

    #[test]
    fn missing_value_names_flag() {
        let err = ArgfigError::MissingValue {
            flag: "--power-level".into(),
        };
        assert!(err.to_string().contains("--power-level"));
    }
}
