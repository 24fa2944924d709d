use std::collections::HashMap;
use std::ffi::OsString;

use tracing::debug;

/// Where environment variables are read from.
///
/// `Fixed` lets tests pass synthetic data instead of the process environment.
#[derive(Debug, Clone, Default)]
pub enum EnvSource {
    #[default]
    Process,
    Fixed(HashMap<String, String>),
}

impl EnvSource {
    pub fn fixed(vars: impl IntoIterator<Item = (String, String)>) -> Self {
        EnvSource::Fixed(vars.into_iter().collect())
    }

    /// Take a point-in-time copy of the variables.
    pub fn snapshot(&self) -> HashMap<String, String> {
        match self {
            EnvSource::Process => utf8_vars(std::env::vars_os()),
            EnvSource::Fixed(vars) => vars.clone(),
        }
    }
}

/// Keep the variables whose name and value are both UTF-8. Others can't be
/// named by a rule anyway, so they are skipped instead of failing the apply.
fn utf8_vars(vars: impl IntoIterator<Item = (OsString, OsString)>) -> HashMap<String, String> {
    vars.into_iter()
        .filter_map(|(name, value)| match (name.into_string(), value.into_string()) {
            (Ok(name), Ok(value)) => Some((name, value)),
            (name, _) => {
                debug!(var = ?name, "skipping non-UTF-8 environment variable");
                None
            }
        })
        .collect()
}

/// Full variable name for `var` under the parser-wide `prefix`.
pub fn env_var_name(prefix: &str, var: &str) -> String {
    if prefix.is_empty() || var.starts_with(prefix) {
        var.to_string()
    } else {
        format!("{prefix}{var}")
    }
}

/// Find the first of `names` with a non-empty value.
///
/// Returns the full variable name alongside its value so cast errors can name it.
pub fn lookup(
    env: &HashMap<String, String>,
    prefix: &str,
    names: &[String],
) -> Option<(String, String)> {
    names.iter().find_map(|name| {
        let full = env_var_name(prefix, name);
        match env.get(&full) {
            Some(value) if !value.is_empty() => Some((full, value.clone())),
            _ => None,
        }
    })
}
