//! Core resolution pipeline: compute every rule's final value.
//!
//! Operates on pre-loaded data (`ResolveInput`) with no I/O, making the full
//! pipeline testable with synthetic inputs. For each rule the first source
//! that has a value wins:
//!
//! 1. The command line (from the matcher's [`Matches`])
//! 2. Environment variables, first non-empty declared name wins
//! 3. The external layer (INI text, a backend snapshot, watch changes)
//! 4. The declared default
//! 5. The zero value of the rule's type, flagged as unset
//!
//! A required rule that reaches step 5 records a `Required` error. Errors from
//! steps 3 and 4 are collected so the caller can still publish every other
//! value. A bad environment value aborts resolution: the operator set that
//! variable on purpose.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::env;
use crate::error::ArgfigError;
use crate::matcher::Matches;
use crate::options::{Options, Source};
use crate::rule::{Rule, RuleKind};
use crate::value::Value;

/// All pre-loaded data needed to resolve a rule set. No I/O happens here.
pub struct ResolveInput<'a> {
    pub rules: &'a [Arc<Rule>],
    pub matches: &'a Matches,
    /// Environment snapshot (the process environment or synthetic data).
    pub env_vars: &'a HashMap<String, String>,
    /// Parser-wide env prefix, prepended to each declared variable name.
    pub env_prefix: &'a str,
    /// Externally supplied values, e.g. parsed INI text or a backend snapshot.
    pub external: Option<&'a Options>,
}

/// Outcome of a resolution pass. `options` holds every declared rule even
/// when `errors` is not empty.
#[derive(Debug)]
pub struct Resolved {
    pub options: Options,
    pub errors: Vec<ArgfigError>,
}

/// Resolve every rule from pre-loaded inputs.
///
/// Returns `Err` only for environment cast failures; every other per-rule
/// problem is collected into [`Resolved::errors`].
pub fn resolve(input: &ResolveInput<'_>) -> Result<Resolved, ArgfigError> {
    let mut options = Options::new();
    let mut errors = Vec::new();

    for rule in input.rules {
        match rule.kind {
            RuleKind::Command => continue,
            RuleKind::ConfigGroup => resolve_group(rule, input, &mut options, &mut errors),
            _ => {
                let (value, source) = match computed_value(rule, input)? {
                    Ok(found) => found,
                    Err(e) => {
                        errors.push(e);
                        (zero_or_string(rule), Source::Unset)
                    }
                };
                debug!(rule = %rule.key(), ?source, "resolved");
                if source != Source::Unset {
                    rule.store(&value);
                }
                options
                    .group_mut(&rule.group)
                    .set_with_source(rule.name.clone(), value, source);
            }
        }
    }

    Ok(Resolved { options, errors })
}

/// The precedence chain for one ordinary rule.
///
/// The outer `Result` is the hard environment failure; the inner one carries
/// errors that still allow the rest of the snapshot to be published.
fn computed_value(
    rule: &Rule,
    input: &ResolveInput<'_>,
) -> Result<Result<(Value, Source), ArgfigError>, ArgfigError> {
    if let Some(value) = input.matches.seen(rule) {
        return Ok(Ok((value.clone(), Source::Argv)));
    }

    if let Some((var, raw)) = env::lookup(input.env_vars, input.env_prefix, &rule.env_vars) {
        let value = rule
            .cast_value(Some(&Value::String(raw.clone())))
            .map_err(|e| match e {
                ArgfigError::Cast { value, reason, .. } => ArgfigError::cast(&var, value, reason),
                other => other,
            })?;
        return Ok(Ok((value, Source::Env)));
    }

    if let Some(raw) = input
        .external
        .and_then(|ext| ext.group(&rule.group).get(&rule.name))
    {
        return Ok(rule.cast_value(Some(raw)).map(|v| (v, Source::External)));
    }

    if let Some(default) = &rule.default {
        return Ok(rule.cast_value(Some(default)).map(|v| (v, Source::Default)));
    }

    if rule.required {
        return Ok(Err(ArgfigError::Required(rule.key().to_string())));
    }

    Ok(rule.zero().map(|v| (v, Source::Unset)))
}

/// A config-group rule takes every key of its group from the external layer.
fn resolve_group(
    rule: &Rule,
    input: &ResolveInput<'_>,
    options: &mut Options,
    errors: &mut Vec<ArgfigError>,
) {
    let target = options.group_mut(&rule.group);
    let Some(external) = input.external else {
        if rule.required {
            errors.push(ArgfigError::Required(rule.group.clone()));
        }
        return;
    };
    let source = external.group(&rule.group);
    if source.keys().is_empty() && rule.required {
        errors.push(ArgfigError::Required(rule.group.clone()));
    }
    for name in source.keys() {
        let Some(raw) = source.get(name) else {
            continue;
        };
        match rule.cast.apply(name, Some(raw)) {
            Ok(value) => {
                target.set_with_source(name, value, Source::External);
            }
            Err(e) => errors.push(e),
        }
    }
}

/// Zero value for a rule whose resolution failed. Custom casts that reject
/// absent input fall back to an empty string.
fn zero_or_string(rule: &Rule) -> Value {
    rule.zero().unwrap_or_else(|_| Value::String(String::new()))
}
