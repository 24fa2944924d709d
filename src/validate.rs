//! Rule-set validation, run once before any argument is consumed.
//!
//! Checks run in a fixed order so the same broken rule set always reports the
//! same error: duplicate names, duplicate aliases, illegal names, ambiguous
//! greedy positionals, then defaults that their own cast rejects.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::ArgfigError;
use crate::rule::{Rule, RuleKind};

const ILLEGAL_NAME_CHARS: &[char] = &[
    '"', '\'', '`', '(', ')', '[', ']', '{', '}', '<', '>', '|', '&', ';', '$', '*', '?', '!',
    '#', '~', '\\', '=',
];

/// Validate a complete rule set.
pub fn validate_rules(rules: &[Arc<Rule>]) -> Result<(), ArgfigError> {
    check_duplicate_names(rules)?;
    check_duplicate_aliases(rules)?;
    for rule in rules {
        check_name(rule)?;
    }
    check_greedy(rules)?;
    for rule in rules {
        check_default(rule)?;
    }
    Ok(())
}

fn check_duplicate_names(rules: &[Arc<Rule>]) -> Result<(), ArgfigError> {
    let mut seen = HashSet::new();
    for rule in rules {
        if !seen.insert((rule.group.as_str(), rule.name.as_str())) {
            return Err(ArgfigError::DuplicateName(rule.key().to_string()));
        }
    }
    Ok(())
}

fn check_duplicate_aliases(rules: &[Arc<Rule>]) -> Result<(), ArgfigError> {
    let mut owners: HashMap<&str, &str> = HashMap::new();
    for rule in rules {
        for alias in &rule.aliases {
            if let Some(first) = owners.insert(alias.as_str(), rule.name.as_str()) {
                return Err(ArgfigError::DuplicateAlias {
                    alias: alias.clone(),
                    first: first.to_string(),
                    second: rule.name.clone(),
                });
            }
        }
    }
    Ok(())
}

fn check_name(rule: &Rule) -> Result<(), ArgfigError> {
    if rule.kind == RuleKind::Command {
        return Ok(());
    }
    let illegal = rule.name.is_empty()
        || rule
            .name
            .chars()
            .any(|c| c.is_whitespace() || ILLEGAL_NAME_CHARS.contains(&c));
    if illegal {
        return Err(ArgfigError::InvalidName(rule.name.clone()));
    }
    Ok(())
}

fn check_greedy(rules: &[Arc<Rule>]) -> Result<(), ArgfigError> {
    let mut positionals: Vec<&Rule> = rules
        .iter()
        .filter(|r| r.is_positional())
        .map(|r| &**r)
        .collect();
    positionals.sort_by_key(|r| r.order);

    let mut greedy: Option<&Rule> = None;
    for rule in positionals {
        if let Some(prior) = greedy {
            let reason = if rule.greedy {
                format!(
                    "only one greedy argument is allowed, found '{}' and '{}'",
                    prior.name, rule.name
                )
            } else {
                format!(
                    "argument '{}' is declared after greedy argument '{}'",
                    rule.name, prior.name
                )
            };
            return Err(ArgfigError::AmbiguousGreedy(reason));
        }
        if rule.greedy {
            greedy = Some(rule);
        }
    }
    Ok(())
}

fn check_default(rule: &Rule) -> Result<(), ArgfigError> {
    if let Some(default) = &rule.default {
        rule.cast_value(Some(default))
            .map_err(|e| ArgfigError::InvalidDefault {
                name: rule.name.clone(),
                source: Box::new(e),
            })?;
    }
    Ok(())
}
