//! Walks a raw argument vector against the rule set.
//!
//! Each token is first compared against every option alias. A matched option
//! either runs its [`Action`] (count, set-true) or consumes the following
//! token as its value. Tokens that match no alias fill positional arguments in
//! declared order; a greedy positional keeps taking tokens until the end.
//! Matching stops at the terminator token, or at a command token seen before
//! any positional.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::ArgfigError;
use crate::rule::{Action, Rule, RuleKind};
use crate::types::Key;
use crate::value::Value;

/// Matcher knobs taken from the parser.
#[derive(Debug, Clone, Copy)]
pub struct MatchSettings<'a> {
    pub terminator: Option<&'a str>,
    pub strict: bool,
}

/// Result of matching argv: the values of every rule seen on the command line.
#[derive(Debug, Clone, Default)]
pub struct Matches {
    seen: HashMap<Key, Value>,
    command: Option<Arc<Rule>>,
    remaining: Vec<String>,
    ignored: Vec<String>,
}

impl Matches {
    /// Value of a rule that appeared on the command line.
    pub fn seen(&self, rule: &Rule) -> Option<&Value> {
        self.seen.get(&rule.key())
    }

    pub fn was_seen(&self, rule: &Rule) -> bool {
        self.seen.contains_key(&rule.key())
    }

    pub fn command(&self) -> Option<&Arc<Rule>> {
        self.command.as_ref()
    }

    /// Tokens after the terminator, or after a matched command.
    pub fn remaining(&self) -> &[String] {
        &self.remaining
    }

    /// Tokens that matched nothing (lenient mode only).
    pub fn ignored(&self) -> &[String] {
        &self.ignored
    }
}

/// Match `argv` against `rules`.
pub fn match_args(
    rules: &[Arc<Rule>],
    argv: &[String],
    settings: MatchSettings<'_>,
) -> Result<Matches, ArgfigError> {
    let options: Vec<&Arc<Rule>> = rules.iter().filter(|r| r.kind == RuleKind::Option).collect();
    let commands: Vec<&Arc<Rule>> = rules.iter().filter(|r| r.kind == RuleKind::Command).collect();
    let mut positionals: Vec<&Arc<Rule>> = rules.iter().filter(|r| r.is_positional()).collect();
    positionals.sort_by_key(|r| r.order);

    let mut matches = Matches::default();
    let mut greedy_tokens: Vec<String> = Vec::new();
    let mut next_positional = 0usize;
    let mut i = 0usize;

    while i < argv.len() {
        let token = argv[i].as_str();

        if settings.terminator == Some(token) {
            matches.remaining = argv[i + 1..].to_vec();
            break;
        }

        if let Some(rule) = options.iter().find(|r| r.aliases.iter().any(|a| a == token)) {
            let key = rule.key();
            match rule.action {
                Some(Action::Count) => {
                    let count = match matches.seen.get(&key) {
                        Some(Value::Int(n)) => n + 1,
                        _ => 1,
                    };
                    matches.seen.insert(key, Value::Int(count));
                }
                Some(Action::SetTrue) => {
                    matches.seen.insert(key, Value::Bool(true));
                }
                None => {
                    let Some(raw) = argv.get(i + 1) else {
                        return Err(ArgfigError::MissingValue {
                            flag: token.to_string(),
                        });
                    };
                    let value = rule.cast_value(Some(&Value::String(raw.clone())))?;
                    let value = accumulate(matches.seen.remove(&key), value);
                    matches.seen.insert(key, value);
                    i += 1;
                }
            }
            debug!(rule = %rule.name, token, "matched option");
            i += 1;
            continue;
        }

        if next_positional == 0
            && greedy_tokens.is_empty()
            && let Some(command) = commands.iter().find(|r| r.name == token)
        {
            debug!(command = %command.name, "matched command");
            matches.command = Some(Arc::clone(command));
            matches.remaining = argv[i + 1..].to_vec();
            break;
        }

        match positionals.get(next_positional) {
            Some(rule) if rule.greedy => {
                greedy_tokens.push(token.to_string());
            }
            Some(rule) => {
                let value = rule.cast_value(Some(&Value::String(token.to_string())))?;
                matches.seen.insert(rule.key(), value);
                debug!(rule = %rule.name, token, "matched argument");
                next_positional += 1;
            }
            None if settings.strict => {
                return Err(ArgfigError::UnknownArgument(token.to_string()));
            }
            None => {
                warn!(token, "ignoring unrecognized argument");
                matches.ignored.push(token.to_string());
            }
        }
        i += 1;
    }

    if !greedy_tokens.is_empty()
        && let Some(rule) = positionals.get(next_positional)
    {
        let value = rule.cast_value(Some(&Value::StringSlice(greedy_tokens)))?;
        matches.seen.insert(rule.key(), value);
    }

    Ok(matches)
}

/// Repeated list options extend; every other type keeps the latest occurrence.
fn accumulate(previous: Option<Value>, next: Value) -> Value {
    match (previous, next) {
        (Some(Value::StringSlice(mut prev)), Value::StringSlice(items)) => {
            prev.extend(items);
            Value::StringSlice(prev)
        }
        (Some(Value::StringMap(mut prev)), Value::StringMap(items)) => {
            prev.extend(items);
            Value::StringMap(prev)
        }
        (_, next) => next,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::test::{argv, rules};

    const LENIENT: MatchSettings<'static> = MatchSettings {
        terminator: Some("--"),
        strict: false,
    };

    fn seen<'a>(m: &'a Matches, set: &[Arc<Rule>], name: &str) -> Option<&'a Value> {
        let rule = set.iter().find(|r| r.name == name).unwrap();
        m.seen(rule)
    }

    #[test]
    fn option_consumes_next_token() {
        let set = rules(vec![Rule::option("--power-level").alias("-p").is_int()]);
        let m = match_args(&set, &argv(&["-p", "5"]), LENIENT).unwrap();
        assert_eq!(seen(&m, &set, "power-level"), Some(&Value::Int(5)));
    }

    #[test]
    fn missing_value_names_flag() {
        let set = rules(vec![Rule::option("--power-level")]);
        let err = match_args(&set, &argv(&["--power-level"]), LENIENT).unwrap_err();
        match err {
            ArgfigError::MissingValue { flag } => assert_eq!(flag, "--power-level"),
            other => panic!("Expected MissingValue, got: {other:?}"),
        }
    }

    #[test]
    fn count_increments() {
        let set = rules(vec![Rule::option("--verbose").alias("-v").count()]);
        let m = match_args(&set, &argv(&["--verbose", "--verbose", "-v"]), LENIENT).unwrap();
        assert_eq!(seen(&m, &set, "verbose"), Some(&Value::Int(3)));
    }

    #[test]
    fn count_does_not_consume_next_token() {
        let set = rules(vec![Rule::option("--verbose").count(), Rule::argument("file")]);
        let m = match_args(&set, &argv(&["--verbose", "notes.txt"]), LENIENT).unwrap();
        assert_eq!(seen(&m, &set, "file"), Some(&Value::from("notes.txt")));
    }

    #[test]
    fn is_true_sets_flag() {
        let set = rules(vec![Rule::option("--debug").is_true()]);
        let m = match_args(&set, &argv(&["--debug"]), LENIENT).unwrap();
        assert_eq!(seen(&m, &set, "debug"), Some(&Value::Bool(true)));
    }

    #[test]
    fn positionals_fill_in_order() {
        let set = rules(vec![Rule::argument("src"), Rule::argument("dst")]);
        let m = match_args(&set, &argv(&["a.txt", "b.txt"]), LENIENT).unwrap();
        assert_eq!(seen(&m, &set, "src"), Some(&Value::from("a.txt")));
        assert_eq!(seen(&m, &set, "dst"), Some(&Value::from("b.txt")));
    }

    #[test]
    fn options_win_over_positionals() {
        let set = rules(vec![
            Rule::argument("file"),
            Rule::option("--name").alias("-n"),
        ]);
        let m = match_args(&set, &argv(&["-n", "bob", "x.txt"]), LENIENT).unwrap();
        assert_eq!(seen(&m, &set, "name"), Some(&Value::from("bob")));
        assert_eq!(seen(&m, &set, "file"), Some(&Value::from("x.txt")));
    }

    #[test]
    fn greedy_takes_the_rest() {
        let set = rules(vec![
            Rule::argument("dest"),
            Rule::argument("files").greedy(),
            Rule::option("--force").is_true(),
        ]);
        let m = match_args(&set, &argv(&["out", "a", "--force", "b", "c"]), LENIENT).unwrap();
        assert_eq!(seen(&m, &set, "dest"), Some(&Value::from("out")));
        assert_eq!(
            seen(&m, &set, "files"),
            Some(&Value::StringSlice(vec!["a".into(), "b".into(), "c".into()]))
        );
        assert_eq!(seen(&m, &set, "force"), Some(&Value::Bool(true)));
    }

    #[test]
    fn repeated_list_option_extends() {
        let set = rules(vec![Rule::option("--tag").is_string_slice()]);
        let m = match_args(&set, &argv(&["--tag", "a,b", "--tag", "c"]), LENIENT).unwrap();
        assert_eq!(
            seen(&m, &set, "tag"),
            Some(&Value::StringSlice(vec!["a".into(), "b".into(), "c".into()]))
        );
    }

    #[test]
    fn repeated_scalar_option_keeps_last() {
        let set = rules(vec![Rule::option("--name")]);
        let m = match_args(&set, &argv(&["--name", "a", "--name", "b"]), LENIENT).unwrap();
        assert_eq!(seen(&m, &set, "name"), Some(&Value::from("b")));
    }

    #[test]
    fn terminator_stops_matching() {
        let set = rules(vec![Rule::option("--name")]);
        let m = match_args(&set, &argv(&["--", "--name", "x"]), LENIENT).unwrap();
        assert!(seen(&m, &set, "name").is_none());
        assert_eq!(m.remaining(), ["--name", "x"]);
    }

    #[test]
    fn unknown_token_ignored_when_lenient() {
        let set = rules(vec![Rule::option("--name")]);
        let m = match_args(&set, &argv(&["stray"]), LENIENT).unwrap();
        assert_eq!(m.ignored(), ["stray"]);
    }

    #[test]
    fn unknown_token_rejected_when_strict() {
        let set = rules(vec![Rule::option("--name")]);
        let strict = MatchSettings {
            strict: true,
            ..LENIENT
        };
        let err = match_args(&set, &argv(&["stray"]), strict).unwrap_err();
        assert!(matches!(err, ArgfigError::UnknownArgument(t) if t == "stray"));
    }

    #[test]
    fn cast_failure_aborts() {
        let set = rules(vec![Rule::option("--port").is_int()]);
        let err = match_args(&set, &argv(&["--port", "http"]), LENIENT).unwrap_err();
        assert!(matches!(err, ArgfigError::Cast { .. }));
    }

    #[test]
    fn command_captures_remaining_tokens() {
        let set = rules(vec![
            Rule::option("--verbose").count(),
            Rule::command("deploy", |_, _| Ok(0)),
        ]);
        let m = match_args(&set, &argv(&["--verbose", "deploy", "--to", "prod"]), LENIENT).unwrap();
        assert_eq!(m.command().map(|c| c.name()), Some("deploy"));
        assert_eq!(m.remaining(), ["--to", "prod"]);
    }

    #[test]
    fn config_rules_never_match() {
        let set = rules(vec![Rule::config("url"), Rule::argument("file")]);
        let m = match_args(&set, &argv(&["url"]), LENIENT).unwrap();
        assert!(seen(&m, &set, "url").is_none());
        assert_eq!(seen(&m, &set, "file"), Some(&Value::from("url")));
    }
}
