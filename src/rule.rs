//! Rule declarations and their fluent builder.
//!
//! A [`Rule`] is immutable once built. Everything that changes during a parse
//! (whether the rule was seen, its accumulated count) lives in the matcher's
//! output instead, so the same rules can be matched and re-applied any number
//! of times and shared with a background watch.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::warn;

use crate::error::ArgfigError;
use crate::parser::Parser;
use crate::types::{DEFAULT_GROUP, Key, lock};
use crate::value::{Cast, Value, ValueKind};

/// What a rule matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    /// Matched by alias tokens on the command line.
    Option,
    /// Matched by position on the command line.
    Argument,
    /// Never matched on the command line; resolved from env, external sources or default.
    Config,
    /// Takes every key of its group from external sources.
    ConfigGroup,
    /// A sub-command token.
    Command,
}

/// Custom match behavior that replaces "consume the next token as the value".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Each occurrence increments an integer.
    Count,
    /// An occurrence sets a boolean to true.
    SetTrue,
}

pub type StoreFn = dyn Fn(&Value) + Send + Sync;

pub type CommandFn = dyn Fn(&mut Parser, &[String]) -> Result<i32, ArgfigError> + Send + Sync;

/// Caller-owned destination that receives a rule's resolved value on every apply.
#[derive(Clone)]
pub enum Store {
    String(Arc<Mutex<String>>),
    Int(Arc<Mutex<i64>>),
    Float(Arc<Mutex<f64>>),
    Bool(Arc<Mutex<bool>>),
    Duration(Arc<Mutex<Duration>>),
    StringSlice(Arc<Mutex<Vec<String>>>),
    StringMap(Arc<Mutex<BTreeMap<String, String>>>),
    With(Arc<StoreFn>),
}

impl Store {
    fn kind(&self) -> Option<ValueKind> {
        match self {
            Store::String(_) => Some(ValueKind::String),
            Store::Int(_) => Some(ValueKind::Int),
            Store::Float(_) => Some(ValueKind::Float),
            Store::Bool(_) => Some(ValueKind::Bool),
            Store::Duration(_) => Some(ValueKind::Duration),
            Store::StringSlice(_) => Some(ValueKind::StringSlice),
            Store::StringMap(_) => Some(ValueKind::StringMap),
            Store::With(_) => None,
        }
    }

    fn write(&self, name: &str, value: &Value) {
        match (self, value) {
            (Store::String(dest), Value::String(v)) => *lock(dest) = v.clone(),
            (Store::Int(dest), Value::Int(v)) => *lock(dest) = *v,
            (Store::Float(dest), Value::Float(v)) => *lock(dest) = *v,
            (Store::Bool(dest), Value::Bool(v)) => *lock(dest) = *v,
            (Store::Duration(dest), Value::Duration(v)) => *lock(dest) = *v,
            (Store::StringSlice(dest), Value::StringSlice(v)) => *lock(dest) = v.clone(),
            (Store::StringMap(dest), Value::StringMap(v)) => *lock(dest) = v.clone(),
            (Store::With(f), v) => f(v),
            (store, v) => warn!(
                rule = name,
                expected = ?store.kind(),
                got = %v.kind(),
                "resolved value does not fit store destination"
            ),
        }
    }
}

/// A single option, positional argument, config item or command.
#[derive(Clone)]
pub struct Rule {
    pub(crate) name: String,
    pub(crate) kind: RuleKind,
    pub(crate) aliases: Vec<String>,
    pub(crate) group: String,
    pub(crate) default: Option<Value>,
    pub(crate) env_vars: Vec<String>,
    pub(crate) cast: Cast,
    pub(crate) action: Option<Action>,
    pub(crate) stores: Vec<Store>,
    pub(crate) help: String,
    pub(crate) value_name: Option<String>,
    pub(crate) required: bool,
    pub(crate) greedy: bool,
    pub(crate) order: usize,
    pub(crate) command: Option<Arc<CommandFn>>,
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("group", &self.group)
            .field("aliases", &self.aliases)
            .field("cast", &self.cast)
            .field("default", &self.default)
            .field("env_vars", &self.env_vars)
            .field("required", &self.required)
            .field("greedy", &self.greedy)
            .finish_non_exhaustive()
    }
}

impl Rule {
    fn blank(name: String, kind: RuleKind) -> Self {
        Self {
            name,
            kind,
            aliases: Vec::new(),
            group: DEFAULT_GROUP.to_string(),
            default: None,
            env_vars: Vec::new(),
            cast: Cast::String,
            action: None,
            stores: Vec::new(),
            help: String::new(),
            value_name: None,
            required: false,
            greedy: false,
            order: 0,
            command: None,
        }
    }

    /// An option matched by alias. The prefix is taken from how it is written:
    /// `"--power-level"`, `"-p"` or `"++debug"` are used as given; a bare
    /// `"power-level"` becomes `--power-level` and a bare `"p"` becomes `-p`.
    pub fn option(spec: &str) -> RuleBuilder {
        let split = spec
            .find(|c: char| c.is_alphanumeric() || c == '_')
            .unwrap_or(spec.len());
        let (prefix, name) = spec.split_at(split);
        let alias = if !prefix.is_empty() {
            spec.to_string()
        } else if name.chars().count() == 1 {
            format!("-{name}")
        } else {
            format!("--{name}")
        };
        let mut rule = Self::blank(name.to_string(), RuleKind::Option);
        rule.aliases.push(alias);
        RuleBuilder { rule }
    }

    /// A positional argument, matched in declaration order.
    pub fn argument(name: &str) -> RuleBuilder {
        RuleBuilder {
            rule: Self::blank(name.to_string(), RuleKind::Argument),
        }
    }

    /// A config-only item; never matched against the command line.
    pub fn config(name: &str) -> RuleBuilder {
        RuleBuilder {
            rule: Self::blank(name.to_string(), RuleKind::Config),
        }
    }

    /// Every key found under group `name` in external sources.
    pub fn config_group(name: &str) -> RuleBuilder {
        let mut rule = Self::blank(name.to_string(), RuleKind::ConfigGroup);
        rule.group = name.to_string();
        RuleBuilder { rule }
    }

    /// A sub-command. The handler receives a sub-parser and the tokens after the command.
    pub fn command<F>(name: &str, handler: F) -> RuleBuilder
    where
        F: Fn(&mut Parser, &[String]) -> Result<i32, ArgfigError> + Send + Sync + 'static,
    {
        let mut rule = Self::blank(name.to_string(), RuleKind::Command);
        rule.command = Some(Arc::new(handler));
        RuleBuilder { rule }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn kind(&self) -> RuleKind {
        self.kind
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    pub fn env_vars(&self) -> &[String] {
        &self.env_vars
    }

    pub fn default_value(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    pub fn help_text(&self) -> &str {
        &self.help
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn is_greedy(&self) -> bool {
        self.greedy
    }

    pub fn is_positional(&self) -> bool {
        self.kind == RuleKind::Argument
    }

    pub fn is_config_group(&self) -> bool {
        self.kind == RuleKind::ConfigGroup
    }

    pub fn key(&self) -> Key {
        Key::new(self.group.clone(), self.name.clone())
    }

    /// Whether a backend key belongs to this rule.
    pub fn matches_key(&self, key: &Key) -> bool {
        match self.kind {
            RuleKind::ConfigGroup => key.group == self.group,
            RuleKind::Command => false,
            _ => key.group == self.group && key.name == self.name,
        }
    }

    pub(crate) fn takes_value(&self) -> bool {
        self.action.is_none()
    }

    pub(crate) fn cast_value(&self, input: Option<&Value>) -> Result<Value, ArgfigError> {
        self.cast.apply(&self.name, input)
    }

    /// Zero value of the rule's type.
    pub(crate) fn zero(&self) -> Result<Value, ArgfigError> {
        self.cast_value(None)
    }

    pub(crate) fn store(&self, value: &Value) {
        for store in &self.stores {
            store.write(&self.name, value);
        }
    }
}

/// Fluent configuration surface for a [`Rule`]. Finish with [`build`](Self::build)
/// or hand the builder straight to [`Parser::add`].
#[derive(Clone)]
pub struct RuleBuilder {
    rule: Rule,
}

impl RuleBuilder {
    /// Add another literal token that matches this option, e.g. `"-p"`.
    pub fn alias(mut self, token: &str) -> Self {
        self.rule.aliases.push(token.to_string());
        self
    }

    pub fn help(mut self, text: &str) -> Self {
        self.rule.help = text.to_string();
        self
    }

    /// Placeholder shown in help text for the option's value.
    pub fn value_name(mut self, name: &str) -> Self {
        self.rule.value_name = Some(name.to_string());
        self
    }

    pub fn in_group(mut self, group: &str) -> Self {
        self.rule.group = group.to_string();
        self
    }

    /// Read the value from an environment variable. May be called several
    /// times; the first variable with a non-empty value wins.
    pub fn env(mut self, var: &str) -> Self {
        self.rule.env_vars.push(var.to_string());
        self
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.rule.default = Some(value.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.rule.required = true;
        self
    }

    /// Let a positional argument collect every remaining token.
    pub fn greedy(mut self) -> Self {
        self.rule.greedy = true;
        if matches!(self.rule.cast, Cast::String) {
            self.rule.cast = Cast::StringSlice;
        }
        self
    }

    /// Count occurrences instead of consuming a value.
    pub fn count(mut self) -> Self {
        self.rule.action = Some(Action::Count);
        self.rule.cast = Cast::Int;
        self
    }

    /// A flag that is true when present and consumes no value.
    pub fn is_true(mut self) -> Self {
        self.rule.action = Some(Action::SetTrue);
        self.rule.cast = Cast::Bool;
        self
    }

    pub fn cast(mut self, cast: Cast) -> Self {
        self.rule.cast = cast;
        self
    }

    pub fn is_string(self) -> Self {
        self.cast(Cast::String)
    }

    pub fn is_int(self) -> Self {
        self.cast(Cast::Int)
    }

    pub fn is_float(self) -> Self {
        self.cast(Cast::Float)
    }

    /// A boolean that takes its value from the next token (`--debug false`).
    pub fn is_bool(self) -> Self {
        self.cast(Cast::Bool)
    }

    pub fn is_duration(self) -> Self {
        self.cast(Cast::Duration)
    }

    pub fn is_string_slice(self) -> Self {
        self.cast(Cast::StringSlice)
    }

    pub fn is_string_map(self) -> Self {
        self.cast(Cast::StringMap)
    }

    pub fn store_string(mut self, dest: &Arc<Mutex<String>>) -> Self {
        self.rule.stores.push(Store::String(Arc::clone(dest)));
        if self.rule.cast.kind() != Some(ValueKind::String) && self.rule.action.is_none() {
            self.rule.cast = Cast::String;
        }
        self
    }

    pub fn store_int(mut self, dest: &Arc<Mutex<i64>>) -> Self {
        self.rule.stores.push(Store::Int(Arc::clone(dest)));
        if self.rule.action.is_none() {
            self.rule.cast = Cast::Int;
        }
        self
    }

    pub fn store_float(mut self, dest: &Arc<Mutex<f64>>) -> Self {
        self.rule.stores.push(Store::Float(Arc::clone(dest)));
        if self.rule.action.is_none() {
            self.rule.cast = Cast::Float;
        }
        self
    }

    pub fn store_bool(mut self, dest: &Arc<Mutex<bool>>) -> Self {
        self.rule.stores.push(Store::Bool(Arc::clone(dest)));
        if self.rule.action.is_none() {
            self.rule.cast = Cast::Bool;
        }
        self
    }

    pub fn store_duration(mut self, dest: &Arc<Mutex<Duration>>) -> Self {
        self.rule.stores.push(Store::Duration(Arc::clone(dest)));
        if self.rule.action.is_none() {
            self.rule.cast = Cast::Duration;
        }
        self
    }

    pub fn store_string_slice(mut self, dest: &Arc<Mutex<Vec<String>>>) -> Self {
        self.rule.stores.push(Store::StringSlice(Arc::clone(dest)));
        if self.rule.action.is_none() {
            self.rule.cast = Cast::StringSlice;
        }
        self
    }

    pub fn store_string_map(mut self, dest: &Arc<Mutex<BTreeMap<String, String>>>) -> Self {
        self.rule.stores.push(Store::StringMap(Arc::clone(dest)));
        if self.rule.action.is_none() {
            self.rule.cast = Cast::StringMap;
        }
        self
    }

    /// Call `f` with the resolved value on every apply.
    pub fn store_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.rule.stores.push(Store::With(Arc::new(f)));
        self
    }

    /// Finalize the rule, rejecting modifier combinations that cannot work.
    pub fn build(self) -> Result<Rule, ArgfigError> {
        let rule = self.rule;
        let conflict = |reason: &str| ArgfigError::ConflictingRule {
            name: rule.name.clone(),
            reason: reason.to_string(),
        };

        if rule.required && rule.default.is_some() {
            return Err(conflict("a required rule cannot also have a default"));
        }
        if rule.action.is_some() && rule.kind != RuleKind::Option {
            return Err(conflict("count() and is_true() only apply to options"));
        }
        if rule.greedy && rule.kind != RuleKind::Argument {
            return Err(conflict("only positional arguments can be greedy"));
        }
        if let Some(kind) = rule.cast.kind()
            && let Some(store) = rule.stores.iter().find(|s| s.kind().is_some_and(|k| k != kind))
        {
            let store_kind = store.kind().map(|k| k.to_string()).unwrap_or_default();
            return Err(conflict(&format!(
                "a {kind} value cannot be stored into a {store_kind} destination"
            )));
        }
        Ok(rule)
    }
}

impl TryFrom<RuleBuilder> for Rule {
    type Error = ArgfigError;

    fn try_from(builder: RuleBuilder) -> Result<Self, Self::Error> {
        builder.build()
    }
}
