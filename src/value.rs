//! Typed values and the casts that produce them.
//!
//! Every source (argv, environment, INI text, backends) hands the resolver raw
//! text or an already-typed [`Value`]. A [`Cast`] turns that input into the
//! rule's declared type. Casts are total over absent input: `None` or an empty
//! string yields the zero value of the type, so an optional rule with nothing
//! set still resolves cleanly.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::error::ArgfigError;

/// The type tag of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    String,
    Int,
    Float,
    Bool,
    Duration,
    StringSlice,
    StringMap,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::String => "string",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::Bool => "bool",
            ValueKind::Duration => "duration",
            ValueKind::StringSlice => "string list",
            ValueKind::StringMap => "string map",
        };
        f.write_str(name)
    }
}

/// A resolved configuration value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Duration(Duration),
    StringSlice(Vec<String>),
    StringMap(BTreeMap<String, String>),
}

impl Value {
    pub fn zero(kind: ValueKind) -> Self {
        match kind {
            ValueKind::String => Value::String(String::new()),
            ValueKind::Int => Value::Int(0),
            ValueKind::Float => Value::Float(0.0),
            ValueKind::Bool => Value::Bool(false),
            ValueKind::Duration => Value::Duration(Duration::ZERO),
            ValueKind::StringSlice => Value::StringSlice(Vec::new()),
            ValueKind::StringMap => Value::StringMap(BTreeMap::new()),
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Value::String(_) => ValueKind::String,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Bool(_) => ValueKind::Bool,
            Value::Duration(_) => ValueKind::Duration,
            Value::StringSlice(_) => ValueKind::StringSlice,
            Value::StringMap(_) => ValueKind::StringMap,
        }
    }

    /// Text form that the matching cast parses back into an equal value.
    pub fn render(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Duration(d) => render_duration(*d),
            Value::StringSlice(items) => items.join(","),
            Value::StringMap(map) => map
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Scalars map to their native form. Durations use the text the cast accepts.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::String(s) => serializer.serialize_str(s),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Duration(d) => serializer.serialize_str(&render_duration(*d)),
            Value::StringSlice(items) => items.serialize(serializer),
            Value::StringMap(map) => map.serialize(serializer),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<Duration> for Value {
    fn from(d: Duration) -> Self {
        Value::Duration(d)
    }
}

impl From<Vec<String>> for Value {
    fn from(items: Vec<String>) -> Self {
        Value::StringSlice(items)
    }
}

pub type CastFn = dyn Fn(&str, Option<&Value>) -> Result<Value, ArgfigError> + Send + Sync;

/// Converts raw input into a rule's typed value.
#[derive(Clone)]
pub enum Cast {
    String,
    Int,
    Float,
    Bool,
    Duration,
    StringSlice,
    StringMap,
    /// User-supplied conversion. It receives the rule name and the raw input,
    /// and must return the zero value of its type for `None`.
    Custom(Arc<CastFn>),
}

impl fmt::Debug for Cast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            Some(kind) => write!(f, "Cast::{kind}"),
            None => f.write_str("Cast::Custom"),
        }
    }
}

impl From<ValueKind> for Cast {
    fn from(kind: ValueKind) -> Self {
        match kind {
            ValueKind::String => Cast::String,
            ValueKind::Int => Cast::Int,
            ValueKind::Float => Cast::Float,
            ValueKind::Bool => Cast::Bool,
            ValueKind::Duration => Cast::Duration,
            ValueKind::StringSlice => Cast::StringSlice,
            ValueKind::StringMap => Cast::StringMap,
        }
    }
}

impl Cast {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&str, Option<&Value>) -> Result<Value, ArgfigError> + Send + Sync + 'static,
    {
        Cast::Custom(Arc::new(f))
    }

    /// The type this cast produces; `None` for custom casts.
    pub fn kind(&self) -> Option<ValueKind> {
        match self {
            Cast::String => Some(ValueKind::String),
            Cast::Int => Some(ValueKind::Int),
            Cast::Float => Some(ValueKind::Float),
            Cast::Bool => Some(ValueKind::Bool),
            Cast::Duration => Some(ValueKind::Duration),
            Cast::StringSlice => Some(ValueKind::StringSlice),
            Cast::StringMap => Some(ValueKind::StringMap),
            Cast::Custom(_) => None,
        }
    }

    /// Cast `input` for the rule called `name`.
    pub fn apply(&self, name: &str, input: Option<&Value>) -> Result<Value, ArgfigError> {
        let kind = match self {
            Cast::Custom(f) => return f(name, input),
            other => other.kind().unwrap_or(ValueKind::String),
        };

        let input = match input {
            None => return Ok(Value::zero(kind)),
            Some(v) if v.kind() == kind => return Ok(v.clone()),
            Some(v) => v,
        };

        // A list handed to a scalar cast (e.g. greedy tokens) keeps its last item.
        let raw = match (input, kind) {
            (Value::StringSlice(items), ValueKind::StringMap) => items.join(","),
            (Value::StringSlice(items), _) => items.last().cloned().unwrap_or_default(),
            (other, _) => other.render(),
        };
        // Strings are kept verbatim; the other kinds ignore surrounding blanks.
        let raw = if kind == ValueKind::String {
            raw.as_str()
        } else {
            raw.trim()
        };
        if raw.is_empty() {
            return Ok(Value::zero(kind));
        }

        match kind {
            ValueKind::String => Ok(Value::String(raw.to_string())),
            ValueKind::Int => raw
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|e| ArgfigError::cast(name, raw, e.to_string())),
            ValueKind::Float => raw
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|e| ArgfigError::cast(name, raw, e.to_string())),
            ValueKind::Bool => parse_bool(raw)
                .map(Value::Bool)
                .ok_or_else(|| ArgfigError::cast(name, raw, "expected true or false")),
            ValueKind::Duration => parse_duration(raw)
                .map(Value::Duration)
                .ok_or_else(|| ArgfigError::cast(name, raw, "expected a duration like 10s or 250ms")),
            ValueKind::StringSlice => Ok(Value::StringSlice(split_list(raw))),
            ValueKind::StringMap => parse_string_map(name, raw).map(Value::StringMap),
        }
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_string_map(name: &str, s: &str) -> Result<BTreeMap<String, String>, ArgfigError> {
    let mut map = BTreeMap::new();
    for item in split_list(s) {
        let Some((k, v)) = item.split_once('=') else {
            return Err(ArgfigError::cast(name, s, format!("'{item}' is not a key=value pair")));
        };
        map.insert(k.trim().to_string(), v.trim().to_string());
    }
    Ok(map)
}

/// Parse `250ms`, `10s`, `5m`, `1h`; a bare integer counts seconds.
fn parse_duration(s: &str) -> Option<Duration> {
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    let n: u64 = digits.parse().ok()?;
    match unit.trim() {
        "" | "s" => Some(Duration::from_secs(n)),
        "ms" => Some(Duration::from_millis(n)),
        "m" => Some(Duration::from_secs(n.checked_mul(60)?)),
        "h" => Some(Duration::from_secs(n.checked_mul(3600)?)),
        _ => None,
    }
}

fn render_duration(d: Duration) -> String {
    let millis = d.as_millis();
    if millis % 1000 != 0 {
        format!("{millis}ms")
    } else {
        format!("{}s", d.as_secs())
    }
}
