//! The resolved configuration tree.
//!
//! An [`Options`] node maps names to either a value or a nested group. Reads
//! never panic: a missing key, a scalar where a group was expected, or a value
//! that does not cast to the requested type is logged through `tracing` and
//! answered with the zero value. Configuration is read deep inside request
//! handling, where a panic would take the service down.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::ser::{Serialize, SerializeMap, Serializer};
use tracing::warn;

use crate::types::{ChangeEvent, DEFAULT_GROUP};
use crate::value::{Cast, Value, ValueKind};

/// Where a resolved value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Argv,
    Env,
    External,
    Default,
    /// No source had a value; the entry holds the zero value of its type.
    Unset,
}

#[derive(Debug, Clone, PartialEq)]
enum Entry {
    Value { value: Value, source: Source },
    Group(Options),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Options {
    entries: BTreeMap<String, Entry>,
}

static EMPTY: Options = Options::new();

impl Options {
    pub const fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Build a flat node from raw name/value pairs.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let mut opts = Self::new();
        for (k, v) in pairs {
            opts.set(k, v);
        }
        opts
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Set a value supplied from outside the resolver.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.set_with_source(name, value.into(), Source::External)
    }

    pub(crate) fn set_with_source(
        &mut self,
        name: impl Into<String>,
        value: Value,
        source: Source,
    ) -> &mut Self {
        self.entries.insert(name.into(), Entry::Value { value, source });
        self
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        match self.entries.remove(name) {
            Some(Entry::Value { value, .. }) => Some(value),
            Some(group @ Entry::Group(_)) => {
                self.entries.insert(name.to_string(), group);
                None
            }
            None => None,
        }
    }

    /// The raw value under `name`, if it is a value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        match self.entries.get(name) {
            Some(Entry::Value { value, .. }) => Some(value),
            _ => None,
        }
    }

    pub fn source(&self, name: &str) -> Option<Source> {
        match self.entries.get(name) {
            Some(Entry::Value { source, .. }) => Some(*source),
            _ => None,
        }
    }

    /// Whether `name` holds a value from some source, as opposed to the zero
    /// value of a rule that nothing set.
    pub fn is_set(&self, name: &str) -> bool {
        self.source(name).is_some_and(|s| s != Source::Unset)
    }

    pub fn has_key(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Names of the values (not groups) in this node.
    pub fn keys(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, e)| matches!(e, Entry::Value { .. }))
            .map(|(k, _)| k.as_str())
            .collect()
    }

    /// Nested groups of this node.
    pub fn groups(&self) -> impl Iterator<Item = (&str, &Options)> {
        self.entries.iter().filter_map(|(k, e)| match e {
            Entry::Group(g) => Some((k.as_str(), g)),
            Entry::Value { .. } => None,
        })
    }

    /// The nested group called `name`; an empty node if there is none.
    ///
    /// The default group name refers to this node itself.
    pub fn group(&self, name: &str) -> &Options {
        if name == DEFAULT_GROUP {
            return self;
        }
        match self.entries.get(name) {
            Some(Entry::Group(g)) => g,
            Some(Entry::Value { .. }) => {
                warn!(group = name, "requested group is bound to a value");
                &EMPTY
            }
            None => &EMPTY,
        }
    }

    /// Mutable access to group `name`, creating it if absent.
    ///
    /// A value bound to the same name is replaced by the new group.
    pub fn group_mut(&mut self, name: &str) -> &mut Options {
        if name == DEFAULT_GROUP {
            return self;
        }
        let entry = self
            .entries
            .entry(name.to_string())
            .or_insert_with(|| Entry::Group(Options::new()));
        if let Entry::Value { .. } = entry {
            warn!(group = name, "replacing value with group");
            *entry = Entry::Group(Options::new());
        }
        match entry {
            Entry::Group(g) => g,
            Entry::Value { .. } => unreachable!("entry was just replaced with a group"),
        }
    }

    fn typed(&self, name: &str, kind: ValueKind) -> Value {
        let Some(value) = self.get(name) else {
            warn!(key = name, "no such configuration key");
            return Value::zero(kind);
        };
        match Cast::from(kind).apply(name, Some(value)) {
            Ok(v) => v,
            Err(e) => {
                warn!(key = name, error = %e, "configuration value has the wrong type");
                Value::zero(kind)
            }
        }
    }

    pub fn string(&self, name: &str) -> String {
        match self.typed(name, ValueKind::String) {
            Value::String(s) => s,
            _ => String::new(),
        }
    }

    pub fn int(&self, name: &str) -> i64 {
        match self.typed(name, ValueKind::Int) {
            Value::Int(i) => i,
            _ => 0,
        }
    }

    pub fn float(&self, name: &str) -> f64 {
        match self.typed(name, ValueKind::Float) {
            Value::Float(f) => f,
            _ => 0.0,
        }
    }

    pub fn bool(&self, name: &str) -> bool {
        matches!(self.typed(name, ValueKind::Bool), Value::Bool(true))
    }

    pub fn duration(&self, name: &str) -> Duration {
        match self.typed(name, ValueKind::Duration) {
            Value::Duration(d) => d,
            _ => Duration::ZERO,
        }
    }

    pub fn string_slice(&self, name: &str) -> Vec<String> {
        match self.typed(name, ValueKind::StringSlice) {
            Value::StringSlice(items) => items,
            _ => Vec::new(),
        }
    }

    pub fn string_map(&self, name: &str) -> BTreeMap<String, String> {
        match self.typed(name, ValueKind::StringMap) {
            Value::StringMap(map) => map,
            _ => BTreeMap::new(),
        }
    }

    /// Flatten into JSON objects, with nested objects for groups.
    pub fn to_map(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }

    /// Dotted `(key, value)` pairs for every value in the tree.
    pub fn flatten(&self) -> Vec<(String, Value)> {
        let mut out = Vec::new();
        self.collect_flat("", &mut out);
        out
    }

    fn collect_flat(&self, prefix: &str, out: &mut Vec<(String, Value)>) {
        for (k, e) in &self.entries {
            let dotted = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            match e {
                Entry::Value { value, .. } => out.push((dotted, value.clone())),
                Entry::Group(g) => g.collect_flat(&dotted, out),
            }
        }
    }

    /// Fold one backend change into this node in place.
    pub fn from_change_event(&mut self, event: &ChangeEvent) -> &mut Self {
        let group = self.group_mut(&event.key.group);
        if event.deleted {
            group.remove(&event.key.name);
        } else {
            group.set(event.key.name.clone(), event.value.clone());
        }
        self
    }
}

/// A JSON-style object of values, with one nested object per group.
impl Serialize for Options {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, entry) in &self.entries {
            match entry {
                Entry::Value { value, .. } => map.serialize_entry(name, value)?,
                Entry::Group(group) => map.serialize_entry(name, group)?,
            }
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Key;

    #[test]
    fn missing_group_is_empty() {
        let opts = Options::new();
        assert!(opts.group("missing").to_map().is_empty());
    }

    #[test]
    fn group_bound_to_value_is_empty() {
        let mut opts = Options::new();
        opts.set("db", "not a group");
        assert!(opts.group("db").is_empty());
    }

    #[test]
    fn default_group_is_self() {
        let mut opts = Options::new();
        opts.set("port", 80);
        assert_eq!(opts.group("").int("port"), 80);
    }

    #[test]
    fn group_mut_creates() {
        let mut opts = Options::new();
        opts.group_mut("database").set("url", "pg://");
        assert_eq!(opts.group("database").string("url"), "pg://");
    }

    #[test]
    fn group_mut_replaces_value() {
        let mut opts = Options::new();
        opts.set("database", "x");
        opts.group_mut("database").set("url", "pg://");
        assert_eq!(opts.group("database").string("url"), "pg://");
        assert!(opts.get("database").is_none());
    }

    #[test]
    fn accessors_return_zero_for_missing() {
        let opts = Options::new();
        assert_eq!(opts.string("nope"), "");
        assert_eq!(opts.int("nope"), 0);
        assert!(!opts.bool("nope"));
        assert!(opts.string_slice("nope").is_empty());
        assert!(opts.string_map("nope").is_empty());
        assert_eq!(opts.duration("nope"), Duration::ZERO);
    }

    #[test]
    fn accessors_return_zero_for_bad_type() {
        let mut opts = Options::new();
        opts.set("port", "http");
        assert_eq!(opts.int("port"), 0);
    }

    #[test]
    fn accessors_cast_raw_strings() {
        let mut opts = Options::new();
        opts.set("port", "8080").set("debug", "true").set("hosts", "a,b");
        assert_eq!(opts.int("port"), 8080);
        assert!(opts.bool("debug"));
        assert_eq!(opts.string_slice("hosts"), vec!["a", "b"]);
    }

    #[test]
    fn serializes_as_nested_object() {
        let mut opts = Options::new();
        opts.set("port", 80);
        opts.set("timeout", Value::Duration(Duration::from_secs(5)));
        opts.group_mut("database").set("url", "pg://");
        assert_eq!(
            serde_json::to_value(&opts).unwrap(),
            serde_json::json!({
                "port": 80,
                "timeout": "5s",
                "database": {"url": "pg://"},
            })
        );
    }

    #[test]
    fn to_map_nests_groups() {
        let mut opts = Options::new();
        opts.set("port", 80);
        opts.group_mut("database").set("url", "pg://");
        let map = opts.to_map();
        assert_eq!(map["port"], serde_json::json!(80));
        assert_eq!(map["database"]["url"], serde_json::json!("pg://"));
    }

    #[test]
    fn flatten_uses_dotted_keys() {
        let mut opts = Options::new();
        opts.set("port", 80);
        opts.group_mut("database").set("url", "pg://");
        let flat = opts.flatten();
        assert!(flat.contains(&("database.url".to_string(), Value::from("pg://"))));
        assert!(flat.contains(&("port".to_string(), Value::Int(80))));
    }

    #[test]
    fn change_event_sets_and_deletes() {
        let mut opts = Options::new();
        opts.from_change_event(&ChangeEvent::set(Key::new("endpoints", "primary"), "10.0.0.1"));
        assert_eq!(opts.group("endpoints").string("primary"), "10.0.0.1");

        opts.from_change_event(&ChangeEvent::deleted(Key::new("endpoints", "primary")));
        assert!(!opts.group("endpoints").has_key("primary"));
    }

    #[test]
    fn set_and_unset_are_distinguishable() {
        let mut opts = Options::new();
        opts.set_with_source("a", Value::Int(0), Source::Default);
        opts.set_with_source("b", Value::Int(0), Source::Unset);
        assert!(opts.is_set("a"));
        assert!(!opts.is_set("b"));
        assert_eq!(opts.source("a"), Some(Source::Default));
    }

    #[test]
    fn remove_keeps_groups() {
        let mut opts = Options::new();
        opts.group_mut("g").set("x", 1);
        assert_eq!(opts.remove("g"), None);
        assert_eq!(opts.group("g").int("x"), 1);
    }
}
