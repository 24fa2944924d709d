//! A TOML file as a backend.
//!
//! `[group]` tables map to groups (nested tables become dotted group names)
//! and top-level keys live in the default group. Reads parse the whole file
//! with `toml`. Writes go through `toml_edit` so comments and formatting
//! survive. A watch compares successive snapshots of the file and emits one
//! batch of set/deleted events per interval at most.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use notify::{Event, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{Backend, EventStream, listed};
use crate::error::ArgfigError;
use crate::types::{ChangeEvent, Key, Pair, lock};

const DEFAULT_INTERVAL: Duration = Duration::from_millis(250);

type Snapshot = BTreeMap<Key, String>;

#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
    root: String,
    interval: Duration,
    /// Last snapshot a watcher delivered. A new watch reports what changed
    /// since then, so edits made while the watch was down are not lost.
    baseline: Arc<Mutex<Option<Snapshot>>>,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let root = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            path,
            root,
            interval: DEFAULT_INTERVAL,
            baseline: Arc::new(Mutex::new(None)),
        }
    }

    /// `file` inside the platform config directory for `app`
    /// (e.g. `~/.config/{app}/` on Linux).
    pub fn platform(app: &str, file: &str) -> Result<Self, ArgfigError> {
        let dirs = directories::ProjectDirs::from("", "", app).ok_or_else(|| {
            ArgfigError::Backend(format!("no platform config directory for '{app}'"))
        })?;
        let mut backend = Self::new(dirs.config_dir().join(file));
        backend.root = app.to_string();
        Ok(backend)
    }

    /// Minimum time between two change batches.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

#[async_trait]
impl Backend for FileBackend {
    async fn get(&self, key: &Key) -> Result<Pair, ArgfigError> {
        let path = self.path.clone();
        let mut snapshot = blocking(move || read_snapshot(&path)).await?;
        snapshot
            .remove(key)
            .map(|v| Pair::new(key.clone(), v))
            .ok_or_else(|| ArgfigError::KeyNotFound(key.clone()))
    }

    async fn list(&self, key: &Key) -> Result<Vec<Pair>, ArgfigError> {
        let path = self.path.clone();
        Ok(blocking(move || read_snapshot(&path))
            .await?
            .into_iter()
            .filter(|(k, _)| listed(key, k))
            .map(|(k, v)| Pair::new(k, v))
            .collect())
    }

    async fn set(&self, key: &Key, value: &str) -> Result<(), ArgfigError> {
        let (path, key, value) = (self.path.clone(), key.clone(), value.to_string());
        blocking(move || persist_value(&path, &key, &value)).await
    }

    async fn watch(&self, _root: &str) -> Result<EventStream, ArgfigError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (tick_tx, mut tick_rx) = mpsc::unbounded_channel::<()>();

        let file_name = self.path.file_name().map(|n| n.to_os_string());
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) if event.paths.iter().any(|p| p.file_name() == file_name.as_deref()) => {
                let _ = tick_tx.send(());
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "file watch error"),
        })
        .map_err(|e| ArgfigError::Watch(e.to_string()))?;
        watcher
            .watch(&self.dir(), RecursiveMode::NonRecursive)
            .map_err(|e| ArgfigError::Watch(e.to_string()))?;

        let path = self.path.clone();
        let interval = self.interval;
        let baseline = Arc::clone(&self.baseline);
        let mut last = {
            let path = path.clone();
            blocking(move || read_snapshot(&path)).await?
        };
        if let Some(prev) = lock(&baseline).replace(last.clone()) {
            for event in diff(&prev, &last) {
                let _ = tx.send(Ok(event));
            }
        }
        debug!(path = %path.display(), "watching file");

        tokio::spawn(async move {
            // Dropping the watcher stops notify's thread.
            let _watcher = watcher;
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    tick = tick_rx.recv() => {
                        if tick.is_none() {
                            break;
                        }
                    }
                }
                tokio::time::sleep(interval).await;
                while tick_rx.try_recv().is_ok() {}

                let read = {
                    let path = path.clone();
                    blocking(move || read_snapshot(&path)).await
                };
                match read {
                    Ok(next) => {
                        for event in diff(&last, &next) {
                            if tx.send(Ok(event)).is_err() {
                                return;
                            }
                        }
                        *lock(&baseline) = Some(next.clone());
                        last = next;
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        break;
                    }
                }
            }
            debug!(path = %path.display(), "file watch stopped");
        });

        Ok(rx)
    }

    fn root_key(&self) -> &str {
        &self.root
    }

    async fn close(&self) -> Result<(), ArgfigError> {
        Ok(())
    }
}

/// Run file I/O off the async worker threads.
async fn blocking<T, F>(f: F) -> Result<T, ArgfigError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ArgfigError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ArgfigError::Backend(e.to_string()))?
}

/// Every key in the file with its value rendered as text. A missing file is empty.
fn read_snapshot(path: &Path) -> Result<Snapshot, ArgfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => {
            return Err(ArgfigError::Io {
                path: path.to_path_buf(),
                source: e,
            });
        }
    };
    let table: toml::Table = toml::from_str(&content).map_err(|e| ArgfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut out = BTreeMap::new();
    flatten_table("", &table, &mut out);
    Ok(out)
}

fn flatten_table(group: &str, table: &toml::Table, out: &mut Snapshot) {
    for (name, value) in table {
        match value {
            toml::Value::Table(nested) => {
                let nested_group = if group.is_empty() {
                    name.clone()
                } else {
                    format!("{group}.{name}")
                };
                flatten_table(&nested_group, nested, out);
            }
            other => {
                out.insert(Key::new(group, name.clone()), render(other));
            }
        }
    }
}

/// Text form that the built-in casts understand; arrays become comma lists.
fn render(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        toml::Value::Array(items) => items.iter().map(render).collect::<Vec<_>>().join(","),
        other => other.to_string(),
    }
}

fn diff(last: &Snapshot, next: &Snapshot) -> Vec<ChangeEvent> {
    let mut events: Vec<ChangeEvent> = next
        .iter()
        .filter(|(k, v)| last.get(*k) != Some(*v))
        .map(|(k, v)| ChangeEvent::set(k.clone(), v.clone()))
        .collect();
    events.extend(
        last.keys()
            .filter(|k| !next.contains_key(*k))
            .map(|k| ChangeEvent::deleted(k.clone())),
    );
    events
}

/// Pure function: patch a TOML document string, setting `key` to `raw_value`.
///
/// Missing group tables are created. Existing comments and formatting are kept.
pub(crate) fn set_in_document(
    content: Option<&str>,
    key: &Key,
    raw_value: &str,
) -> Result<String, ArgfigError> {
    let mut doc: toml_edit::DocumentMut = content
        .unwrap_or_default()
        .parse()
        .map_err(|e: toml_edit::TomlError| ArgfigError::Backend(e.to_string()))?;

    let mut table = doc.as_table_mut();
    for segment in key.group.split('.').filter(|s| !s.is_empty()) {
        table = table
            .entry(segment)
            .or_insert(toml_edit::table())
            .as_table_mut()
            .ok_or_else(|| {
                ArgfigError::Backend(format!("'{segment}' in '{key}' is not a table"))
            })?;
    }
    table.insert(&key.name, toml_edit::value(parse_toml_edit_value(raw_value)));

    Ok(doc.to_string())
}

/// I/O wrapper: reads the file (if it exists), patches it, writes it back.
/// Creates parent directories if needed.
fn persist_value(path: &Path, key: &Key, value: &str) -> Result<(), ArgfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => Some(c),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            return Err(ArgfigError::Io {
                path: path.to_path_buf(),
                source: e,
            });
        }
    };

    let new_content = set_in_document(content.as_deref(), key, value)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ArgfigError::Io {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    std::fs::write(path, new_content).map_err(|e| ArgfigError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Parse a raw string value into a `toml_edit::Value` with type heuristics.
fn parse_toml_edit_value(s: &str) -> toml_edit::Value {
    if s.eq_ignore_ascii_case("true") {
        return true.into();
    }
    if s.eq_ignore_ascii_case("false") {
        return false.into();
    }
    if let Ok(i) = s.parse::<i64>() {
        return i.into();
    }
    if s.contains('.')
        && let Ok(f) = s.parse::<f64>()
    {
        return f.into();
    }
    s.into()
}
