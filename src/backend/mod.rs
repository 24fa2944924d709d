//! Key/value stores a [`Parser`](crate::Parser) can load from and watch.
//!
//! The parser only talks to the [`Backend`] trait. It never assumes anything
//! about the storage format behind it.

mod file;
mod memory;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::ArgfigError;
use crate::types::{ChangeEvent, Key, Pair};

pub use file::FileBackend;
pub use memory::MemoryBackend;

/// Stream of changes produced by [`Backend::watch`].
///
/// Dropping the receiver tells the backend to stop watching.
pub type EventStream = mpsc::UnboundedReceiver<Result<ChangeEvent, ArgfigError>>;

#[async_trait]
pub trait Backend: Send + Sync {
    /// Fetch one key. Missing keys are `ArgfigError::KeyNotFound`.
    async fn get(&self, key: &Key) -> Result<Pair, ArgfigError>;

    /// Every pair in `key.group` whose name starts with `key.name`.
    async fn list(&self, key: &Key) -> Result<Vec<Pair>, ArgfigError>;

    async fn set(&self, key: &Key, value: &str) -> Result<(), ArgfigError>;

    /// Open a change stream for everything under `root`.
    async fn watch(&self, root: &str) -> Result<EventStream, ArgfigError>;

    /// Namespace this backend was opened for.
    fn root_key(&self) -> &str;

    async fn close(&self) -> Result<(), ArgfigError>;
}

/// Whether `pair_key` is selected by a `list` request for `key`.
pub(crate) fn listed(key: &Key, pair_key: &Key) -> bool {
    pair_key.group == key.group && pair_key.name.starts_with(&key.name)
}
