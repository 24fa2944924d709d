//! Background reconciliation against a [`Backend`].
//!
//! One tokio task per watch runs a small state machine:
//!
//! ```text
//! Connecting ──ok──▶ Watching ──closed/error──▶ Retrying ──backoff──▶ Connecting
//!      │                │                           │
//!      └──error──▶ Retrying                         │
//!                       └───────── done ────────────┴──▶ Cancelled
//! ```
//!
//! Events are handed to the callback one at a time, in the order the backend
//! sent them, with `ChangeEvent::rule` filled in from the parser's rules.
//! Errors go to the callback too; they never end the loop. The retry wait
//! doubles from `step` up to `max` and resets after any delivered event.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{Backend, EventStream};
use crate::error::ArgfigError;
use crate::rule::Rule;
use crate::types::ChangeEvent;

/// Retry timing for a watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchSettings {
    pub step: Duration,
    pub max: Duration,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            step: Duration::from_millis(100),
            max: Duration::from_secs(2),
        }
    }
}

impl WatchSettings {
    /// Wait before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.step.saturating_mul(factor).min(self.max)
    }
}

/// Handle to a running watch.
///
/// [`cancel`](Self::cancel) stops the loop and waits for it; once it returns
/// the callback will not run again. Dropping the handle also stops the loop
/// but does not wait.
#[derive(Debug)]
pub struct WatchHandle {
    done: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl WatchHandle {
    pub async fn cancel(mut self) {
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            warn!(error = %e, "watch task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
    }
}

enum State {
    Connecting,
    Watching(EventStream),
    Retrying,
    Cancelled,
}

/// Start the loop and return once the first attempt to open a watch finished,
/// so a change made right after this returns is not missed.
pub(crate) async fn spawn<F>(
    backend: Arc<dyn Backend>,
    rules: Vec<Arc<Rule>>,
    settings: WatchSettings,
    callback: F,
) -> WatchHandle
where
    F: FnMut(Result<ChangeEvent, ArgfigError>) + Send + 'static,
{
    let (done_tx, done_rx) = oneshot::channel();
    let (ready_tx, ready_rx) = oneshot::channel();
    let task = tokio::spawn(run(backend, rules, settings, callback, done_rx, ready_tx));
    let _ = ready_rx.await;
    WatchHandle {
        done: Some(done_tx),
        task: Some(task),
    }
}

async fn run<F>(
    backend: Arc<dyn Backend>,
    rules: Vec<Arc<Rule>>,
    settings: WatchSettings,
    mut callback: F,
    mut done: oneshot::Receiver<()>,
    ready: oneshot::Sender<()>,
) where
    F: FnMut(Result<ChangeEvent, ArgfigError>) + Send + 'static,
{
    let root = backend.root_key().to_string();
    let mut ready = Some(ready);
    let mut attempt: u32 = 0;
    let mut state = State::Connecting;

    loop {
        state = match state {
            State::Connecting => {
                let opened = tokio::select! {
                    _ = &mut done => None,
                    opened = backend.watch(&root) => Some(opened),
                };
                if let Some(ready) = ready.take() {
                    let _ = ready.send(());
                }
                match opened {
                    None => State::Cancelled,
                    Some(Ok(stream)) => {
                        info!(root = %root, "watching backend");
                        State::Watching(stream)
                    }
                    Some(Err(e)) => {
                        warn!(root = %root, error = %e, "failed to open backend watch");
                        callback(Err(e));
                        State::Retrying
                    }
                }
            }
            State::Watching(mut stream) => {
                let received = tokio::select! {
                    _ = &mut done => None,
                    event = stream.recv() => Some(event),
                };
                match received {
                    None => State::Cancelled,
                    Some(Some(Ok(mut event))) => {
                        attempt = 0;
                        event.rule = rules.iter().find(|r| r.matches_key(&event.key)).cloned();
                        debug!(key = %event.key, managed = event.rule.is_some(), "change received");
                        callback(Ok(event));
                        State::Watching(stream)
                    }
                    Some(Some(Err(e))) => {
                        warn!(root = %root, error = %e, "backend watch failed");
                        callback(Err(e));
                        State::Retrying
                    }
                    Some(None) => {
                        warn!(root = %root, "backend watch closed");
                        State::Retrying
                    }
                }
            }
            State::Retrying => {
                attempt = attempt.saturating_add(1);
                let wait = settings.backoff(attempt);
                debug!(attempt, wait_ms = wait.as_millis() as u64, "retrying backend watch");
                tokio::select! {
                    _ = &mut done => State::Cancelled,
                    _ = tokio::time::sleep(wait) => State::Connecting,
                }
            }
            State::Cancelled => break,
        };
    }
    debug!(root = %root, "watch cancelled");
}
