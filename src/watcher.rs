//! Debounced recursive file watcher.
//!
//! Wraps `notify-debouncer-full`. Raw notifications are coalesced over the
//! configured window, converted to [`FileEvent`]s, filtered through the
//! vault's [`PathFilter`], and pushed into a bounded tokio channel. When
//! the channel is full the converter thread blocks, which in turn stalls
//! the debouncer: ingestion speed is the backpressure.
//!
//! Watch errors never stop the vault. They flip the shared
//! [`WatcherHealth`] into a degraded state; a full scan is the recovery.

use notify_debouncer_full::notify::event::{ModifyKind, RenameMode};
use notify_debouncer_full::notify::{EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebounceEventResult, DebouncedEvent, Debouncer, RecommendedCache};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc as tokio_mpsc;
use tracing::{debug, error, warn};

use crate::error::Error;
use crate::walk::PathFilter;

/// A settled change under the watch root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Deleted(PathBuf),
    Renamed { from: PathBuf, to: PathBuf },
}

/// Shared view of whether the watcher is still observing the tree.
#[derive(Debug, Default)]
pub struct WatcherHealth {
    last_error: Mutex<Option<String>>,
}

impl WatcherHealth {
    pub fn is_degraded(&self) -> bool {
        self.last_error().is_some()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().map(|e| e.clone()).unwrap_or(None)
    }

    pub fn mark_degraded(&self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(reason = %reason, "watcher degraded; run a scan to reconcile");
        if let Ok(mut slot) = self.last_error.lock() {
            *slot = Some(reason);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut slot) = self.last_error.lock() {
            *slot = None;
        }
    }
}

pub struct FileWatcher {
    debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
    health: Arc<WatcherHealth>,
}

impl FileWatcher {
    /// Start watching `filter.root()` recursively. Events flow into `event_tx`.
    pub fn start(
        filter: Arc<PathFilter>,
        event_tx: tokio_mpsc::Sender<FileEvent>,
        debounce: Duration,
        health: Arc<WatcherHealth>,
    ) -> Result<Self, Error> {
        let (tx, rx) = mpsc::channel();

        let converter_filter = filter.clone();
        let converter_health = health.clone();
        std::thread::Builder::new()
            .name("lifevault-watch".to_string())
            .spawn(move || {
                while let Ok(result) = rx.recv() {
                    if !forward_events(result, &converter_filter, &converter_health, &event_tx) {
                        debug!("event channel closed; watcher converter exiting");
                        break;
                    }
                }
            })?;

        let mut debouncer = new_debouncer(debounce, None, move |result: DebounceEventResult| {
            let _ = tx.send(result);
        })
        .map_err(|e| Error::Watch(e.to_string()))?;

        debouncer
            .watch(filter.root(), RecursiveMode::Recursive)
            .map_err(|e| Error::Watch(e.to_string()))?;
        debug!(root = %filter.root().display(), "watching");
        health.clear();

        Ok(Self { debouncer, health })
    }

    pub fn health(&self) -> &Arc<WatcherHealth> {
        &self.health
    }

    /// Stop observing `root`. Pending debounced events are discarded.
    pub fn stop(mut self, root: &Path) {
        if let Err(e) = self.debouncer.unwatch(root) {
            debug!(error = %e, "unwatch failed");
        }
        // dropping the debouncer stops its thread
    }
}

/// Returns false once the receiving side has gone away.
fn forward_events(
    result: DebounceEventResult,
    filter: &PathFilter,
    health: &WatcherHealth,
    event_tx: &tokio_mpsc::Sender<FileEvent>,
) -> bool {
    match result {
        Ok(events) => {
            for event in events {
                if event.kind.is_remove() && event.paths.iter().any(|p| p == filter.root()) {
                    health.mark_degraded(format!("watch root removed: {}", filter.root().display()));
                    continue;
                }
                let Some(file_event) = convert_event(&event) else {
                    continue;
                };
                if !is_relevant(&file_event, filter) {
                    continue;
                }
                // Blocking send: a full queue holds the watcher back.
                if event_tx.blocking_send(file_event).is_err() {
                    return false;
                }
            }
        }
        Err(errors) => {
            for e in errors {
                error!(error = %e, "watch error");
                health.mark_degraded(e.to_string());
            }
        }
    }
    true
}

fn is_relevant(event: &FileEvent, filter: &PathFilter) -> bool {
    match event {
        FileEvent::Created(p) | FileEvent::Modified(p) | FileEvent::Deleted(p) => filter.accepts(p),
        FileEvent::Renamed { from, to } => filter.accepts(from) || filter.accepts(to),
    }
}

pub(crate) fn convert_event(event: &DebouncedEvent) -> Option<FileEvent> {
    let first = event.paths.first()?.clone();

    match &event.kind {
        EventKind::Create(_) => Some(FileEvent::Created(first)),
        EventKind::Remove(_) => Some(FileEvent::Deleted(first)),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() >= 2 => {
            Some(FileEvent::Renamed {
                from: first,
                to: event.paths[1].clone(),
            })
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(FileEvent::Deleted(first)),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(FileEvent::Created(first)),
        EventKind::Modify(ModifyKind::Metadata(_)) => None,
        EventKind::Modify(_) => Some(FileEvent::Modified(first)),
        EventKind::Other if event.paths.len() >= 2 => Some(FileEvent::Renamed {
            from: first,
            to: event.paths[1].clone(),
        }),
        _ => None,
    }
}
