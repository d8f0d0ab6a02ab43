//! Per-path debounced filesystem watcher. Subscribes to one scope root,
//! coalesces events within a 1.5s quiescence window (last event per path
//! wins), and forwards a simplified event to an async channel for the
//! engine to dispatch to the Indexer.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use notify::RecursiveMode;
use notify_debouncer_full::{DebounceEventResult, Debouncer, RecommendedCache, new_debouncer};
use tokio::sync::mpsc;

use crate::memory::indexer::Indexer;

const DEBOUNCE_WINDOW: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// File created or modified; relative path under the scope root.
    Changed(String),
    /// File removed; relative path under the scope root.
    Removed(String),
}

pub struct Watcher {
    _debouncer: Debouncer<notify::RecommendedWatcher, RecommendedCache>,
}

impl Watcher {
    /// Start watching `root` for Markdown changes, sending a [`WatchEvent`]
    /// per affected, non-excluded file to `tx` once the debounce window is
    /// quiet.
    pub fn spawn(root: &Path, tx: mpsc::UnboundedSender<WatchEvent>) -> Result<Self> {
        let root_owned: PathBuf = root.to_path_buf();

        let mut debouncer = new_debouncer(
            DEBOUNCE_WINDOW,
            None,
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    for event in &events {
                        for path in &event.paths {
                            dispatch_event(&root_owned, path, &tx);
                        }
                    }
                }
                Err(errors) => {
                    for error in errors {
                        tracing::warn!(?error, "watcher error");
                    }
                }
            },
        )
        .context("failed to create filesystem watcher")?;

        debouncer
            .watch(root, RecursiveMode::Recursive)
            .with_context(|| format!("failed to watch {}", root.display()))?;

        Ok(Self {
            _debouncer: debouncer,
        })
    }
}

fn dispatch_event(root: &Path, path: &Path, tx: &mpsc::UnboundedSender<WatchEvent>) {
    let Ok(relative) = path.strip_prefix(root) else {
        return;
    };
    let relative_str = relative.to_string_lossy().replace('\\', "/");

    if !relative_str.ends_with(".md") || Indexer::is_excluded(&relative_str) {
        return;
    }

    let event = if path.exists() {
        WatchEvent::Changed(relative_str)
    } else {
        WatchEvent::Removed(relative_str)
    };
    let _ = tx.send(event);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_ignores_non_markdown_and_excluded_files() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let root = Path::new("/tmp/scope-root");

        dispatch_event(root, &root.join("user/preferences.json"), &tx);
        dispatch_event(root, &root.join("PRIMER.md"), &tx);
        assert!(rx.try_recv().is_err());

        dispatch_event(root, &root.join("user/preferences.md"), &tx);
        match rx.try_recv() {
            Ok(WatchEvent::Removed(path)) => assert_eq!(path, "user/preferences.md"),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
