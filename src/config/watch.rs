// Copyright (c) 2026 The Collector Authors
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]

//! Filesystem-watch hot-reload for the config file.
//!
//! Grounded on `Lowband21-ferrex/ferrex-core::scan::fs_watch`: a
//! `notify::RecommendedWatcher` built with a closure that forwards raw
//! events across a channel rather than driving `notify`'s own blocking
//! loop on the calling thread. Reparsed snapshots are published on a
//! `tokio::sync::watch` channel so every module reads the latest
//! `Arc<ConfigSnapshot>` only when it starts its next tick (§10 ambient
//! stack), never mid-tick.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::watch;
use tracing::warn;

use super::{ConfigError, ConfigSnapshot};

/// Handle keeping the background filesystem watcher alive. Dropping it
/// stops watching.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
}

/// Start watching `path`'s parent directory for changes and republish a
/// freshly parsed [`ConfigSnapshot`] on the returned `watch` channel
/// whenever the file changes. Returns the initial snapshot alongside the
/// receiver so callers never observe an uninitialized config.
pub fn spawn_hot_reload(
    path: &Path,
) -> Result<(Arc<ConfigSnapshot>, watch::Receiver<Arc<ConfigSnapshot>>, ConfigWatcher), ConfigError> {
    let initial = Arc::new(ConfigSnapshot::load(path)?);
    let (tx, rx) = watch::channel(initial.clone());

    let watched_path = path.to_path_buf();
    let reload_path = watched_path.clone();
    let mut watcher = RecommendedWatcher::new(
        move |res: std::result::Result<Event, notify::Error>| match res {
            Ok(event) if event_touches(&event, &watched_path) => {
                match ConfigSnapshot::load(&watched_path) {
                    Ok(fresh) => {
                        let _ = tx.send(Arc::new(fresh));
                    }
                    Err(e) => warn!(error = %e, path = %watched_path.display(), "config reload failed, keeping previous snapshot"),
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "config watcher error"),
        },
        notify::Config::default(),
    )
    .map_err(|e| ConfigError::Io(std::io::Error::other(e.to_string())))?;

    let watch_dir = reload_path.parent().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
    watcher
        .watch(&watch_dir, RecursiveMode::NonRecursive)
        .map_err(|e| ConfigError::Io(std::io::Error::other(e.to_string())))?;

    Ok((initial, rx, ConfigWatcher { _watcher: watcher }))
}

fn event_touches(event: &Event, path: &Path) -> bool {
    event.paths.iter().any(|p| p == path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    #[tokio::test]
    async fn reload_publishes_fresh_snapshot_on_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("collector.properties");
        std::fs::write(&path, "Foo = 1\n").unwrap();

        let (initial, mut rx, _watcher) = spawn_hot_reload(&path).unwrap();
        assert_eq!(initial.string("Foo"), Some("1"));

        std::fs::write(&path, "Foo = 2\n").unwrap();

        let changed = tokio::time::timeout(Duration::from_secs(5), rx.changed()).await;
        assert!(changed.is_ok(), "expected a config change notification");
        let updated = rx.borrow().clone();
        assert_eq!(updated.string("Foo"), Some("2"));
    }
}
