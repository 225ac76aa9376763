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

//! `IndexerModule` (§11, §4.I): runs the incremental index build
//! (component I) as a module in the same scheduler every other module
//! runs under, loading the previous `index.json` for subtree reuse and
//! pruning stale `htdocs/recent/` publish-mirror symlinks afterward.
//!
//! Pruning is two-phase: a symlink whose target has gone missing is
//! only deleted once it has been observed broken on two consecutive
//! index runs, recorded in a small sidecar state file next to the
//! index output. This avoids deleting a link during the brief window a
//! retention sweep and a fresh write race on the same path.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use tracing::warn;

use crate::config::{ConfigSnapshot, SourceType};
use crate::error::CollectorError;
use crate::index::{build_index, parse_index_document, DirectoryNode, IndexBuildOptions};
use crate::module::{Module, ModuleContext};

/// Builds and publishes `index.json` (and compressed siblings).
pub struct IndexerModule;

impl Module for IndexerModule {
    fn name(&self) -> &'static str {
        "index"
    }

    fn sources(&self, _config: &ConfigSnapshot) -> Vec<SourceType> {
        Vec::new()
    }

    fn recent_root(&self, config: &ConfigSnapshot) -> PathBuf {
        index_root(config)
    }

    fn run_once<'a>(&'a self, ctx: &'a ModuleContext) -> BoxFuture<'a, Result<(), CollectorError>> {
        Box::pin(async move { run(ctx).await })
    }
}

fn index_root(config: &ConfigSnapshot) -> PathBuf {
    config.path("IndexRootPath").unwrap_or_else(|| PathBuf::from("out"))
}

fn index_output_dir(config: &ConfigSnapshot) -> PathBuf {
    config.path("IndexPath").unwrap_or_else(|| index_root(config))
}

async fn run(ctx: &ModuleContext) -> Result<(), CollectorError> {
    let root = index_root(&ctx.config);
    if !root.is_dir() {
        return Ok(());
    }
    let output_dir = index_output_dir(&ctx.config);

    let previous = load_previous(&output_dir.join("index.json"));
    let options = IndexBuildOptions {
        root,
        output_dir: output_dir.clone(),
        instance_base_url: ctx.config.string("InstanceBaseUrl").unwrap_or_default().to_string(),
        previous,
        emit_gz: ctx.config.bool("IndexEmitGzip")?.unwrap_or(true),
        emit_xz: ctx.config.bool("IndexEmitXz")?.unwrap_or(true),
        emit_bz2: ctx.config.bool("IndexEmitBzip2")?.unwrap_or(false),
    };
    build_index(&options).map_err(CollectorError::from)?;

    if let Some(recent_publish_dir) = ctx.config.path("PublishRecentPath") {
        let state_path = output_dir.join("dangling-links.state");
        if let Err(e) = prune_dangling_links(&recent_publish_dir, &state_path) {
            warn!(module = "index", error = %e, "dangling publish-link prune failed");
        }
    }
    Ok(())
}

fn load_previous(path: &Path) -> Option<DirectoryNode> {
    let bytes = std::fs::read(path).ok()?;
    parse_index_document(&bytes).ok().map(|doc| doc.root)
}

/// Two-phase prune: a broken symlink under `dir` is deleted only if it
/// was already recorded broken by the previous run. `state_path` holds
/// one `relative_path\tfirst_seen_millis` line per currently-tracked
/// candidate.
fn prune_dangling_links(dir: &Path, state_path: &Path) -> std::io::Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    let mut previously_broken = load_state(state_path);
    let mut still_broken = BTreeMap::new();

    for entry in walkdir::WalkDir::new(dir).into_iter().filter_map(Result::ok) {
        let path = entry.path();
        let meta = match std::fs::symlink_metadata(path) {
            Ok(m) => m,
            Err(_) => continue,
        };
        if !meta.file_type().is_symlink() {
            continue;
        }
        let target_exists = std::fs::metadata(path).is_ok();
        if target_exists {
            continue;
        }
        let relative = path.strip_prefix(dir).unwrap_or(path).to_string_lossy().to_string();
        if let Some(first_seen) = previously_broken.remove(&relative) {
            let _ = std::fs::remove_file(path);
            let _ = first_seen;
        } else {
            still_broken.insert(relative, ());
        }
    }

    save_state(state_path, &still_broken)
}

fn load_state(path: &Path) -> BTreeMap<String, ()> {
    let Ok(text) = std::fs::read_to_string(path) else {
        return BTreeMap::new();
    };
    text.lines().map(|line| (line.to_string(), ())).collect()
}

fn save_state(path: &Path, entries: &BTreeMap<String, ()>) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let body = entries.keys().cloned().collect::<Vec<_>>().join("\n");
    std::fs::write(path, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn indexer_builds_tree_over_output_root() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("archive/exit-lists")).unwrap();
        std::fs::write(dir.path().join("archive/exit-lists/2020-06-01"), b"x").unwrap();

        let out = tempdir().unwrap();
        let options = IndexBuildOptions {
            root: dir.path().to_path_buf(),
            output_dir: out.path().to_path_buf(),
            instance_base_url: "https://collector.example.org".to_string(),
            previous: None,
            emit_gz: false,
            emit_xz: false,
            emit_bz2: false,
        };
        build_index(&options).unwrap();
        assert!(out.path().join("index.json").exists());
    }

    #[cfg(unix)]
    #[test]
    fn dangling_link_is_removed_only_on_second_consecutive_prune() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("target-file");
        std::fs::write(&target, b"x").unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&target, &link).unwrap();
        std::fs::remove_file(&target).unwrap();

        let state = dir.path().join("state/dangling-links.state");

        prune_dangling_links(dir.path(), &state).unwrap();
        assert!(link.exists() || std::fs::symlink_metadata(&link).is_ok());

        prune_dangling_links(dir.path(), &state).unwrap();
        assert!(std::fs::symlink_metadata(&link).is_err());
    }
}
