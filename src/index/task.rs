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

//! The incremental indexing walk and multi-format atomic emission.
//!
//! Compressed sibling emission (`.gz`/`.xz`/`.bz2`) is grounded on
//! `other_examples/manifests/astral-sh-uv`, the only pack manifest that
//! pulls in `flate2`, `xz2` and `bzip2` together.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use sha2::{Digest, Sha256};

use crate::descriptor::parse_annotation_tokens;

use super::{format_last_modified, format_millis, DirectoryNode, FileNode, IndexDocument, IndexError};

/// Options controlling a single index build.
pub struct IndexBuildOptions {
    /// Root of the tree to walk (typically the union of archive + recent
    /// roots' parent, or a dedicated published directory).
    pub root: PathBuf,
    /// Directory `index.json` (and compressed siblings) are written into.
    pub output_dir: PathBuf,
    /// This instance's own base URL, carried into [`IndexDocument::path`]
    /// (`InstanceBaseUrl`, §4.J).
    pub instance_base_url: String,
    /// The previous build's tree, if any, enabling incremental reuse of
    /// unchanged subtrees.
    pub previous: Option<DirectoryNode>,
    /// Emit a gzip sibling.
    pub emit_gz: bool,
    /// Emit an xz sibling.
    pub emit_xz: bool,
    /// Emit a bzip2 sibling.
    pub emit_bz2: bool,
}

/// Walk `options.root`, producing a fresh [`IndexDocument`] and writing
/// `index.json` (plus any requested compressed siblings) atomically into
/// `options.output_dir`.
///
/// A directory whose own `mtime` matches the previous build's recorded
/// value is returned verbatim without descending into it — the dominant
/// case on a quiet tree, where only a handful of leaf directories changed
/// since the last run.
pub fn build_index(options: &IndexBuildOptions) -> Result<IndexDocument, IndexError> {
    let root_node = walk(&options.root, String::new(), options.previous.as_ref())?;

    let doc = IndexDocument {
        index_created: format_last_modified(std::time::SystemTime::now()),
        path: options.instance_base_url.clone(),
        build_revision: super::build_revision(),
        root: root_node,
    };

    emit(&doc, options)?;
    Ok(doc)
}

fn walk(path: &Path, name: String, previous: Option<&DirectoryNode>) -> Result<DirectoryNode, IndexError> {
    let meta = std::fs::metadata(path)?;
    let self_mtime = format_last_modified(meta.modified()?);

    if let Some(prev) = previous {
        if prev.last_modified.as_deref() == Some(self_mtime.as_str()) {
            return Ok(prev.clone());
        }
    }

    let mut directories = Vec::new();
    let mut files = Vec::new();

    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        let entry_path = entry.path();
        let file_name = entry.file_name().to_string_lossy().to_string();

        // Dangling symlinks are pruned: a symlink whose target cannot be
        // stat'd is skipped rather than surfaced as an error (§4.I edge
        // case).
        let followed_meta = match std::fs::metadata(&entry_path) {
            Ok(m) => m,
            Err(_) => continue,
        };

        if followed_meta.is_dir() {
            let prev_child = previous.and_then(|p| p.find_dir(&file_name));
            directories.push(walk(&entry_path, file_name, prev_child)?);
        } else if followed_meta.is_file() {
            let last_modified = format_last_modified(followed_meta.modified()?);
            let prev_file = previous.and_then(|p| p.find_file(&file_name));
            let reuse = prev_file.filter(|f| f.last_modified == last_modified && f.size == followed_meta.len());
            files.push(match reuse {
                Some(f) => f.clone(),
                None => read_file_node(&entry_path, file_name, followed_meta.len(), last_modified)?,
            });
        }
    }

    directories.sort_by(|a, b| a.path.cmp(&b.path));
    files.sort_by(|a, b| a.path.cmp(&b.path));

    Ok(DirectoryNode {
        path: name,
        directories,
        files,
        last_modified: Some(self_mtime),
    })
}

/// Read a changed file's bytes and compute the three facets that can
/// only be derived by opening it: the SHA-256 digest (base64, §6), the
/// verbatim `@type` tokens it declares, and the min/max `published`
/// timestamps among any descriptors it carries (§4.I step 2).
fn read_file_node(path: &Path, name: String, size: u64, last_modified: String) -> Result<FileNode, IndexError> {
    let bytes = std::fs::read(path)?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let sha256 = BASE64_STANDARD.encode(hasher.finalize());

    let text = String::from_utf8_lossy(&bytes);
    let mut types = Vec::new();
    let mut published_millis = Vec::new();
    for line in text.lines() {
        if let Some(tokens) = parse_annotation_tokens(line) {
            if !types.contains(&tokens) {
                types.push(tokens);
            }
        } else if let Some(value) = line.strip_prefix("published ") {
            if let Some(millis) = parse_published_timestamp(value) {
                published_millis.push(millis);
            }
        }
    }

    Ok(FileNode {
        path: name,
        size,
        last_modified,
        sha256,
        types,
        first_published: published_millis.iter().min().copied().map(format_millis),
        last_published: published_millis.iter().max().copied().map(format_millis),
    })
}

/// Parse a `YYYY-MM-DD HH:MM:SS` `published` field value into epoch
/// milliseconds UTC.
fn parse_published_timestamp(value: &str) -> Option<i64> {
    use chrono::TimeZone;
    let parsed = chrono::NaiveDateTime::parse_from_str(value.trim(), "%Y-%m-%d %H:%M:%S").ok()?;
    Some(chrono::Utc.from_utc_datetime(&parsed).timestamp_millis())
}

fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), IndexError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp = match path.parent() {
        Some(parent) => parent.join(&tmp_name),
        None => PathBuf::from(tmp_name),
    };
    {
        let mut f = std::fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        let _ = f.sync_all();
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn emit(doc: &IndexDocument, options: &IndexBuildOptions) -> Result<(), IndexError> {
    let json = serde_json::to_vec_pretty(doc)?;
    atomic_write(&options.output_dir.join("index.json"), &json)?;

    if options.emit_gz {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&json)?;
        let compressed = enc.finish()?;
        atomic_write(&options.output_dir.join("index.json.gz"), &compressed)?;
    }
    if options.emit_xz {
        let mut enc = xz2::write::XzEncoder::new(Vec::new(), 6);
        enc.write_all(&json)?;
        let compressed = enc.finish()?;
        atomic_write(&options.output_dir.join("index.json.xz"), &compressed)?;
    }
    if options.emit_bz2 {
        let mut enc = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::new(6));
        enc.write_all(&json)?;
        let compressed = enc.finish()?;
        atomic_write(&options.output_dir.join("index.json.bz2"), &compressed)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn builds_tree_matching_filesystem_layout() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("exit-lists")).unwrap();
        std::fs::write(dir.path().join("exit-lists/2020-06-01"), b"x").unwrap();

        let out = tempdir().unwrap();
        let opts = IndexBuildOptions {
            root: dir.path().to_path_buf(),
            output_dir: out.path().to_path_buf(),
            instance_base_url: "https://collector.example.org".to_string(),
            previous: None,
            emit_gz: true,
            emit_xz: false,
            emit_bz2: false,
        };
        let doc = build_index(&opts).unwrap();
        let exit_lists = doc.root.find_dir("exit-lists").unwrap();
        assert!(exit_lists.find_file("2020-06-01").is_some());
        assert!(out.path().join("index.json").exists());
        assert!(out.path().join("index.json.gz").exists());
    }

    #[test]
    fn file_node_carries_sha256_types_and_published_range() {
        let dir = tempdir().unwrap();
        let body = b"@type tordnsel 1.0\nDated 2020-06-01\nExitNode ABCD\npublished 2020-06-01 00:00:00\n@type tordnsel 1.0\npublished 2020-06-01 06:00:00\n";
        std::fs::write(dir.path().join("combined"), body).unwrap();

        let out = tempdir().unwrap();
        let opts = IndexBuildOptions {
            root: dir.path().to_path_buf(),
            output_dir: out.path().to_path_buf(),
            instance_base_url: "https://collector.example.org".to_string(),
            previous: None,
            emit_gz: false,
            emit_xz: false,
            emit_bz2: false,
        };
        let doc = build_index(&opts).unwrap();
        let file = doc.root.find_file("combined").unwrap();

        let mut hasher = Sha256::new();
        hasher.update(body);
        assert_eq!(file.sha256, BASE64_STANDARD.encode(hasher.finalize()));
        assert_eq!(file.types, vec!["tordnsel 1.0".to_string()]);
        assert_eq!(file.first_published.as_deref(), Some("2020-06-01 00:00:00"));
        assert_eq!(file.last_published.as_deref(), Some("2020-06-01 06:00:00"));
    }

    #[test]
    fn unchanged_directory_is_reused_from_previous_build() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/file"), b"x").unwrap();

        let out = tempdir().unwrap();
        let opts = IndexBuildOptions {
            root: dir.path().to_path_buf(),
            output_dir: out.path().to_path_buf(),
            instance_base_url: "https://collector.example.org".to_string(),
            previous: None,
            emit_gz: false,
            emit_xz: false,
            emit_bz2: false,
        };
        let first = build_index(&opts).unwrap();

        let opts2 = IndexBuildOptions {
            previous: Some(first.root.clone()),
            ..opts
        };
        let second = build_index(&opts2).unwrap();
        assert_eq!(first.root, second.root);
    }

    #[test]
    fn dangling_symlinks_are_pruned() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("gone");
        std::fs::write(&target, b"x").unwrap();
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(&target, dir.path().join("link")).unwrap();
            std::fs::remove_file(&target).unwrap();

            let out = tempdir().unwrap();
            let opts = IndexBuildOptions {
                root: dir.path().to_path_buf(),
                output_dir: out.path().to_path_buf(),
                instance_base_url: "https://collector.example.org".to_string(),
                previous: None,
                emit_gz: false,
                emit_xz: false,
                emit_bz2: false,
            };
            let doc = build_index(&opts).unwrap();
            assert!(doc.root.find_file("link").is_none());
        }
    }
}
