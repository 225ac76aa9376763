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

//! The JSON index tree (component I, §4.I): a recursive directory
//! listing of the archive/recent trees, published as `index.json` (and
//! compressed siblings) so peers and downstream consumers can discover
//! what's available without directory-listing the web server itself.
//!
//! This same tree shape is also what the sync engine (component F) reads
//! back from a peer's own `index.json` to learn what that peer is
//! serving.

pub mod task;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use task::{build_index, IndexBuildOptions};

/// Index builder errors.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Underlying filesystem I/O failure while walking or writing.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    /// Failed to serialize the tree to JSON.
    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A single file leaf in the tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileNode {
    /// File name (not a full path — nesting is implied by the parent
    /// [`DirectoryNode`]).
    pub path: String,
    /// File size in bytes.
    pub size: u64,
    /// Last-modified time, `YYYY-MM-DD HH:MM:SS` UTC.
    pub last_modified: String,
    /// Base64 of the SHA-256 over the file's bytes (§6).
    pub sha256: String,
    /// The `@type token version` strings declared by the file's own
    /// annotation lines, verbatim and in file order, deduplicated.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<String>,
    /// Earliest `published` timestamp found in the file's contents.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_published: Option<String>,
    /// Latest `published` timestamp found in the file's contents.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_published: Option<String>,
}

/// A directory node: its own name plus child directories and files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DirectoryNode {
    /// Directory name, empty for the tree root. Skipped on serialization
    /// when empty so the root's own (meaningless) name never collides
    /// with [`IndexDocument::path`].
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    /// Child directories, recursively.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub directories: Vec<DirectoryNode>,
    /// Child files.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileNode>,
    /// This directory's own `mtime`, used (not serialized) to decide
    /// whether an incremental rebuild can reuse this whole subtree
    /// unchanged.
    #[serde(skip)]
    pub last_modified: Option<String>,
}

/// The top-level document written to `index.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexDocument {
    /// Index format version, always `"1.0"`.
    pub index_created: String,
    /// This instance's own base URL (`InstanceBaseUrl`, §4.J), so a peer
    /// reading this document knows where the listed files are served
    /// from.
    pub path: String,
    /// Build identifier, populated from `vergen`-emitted build metadata
    /// when available (§10 ambient stack).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_revision: Option<String>,
    /// The root directory node. Its own `path` is always empty and is
    /// never serialized (see [`DirectoryNode::path`]); `directories` and
    /// `files` are hoisted to the top level of the document.
    #[serde(flatten)]
    pub root: DirectoryNode,
}

impl DirectoryNode {
    /// Recursively collect every file leaf as `(relative_path, size)`,
    /// relative to this node.
    pub fn flatten_files(&self) -> Vec<(String, u64)> {
        let mut out = Vec::new();
        self.flatten_into(String::new(), &mut out);
        out
    }

    fn flatten_into(&self, prefix: String, out: &mut Vec<(String, u64)>) {
        for file in &self.files {
            let rel = if prefix.is_empty() {
                file.path.clone()
            } else {
                format!("{prefix}/{}", file.path)
            };
            out.push((rel, file.size));
        }
        for dir in &self.directories {
            let child_prefix = if prefix.is_empty() {
                dir.path.clone()
            } else {
                format!("{prefix}/{}", dir.path)
            };
            dir.flatten_into(child_prefix, out);
        }
    }

    /// Find the child file node matching a single path segment.
    pub fn find_file(&self, name: &str) -> Option<&FileNode> {
        self.files.iter().find(|f| f.path == name)
    }

    /// Find the child directory node matching a single path segment.
    pub fn find_dir(&self, name: &str) -> Option<&DirectoryNode> {
        self.directories.iter().find(|d| d.path == name)
    }
}

/// Parse an `index.json` document fetched from a peer.
pub fn parse_index_document(bytes: &[u8]) -> Result<IndexDocument, IndexError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Read `build_revision` from `vergen`-emitted compile-time env vars, if
/// the build was run with `build.rs` metadata enabled.
pub fn build_revision() -> Option<String> {
    option_env!("VERGEN_GIT_SHA")
        .or(option_env!("VERGEN_BUILD_TIMESTAMP"))
        .map(|s| s.to_string())
}

/// Best-effort human-readable `last_modified` string for a filesystem
/// `mtime`, in the format the index format uses.
pub fn format_last_modified(modified: std::time::SystemTime) -> String {
    let millis = modified
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    format_millis(millis)
}

/// Same rendering as [`format_last_modified`], taken directly from epoch
/// milliseconds UTC rather than a [`std::time::SystemTime`] — used for
/// the `published` timestamps parsed out of a file's own contents.
pub fn format_millis(millis: i64) -> String {
    chrono::DateTime::<chrono::Utc>::from_timestamp_millis(millis)
        .unwrap_or_else(|| chrono::DateTime::<chrono::Utc>::from_timestamp_millis(0).expect("epoch is valid"))
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flatten_files_produces_relative_paths() {
        let tree = DirectoryNode {
            path: String::new(),
            directories: vec![DirectoryNode {
                path: "exit-lists".to_string(),
                directories: vec![],
                files: vec![FileNode {
                    path: "2020-06-01-00-00-00".to_string(),
                    size: 42,
                    last_modified: "2020-06-01 00:05:00".to_string(),
                    sha256: "deadbeef".to_string(),
                    types: vec!["tordnsel 1.0".to_string()],
                    first_published: None,
                    last_published: None,
                }],
                last_modified: None,
            }],
            files: vec![],
            last_modified: None,
        };
        let flat = tree.flatten_files();
        assert_eq!(flat, vec![("exit-lists/2020-06-01-00-00-00".to_string(), 42)]);
    }

    #[test]
    fn round_trips_through_json() {
        let doc = IndexDocument {
            index_created: "2020-06-01 00:00:00".to_string(),
            path: "https://collector.example.org".to_string(),
            build_revision: Some("abc123".to_string()),
            root: DirectoryNode::default(),
        };
        let bytes = serde_json::to_vec(&doc).unwrap();
        let parsed = parse_index_document(&bytes).unwrap();
        assert_eq!(parsed, doc);
    }

    #[test]
    fn document_path_is_not_shadowed_by_the_root_directorys_own_empty_path() {
        let doc = IndexDocument {
            index_created: "2020-06-01 00:00:00".to_string(),
            path: "https://collector.example.org".to_string(),
            build_revision: None,
            root: DirectoryNode::default(),
        };
        let value: serde_json::Value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["path"], "https://collector.example.org");

        let parsed = parse_index_document(&serde_json::to_vec(&doc).unwrap()).unwrap();
        assert_eq!(parsed.path, "https://collector.example.org");
        assert_eq!(parsed.root.path, "");
    }
}
