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

//! The sync engine (component F, §4.F): mirrors descriptors from a peer
//! CollecTor instance by diffing the peer's published `index.json`
//! against local history, fetching what's missing, and persisting it
//! through the same path calculator and writer every other source uses.
//!
//! The `tokio::select!` shutdown-aware loop shape is grounded on the
//! teacher's `src/networking/p2p.rs::spawn_p2p`.

pub mod history;

use std::path::PathBuf;

use thiserror::Error;

use crate::descriptor::{Descriptor, DescriptorError, Kind};
use crate::fetch::{FetchError, FetchOutcome, Fetcher};
use crate::index::{self, IndexError};
use crate::paths::compute_paths;
use crate::persist::{store_both, PersistError, WriteOutcome};

pub use history::{HistoryError, SyncHistory};

/// Sync engine errors.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Fetching the peer's index or a listed file failed.
    #[error("fetch: {0}")]
    Fetch(#[from] FetchError),
    /// The peer's `index.json` could not be parsed.
    #[error("index: {0}")]
    Index(#[from] IndexError),
    /// The sync history file is unusable.
    #[error("history: {0}")]
    History(#[from] HistoryError),
    /// Writing a fetched descriptor to disk failed.
    #[error("persist: {0}")]
    Persist(#[from] PersistError),
    /// A fetched descriptor's bytes didn't parse into the facets the
    /// path calculator needs.
    #[error("descriptor: {0}")]
    Descriptor(#[from] DescriptorError),
}

/// A peer instance to mirror from, and where to land what it has.
pub struct PeerSource {
    /// Human-readable name, used only in logs.
    pub name: String,
    /// Base URL the peer serves its `index.json` and descriptor files
    /// under.
    pub base_url: String,
    /// Per-peer sync history file.
    pub history_path: PathBuf,
    /// Local archive root.
    pub archive_root: PathBuf,
    /// Local recent root.
    pub recent_root: PathBuf,
}

/// How a fetched file's bytes are turned into a [`Descriptor`] ready for
/// the path calculator. Supplied by the caller (component G knows, per
/// listed path, which kind it is and how to parse it) so this engine
/// stays kind-agnostic.
pub trait DescriptorParser {
    /// Parse `bytes` fetched from `relative_path` into a descriptor, or
    /// `None` if this path isn't one this parser recognizes (the engine
    /// skips it without error).
    fn parse(&self, relative_path: &str, bytes: &[u8]) -> Result<Option<Descriptor>, DescriptorError>;
}

/// Outcome of syncing a single peer.
#[derive(Debug, Default, Clone, Copy)]
pub struct SyncStats {
    /// Files listed in the peer's index but already known locally.
    pub already_present: usize,
    /// Files newly fetched and persisted.
    pub fetched: usize,
    /// Files the peer listed but returned 404 for when asked (race with
    /// the peer's own retention).
    pub missing_on_peer: usize,
    /// Files whose bytes didn't parse and were skipped.
    pub unparseable: usize,
}

/// Mirrors descriptors from one peer.
pub struct SyncEngine {
    fetcher: Fetcher,
}

impl SyncEngine {
    /// Build a sync engine with its own bounded HTTP fetcher.
    pub fn new() -> Result<Self, SyncError> {
        Ok(Self { fetcher: Fetcher::new()? })
    }

    /// Sync `peer`: download its `index.json`, fetch every listed file
    /// not already recorded in history, persist each through the
    /// standard archive/recent writer, and only then rewrite the history
    /// file once for the whole batch (§4.F item 4).
    pub async fn sync_peer(
        &self,
        peer: &PeerSource,
        parser: &dyn DescriptorParser,
        received_at_millis: i64,
    ) -> Result<SyncStats, SyncError> {
        let mut stats = SyncStats::default();
        let mut history = SyncHistory::open(&peer.history_path)?;

        let index_url = format!("{}/index.json", peer.base_url.trim_end_matches('/'));
        let index_bytes = match self.fetcher.get(&index_url).await? {
            FetchOutcome::Body(b) => b,
            FetchOutcome::NotFound => return Ok(stats),
        };
        let doc = index::parse_index_document(&index_bytes)?;

        let mut newly_fetched = Vec::new();

        for (relative_path, _size) in doc.root.flatten_files() {
            if history.has_seen(&relative_path) {
                stats.already_present += 1;
                continue;
            }

            let file_url = format!("{}/{relative_path}", peer.base_url.trim_end_matches('/'));
            let bytes = match self.fetcher.get(&file_url).await? {
                FetchOutcome::Body(b) => b,
                FetchOutcome::NotFound => {
                    stats.missing_on_peer += 1;
                    continue;
                }
            };

            let descriptor = match parser.parse(&relative_path, &bytes)? {
                Some(d) => d,
                None => {
                    stats.unparseable += 1;
                    continue;
                }
            };

            let path_pair = compute_paths(&descriptor, received_at_millis)?;
            let archive_path = peer.archive_root.join(&path_pair.archive);
            let recent_path = peer.recent_root.join(&path_pair.recent);
            let (archive_outcome, _recent_outcome) =
                store_both(descriptor.kind, &archive_path, &recent_path, &descriptor.raw)?;

            if archive_outcome == WriteOutcome::Written {
                stats.fetched += 1;
            } else {
                stats.already_present += 1;
            }
            newly_fetched.push(relative_path);
        }

        if !newly_fetched.is_empty() {
            history.extend_and_persist(&newly_fetched)?;
        }

        Ok(stats)
    }
}

/// A [`DescriptorParser`] that always reports "not recognized" — useful
/// as a placeholder until a real kind-dispatch parser is wired in by the
/// module that owns a given source.
pub struct NullParser;

impl DescriptorParser for NullParser {
    fn parse(&self, _relative_path: &str, _bytes: &[u8]) -> Result<Option<Descriptor>, DescriptorError> {
        Ok(None)
    }
}

/// A [`DescriptorParser`] used by tests: treats every fetched path as an
/// exit list with the peer's raw bytes and a fixed timestamp.
#[cfg(test)]
struct FixedKindParser {
    kind: Kind,
    time_millis: i64,
}

#[cfg(test)]
impl DescriptorParser for FixedKindParser {
    fn parse(&self, _relative_path: &str, bytes: &[u8]) -> Result<Option<Descriptor>, DescriptorError> {
        Ok(Some(Descriptor {
            kind: self.kind,
            raw: bytes.to_vec(),
            annotations: Vec::new(),
            primary_time_millis: Some(self.time_millis),
            digest_hex: None,
            fingerprint_hex: None,
            vote_digest_hex: None,
            virtual_host: None,
            physical_host: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{DirectoryNode, FileNode, IndexDocument};
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn index_with_one_file() -> Vec<u8> {
        let doc = IndexDocument {
            index_created: "2020-06-01 00:00:00".to_string(),
            path: "https://peer.example.org".to_string(),
            build_revision: None,
            root: DirectoryNode {
                path: String::new(),
                directories: vec![],
                files: vec![FileNode {
                    path: "2020-06-01-00-00-00".to_string(),
                    size: 5,
                    last_modified: "2020-06-01 00:00:00".to_string(),
                    sha256: "deadbeef".to_string(),
                    types: vec![],
                    first_published: None,
                    last_published: None,
                }],
                last_modified: None,
            },
        };
        serde_json::to_vec(&doc).unwrap()
    }

    #[tokio::test]
    async fn fetches_and_persists_new_files_then_records_history_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index.json"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(index_with_one_file()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/2020-06-01-00-00-00"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ExitNode ABCD\n".to_vec()))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let peer = PeerSource {
            name: "peer-a".to_string(),
            base_url: server.uri(),
            history_path: dir.path().join("history"),
            archive_root: dir.path().join("archive"),
            recent_root: dir.path().join("recent"),
        };
        let parser = FixedKindParser {
            kind: Kind::ExitList,
            time_millis: 1_590_969_600_000,
        };

        let engine = SyncEngine::new().unwrap();
        let stats = engine.sync_peer(&peer, &parser, 1_590_969_600_000).await.unwrap();
        assert_eq!(stats.fetched, 1);
        assert_eq!(stats.already_present, 0);

        let history = SyncHistory::open(&peer.history_path).unwrap();
        assert!(history.has_seen("2020-06-01-00-00-00"));

        // A second run sees the path already in history and skips refetching.
        let stats2 = engine.sync_peer(&peer, &parser, 1_590_969_600_000).await.unwrap();
        assert_eq!(stats2.fetched, 0);
        assert_eq!(stats2.already_present, 1);
    }

    #[tokio::test]
    async fn missing_index_is_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index.json"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let peer = PeerSource {
            name: "peer-b".to_string(),
            base_url: server.uri(),
            history_path: dir.path().join("history"),
            archive_root: dir.path().join("archive"),
            recent_root: dir.path().join("recent"),
        };
        let engine = SyncEngine::new().unwrap();
        let stats = engine.sync_peer(&peer, &NullParser, 0).await.unwrap();
        assert_eq!(stats.fetched, 0);
    }
}
