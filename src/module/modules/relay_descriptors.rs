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

//! `RelayDescriptorsModule` (§11): the consensus/vote/server-descriptor/
//! extra-info/microdescriptor/certificate family (component G over the
//! seven `relay-descriptors/*` kinds).
//!
//! Consensuses, microdesc consensuses and votes are each one document per
//! fetch, archived as-is. Server descriptors, extra-info documents and
//! microdescriptors arrive batched (several concatenated in one
//! response); each individual descriptor is archived under its own
//! content digest, while the whole batch is appended as one file into
//! the recent tree for the tick it was fetched in — mirroring the same
//! "archive is per-item, recent is per-fetch" split the `paths` path
//! formulas already encode for these three kinds.

use std::path::PathBuf;

use futures::future::BoxFuture;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::config::{ConfigSnapshot, SourceType};
use crate::descriptor::{Descriptor, Kind};
use crate::error::CollectorError;
use crate::fetch::{FetchOutcome, Fetcher};
use crate::module::{Module, ModuleContext};
use crate::paths::compute_paths;
use crate::persist::{store_archive, store_recent, WriteMode};

use super::common::{archive_root, find_field, parse_dash_timestamp, recent_root, sync_all_peers};

/// Config-key marker prefix (`RelayDescsSources`, `RelayDescsSyncOrigins`).
pub const MARKER: &str = "RelayDescs";

/// Collects directory consensuses, votes, server descriptors, extra-info
/// documents, microdescriptors and authority key certificates.
pub struct RelayDescriptorsModule;

impl Module for RelayDescriptorsModule {
    fn name(&self) -> &'static str {
        "relaydescs"
    }

    fn sources(&self, config: &ConfigSnapshot) -> Vec<SourceType> {
        config.source_types(&format!("{MARKER}Sources")).unwrap_or_default()
    }

    fn recent_root(&self, config: &ConfigSnapshot) -> PathBuf {
        recent_root(config).join("relay-descriptors")
    }

    fn run_once<'a>(&'a self, ctx: &'a ModuleContext) -> BoxFuture<'a, Result<(), CollectorError>> {
        Box::pin(async move { run(ctx).await })
    }
}

async fn run(ctx: &ModuleContext) -> Result<(), CollectorError> {
    let sources = RelayDescriptorsModule.sources(&ctx.config);
    if sources.contains(&SourceType::Remote) {
        let fetcher = Fetcher::new().map_err(CollectorError::from)?;
        fetch_single(&fetcher, &ctx.config, "ConsensusUrl", Kind::RelayConsensus, "valid-after ", ctx.now_millis).await?;
        fetch_single(&fetcher, &ctx.config, "MicroConsensusUrl", Kind::MicroConsensus, "valid-after ", ctx.now_millis).await?;
        fetch_votes(&fetcher, &ctx.config, ctx.now_millis).await?;
        fetch_certificates(&fetcher, &ctx.config, ctx.now_millis).await?;
        fetch_batch(&fetcher, &ctx.config, "ServerDescriptorsUrl", Kind::ServerDescriptor, "router ", ctx.now_millis).await?;
        fetch_batch(&fetcher, &ctx.config, "ExtraInfoUrl", Kind::ExtraInfo, "extra-info ", ctx.now_millis).await?;
        fetch_batch(&fetcher, &ctx.config, "MicroDescriptorsUrl", Kind::MicroDescriptor, "onion-key\n", ctx.now_millis).await?;
    }

    if sources.contains(&SourceType::Sync) {
        sync_all_peers("relaydescs", MARKER, Kind::ServerDescriptor, &ctx.config, ctx.now_millis).await?;
    }
    super::common::sweep_recent_retention("relaydescs", &ctx.config, &recent_root(&ctx.config).join("relay-descriptors"), ctx.now_millis);
    Ok(())
}

async fn fetch_single(
    fetcher: &Fetcher,
    config: &ConfigSnapshot,
    url_key: &str,
    kind: Kind,
    time_field: &str,
    now_millis: i64,
) -> Result<(), CollectorError> {
    let Some(url) = config.url(url_key)? else { return Ok(()) };
    let body = match fetcher.get(&url).await.map_err(CollectorError::from)? {
        FetchOutcome::Body(b) => b,
        FetchOutcome::NotFound => return Ok(()),
    };
    let text = String::from_utf8_lossy(&body);
    let time_millis = find_field(&text, time_field).and_then(parse_dash_timestamp).unwrap_or(now_millis);

    let descriptor = Descriptor {
        kind,
        raw: body,
        annotations: Vec::new(),
        primary_time_millis: Some(time_millis),
        digest_hex: None,
        fingerprint_hex: None,
        vote_digest_hex: None,
        virtual_host: None,
        physical_host: None,
    };
    let path_pair = compute_paths(&descriptor, now_millis)?;
    let archive_path = archive_root(config).join(&path_pair.archive);
    let recent_path = recent_root(config).join(&path_pair.recent);
    store_archive(kind, &archive_path, &descriptor.raw)?;
    store_recent(kind, &recent_path, &descriptor.raw, WriteMode::Append)?;
    Ok(())
}

async fn fetch_votes(fetcher: &Fetcher, config: &ConfigSnapshot, now_millis: i64) -> Result<(), CollectorError> {
    let urls = config.url_list("VoteUrls")?;
    for url in urls {
        let body = match fetcher.get(&url).await.map_err(CollectorError::from)? {
            FetchOutcome::Body(b) => b,
            FetchOutcome::NotFound => continue,
        };
        let text = String::from_utf8_lossy(&body);
        let Some(auth_fp) = find_field(&text, "fingerprint ").map(str::to_string) else {
            warn!(module = "relaydescs", %url, "vote missing fingerprint field; skipping");
            continue;
        };
        let time_millis = find_field(&text, "valid-after ").and_then(parse_dash_timestamp).unwrap_or(now_millis);
        let vote_digest = {
            let mut hasher = Sha256::new();
            hasher.update(&body);
            hex::encode(hasher.finalize())
        };

        let descriptor = Descriptor {
            kind: Kind::RelayVote,
            raw: body,
            annotations: Vec::new(),
            primary_time_millis: Some(time_millis),
            digest_hex: None,
            fingerprint_hex: Some(auth_fp),
            vote_digest_hex: Some(vote_digest),
            virtual_host: None,
            physical_host: None,
        };
        let path_pair = compute_paths(&descriptor, now_millis)?;
        let archive_path = archive_root(config).join(&path_pair.archive);
        let recent_path = recent_root(config).join(&path_pair.recent);
        store_archive(Kind::RelayVote, &archive_path, &descriptor.raw)?;
        store_recent(Kind::RelayVote, &recent_path, &descriptor.raw, WriteMode::Append)?;
    }
    Ok(())
}

async fn fetch_certificates(fetcher: &Fetcher, config: &ConfigSnapshot, now_millis: i64) -> Result<(), CollectorError> {
    let urls = config.url_list("KeyCertificateUrls")?;
    for url in urls {
        let body = match fetcher.get(&url).await.map_err(CollectorError::from)? {
            FetchOutcome::Body(b) => b,
            FetchOutcome::NotFound => continue,
        };
        let text = String::from_utf8_lossy(&body);
        let Some(fp) = find_field(&text, "fingerprint ").map(str::to_string) else {
            warn!(module = "relaydescs", %url, "certificate missing fingerprint field; skipping");
            continue;
        };
        let time_millis = find_field(&text, "dir-key-published ").and_then(parse_dash_timestamp).unwrap_or(now_millis);

        let descriptor = Descriptor {
            kind: Kind::KeyCertificate,
            raw: body,
            annotations: Vec::new(),
            primary_time_millis: Some(time_millis),
            digest_hex: None,
            fingerprint_hex: Some(fp),
            vote_digest_hex: None,
            virtual_host: None,
            physical_host: None,
        };
        let path_pair = compute_paths(&descriptor, now_millis)?;
        let archive_path = archive_root(config).join(&path_pair.archive);
        let recent_path = recent_root(config).join(&path_pair.recent);
        store_archive(Kind::KeyCertificate, &archive_path, &descriptor.raw)?;
        store_recent(Kind::KeyCertificate, &recent_path, &descriptor.raw, WriteMode::Append)?;
    }
    Ok(())
}

/// Fetch a batch document, archive each individually-digested entry
/// split on `split_prefix`, and append the whole fetched batch as one
/// file into the recent tree.
async fn fetch_batch(
    fetcher: &Fetcher,
    config: &ConfigSnapshot,
    url_key: &str,
    kind: Kind,
    split_prefix: &str,
    now_millis: i64,
) -> Result<(), CollectorError> {
    let Some(url) = config.url(url_key)? else { return Ok(()) };
    let body = match fetcher.get(&url).await.map_err(CollectorError::from)? {
        FetchOutcome::Body(b) => b,
        FetchOutcome::NotFound => return Ok(()),
    };
    let text = String::from_utf8_lossy(&body);

    for chunk in split_on_prefix(&text, split_prefix) {
        let time_millis = find_field(chunk, "published ").and_then(parse_dash_timestamp).unwrap_or(now_millis);
        let digest = {
            let mut hasher = Sha256::new();
            hasher.update(chunk.as_bytes());
            hex::encode(hasher.finalize())
        };
        let descriptor = Descriptor {
            kind,
            raw: chunk.as_bytes().to_vec(),
            annotations: Vec::new(),
            primary_time_millis: Some(time_millis),
            digest_hex: Some(digest),
            fingerprint_hex: None,
            vote_digest_hex: None,
            virtual_host: None,
            physical_host: None,
        };
        let path_pair = compute_paths(&descriptor, now_millis)?;
        let archive_path = archive_root(config).join(&path_pair.archive);
        store_archive(kind, &archive_path, &descriptor.raw)?;
    }

    // The recent tree keeps the whole fetched batch as one file per tick,
    // independent of how the archive splits it up.
    let batch_descriptor = Descriptor {
        kind,
        raw: body,
        annotations: Vec::new(),
        primary_time_millis: Some(now_millis),
        digest_hex: None,
        fingerprint_hex: None,
        vote_digest_hex: None,
        virtual_host: None,
        physical_host: None,
    };
    let path_pair = compute_paths(&batch_descriptor, now_millis)?;
    let recent_path = recent_root(config).join(&path_pair.recent);
    store_recent(kind, &recent_path, &batch_descriptor.raw, WriteMode::Append)?;
    Ok(())
}

fn split_on_prefix<'a>(text: &'a str, split_prefix: &str) -> Vec<&'a str> {
    let mut starts = Vec::new();
    let mut offset = 0usize;
    for line in text.split_inclusive('\n') {
        if line.starts_with(split_prefix) {
            starts.push(offset);
        }
        offset += line.len();
    }
    let mut chunks = Vec::with_capacity(starts.len());
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(text.len());
        chunks.push(&text[start..end]);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn base_config(dir: &std::path::Path) -> String {
        format!(
            "RelayDescsSources = Remote\nArchivePath = {}\nRecentPath = {}\n",
            dir.join("archive").display(),
            dir.join("recent").display(),
        )
    }

    #[test]
    fn split_on_prefix_splits_server_descriptor_batch() {
        let batch = "router a 1.2.3.4 9001 0 0\npublished 2020-01-01 00:00:00\nrouter b 1.2.3.5 9001 0 0\npublished 2020-01-01 00:00:00\n";
        let chunks = split_on_prefix(batch, "router ");
        assert_eq!(chunks.len(), 2);
    }

    #[tokio::test]
    async fn consensus_round_trip_archives_and_appends_recent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/consensus"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"network-status-version 3\nvalid-after 2020-06-01 00:00:00\n".to_vec()))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let mut cfg = base_config(dir.path());
        cfg.push_str(&format!("ConsensusUrl = {}/consensus\n", server.uri()));
        let config = Arc::new(ConfigSnapshot::parse(&cfg).unwrap());

        let ctx = ModuleContext { config: config.clone(), now_millis: 1_590_969_600_000 };
        run(&ctx).await.unwrap();

        let archive = dir.path().join("archive/relay-descriptors/consensus/2020/06/01/2020-06-01-00-00-00-consensus");
        assert!(archive.exists());
    }
}
