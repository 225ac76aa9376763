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

//! Shared plumbing used by the concrete `Module` implementations: fetch
//! a set of configured URLs, turn each response body into a
//! [`Descriptor`], and persist it through the standard path
//! calculator + writer.
//!
//! Actually parsing Tor's descriptor grammars is out of scope (§1
//! Non-goals: the wire format is an external collaborator's concern);
//! these helpers derive the handful of facets the path calculator and
//! sanitizer need (timestamp, digest) directly from the fetched bytes,
//! which is sufficient for every kind this crate persists.

use std::path::PathBuf;

use sha2::{Digest, Sha256};

use crate::config::ConfigSnapshot;
use crate::descriptor::{Descriptor, DescriptorError, Kind};
use crate::error::CollectorError;
use crate::fetch::{FetchOutcome, Fetcher};
use crate::paths::compute_paths;
use crate::persist::store_both;
use crate::sync::{DescriptorParser, PeerSource, SyncEngine};

/// `ArchivePath` (default `out/archive`), the root every module's
/// content-addressed/time-partitioned writes land under.
pub fn archive_root(config: &ConfigSnapshot) -> PathBuf {
    config.path("ArchivePath").unwrap_or_else(|| PathBuf::from("out/archive"))
}

/// `RecentPath` (default `out/recent`), the root every module's rolling
/// window writes land under.
pub fn recent_root(config: &ConfigSnapshot) -> PathBuf {
    config.path("RecentPath").unwrap_or_else(|| PathBuf::from("out/recent"))
}

/// `SyncPath` (default `out/sync`), where per-peer staging directories
/// and history files live.
pub fn sync_root(config: &ConfigSnapshot) -> PathBuf {
    config.path("SyncPath").unwrap_or_else(|| PathBuf::from("out/sync"))
}

/// Mirror every peer a module declared under `<marker>SyncOrigins` for
/// one descriptor `kind` (§4.F): one [`SyncEngine::sync_peer`] call per
/// peer, each against its own history file, dispatching to the shared
/// archive/recent roots every other source writes into.
///
/// Unparseable entries from a peer are skipped by the engine itself
/// (logged by the caller via the returned stats); this helper logs a
/// summary line per peer so §7's "all are logged with the module name"
/// propagation policy holds without every module re-deriving it.
pub async fn sync_all_peers(
    module_name: &str,
    marker: &str,
    kind: Kind,
    config: &ConfigSnapshot,
    now_millis: i64,
) -> Result<(), CollectorError> {
    let origins = config.url_list(&format!("{marker}SyncOrigins"))?;
    if origins.is_empty() {
        return Ok(());
    }
    let engine = SyncEngine::new().map_err(CollectorError::from)?;
    let parser = FixedKindSyncParser { kind, now_millis };
    let sync_dir = sync_root(config);

    for origin in origins {
        let peer_slug = slugify(&origin);
        let peer = PeerSource {
            name: peer_slug.clone(),
            base_url: origin.clone(),
            history_path: sync_dir.join(marker).join(kind_dir_name(kind)).join(format!("{peer_slug}.history")),
            archive_root: archive_root(config),
            recent_root: recent_root(config),
        };
        match engine.sync_peer(&peer, &parser, now_millis).await {
            Ok(stats) => tracing::info!(
                module = module_name,
                peer = %origin,
                fetched = stats.fetched,
                already_present = stats.already_present,
                missing_on_peer = stats.missing_on_peer,
                unparseable = stats.unparseable,
                "sync peer complete"
            ),
            Err(e) => tracing::warn!(module = module_name, peer = %origin, error = %e, "sync peer failed"),
        }
    }
    Ok(())
}

/// `StatsPath/bridge-descriptors/secrets` — the monthly secret store
/// backing every bridge-sanitizing module (§4.D). Shared across the
/// bridge server/extra-info/status module and the pool-assignment
/// module since both scrub fields keyed by the same monthly secret.
pub fn secrets_path(config: &ConfigSnapshot) -> PathBuf {
    config
        .path("StatsPath")
        .unwrap_or_else(|| PathBuf::from("out/stats"))
        .join("bridge-descriptors")
        .join("secrets")
}

/// `YYYY-MM` for `millis`, the secret store's month key.
pub fn month_key(millis: i64) -> String {
    chrono::DateTime::<chrono::Utc>::from_timestamp_millis(millis)
        .unwrap_or_else(|| chrono::DateTime::<chrono::Utc>::from_timestamp_millis(0).expect("epoch is valid"))
        .format("%Y-%m")
        .to_string()
}

fn kind_dir_name(kind: Kind) -> &'static str {
    kind.default_annotation_tokens().0
}

/// The first line in `text` starting with `prefix`, with the prefix
/// stripped and surrounding whitespace trimmed. Used to pull a single
/// header field (`published `, `valid-after `, `fingerprint `, ...) out
/// of a descriptor without parsing its full grammar.
pub fn find_field<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    text.lines().find_map(|line| line.strip_prefix(prefix)).map(str::trim)
}

/// Parse a `YYYY-MM-DD HH:MM:SS` field value (the timestamp format every
/// Tor directory document header uses) into epoch milliseconds UTC.
pub fn parse_dash_timestamp(value: &str) -> Option<i64> {
    use chrono::TimeZone;
    let parsed = chrono::NaiveDateTime::parse_from_str(value.trim(), "%Y-%m-%d %H:%M:%S").ok()?;
    Some(chrono::Utc.from_utc_datetime(&parsed).timestamp_millis())
}

/// Turn a peer base URL into a filesystem-safe slug for its history file
/// name (non-alphanumeric bytes become `_`).
fn slugify(url: &str) -> String {
    url.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Fetch every URL in `urls`, skipping peers that 404 and logging (via
/// the caller's own tracing span) nothing here — callers report
/// per-module outcomes themselves.
pub async fn fetch_all(fetcher: &Fetcher, urls: &[String]) -> Result<Vec<Vec<u8>>, CollectorError> {
    let mut bodies = Vec::with_capacity(urls.len());
    for url in urls {
        if let FetchOutcome::Body(bytes) = fetcher.get(url).await.map_err(CollectorError::from)? {
            bodies.push(bytes);
        }
    }
    Ok(bodies)
}

/// Build a [`Descriptor`] for a freshly fetched document of `kind`,
/// stamped with `now_millis` as its primary timestamp. Content-addressed
/// kinds get a SHA-256 hex digest of the raw bytes; others carry no
/// digest (the path calculator only requires one for content-addressed
/// kinds).
pub fn descriptor_from_bytes(kind: Kind, raw: Vec<u8>, now_millis: i64) -> Descriptor {
    let digest_hex = if kind.content_addressed() {
        let mut hasher = Sha256::new();
        hasher.update(&raw);
        Some(hex::encode(hasher.finalize()))
    } else {
        None
    };
    Descriptor {
        kind,
        raw,
        annotations: Vec::new(),
        primary_time_millis: Some(now_millis),
        digest_hex,
        fingerprint_hex: None,
        vote_digest_hex: None,
        virtual_host: None,
        physical_host: None,
    }
}

/// Persist every body in `bodies` as a descriptor of `kind`, returning
/// how many were newly written (vs. already present).
pub fn persist_batch(
    kind: Kind,
    bodies: Vec<Vec<u8>>,
    archive_root: &std::path::Path,
    recent_root: &std::path::Path,
    now_millis: i64,
) -> Result<usize, CollectorError> {
    let mut written = 0usize;
    for raw in bodies {
        let descriptor = descriptor_from_bytes(kind, raw, now_millis);
        let path_pair = compute_paths(&descriptor, now_millis)?;
        let (archive_outcome, _) = store_both(
            kind,
            &archive_root.join(&path_pair.archive),
            &recent_root.join(&path_pair.recent),
            &descriptor.raw,
        )?;
        if archive_outcome == crate::persist::WriteOutcome::Written {
            written += 1;
        }
    }
    Ok(written)
}

/// Default width, in hours, of the recent rolling window when
/// `RecentRetentionHours` is unset (§4.C: "recent → 72 hours").
pub const DEFAULT_RECENT_RETENTION_HOURS: i64 = 72;

/// Run the retention cleaner (component C) over a module's own
/// recent-window subtree, honoring `RecentRetentionHours` if configured.
/// Called by every module after its persistence step (§4.G control
/// flow: "... hand typed descriptors to Persistence, then call
/// Retention"). Failures are logged, not propagated — a retention sweep
/// missing one tick is not worth failing the whole module run over.
pub fn sweep_recent_retention(module_name: &str, config: &ConfigSnapshot, root: &std::path::Path, now_millis: i64) {
    let hours = config.long("RecentRetentionHours").ok().flatten().unwrap_or(DEFAULT_RECENT_RETENTION_HOURS);
    let cutoff = now_millis - hours * 3_600_000;
    match crate::retention::clean_older_than(root, cutoff) {
        Ok(deleted) if deleted > 0 => {
            tracing::info!(module = module_name, root = %root.display(), deleted, "retention sweep removed expired files")
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(module = module_name, root = %root.display(), error = %e, "retention sweep failed"),
    }
}

/// A [`DescriptorParser`] for sync mode: each file a peer lists is
/// already exactly one descriptor of a fixed `kind`, so parsing is just
/// wrapping the fetched bytes with the sync run's timestamp.
pub struct FixedKindSyncParser {
    /// The kind every file fetched through this parser is treated as.
    pub kind: Kind,
    /// Timestamp stamped on every descriptor this parser produces.
    pub now_millis: i64,
}

impl DescriptorParser for FixedKindSyncParser {
    fn parse(&self, _relative_path: &str, bytes: &[u8]) -> Result<Option<Descriptor>, DescriptorError> {
        Ok(Some(descriptor_from_bytes(self.kind, bytes.to_vec(), self.now_millis)))
    }
}
