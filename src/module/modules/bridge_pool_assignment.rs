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

//! `BridgePoolAssignmentModule` (§11): a thin wrapper over the
//! fingerprint-hashing half of the sanitizer (§4.D — "Router fingerprints
//! in pool assignments are replaced by the SHA-1 of the binary
//! fingerprint").
//!
//! Document shape (one per line after the header):
//! `<40-hex-char fingerprint> <pool assignment fields...>`. Every other
//! byte on the line, and every other line, is carried through verbatim
//! (§6: "byte-for-byte identical... except for the scrubbed fields").

use std::path::PathBuf;

use futures::future::BoxFuture;
use tracing::warn;

use crate::config::{ConfigSnapshot, SourceType};
use crate::descriptor::{Descriptor, Kind};
use crate::error::CollectorError;
use crate::fetch::{FetchOutcome, Fetcher};
use crate::module::{Module, ModuleContext};
use crate::paths::compute_paths;
use crate::persist::store_both;
use crate::sanitize::{scrub_fingerprint, SecretStore};

use super::common::{archive_root, month_key, recent_root, secrets_path};

/// Config-key marker prefix (`BridgePoolAssignmentSources`, ...).
pub const MARKER: &str = "BridgePoolAssignment";

/// Collects bridge pool assignment documents and scrubs router
/// fingerprints before persisting.
pub struct BridgePoolAssignmentModule;

impl Module for BridgePoolAssignmentModule {
    fn name(&self) -> &'static str {
        "bridge-pool-assignments"
    }

    fn sources(&self, config: &ConfigSnapshot) -> Vec<SourceType> {
        config.source_types(&format!("{MARKER}Sources")).unwrap_or_default()
    }

    fn recent_root(&self, config: &ConfigSnapshot) -> PathBuf {
        recent_root(config).join("bridge-pool-assignments")
    }

    fn run_once<'a>(&'a self, ctx: &'a ModuleContext) -> BoxFuture<'a, Result<(), CollectorError>> {
        Box::pin(async move { run(ctx).await })
    }
}

async fn run(ctx: &ModuleContext) -> Result<(), CollectorError> {
    let sources = BridgePoolAssignmentModule.sources(&ctx.config);
    if !sources.contains(&SourceType::Remote) && !sources.contains(&SourceType::Local) {
        return Ok(());
    }
    let Some(url) = ctx.config.url("BridgePoolAssignmentUrl")? else {
        warn!(module = "bridge-pool-assignments", "no BridgePoolAssignmentUrl configured");
        return Ok(());
    };

    let fetcher = Fetcher::new().map_err(CollectorError::from)?;
    let body = match fetcher.get(&url).await.map_err(CollectorError::from)? {
        FetchOutcome::Body(b) => b,
        FetchOutcome::NotFound => return Ok(()),
    };
    let text = String::from_utf8_lossy(&body);

    let published_millis = parse_header_timestamp(&text).unwrap_or(ctx.now_millis);
    let month = month_key(published_millis);

    let mut store = SecretStore::open(&secrets_path(&ctx.config)).map_err(crate::sanitize::SanitizeError::from)?;
    if store.corrupt {
        warn!(module = "bridge-pool-assignments", "secrets file corrupt; persisting document unsanitized");
    }

    let within_retention = true;
    let sanitized = if store.corrupt {
        text.to_string()
    } else {
        let secret = store.get_or_create(&month, within_retention).map_err(crate::sanitize::SanitizeError::from)?.to_vec();
        scrub_document(&text, &secret)
    };

    let descriptor = Descriptor {
        kind: Kind::BridgePoolAssignment,
        raw: sanitized.into_bytes(),
        annotations: Vec::new(),
        primary_time_millis: Some(published_millis),
        digest_hex: None,
        fingerprint_hex: None,
        vote_digest_hex: None,
        virtual_host: None,
        physical_host: None,
    };
    let path_pair = compute_paths(&descriptor, ctx.now_millis)?;
    let archive_path = archive_root(&ctx.config).join(&path_pair.archive);
    let recent_path = recent_root(&ctx.config).join(&path_pair.recent);
    store_both(Kind::BridgePoolAssignment, &archive_path, &recent_path, &descriptor.raw)?;
    super::common::sweep_recent_retention(
        "bridge-pool-assignments",
        &ctx.config,
        &recent_root(&ctx.config).join("bridge-pool-assignments"),
        ctx.now_millis,
    );
    Ok(())
}

fn parse_header_timestamp(text: &str) -> Option<i64> {
    let first_line = text.lines().next()?;
    let rest = first_line.strip_prefix("bridge-pool-assignment ")?;
    use chrono::TimeZone;
    let parsed = chrono::NaiveDateTime::parse_from_str(rest.trim(), "%Y-%m-%d %H:%M:%S").ok()?;
    Some(chrono::Utc.from_utc_datetime(&parsed).timestamp_millis())
}

fn scrub_document(text: &str, secret: &[u8]) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        if let Some(scrubbed) = scrub_fingerprint_line(line, secret) {
            out.push_str(&scrubbed);
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }
    out
}

fn scrub_fingerprint_line(line: &str, secret: &[u8]) -> Option<String> {
    let mut parts = line.splitn(2, ' ');
    let token = parts.next()?;
    if token.len() != 40 || !token.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let fp_bytes = hex::decode(token).ok()?;
    if fp_bytes.len() != 20 {
        return None;
    }
    let scrubbed = scrub_fingerprint(&fp_bytes, secret).ok()?;
    let rest = parts.next().unwrap_or("");
    if rest.is_empty() {
        Some(hex::encode_upper(scrubbed))
    } else {
        Some(format!("{} {rest}", hex::encode_upper(scrubbed)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_timestamp_parses_published_line() {
        let doc = "bridge-pool-assignment 2011-03-07 12:24:43\nAABBCCDDEEFF00112233445566778899AABBCCDD unallocated\n";
        let millis = parse_header_timestamp(doc).unwrap();
        assert_eq!(month_key(millis), "2011-03");
    }

    #[test]
    fn scrub_document_replaces_fingerprint_but_not_pool_assignment_fields() {
        let secret = vec![1u8; crate::sanitize::CURRENT_SECRET_LEN];
        let doc = "bridge-pool-assignment 2011-03-07 12:24:43\nAABBCCDDEEFF00112233445566778899AABBCCDD https ok\n";
        let scrubbed = scrub_document(doc, &secret);
        assert!(scrubbed.contains("https ok"));
        assert!(!scrubbed.contains("AABBCCDDEEFF00112233445566778899AABBCCDD"));
    }

    #[test]
    fn scrub_document_is_deterministic() {
        let secret = vec![2u8; crate::sanitize::CURRENT_SECRET_LEN];
        let doc = "bridge-pool-assignment 2011-03-07 12:24:43\nAABBCCDDEEFF00112233445566778899AABBCCDD https ok\n";
        assert_eq!(scrub_document(doc, &secret), scrub_document(doc, &secret));
    }
}
