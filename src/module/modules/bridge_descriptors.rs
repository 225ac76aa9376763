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

//! `BridgeDescriptorsModule` (§11 scenario 3): fetches unsanitized bridge
//! server descriptors, extra-info descriptors and the bridge network
//! status, scrubs IP addresses/ports/fingerprints through the bridge
//! sanitizer (component D), and persists the sanitized bytes.
//!
//! A fetched batch is one or more individually-identified descriptors
//! concatenated together (the Tor directory protocol's own convention);
//! this module splits on the line that starts a new descriptor, scrubs
//! each independently, and persists each as its own archive/recent pair,
//! matching the same "digest-addressed, one file per descriptor"
//! handling `paths::compute_paths` already gives relay server
//! descriptors.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;

use futures::future::BoxFuture;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::config::{ConfigSnapshot, SourceType};
use crate::descriptor::Descriptor;
use crate::descriptor::Kind;
use crate::error::CollectorError;
use crate::fetch::{FetchOutcome, Fetcher};
use crate::module::{Module, ModuleContext};
use crate::paths::compute_paths;
use crate::persist::store_both;
use crate::sanitize::{scrub_ipv4, scrub_ipv6, scrub_port, SanitizeError, SecretStore};

use super::common::{archive_root, month_key, recent_root, secrets_path};

/// Config-key marker prefix (`BridgeSources`, `BridgeSyncOrigins`, ...).
pub const MARKER: &str = "Bridge";

/// Collects and sanitizes bridge descriptors.
pub struct BridgeDescriptorsModule;

impl Module for BridgeDescriptorsModule {
    fn name(&self) -> &'static str {
        "bridgedescs"
    }

    fn sources(&self, config: &ConfigSnapshot) -> Vec<SourceType> {
        config.source_types(&format!("{MARKER}Sources")).unwrap_or_default()
    }

    fn recent_root(&self, config: &ConfigSnapshot) -> PathBuf {
        recent_root(config).join("bridge-descriptors")
    }

    fn run_once<'a>(&'a self, ctx: &'a ModuleContext) -> BoxFuture<'a, Result<(), CollectorError>> {
        Box::pin(async move { run(ctx).await })
    }
}

async fn run(ctx: &ModuleContext) -> Result<(), CollectorError> {
    let sources = BridgeDescriptorsModule.sources(&ctx.config);
    if !sources.contains(&SourceType::Remote) && !sources.contains(&SourceType::Local) {
        return Ok(());
    }

    let replace_ips = ctx.config.bool("ReplaceIpAddressesWithHashes")?.unwrap_or(true);
    let limit_days = ctx.config.int_or_inf("BridgeDescriptorMappingsLimit")?.unwrap_or(i64::MAX);
    let cutoff_millis = if limit_days == i64::MAX {
        0
    } else {
        ctx.now_millis - limit_days * 24 * 3_600_000
    };

    let mut store = SecretStore::open(&secrets_path(&ctx.config)).map_err(SanitizeError::from)?;
    if store.corrupt {
        warn!(module = "bridgedescs", "secrets file corrupt; scrubbing disabled for this run");
    }

    let fetcher = Fetcher::new().map_err(CollectorError::from)?;

    if let Some(url) = ctx.config.url("BridgeServerDescriptorsUrl")? {
        process_batch(&fetcher, &url, Kind::BridgeServer, "router ", &mut store, replace_ips, cutoff_millis, ctx).await?;
    }
    if let Some(url) = ctx.config.url("BridgeExtraInfoUrl")? {
        process_batch(&fetcher, &url, Kind::BridgeExtraInfo, "extra-info ", &mut store, replace_ips, cutoff_millis, ctx).await?;
    }

    super::common::sweep_recent_retention("bridgedescs", &ctx.config, &recent_root(&ctx.config).join("bridge-descriptors"), ctx.now_millis);
    Ok(())
}

async fn process_batch(
    fetcher: &Fetcher,
    url: &str,
    kind: Kind,
    split_prefix: &str,
    store: &mut SecretStore,
    replace_ips: bool,
    cutoff_millis: i64,
    ctx: &ModuleContext,
) -> Result<(), CollectorError> {
    let body = match fetcher.get(url).await.map_err(CollectorError::from)? {
        FetchOutcome::Body(b) => b,
        FetchOutcome::NotFound => return Ok(()),
    };
    let text = String::from_utf8_lossy(&body);

    for chunk in split_descriptors(&text, split_prefix) {
        let Some(fingerprint) = extract_fingerprint(chunk) else {
            warn!(module = "bridgedescs", "descriptor missing fingerprint line; skipping");
            continue;
        };
        let published_millis = extract_published(chunk).unwrap_or(ctx.now_millis);
        let month = month_key(published_millis);

        if published_millis < cutoff_millis {
            warn!(module = "bridgedescs", %month, "descriptor published before the mapping retention horizon; sanitizing best-effort");
        }
        let within_retention = cutoff_millis == 0 || published_millis >= cutoff_millis;

        let sanitized_text = if store.corrupt {
            chunk.to_string()
        } else {
            let secret = store
                .get_or_create(&month, within_retention)
                .map_err(SanitizeError::from)?
                .to_vec();
            sanitize_chunk(chunk, &fingerprint, &secret, replace_ips).map_err(CollectorError::from)?
        };

        let raw = sanitized_text.into_bytes();
        let digest = {
            let mut hasher = Sha256::new();
            hasher.update(&raw);
            hex::encode(hasher.finalize())
        };

        let descriptor = Descriptor {
            kind,
            raw,
            annotations: Vec::new(),
            primary_time_millis: Some(published_millis),
            digest_hex: Some(digest),
            fingerprint_hex: None,
            vote_digest_hex: None,
            virtual_host: None,
            physical_host: None,
        };
        let path_pair = compute_paths(&descriptor, ctx.now_millis)?;
        let archive_path = archive_root(&ctx.config).join(&path_pair.archive);
        let recent_path = recent_root(&ctx.config).join(&path_pair.recent);
        store_both(kind, &archive_path, &recent_path, &descriptor.raw)?;
    }
    Ok(())
}

/// Split a concatenated batch into individual descriptors: each new
/// descriptor starts at a line beginning with `split_prefix`.
fn split_descriptors<'a>(text: &'a str, split_prefix: &str) -> Vec<&'a str> {
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

fn extract_fingerprint(chunk: &str) -> Option<[u8; 20]> {
    for line in chunk.lines() {
        if let Some(rest) = line.strip_prefix("fingerprint ") {
            let hex_str: String = rest.chars().filter(|c| !c.is_whitespace()).collect();
            if hex_str.len() != 40 {
                continue;
            }
            let bytes = hex::decode(&hex_str).ok()?;
            let mut out = [0u8; 20];
            out.copy_from_slice(&bytes);
            return Some(out);
        }
    }
    None
}

fn extract_published(chunk: &str) -> Option<i64> {
    for line in chunk.lines() {
        if let Some(rest) = line.strip_prefix("published ") {
            use chrono::TimeZone;
            let parsed = chrono::NaiveDateTime::parse_from_str(rest.trim(), "%Y-%m-%d %H:%M:%S").ok()?;
            return Some(chrono::Utc.from_utc_datetime(&parsed).timestamp_millis());
        }
    }
    None
}

fn sanitize_chunk(chunk: &str, fingerprint: &[u8; 20], secret: &[u8], replace_ips: bool) -> Result<String, SanitizeError> {
    let mut out = String::with_capacity(chunk.len());
    for line in chunk.lines() {
        let rewritten = if let Some(rest) = line.strip_prefix("router ") {
            Some(format!("router {}", scrub_router_fields(rest, fingerprint, secret, replace_ips)?))
        } else if let Some(rest) = line.strip_prefix("or-address ") {
            scrub_or_address(rest, fingerprint, secret, replace_ips)?.map(|s| format!("or-address {s}"))
        } else {
            None
        };
        out.push_str(&rewritten.unwrap_or_else(|| line.to_string()));
        out.push('\n');
    }
    Ok(out)
}

fn scrub_router_fields(rest: &str, fingerprint: &[u8; 20], secret: &[u8], replace_ips: bool) -> Result<String, SanitizeError> {
    let mut tokens: Vec<String> = rest.split(' ').map(str::to_string).collect();
    // `router <nickname> <IP> <ORPort> <SOCKSPort> <DirPort>`
    if tokens.len() < 5 {
        return Ok(rest.to_string());
    }
    if let Ok(ip) = tokens[1].parse::<Ipv4Addr>() {
        let scrubbed_ip = if replace_ips {
            scrub_ipv4(ip, fingerprint, secret)?
        } else {
            Ipv4Addr::new(127, 0, 0, 1)
        };
        tokens[1] = scrubbed_ip.to_string();
    }
    for token in tokens.iter_mut().take(5).skip(2) {
        if let Ok(port) = token.parse::<u16>() {
            let scrubbed_port = scrub_port(port, fingerprint, secret)?;
            *token = scrubbed_port.to_string();
        }
    }
    Ok(tokens.join(" "))
}

fn scrub_or_address(rest: &str, fingerprint: &[u8; 20], secret: &[u8], replace_ips: bool) -> Result<Option<String>, SanitizeError> {
    let (addr_part, port_part) = match rest.rsplit_once(':') {
        Some(parts) => parts,
        None => return Ok(None),
    };
    let port: u16 = match port_part.trim().parse() {
        Ok(p) => p,
        Err(_) => return Ok(None),
    };
    let scrubbed_port = scrub_port(port, fingerprint, secret)?;

    if let Some(v6_text) = addr_part.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
        let ip: Ipv6Addr = match crate::sanitize::parse_strict_ipv6(v6_text) {
            Some(ip) => ip,
            None => return Ok(None),
        };
        let scrubbed_ip = if replace_ips {
            scrub_ipv6(ip, fingerprint, secret)?
        } else {
            "::1".parse().expect("valid literal")
        };
        return Ok(Some(format!("[{scrubbed_ip}]:{scrubbed_port}")));
    }

    let ip: Ipv4Addr = match addr_part.parse() {
        Ok(ip) => ip,
        Err(_) => return Ok(None),
    };
    let scrubbed_ip = if replace_ips {
        scrub_ipv4(ip, fingerprint, secret)?
    } else {
        Ipv4Addr::new(127, 0, 0, 1)
    };
    Ok(Some(format!("{scrubbed_ip}:{scrubbed_port}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "router Unnamed 198.51.100.23 9001 0 0\nor-address [2001:db8::1]:9001\npublished 2020-06-15 12:00:00\nfingerprint AB12 CD34 EF56 0000 1111 2222 3333 4444 5555 6666\nbandwidth 1 2 3\n";

    #[test]
    fn split_descriptors_isolates_one_chunk() {
        let batch = format!("{SAMPLE}{SAMPLE}");
        let chunks = split_descriptors(&batch, "router ");
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].starts_with("router "));
    }

    #[test]
    fn extracts_fingerprint_and_published() {
        let fp = extract_fingerprint(SAMPLE).unwrap();
        assert_eq!(fp.len(), 20);
        let published = extract_published(SAMPLE).unwrap();
        assert_eq!(month_key(published), "2020-06");
    }

    #[test]
    fn sanitize_is_deterministic_for_fixed_secret() {
        let fp = extract_fingerprint(SAMPLE).unwrap();
        let secret = vec![9u8; crate::sanitize::CURRENT_SECRET_LEN];
        let a = sanitize_chunk(SAMPLE, &fp, &secret, true).unwrap();
        let b = sanitize_chunk(SAMPLE, &fp, &secret, true).unwrap();
        assert_eq!(a, b);
        assert!(!a.contains("198.51.100.23"));
        assert!(!a.contains("2001:db8::1"));
    }

    #[test]
    fn unreplaced_ip_mode_uses_loopback() {
        let fp = extract_fingerprint(SAMPLE).unwrap();
        let secret = vec![9u8; crate::sanitize::CURRENT_SECRET_LEN];
        let out = sanitize_chunk(SAMPLE, &fp, &secret, false).unwrap();
        assert!(out.contains("127.0.0.1"));
    }

    #[test]
    fn non_sensitive_lines_are_untouched() {
        let fp = extract_fingerprint(SAMPLE).unwrap();
        let secret = vec![9u8; crate::sanitize::CURRENT_SECRET_LEN];
        let out = sanitize_chunk(SAMPLE, &fp, &secret, true).unwrap();
        assert!(out.contains("bandwidth 1 2 3"));
        assert!(out.contains("published 2020-06-15 12:00:00"));
    }
}
