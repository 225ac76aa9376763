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

//! The typed descriptor model: kind tag, raw payload, annotations,
//! timestamps and identity facets (§3 of the design).
//!
//! The wire-level parser that turns bytes into descriptor facets is an
//! external collaborator (the descriptor grammar itself is out of scope);
//! this module defines the shape that parser is expected to hand back and
//! the annotation rules the persistence writer depends on.

mod annotation;

pub use annotation::{annotation_line, default_annotation, parse_annotation_tokens, split_annotation};

use thiserror::Error;

/// Errors raised while deriving facets from a descriptor.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    /// A facet this kind requires (a timestamp) was not present.
    #[error("missing timestamp for {0:?}")]
    MissingTimestamp(Kind),
    /// A facet this kind requires (a content digest) was not present.
    #[error("missing digest for {0:?}")]
    MissingDigest(Kind),
    /// The descriptor's raw bytes could not be parsed into facets.
    #[error("parse error: {0}")]
    Parse(String),
}

/// The kind tag carried by every descriptor (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    /// Hourly relay consensus.
    RelayConsensus,
    /// Hourly microdescriptor consensus flavor.
    MicroConsensus,
    /// A directory authority's vote.
    RelayVote,
    /// A relay server descriptor.
    ServerDescriptor,
    /// A relay extra-info descriptor.
    ExtraInfo,
    /// A relay microdescriptor.
    MicroDescriptor,
    /// A directory authority key certificate.
    KeyCertificate,
    /// A bridge network status document.
    BridgeStatus,
    /// A bridge server descriptor (unsanitized or sanitized).
    BridgeServer,
    /// A bridge extra-info descriptor.
    BridgeExtraInfo,
    /// A bridge pool assignment document.
    BridgePoolAssignment,
    /// BridgeDB usage metrics.
    BridgedbMetrics,
    /// An exit-list (exit scanning) document.
    ExitList,
    /// An OnionPerf measurement result.
    OnionPerfResult,
    /// A bandwidth-authority measurement file.
    BandwidthFile,
    /// Snowflake bridge proxy statistics.
    SnowflakeStats,
    /// A web-server access log.
    WebAccessLog,
}

impl Kind {
    /// Whether this kind's recent-layout writes may append to an existing
    /// file, per invariant 2: consensuses, descriptor batches and exit
    /// lists append; content-addressed kinds are always create-new.
    pub fn recent_is_append(self) -> bool {
        matches!(
            self,
            Kind::RelayConsensus
                | Kind::MicroConsensus
                | Kind::RelayVote
                | Kind::ServerDescriptor
                | Kind::ExtraInfo
                | Kind::BridgeServer
                | Kind::BridgeExtraInfo
                | Kind::ExitList
                | Kind::OnionPerfResult
                | Kind::WebAccessLog
        )
    }

    /// Whether identity is a content digest (SHA-1/SHA-256 hex) rather than
    /// an (authority-fingerprint, published) pair.
    pub fn content_addressed(self) -> bool {
        matches!(
            self,
            Kind::ServerDescriptor
                | Kind::ExtraInfo
                | Kind::MicroDescriptor
                | Kind::BridgeServer
                | Kind::BridgeExtraInfo
        )
    }

    /// The kind-default `@type` annotation (token and version), written
    /// when a descriptor's raw bytes don't already begin with one.
    pub fn default_annotation_tokens(self) -> (&'static str, &'static str) {
        match self {
            Kind::RelayConsensus => ("network-status-consensus-3", "1.0"),
            Kind::MicroConsensus => ("network-status-microdesc-consensus-3", "1.0"),
            Kind::RelayVote => ("network-status-vote-3", "1.0"),
            Kind::ServerDescriptor => ("server-descriptor", "1.0"),
            Kind::ExtraInfo => ("extra-info", "1.0"),
            Kind::MicroDescriptor => ("microdescriptor", "1.0"),
            Kind::KeyCertificate => ("dir-key-certificate-3", "1.0"),
            Kind::BridgeStatus => ("bridge-network-status", "1.0"),
            Kind::BridgeServer => ("bridge-server-descriptor", "1.0"),
            Kind::BridgeExtraInfo => ("bridge-extra-info", "1.0"),
            Kind::BridgePoolAssignment => ("bridge-pool-assignment", "1.0"),
            Kind::BridgedbMetrics => ("bridgedb-metrics", "1.0"),
            // Historically emitted `torperf`; the implementer is required
            // to emit `tordnsel` (spec.md §9 Open Question, resolved).
            Kind::ExitList => ("tordnsel", "1.0"),
            Kind::OnionPerfResult => ("onionperf-measurements", "3.0"),
            Kind::BandwidthFile => ("bandwidth-file", "1.0"),
            Kind::SnowflakeStats => ("snowflake-stats", "1.0"),
            Kind::WebAccessLog => ("webstats", "1.0"),
        }
    }
}

/// A descriptor's facets, as handed back by the (external) wire parser.
/// Which fields are populated depends on `kind`; the path calculator and
/// sanitizer each validate only the facets their kind requires.
#[derive(Debug, Clone)]
pub struct Descriptor {
    /// The kind tag.
    pub kind: Kind,
    /// Raw bytes as they should be written to disk, *not* including any
    /// annotation line the writer may need to prepend.
    pub raw: Vec<u8>,
    /// Annotation lines already present in `raw` (empty if the parser
    /// stripped them out separately rather than leaving them inline).
    pub annotations: Vec<String>,
    /// The primary timestamp for this kind (valid-after / published /
    /// downloaded / log-date), in epoch milliseconds UTC.
    pub primary_time_millis: Option<i64>,
    /// Content digest, lowercase hex, for content-addressed kinds.
    pub digest_hex: Option<String>,
    /// Authority/relay fingerprint, uppercase hex, for status-like kinds.
    pub fingerprint_hex: Option<String>,
    /// Vote digest (uppercased SHA-1 hex), for relay votes only.
    pub vote_digest_hex: Option<String>,
    /// Virtual host, for webstats access logs.
    pub virtual_host: Option<String>,
    /// Physical host, for webstats access logs.
    pub physical_host: Option<String>,
}

impl Descriptor {
    /// Require the primary timestamp, or fail with `MissingTimestamp`.
    pub fn require_time(&self) -> Result<i64, DescriptorError> {
        self.primary_time_millis
            .ok_or(DescriptorError::MissingTimestamp(self.kind))
    }

    /// Require the content digest, or fail with `MissingDigest`.
    pub fn require_digest(&self) -> Result<&str, DescriptorError> {
        self.digest_hex
            .as_deref()
            .ok_or(DescriptorError::MissingDigest(self.kind))
    }

    /// Require the authority/relay fingerprint, or fail with `MissingDigest`
    /// (fingerprints play the role of identity for non-content-addressed
    /// status kinds, so the same error variant applies).
    pub fn require_fingerprint(&self) -> Result<&str, DescriptorError> {
        self.fingerprint_hex
            .as_deref()
            .ok_or(DescriptorError::MissingDigest(self.kind))
    }
}
