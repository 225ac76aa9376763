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

//! Path calculator (component A): `compute_paths(kind, received_at, descriptor)`
//! maps a descriptor to its archive and recent relative paths (§4.A).
//!
//! The inheritance-based persistence hierarchy this replaces collapses
//! into this single free function dispatched on [`Kind`] (design note §9).

use chrono::{DateTime, Utc};

use crate::descriptor::{Descriptor, DescriptorError, Kind};

/// The pair of relative paths (archive, recent) a descriptor maps to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPair {
    /// Path relative to the archive root.
    pub archive: String,
    /// Path relative to the recent root.
    pub recent: String,
}

fn fmt_ts(millis: i64, pattern: &str) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .unwrap_or_else(|| DateTime::<Utc>::from_timestamp_millis(0).expect("epoch is valid"))
        .format(pattern)
        .to_string()
}

/// `YYYY-MM-DD-HH-mm-ss`, used in basenames.
fn dashed(millis: i64) -> String {
    fmt_ts(millis, "%Y-%m-%d-%H-%M-%S")
}

/// `YYYYMMDD-HHmmss`, used in bridge network status basenames.
fn compact(millis: i64) -> String {
    fmt_ts(millis, "%Y%m%d-%H%M%S")
}

fn year(millis: i64) -> String {
    fmt_ts(millis, "%Y")
}

fn month(millis: i64) -> String {
    fmt_ts(millis, "%m")
}

fn day(millis: i64) -> String {
    fmt_ts(millis, "%d")
}

/// First two one-hex-char shard directories derived from a content digest.
fn shard_dirs(digest_hex: &str) -> (String, String) {
    let mut chars = digest_hex.chars();
    let d0 = chars.next().unwrap_or('0').to_string();
    let d1 = chars.next().unwrap_or('0').to_string();
    (d0, d1)
}

/// Compute the archive + recent relative paths for a descriptor received
/// at `received_at_millis` (epoch milliseconds UTC).
///
/// Errors when a facet the kind requires (a timestamp or a digest) is
/// absent; the caller is expected to skip the descriptor (§4.A).
pub fn compute_paths(
    descriptor: &Descriptor,
    received_at_millis: i64,
) -> Result<PathPair, DescriptorError> {
    match descriptor.kind {
        Kind::RelayConsensus => {
            let t = descriptor.require_time()?;
            let valid_after = dashed(t);
            Ok(PathPair {
                archive: format!(
                    "relay-descriptors/consensus/{}/{}/{}/{valid_after}-consensus",
                    year(t),
                    month(t),
                    day(t)
                ),
                recent: format!("relay-descriptors/consensuses/{valid_after}-consensus"),
            })
        }
        Kind::MicroConsensus => {
            let t = descriptor.require_time()?;
            let valid_after = dashed(t);
            Ok(PathPair {
                archive: format!(
                    "relay-descriptors/microdesc/{}/{}/consensus-microdesc/{}/{valid_after}-consensus-microdesc",
                    year(t),
                    month(t),
                    day(t)
                ),
                recent: format!(
                    "relay-descriptors/microdescs/consensus-microdesc/{valid_after}-consensus-microdesc"
                ),
            })
        }
        Kind::RelayVote => {
            let t = descriptor.require_time()?;
            let auth_fp = descriptor.require_fingerprint()?.to_uppercase();
            let vote_digest = descriptor
                .vote_digest_hex
                .as_deref()
                .ok_or(DescriptorError::MissingDigest(Kind::RelayVote))?
                .to_uppercase();
            let valid_after = dashed(t);
            let basename = format!("{valid_after}-vote-{auth_fp}-{vote_digest}");
            Ok(PathPair {
                archive: format!(
                    "relay-descriptors/vote/{}/{}/{}/{basename}",
                    year(t),
                    month(t),
                    day(t)
                ),
                recent: format!("relay-descriptors/votes/{basename}"),
            })
        }
        Kind::ServerDescriptor => {
            let digest = descriptor.require_digest()?.to_lowercase();
            let t = descriptor.require_time()?;
            let (d0, d1) = shard_dirs(&digest);
            Ok(PathPair {
                archive: format!(
                    "relay-descriptors/server-descriptor/{}/{}/{d0}/{d1}/{digest}",
                    year(t),
                    month(t)
                ),
                recent: format!(
                    "relay-descriptors/server-descriptors/{}-server-descriptors",
                    dashed(received_at_millis)
                ),
            })
        }
        Kind::ExtraInfo => {
            let digest = descriptor.require_digest()?.to_lowercase();
            let t = descriptor.require_time()?;
            let (d0, d1) = shard_dirs(&digest);
            Ok(PathPair {
                archive: format!(
                    "relay-descriptors/extra-info/{}/{}/{d0}/{d1}/{digest}",
                    year(t),
                    month(t)
                ),
                recent: format!(
                    "relay-descriptors/extra-infos/{}-extra-infos",
                    dashed(received_at_millis)
                ),
            })
        }
        Kind::MicroDescriptor => {
            let digest = descriptor.require_digest()?.to_lowercase();
            let t = descriptor.require_time()?;
            let (d0, d1) = shard_dirs(&digest);
            Ok(PathPair {
                archive: format!(
                    "relay-descriptors/microdesc/{}/{}/micro/{d0}/{d1}/{digest}",
                    year(t),
                    month(t)
                ),
                recent: format!("relay-descriptors/micro/{digest}"),
            })
        }
        Kind::KeyCertificate => {
            let fp = descriptor.require_fingerprint()?.to_uppercase();
            let t = descriptor.require_time()?;
            Ok(PathPair {
                archive: format!(
                    "relay-descriptors/certs/{}/{}/{}-{fp}",
                    year(t),
                    month(t),
                    dashed(t)
                ),
                recent: format!("relay-descriptors/certs/{}-{fp}", dashed(t)),
            })
        }
        Kind::BridgeServer => {
            let digest = descriptor.require_digest()?.to_lowercase();
            let t = descriptor.require_time()?;
            let (d0, d1) = shard_dirs(&digest);
            Ok(PathPair {
                archive: format!(
                    "bridge-descriptors/server-descriptor/{}/{}/{d0}/{d1}/{digest}",
                    year(t),
                    month(t)
                ),
                recent: format!(
                    "bridge-descriptors/server-descriptors/{}-server-descriptors",
                    dashed(received_at_millis)
                ),
            })
        }
        Kind::BridgeExtraInfo => {
            let digest = descriptor.require_digest()?.to_lowercase();
            let t = descriptor.require_time()?;
            let (d0, d1) = shard_dirs(&digest);
            Ok(PathPair {
                archive: format!(
                    "bridge-descriptors/extra-info/{}/{}/{d0}/{d1}/{digest}",
                    year(t),
                    month(t)
                ),
                recent: format!(
                    "bridge-descriptors/extra-infos/{}-extra-infos",
                    dashed(received_at_millis)
                ),
            })
        }
        Kind::BridgeStatus => {
            let t = descriptor.require_time()?;
            let auth_fp = descriptor.require_fingerprint()?.to_uppercase();
            let ts = compact(t);
            Ok(PathPair {
                archive: format!(
                    "bridge-descriptors/{}/{}/statuses/{}/{ts}-{auth_fp}",
                    year(t),
                    month(t),
                    day(t)
                ),
                recent: format!("bridge-descriptors/statuses/{ts}-{auth_fp}"),
            })
        }
        Kind::BridgePoolAssignment => {
            let t = descriptor.require_time()?;
            Ok(PathPair {
                archive: format!(
                    "bridge-pool-assignments/{}/{}/{}/{}",
                    year(t),
                    month(t),
                    day(t),
                    dashed(t)
                ),
                recent: format!("bridge-pool-assignments/{}", dashed(t)),
            })
        }
        Kind::BridgedbMetrics => {
            let t = descriptor.require_time()?;
            Ok(PathPair {
                archive: format!(
                    "bridgedb-metrics/{}/{}/{}/{}",
                    year(t),
                    month(t),
                    day(t),
                    dashed(t)
                ),
                recent: format!("bridgedb-metrics/{}", dashed(t)),
            })
        }
        Kind::ExitList => {
            let t = descriptor.require_time()?;
            let downloaded = dashed(t);
            Ok(PathPair {
                archive: format!(
                    "exit-lists/{}/{}/{}/{downloaded}",
                    year(t),
                    month(t),
                    day(t)
                ),
                recent: format!("exit-lists/{downloaded}"),
            })
        }
        Kind::OnionPerfResult => {
            let t = descriptor.require_time()?;
            Ok(PathPair {
                archive: format!(
                    "onionperf/{}/{}/{}/{}-onionperf",
                    year(t),
                    month(t),
                    day(t),
                    dashed(t)
                ),
                recent: format!("onionperf/{}-onionperf", dashed(t)),
            })
        }
        Kind::BandwidthFile => {
            let t = descriptor.require_time()?;
            Ok(PathPair {
                archive: format!(
                    "bandwidth-files/{}/{}/{}/{}-bandwidth",
                    year(t),
                    month(t),
                    day(t),
                    dashed(t)
                ),
                recent: format!("bandwidth-files/{}-bandwidth", dashed(t)),
            })
        }
        Kind::SnowflakeStats => {
            let t = descriptor.require_time()?;
            Ok(PathPair {
                archive: format!(
                    "snowflake-stats/{}/{}/{}/{}",
                    year(t),
                    month(t),
                    day(t),
                    dashed(t)
                ),
                recent: format!("snowflake-stats/{}", dashed(t)),
            })
        }
        Kind::WebAccessLog => {
            let t = descriptor.require_time()?;
            let vh = descriptor
                .virtual_host
                .as_deref()
                .ok_or(DescriptorError::MissingDigest(Kind::WebAccessLog))?;
            let ph = descriptor.physical_host.as_deref().unwrap_or(vh);
            let ymd_compact = fmt_ts(t, "%Y%m%d");
            let basename = format!("{vh}_{ph}_access.log_{ymd_compact}.xz");
            Ok(PathPair {
                archive: format!(
                    "webstats/{vh}/{}/{}/{}/{basename}",
                    year(t),
                    month(t),
                    day(t)
                ),
                recent: format!("webstats/{basename}"),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn millis(y: i32, m: u32, d: u32, h: u32, mi: u32, s: u32) -> i64 {
        use chrono::TimeZone;
        Utc.with_ymd_and_hms(y, m, d, h, mi, s)
            .unwrap()
            .timestamp_millis()
    }

    fn base_descriptor(kind: Kind) -> Descriptor {
        Descriptor {
            kind,
            raw: Vec::new(),
            annotations: Vec::new(),
            primary_time_millis: None,
            digest_hex: None,
            fingerprint_hex: None,
            vote_digest_hex: None,
            virtual_host: None,
            physical_host: None,
        }
    }

    #[test]
    fn relay_consensus_paths_match_spec() {
        let mut d = base_descriptor(Kind::RelayConsensus);
        d.primary_time_millis = Some(millis(2016, 9, 20, 13, 0, 0));
        let p = compute_paths(&d, millis(2016, 9, 20, 13, 2, 0)).unwrap();
        assert_eq!(
            p.archive,
            "relay-descriptors/consensus/2016/09/20/2016-09-20-13-00-00-consensus"
        );
        assert_eq!(
            p.recent,
            "relay-descriptors/consensuses/2016-09-20-13-00-00-consensus"
        );
    }

    #[test]
    fn exit_list_cold_start_scenario() {
        let mut d = base_descriptor(Kind::ExitList);
        let t = millis(2016, 9, 20, 13, 2, 0);
        d.primary_time_millis = Some(t);
        let p = compute_paths(&d, t).unwrap();
        assert_eq!(p.archive, "exit-lists/2016/09/20/2016-09-20-13-02-00");
        assert_eq!(p.recent, "exit-lists/2016-09-20-13-02-00");
    }

    #[test]
    fn server_descriptor_is_content_addressed_and_shards_by_digest() {
        let mut d = base_descriptor(Kind::ServerDescriptor);
        d.primary_time_millis = Some(millis(2016, 9, 20, 0, 0, 0));
        d.digest_hex = Some("ab34ef".into());
        let p = compute_paths(&d, millis(2016, 9, 20, 13, 2, 0)).unwrap();
        assert_eq!(
            p.archive,
            "relay-descriptors/server-descriptor/2016/09/a/b/ab34ef"
        );
        assert_eq!(
            p.recent,
            "relay-descriptors/server-descriptors/2016-09-20-13-02-00-server-descriptors"
        );
    }

    #[test]
    fn missing_timestamp_is_an_error_not_a_panic() {
        let d = base_descriptor(Kind::ExitList);
        let err = compute_paths(&d, 0).unwrap_err();
        assert_eq!(err, DescriptorError::MissingTimestamp(Kind::ExitList));
    }

    #[test]
    fn missing_digest_on_content_addressed_kind_is_an_error() {
        let mut d = base_descriptor(Kind::ServerDescriptor);
        d.primary_time_millis = Some(millis(2016, 1, 1, 0, 0, 0));
        let err = compute_paths(&d, 0).unwrap_err();
        assert_eq!(err, DescriptorError::MissingDigest(Kind::ServerDescriptor));
    }

    #[test]
    fn webstats_path_uses_virtual_and_physical_host() {
        let mut d = base_descriptor(Kind::WebAccessLog);
        d.primary_time_millis = Some(millis(2020, 3, 5, 0, 0, 0));
        d.virtual_host = Some("collector.example.org".into());
        d.physical_host = Some("host1".into());
        let p = compute_paths(&d, 0).unwrap();
        assert_eq!(
            p.archive,
            "webstats/collector.example.org/2020/03/05/collector.example.org_host1_access.log_20200305.xz"
        );
        assert_eq!(
            p.recent,
            "webstats/collector.example.org_host1_access.log_20200305.xz"
        );
    }
}
