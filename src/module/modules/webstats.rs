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

//! `WebstatsModule` (§11): aggregates per-mirror web-server access logs
//! (`Kind::WebAccessLog`) into one xz-compressed log per virtual
//! host/physical host/calendar day.
//!
//! Several mirrors may each submit their own partial log for the same
//! (virtual host, physical host, day); this module reads every file
//! under `WebstatsLogsPath` with a bounded worker pool (fan-out), then a
//! single reducer groups the per-file line lists by that key and merges
//! them (fan-in) before compressing and persisting the combined log
//! (§9 design note 5).
//!
//! `WebstatsLimits` controls which lines from a day-named log file are
//! actually kept, relative to the date already encoded in its own file
//! name (not the moment this module runs): `true` keeps only lines
//! strictly earlier than the log's nominal day (the conservative
//! default — a log whose lines are all from its own day is dropped
//! whole); `false` widens the window to one day before and one day
//! after the log's nominal day.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Datelike, Duration, NaiveDate, TimeZone, Utc};
use futures::future::BoxFuture;
use tokio::sync::Semaphore;
use tracing::warn;

use crate::config::{ConfigSnapshot, SourceType};
use crate::descriptor::{Descriptor, Kind};
use crate::error::CollectorError;
use crate::module::{Module, ModuleContext};
use crate::paths::compute_paths;
use crate::persist::store_both;

use super::common::{archive_root, recent_root};

const MAX_CONCURRENT_READS: usize = 8;

/// Collects and aggregates per-mirror web-server access logs.
pub struct WebstatsModule;

impl Module for WebstatsModule {
    fn name(&self) -> &'static str {
        "webstats"
    }

    fn sources(&self, config: &ConfigSnapshot) -> Vec<SourceType> {
        config.source_types("WebstatsSources").unwrap_or_default()
    }

    fn recent_root(&self, config: &ConfigSnapshot) -> PathBuf {
        recent_root(config).join("webstats")
    }

    fn run_once<'a>(&'a self, ctx: &'a ModuleContext) -> BoxFuture<'a, Result<(), CollectorError>> {
        Box::pin(async move { run(ctx).await })
    }
}

/// One mirror's raw log file, identified by the `{vh}_{ph}_access.log_{YYYYMMDD}`
/// naming convention incoming webserver logs already use.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct LogKey {
    virtual_host: String,
    physical_host: String,
    day: NaiveDate,
}

async fn run(ctx: &ModuleContext) -> Result<(), CollectorError> {
    if !WebstatsModule.sources(&ctx.config).contains(&SourceType::Local) {
        return Ok(());
    }
    let Some(logs_dir) = ctx.config.path("WebstatsLogsPath") else {
        return Ok(());
    };
    if !logs_dir.is_dir() {
        return Ok(());
    }
    let limits = ctx.config.bool("WebstatsLimits")?.unwrap_or(true);

    let files = collect_files(&logs_dir);
    let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_READS));
    let mut handles = Vec::with_capacity(files.len());
    for file in files {
        let semaphore = semaphore.clone();
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire().await;
            read_and_filter(&file, limits)
        }));
    }

    let mut merged: BTreeMap<LogKey, Vec<String>> = BTreeMap::new();
    for handle in handles {
        match handle.await {
            Ok(Some((key, lines))) => merged.entry(key).or_default().extend(lines),
            Ok(None) => {}
            Err(e) => warn!(module = "webstats", error = %e, "log-reading task panicked"),
        }
    }

    for (key, mut lines) in merged {
        if lines.is_empty() {
            continue;
        }
        lines.sort();
        lines.dedup();
        persist_log(&key, &lines, &ctx.config, ctx.now_millis)?;
    }
    super::common::sweep_recent_retention("webstats", &ctx.config, &recent_root(&ctx.config).join("webstats"), ctx.now_millis);
    Ok(())
}

fn collect_files(dir: &Path) -> Vec<PathBuf> {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect()
}

/// Parse `{vh}_{ph}_access.log_{YYYYMMDD}` out of a file name.
fn parse_log_key(path: &Path) -> Option<LogKey> {
    let name = path.file_name()?.to_str()?;
    let (prefix, date_str) = name.rsplit_once("_access.log_")?;
    let (virtual_host, physical_host) = prefix.split_once('_')?;
    let day = NaiveDate::parse_from_str(date_str, "%Y%m%d").ok()?;
    Some(LogKey { virtual_host: virtual_host.to_string(), physical_host: physical_host.to_string(), day })
}

/// Apache combined-log date, the leading `[DD/Mon/YYYY:...]` field.
fn parse_line_date(line: &str) -> Option<NaiveDate> {
    let after_bracket = &line[line.find('[')? + 1..];
    let date_str = &after_bracket[..after_bracket.find(':')?];
    NaiveDate::parse_from_str(date_str, "%d/%b/%Y").ok()
}

fn accepted(line_day: NaiveDate, log_day: NaiveDate, limits: bool) -> bool {
    if limits {
        line_day < log_day
    } else {
        line_day >= log_day - Duration::days(1) && line_day <= log_day + Duration::days(1)
    }
}

fn read_and_filter(path: &Path, limits: bool) -> Option<(LogKey, Vec<String>)> {
    let key = parse_log_key(path)?;
    let text = std::fs::read_to_string(path).ok()?;
    let lines: Vec<String> = text
        .lines()
        .filter(|line| parse_line_date(line).is_some_and(|d| accepted(d, key.day, limits)))
        .map(str::to_string)
        .collect();
    Some((key, lines))
}

fn persist_log(key: &LogKey, lines: &[String], config: &ConfigSnapshot, now_millis: i64) -> Result<(), CollectorError> {
    let body = lines.join("\n") + "\n";
    let compressed = {
        let mut enc = xz2::write::XzEncoder::new(Vec::new(), 6);
        enc.write_all(body.as_bytes())?;
        enc.finish()?
    };

    let midnight = Utc
        .with_ymd_and_hms(key.day.year(), key.day.month(), key.day.day(), 0, 0, 0)
        .single()
        .expect("valid calendar date")
        .timestamp_millis();

    let descriptor = Descriptor {
        kind: Kind::WebAccessLog,
        raw: compressed,
        annotations: Vec::new(),
        primary_time_millis: Some(midnight),
        digest_hex: None,
        fingerprint_hex: None,
        vote_digest_hex: None,
        virtual_host: Some(key.virtual_host.clone()),
        physical_host: Some(key.physical_host.clone()),
    };
    let path_pair = compute_paths(&descriptor, now_millis)?;
    let archive_path = archive_root(config).join(&path_pair.archive);
    let recent_path = recent_root(config).join(&path_pair.recent);
    store_both(Kind::WebAccessLog, &archive_path, &recent_path, &descriptor.raw)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_log_key_from_conventional_file_name() {
        let key = parse_log_key(Path::new("collector.example.org_host1_access.log_20200305")).unwrap();
        assert_eq!(key.virtual_host, "collector.example.org");
        assert_eq!(key.physical_host, "host1");
        assert_eq!(key.day, NaiveDate::from_ymd_opt(2020, 3, 5).unwrap());
    }

    #[test]
    fn parses_apache_combined_log_date() {
        let line = r#"127.0.0.1 - - [04/Mar/2020:23:59:59 +0000] "GET / HTTP/1.1" 200 10"#;
        assert_eq!(parse_line_date(line), NaiveDate::from_ymd_opt(2020, 3, 4));
    }

    #[test]
    fn limits_true_drops_lines_from_the_logs_own_day() {
        let log_day = NaiveDate::from_ymd_opt(2020, 3, 5).unwrap();
        let earlier = NaiveDate::from_ymd_opt(2020, 3, 4).unwrap();
        assert!(accepted(earlier, log_day, true));
        assert!(!accepted(log_day, log_day, true));
    }

    #[test]
    fn limits_false_widens_by_one_day_each_side() {
        let log_day = NaiveDate::from_ymd_opt(2020, 3, 5).unwrap();
        assert!(accepted(log_day - Duration::days(1), log_day, false));
        assert!(accepted(log_day + Duration::days(1), log_day, false));
        assert!(!accepted(log_day - Duration::days(2), log_day, false));
    }

    #[test]
    fn single_day_log_is_entirely_dropped_under_limits_true() {
        let log_day = NaiveDate::from_ymd_opt(2020, 3, 5).unwrap();
        let lines = vec![(log_day, "only-today-line".to_string())];
        let kept: Vec<_> = lines.iter().filter(|(d, _)| accepted(*d, log_day, true)).collect();
        assert!(kept.is_empty());
    }
}
