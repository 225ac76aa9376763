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

//! `ExitListModule`: the simplest concrete module (§11), used in E2E
//! scenarios 1 and 2. Downloads the exit-scanner's exit-addresses
//! document from `ExitlistUrl` and persists it as `Kind::ExitList`,
//! stamped with the moment it was downloaded (§4.A exit-list contract:
//! both archive and recent paths are keyed on "downloaded", not a
//! timestamp embedded in the document).

use std::path::PathBuf;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{info, warn};

use crate::config::{ConfigSnapshot, SourceType};
use crate::descriptor::Kind;
use crate::error::CollectorError;
use crate::fetch::{FetchOutcome, Fetcher};
use crate::module::{Module, ModuleContext};
use crate::paths::compute_paths;
use crate::persist::{store_both, WriteOutcome};

use super::common::descriptor_from_bytes;
use super::common::{archive_root, recent_root, sync_all_peers};

/// The `Sync` marker prefix for this module's config keys
/// (`ExitlistsSources`, `ExitlistsSyncOrigins`).
pub const MARKER: &str = "Exitlists";

/// Collects the Tor exit-scanner's exit-address list (component G over
/// `Kind::ExitList`).
pub struct ExitListModule;

impl Module for ExitListModule {
    fn name(&self) -> &'static str {
        "exitlists"
    }

    fn sources(&self, config: &ConfigSnapshot) -> Vec<SourceType> {
        config.source_types(&format!("{MARKER}Sources")).unwrap_or_default()
    }

    fn recent_root(&self, config: &ConfigSnapshot) -> PathBuf {
        recent_root(config).join("exit-lists")
    }

    fn run_once<'a>(&'a self, ctx: &'a ModuleContext) -> BoxFuture<'a, Result<(), CollectorError>> {
        Box::pin(async move { run(ctx).await })
    }
}

async fn run(ctx: &ModuleContext) -> Result<(), CollectorError> {
    let sources = Arc::new(ExitListModule).sources(&ctx.config);

    if sources.contains(&SourceType::Remote) {
        if let Some(url) = ctx.config.url("ExitlistUrl")? {
            fetch_and_persist(&url, &ctx.config, ctx.now_millis).await?;
        } else {
            warn!(module = "exitlists", "Remote source configured but ExitlistUrl is unset");
        }
    }

    if sources.contains(&SourceType::Sync) {
        sync_all_peers("exitlists", MARKER, Kind::ExitList, &ctx.config, ctx.now_millis).await?;
    }

    super::common::sweep_recent_retention("exitlists", &ctx.config, &recent_root(&ctx.config).join("exit-lists"), ctx.now_millis);
    Ok(())
}

async fn fetch_and_persist(url: &str, config: &ConfigSnapshot, now_millis: i64) -> Result<(), CollectorError> {
    let fetcher = Fetcher::new().map_err(CollectorError::from)?;
    let body = match fetcher.get(url).await.map_err(CollectorError::from)? {
        FetchOutcome::Body(b) => b,
        FetchOutcome::NotFound => {
            warn!(module = "exitlists", %url, "exit list not found at source");
            return Ok(());
        }
    };

    let descriptor = descriptor_from_bytes(Kind::ExitList, body, now_millis);
    let path_pair = compute_paths(&descriptor, now_millis)?;
    let archive_path = archive_root(config).join(&path_pair.archive);
    let recent_path = recent_root(config).join(&path_pair.recent);

    let (archive_outcome, _) = store_both(Kind::ExitList, &archive_path, &recent_path, &descriptor.raw)?;
    match archive_outcome {
        WriteOutcome::Written => info!(module = "exitlists", path = %archive_path.display(), "wrote new exit list"),
        WriteOutcome::AlreadyPresent => info!(module = "exitlists", path = %archive_path.display(), "exit list already present"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(dir: &std::path::Path, url: &str) -> ConfigSnapshot {
        ConfigSnapshot::parse(&format!(
            "ExitlistsSources = Remote\nExitlistUrl = {url}\nArchivePath = {}\nRecentPath = {}\n",
            dir.join("archive").display(),
            dir.join("recent").display(),
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn cold_start_writes_archive_and_recent_with_tordnsel_annotation() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/exit-addresses"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ExitNode ABCD\nPublished 2016-09-20 13:00:00\n".to_vec()))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let url = format!("{}/exit-addresses", server.uri());
        let config = config_for(dir.path(), &url);

        let ctx = ModuleContext {
            config: Arc::new(config),
            now_millis: 1_474_376_520_000, // 2016-09-20 13:02:00 UTC
        };
        run(&ctx).await.unwrap();

        let archive = dir.path().join("archive/exit-lists/2016/09/20/2016-09-20-13-02-00");
        let recent = dir.path().join("recent/exit-lists/2016-09-20-13-02-00");
        assert!(archive.exists());
        assert!(recent.exists());
        let content = std::fs::read_to_string(&archive).unwrap();
        assert!(content.starts_with("@type tordnsel 1.0\n"));
    }

    #[tokio::test]
    async fn rerun_is_a_noop_second_write() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/exit-addresses"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ExitNode ABCD\n".to_vec()))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let url = format!("{}/exit-addresses", server.uri());
        let config = Arc::new(config_for(dir.path(), &url));

        let ctx = ModuleContext { config: config.clone(), now_millis: 1_474_376_520_000 };
        run(&ctx).await.unwrap();
        let archive = dir.path().join("archive/exit-lists/2016/09/20/2016-09-20-13-02-00");
        let first_len = std::fs::metadata(&archive).unwrap().len();

        run(&ctx).await.unwrap();
        let second_len = std::fs::metadata(&archive).unwrap().len();
        assert_eq!(first_len, second_len);
    }
}
