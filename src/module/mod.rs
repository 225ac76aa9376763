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

//! Module lifecycle (component G, §4.G): each descriptor family is
//! collected by one [`Module`] implementation, run periodically by the
//! scheduler (component H) or once under `RunOnce`.
//!
//! `Module::run_once` returns a boxed future rather than using `async
//! fn` in the trait, since the teacher's dependency set has no
//! `async-trait`-equivalent crate; this is the same "manually boxed
//! trait-object future" shape used wherever the teacher needs
//! object-safe async (`networking::p2p::spawn_p2p`'s returned join
//! handle plays an analogous role for a single task rather than a
//! trait).

pub mod modules;

use std::path::PathBuf;
use std::sync::Arc;

use futures::future::BoxFuture;
use sysinfo::Disks;
use tracing::{info, warn};

use crate::config::{ConfigSnapshot, SourceType};
use crate::error::CollectorError;

/// Shared, read-only context handed to every module tick.
pub struct ModuleContext {
    /// The configuration snapshot in effect for this tick. Refreshed
    /// between ticks by hot-reload, never mid-tick.
    pub config: Arc<ConfigSnapshot>,
    /// Wall-clock time this tick started, epoch milliseconds UTC.
    pub now_millis: i64,
}

/// One descriptor family's collection logic.
pub trait Module: Send + Sync {
    /// Stable identifier, used in logs and as the config-key prefix
    /// (e.g. `ExitlistsWriteTarget` for a module named `exitlists`).
    fn name(&self) -> &'static str;

    /// Which [`SourceType`]s this module was configured to pull from
    /// this tick (read from its own `<Name>Sources` config key).
    fn sources(&self, config: &ConfigSnapshot) -> Vec<SourceType>;

    /// Root directory this module writes its recent-window output
    /// under, used for the disk-space preflight and retention sweep.
    fn recent_root(&self, config: &ConfigSnapshot) -> PathBuf;

    /// Run one collection cycle.
    fn run_once<'a>(&'a self, ctx: &'a ModuleContext) -> BoxFuture<'a, Result<(), CollectorError>>;
}

/// Minimum free space (bytes) required on a module's recent-root
/// filesystem before it's allowed to run (§4.G preflight, grounded on
/// `Lowband21-ferrex/ferrex-player`'s `sysinfo` dependency).
pub const MIN_FREE_BYTES: u64 = 200 * 1024 * 1024;

/// Check that the filesystem backing `path` has at least `min_free`
/// bytes available. Returns `true` if the check cannot be performed
/// (e.g. the path doesn't exist yet) rather than blocking a first run.
pub fn has_enough_disk_space(path: &std::path::Path, min_free: u64) -> bool {
    let disks = Disks::new_with_refreshed_list();
    let mut best_match: Option<(&std::path::Path, u64)> = None;
    for disk in disks.list() {
        let mount = disk.mount_point();
        if path.starts_with(mount) {
            let is_better = best_match
                .map(|(best, _)| mount.as_os_str().len() > best.as_os_str().len())
                .unwrap_or(true);
            if is_better {
                best_match = Some((mount, disk.available_space()));
            }
        }
    }
    match best_match {
        Some((_, available)) => available >= min_free,
        None => true,
    }
}

/// Run a module's tick with the standard guardrails: disk-space
/// preflight, structured start/end logging, and Sync-dispatch detection
/// (if `SourceType::Sync` is among its configured sources, the module is
/// expected to invoke the sync engine itself from inside `run_once`;
/// this wrapper only logs which sources are active).
///
/// Low disk space (below [`MIN_FREE_BYTES`]) is logged as a warning only
/// — the module still runs (§8 DiskCritical: "no action taken").
pub async fn run_module_tick(module: &dyn Module, ctx: &ModuleContext) -> Result<(), CollectorError> {
    let recent_root = module.recent_root(&ctx.config);
    let sources = module.sources(&ctx.config);

    if !has_enough_disk_space(&recent_root, MIN_FREE_BYTES) {
        warn!(module = module.name(), path = %recent_root.display(), "low disk space");
    }

    info!(module = module.name(), sources = ?sources, "module tick starting");
    let result = module.run_once(ctx).await;
    match &result {
        Ok(()) => info!(module = module.name(), "module tick finished"),
        Err(e) => warn!(module = module.name(), error = %e, "module tick failed"),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_path_does_not_block_first_run() {
        assert!(has_enough_disk_space(std::path::Path::new("/definitely/not/a/real/mount/point/xyz"), 1));
    }
}
