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

//! CollecTor entrypoint (§6): a single optional positional argument
//! naming a configuration file. Absent, write a default template to
//! `./collector.properties` and exit; present, load it, wire every
//! enabled module into the scheduler, and either run once (`RunOnce`)
//! or enter the periodic loop until shutdown.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use collector::config::{spawn_hot_reload, ConfigSnapshot};
use collector::module::modules::{
    BridgeDescriptorsModule, BridgePoolAssignmentModule, ExitListModule, IndexerModule, RelayDescriptorsModule,
    WebstatsModule,
};
use collector::module::Module;
use collector::scheduler::{ModuleSchedule, Scheduler};

/// CollecTor: periodic descriptor collection, sanitization and archival.
#[derive(Parser, Debug)]
#[command(name = "collector", version, about)]
struct Cli {
    /// Path to a `.properties` configuration file. If omitted, a default
    /// template is written to `./collector.properties` and the process
    /// exits.
    config_path: Option<PathBuf>,

    /// Run every enabled module exactly once and exit, instead of
    /// entering the periodic scheduler loop. Overrides (does not
    /// require) the `RunOnce` config key.
    #[arg(long)]
    run_once: bool,
}

const DEFAULT_CONFIG_PATH: &str = "collector.properties";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).with_level(true).compact().init();

    let cli = Cli::parse();

    let config_path = match cli.config_path {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => {
            write_default_template(Path::new(DEFAULT_CONFIG_PATH))
                .with_context(|| format!("writing default configuration template to {DEFAULT_CONFIG_PATH}"))?;
            println!("Wrote default configuration to {DEFAULT_CONFIG_PATH}. Edit it, then run again with that path.");
            return Ok(());
        }
    };

    let (initial_config, mut reload_rx, _watcher) = spawn_hot_reload(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path.display()))?;

    let run_once_flag =
        cli.run_once || initial_config.bool("RunOnce").unwrap_or(None).unwrap_or(false);
    let shutdown_grace_minutes = initial_config.long("ShutdownGraceWaitMinutes").unwrap_or(None).unwrap_or(10);

    let modules: Vec<Arc<dyn Module>> = vec![
        Arc::new(RelayDescriptorsModule),
        Arc::new(BridgeDescriptorsModule),
        Arc::new(BridgePoolAssignmentModule),
        Arc::new(ExitListModule),
        Arc::new(WebstatsModule),
        Arc::new(IndexerModule),
    ];

    let schedules: Vec<ModuleSchedule> = modules
        .into_iter()
        .filter_map(|module| build_schedule(module, &initial_config))
        .collect();

    if schedules.is_empty() {
        warn!("no modules are activated; nothing to do");
    }

    let scheduler = Arc::new(
        Scheduler::new(schedules, initial_config)
            .with_shutdown_grace(Duration::from_secs((shutdown_grace_minutes.max(0) as u64) * 60)),
    );

    // Forward every reloaded snapshot into the running scheduler; each
    // module picks it up only at the start of its own next tick (§9).
    let config_tx = scheduler.config_sender();
    tokio::spawn(async move {
        while reload_rx.changed().await.is_ok() {
            let fresh = reload_rx.borrow().clone();
            let _ = config_tx.send(fresh);
        }
    });

    if run_once_flag {
        info!("RunOnce mode: invoking every enabled module exactly once");
        scheduler.run_once().await;
        info!("RunOnce complete");
        return Ok(());
    }

    info!("starting scheduler");
    let join = scheduler.clone().run();

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => warn!(error = %e, "failed to listen for shutdown signal; shutting down anyway"),
    }

    scheduler.shutdown(join).await;
    info!("collector exiting");
    Ok(())
}

/// Build one module's [`ModuleSchedule`] from its `<Name>Activated` /
/// `<Name>OffsetMinutes` / `<Name>PeriodMinutes` config keys, where
/// `<Name>` is the module's own [`Module::name`] capitalized. A module
/// with `Activated` unset or `false` is skipped entirely.
fn build_schedule(module: Arc<dyn Module>, config: &ConfigSnapshot) -> Option<ModuleSchedule> {
    let key_prefix = config_key_prefix(module.name());
    let activated = config.bool(&format!("{key_prefix}Activated")).unwrap_or(None).unwrap_or(false);
    if !activated {
        return None;
    }
    let offset_minutes = config.long(&format!("{key_prefix}OffsetMinutes")).unwrap_or(None).unwrap_or(0);
    let period_minutes = config.long(&format!("{key_prefix}PeriodMinutes")).unwrap_or(None).unwrap_or(60);
    Some(ModuleSchedule { module, offset_minutes, period_minutes })
}

/// `relaydescs` -> `Relaydescs`, matching the capitalized-name config key
/// convention every `<Module>Activated`-style key in §6 uses.
fn config_key_prefix(module_name: &str) -> String {
    let mut chars = module_name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn write_default_template(path: &Path) -> std::io::Result<()> {
    std::fs::write(path, DEFAULT_TEMPLATE)
}

const DEFAULT_TEMPLATE: &str = r#"# CollecTor configuration template.
# Uncomment and edit the keys below, then re-run `collector <this file>`.

# InstanceBaseUrl = https://collector.example.org

# OutPath = out
# ArchivePath = out/archive
# RecentPath = out/recent
# IndexPath = out/index
# StatsPath = out/stats
# SyncPath = out/sync
# HtdocsPath = out/htdocs
# IndexedPath = out

# RunOnce = false
# ShutdownGraceWaitMinutes = 10

# RelaydescsActivated = false
# RelaydescsOffsetMinutes = 0
# RelaydescsPeriodMinutes = 60
# RelayDescsSources = Remote
# ConsensusUrl = https://example.org/consensus
# MicroConsensusUrl = https://example.org/micro-consensus
# VoteUrls = https://auth1.example.org/vote, https://auth2.example.org/vote
# KeyCertificateUrls = https://auth1.example.org/keycert
# ServerDescriptorsUrl = https://example.org/server-descriptors
# ExtraInfoUrl = https://example.org/extra-info
# MicroDescriptorsUrl = https://example.org/micro

# BridgedescsActivated = false
# BridgedescsOffsetMinutes = 5
# BridgedescsPeriodMinutes = 60
# BridgeSources = Remote
# BridgeServerDescriptorsUrl = https://bridge-authority.example.org/server-descriptors
# BridgeExtraInfoUrl = https://bridge-authority.example.org/extra-info
# ReplaceIpAddressesWithHashes = true
# BridgeDescriptorMappingsLimit = inf

# Bridge-pool-assignmentsActivated = false
# BridgePoolAssignmentSources = Local
# BridgePoolAssignmentUrl = file:///var/lib/bridgedb/assignments.log

# ExitlistsActivated = false
# ExitlistsOffsetMinutes = 2
# ExitlistsPeriodMinutes = 5
# ExitlistsSources = Remote
# ExitlistUrl = https://exit-scanner.example.org/exit-addresses

# WebstatsActivated = false
# WebstatsSources = Local
# WebstatsLogsPath = /var/log/webstats-incoming
# WebstatsLimits = true

# IndexActivated = true
# IndexOffsetMinutes = 0
# IndexPeriodMinutes = 15
# IndexRootPath = out
# IndexEmitGzip = true
# IndexEmitXz = true
# IndexEmitBzip2 = false
# PublishRecentPath = out/htdocs/recent

# RecentRetentionHours = 72
"#;
