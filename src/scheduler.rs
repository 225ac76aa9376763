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

//! The scheduler (component H, §4.H): a cooperative fixed-rate scheduler
//! over a bounded worker pool. Each module gets its own offset/period
//! alignment; ticks that land while a previous run of the same module is
//! still in flight are dropped, never queued (§5 "at most one instance of
//! a given module runnable at a time").
//!
//! The `tokio::select!` per-module loop (tick branch + shutdown branch)
//! is grounded on the teacher's `src/networking/p2p.rs::spawn_p2p` swarm
//! loop; the worker-pool cap reuses `tokio::sync::Semaphore` the way the
//! teacher never needed to (it had one task, this crate has many).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Semaphore};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ConfigSnapshot;
use crate::module::{run_module_tick, Module, ModuleContext};

/// Default size of the worker pool bounding concurrent module ticks
/// (§5: "a bounded worker pool (~10)").
pub const DEFAULT_WORKER_POOL_SIZE: usize = 10;

/// Default grace period the scheduler waits for in-flight runs before
/// hard-cancelling on shutdown (§4.H).
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10 * 60);

/// One module's periodic schedule.
pub struct ModuleSchedule {
    /// The module to run.
    pub module: Arc<dyn Module>,
    /// Offset, in minutes, into each period this module's ticks align to.
    pub offset_minutes: i64,
    /// Period, in minutes, between ticks.
    pub period_minutes: i64,
}

/// Compute the initial delay, in minutes, before a module's first tick,
/// so that `(minute % period == offset)` (§4.H).
///
/// `period <= 0` is treated as "run once, immediately" (delay 0) — the
/// scheduler never divides by a non-positive period.
pub fn initial_delay_minutes(now_minute: i64, period_minutes: i64, offset_minutes: i64) -> i64 {
    if period_minutes <= 0 {
        return 0;
    }
    let offset = offset_minutes.rem_euclid(period_minutes);
    ((period_minutes - now_minute.rem_euclid(period_minutes)) + offset).rem_euclid(period_minutes)
}

/// Owns the worker pool and cancellation token shared by every module's
/// periodic loop.
pub struct Scheduler {
    modules: Vec<ModuleSchedule>,
    config: watch::Receiver<Arc<ConfigSnapshot>>,
    config_tx: watch::Sender<Arc<ConfigSnapshot>>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    shutdown_grace: Duration,
}

impl Scheduler {
    /// Build a scheduler over `modules`, reading the current `config`
    /// snapshot at construction time. Hot-reload is wired by forwarding
    /// freshly parsed snapshots into [`Scheduler::config_sender`]; each
    /// module reads the latest value of the internal `watch` channel
    /// only at the start of its own tick, never mid-run (§9's
    /// immutable-snapshot design note).
    pub fn new(modules: Vec<ModuleSchedule>, config: Arc<ConfigSnapshot>) -> Self {
        let (config_tx, config) = watch::channel(config);
        Self {
            modules,
            config,
            config_tx,
            semaphore: Arc::new(Semaphore::new(DEFAULT_WORKER_POOL_SIZE)),
            cancel: CancellationToken::new(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    /// The sending half of the internal config `watch` channel. Clone
    /// this out and feed it reloaded snapshots (e.g. from
    /// [`crate::config::spawn_hot_reload`]'s receiver) so running
    /// modules pick up the change on their next tick.
    pub fn config_sender(&self) -> watch::Sender<Arc<ConfigSnapshot>> {
        self.config_tx.clone()
    }

    /// Override the worker pool size (tests use a small pool to observe
    /// backpressure deterministically).
    pub fn with_worker_pool_size(mut self, size: usize) -> Self {
        self.semaphore = Arc::new(Semaphore::new(size.max(1)));
        self
    }

    /// Override the shutdown grace period.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// A token that, when cancelled, signals every module loop to stop
    /// accepting new ticks. Cloned out so `main` can wire it to a signal
    /// handler.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// `RunOnce` mode (§4.H): bypass the periodic loop entirely and
    /// invoke every module exactly once, in parallel, awaiting all of
    /// them before returning.
    pub async fn run_once(&self) {
        let now_millis = Utc::now().timestamp_millis();
        let mut handles = Vec::with_capacity(self.modules.len());
        for sched in &self.modules {
            let module = sched.module.clone();
            let config = self.config.borrow().clone();
            let semaphore = self.semaphore.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let ctx = ModuleContext { config, now_millis };
                let _ = run_module_tick(module.as_ref(), &ctx).await;
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Start the periodic loop: one background task per module, each
    /// aligned to its own offset/period, until [`Scheduler::shutdown`] is
    /// called. Returns a join handle the caller can await to know when
    /// every module loop has actually stopped.
    pub fn run(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let handles: Vec<_> = self
            .modules
            .iter()
            .enumerate()
            .map(|(idx, _)| {
                let this = self.clone();
                tokio::spawn(async move { this.run_module_loop(idx).await })
            })
            .collect();

        tokio::spawn(async move {
            for h in handles {
                let _ = h.await;
            }
        })
    }

    async fn run_module_loop(&self, idx: usize) {
        let sched = &self.modules[idx];
        let now_minute = Utc::now().timestamp() / 60;
        let delay = initial_delay_minutes(now_minute, sched.period_minutes, sched.offset_minutes);

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs((delay.max(0) as u64) * 60)) => {}
            _ = self.cancel.cancelled() => return,
        }

        let period = Duration::from_secs((sched.period_minutes.max(1) as u64) * 60);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_one_tick(sched).await;
                }
                _ = self.cancel.cancelled() => break,
            }
        }
    }

    async fn run_one_tick(&self, sched: &ModuleSchedule) {
        let permit = match self.semaphore.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => return,
        };
        let ctx = ModuleContext {
            config: self.config.borrow().clone(),
            now_millis: Utc::now().timestamp_millis(),
        };
        // A panic inside a module must not tear down the scheduler (§4.G
        // item 4); `catch_unwind` requires `UnwindSafe`, which a boxed
        // trait-object future isn't, so the boundary is the `tokio::spawn`
        // task itself: a panicking task simply fails to join, and this
        // loop never awaits it directly on the scheduler's own task.
        let module = sched.module.clone();
        let result = tokio::spawn(async move { run_module_tick(module.as_ref(), &ctx).await }).await;
        match result {
            Ok(_) => {}
            Err(e) => warn!(module = sched.module.name(), error = %e, "module task panicked"),
        }
        drop(permit);
    }

    /// Signal shutdown: stop dispatching new ticks and wait up to the
    /// configured grace period for in-flight runs, then return regardless
    /// (§4.H, §5 cancellation).
    pub async fn shutdown(&self, join: tokio::task::JoinHandle<()>) {
        info!(grace_secs = self.shutdown_grace.as_secs(), "scheduler shutdown requested");
        self.cancel.cancel();
        match tokio::time::timeout(self.shutdown_grace, join).await {
            Ok(_) => info!("scheduler shut down cleanly"),
            Err(_) => warn!("scheduler shutdown grace period elapsed; hard-cancelling in-flight runs"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceType;
    use futures::future::BoxFuture;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn initial_delay_matches_scenario_5() {
        // PeriodMinutes=5, OffsetMinutes=2, current minute 13 => delay 4.
        assert_eq!(initial_delay_minutes(13, 5, 2), 4);
    }

    #[test]
    fn initial_delay_is_zero_when_already_aligned() {
        assert_eq!(initial_delay_minutes(10, 5, 0), 0);
    }

    #[test]
    fn initial_delay_handles_non_positive_period_without_panicking() {
        assert_eq!(initial_delay_minutes(10, 0, 0), 0);
    }

    struct CountingModule {
        name: &'static str,
        count: Arc<AtomicUsize>,
    }

    impl Module for CountingModule {
        fn name(&self) -> &'static str {
            self.name
        }

        fn sources(&self, _config: &ConfigSnapshot) -> Vec<SourceType> {
            vec![SourceType::Remote]
        }

        fn recent_root(&self, _config: &ConfigSnapshot) -> PathBuf {
            PathBuf::from("/tmp")
        }

        fn run_once<'a>(&'a self, _ctx: &'a ModuleContext) -> BoxFuture<'a, Result<(), crate::error::CollectorError>> {
            let count = self.count.clone();
            Box::pin(async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn run_once_invokes_every_module_exactly_once() {
        let count_a = Arc::new(AtomicUsize::new(0));
        let count_b = Arc::new(AtomicUsize::new(0));
        let modules = vec![
            ModuleSchedule {
                module: Arc::new(CountingModule { name: "a", count: count_a.clone() }),
                offset_minutes: 0,
                period_minutes: 60,
            },
            ModuleSchedule {
                module: Arc::new(CountingModule { name: "b", count: count_b.clone() }),
                offset_minutes: 0,
                period_minutes: 60,
            },
        ];
        let scheduler = Scheduler::new(modules, Arc::new(ConfigSnapshot::default()));
        scheduler.run_once().await;
        assert_eq!(count_a.load(Ordering::SeqCst), 1);
        assert_eq!(count_b.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shutdown_stops_module_loops_promptly() {
        let count = Arc::new(AtomicUsize::new(0));
        let modules = vec![ModuleSchedule {
            module: Arc::new(CountingModule { name: "a", count: count.clone() }),
            // A long period means the loop would not naturally tick again
            // for a long time; shutdown must still return quickly instead
            // of waiting out the grace period.
            offset_minutes: 0,
            period_minutes: 60,
        }];
        let scheduler = Arc::new(
            Scheduler::new(modules, Arc::new(ConfigSnapshot::default()))
                .with_shutdown_grace(Duration::from_millis(200)),
        );
        let join = scheduler.clone().run();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let start = std::time::Instant::now();
        scheduler.shutdown(join).await;
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
