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

//! Crate-wide error taxonomy.
//!
//! Per-component modules define their own narrow `thiserror` enums;
//! this is the rollup those enums convert into via `#[from]` so that
//! module runners and the scheduler can log/report uniformly without
//! matching on every subsystem's error type.

use thiserror::Error;

use crate::config::ConfigError;
use crate::descriptor::DescriptorError;
use crate::fetch::FetchError;
use crate::index::IndexError;
use crate::persist::PersistError;
use crate::sanitize::SanitizeError;
use crate::sync::SyncError;

/// Top-level error kind, matching the taxonomy in the design's
/// error-handling section. `ConfigError` is the only variant that is
/// ever fatal to the process; everything else is caught and logged by
/// the module runner or the scheduler.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// Unrecoverable at startup.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    /// Filesystem or transport I/O failure; retried on the next tick.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// HTTP fetch failure (timeout, connection, non-200 treated separately).
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),
    /// Persistence writer failure.
    #[error("persist error: {0}")]
    Persist(#[from] PersistError),
    /// Descriptor parsing/facet failure; the offending descriptor is skipped.
    #[error("descriptor error: {0}")]
    Descriptor(#[from] DescriptorError),
    /// Bridge sanitizer failure.
    #[error("sanitize error: {0}")]
    Sanitize(#[from] SanitizeError),
    /// Sync engine failure.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),
    /// Indexer failure.
    #[error("index error: {0}")]
    Index(#[from] IndexError),
    /// Shutdown was requested mid-operation; not a failure.
    #[error("shutdown requested")]
    ShutdownRequested,
}
