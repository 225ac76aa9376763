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
#![warn(missing_docs)]

//! Collector — periodic descriptor collection, sanitization and archival.
//!
//! This crate provides:
//! - A typed descriptor model with kind-specific timestamp/identity facets
//! - A path calculator mapping descriptors to archive + recent locations
//! - An atomic, create-new/append-aware persistence writer
//! - A retention cleaner for the recent window and archive staging area
//! - A deterministic, monthly-keyed bridge descriptor sanitizer
//! - A bounded HTTP fetcher for authority/peer downloads
//! - A sync engine mirroring descriptors from peer instances
//! - A module runner and an aligned-offset periodic scheduler
//! - An incremental filesystem indexer emitting `index.json` (+ gz/xz/bz2)

/// Configuration port: typed key/value accessors and hot-reload.
pub mod config;
/// Typed descriptor model and annotation handling.
pub mod descriptor;
/// Crate-wide error taxonomy.
pub mod error;
/// Bounded HTTP fetcher.
pub mod fetch;
/// Incremental filesystem indexer.
pub mod index;
/// Heterogeneous module lifecycle (acquire/process/merge/report).
pub mod module;
/// Archive/recent path calculator.
pub mod paths;
/// Atomic persistence writer.
pub mod persist;
/// Retention cleaner.
pub mod retention;
/// Bridge descriptor sanitizer and monthly secret store.
pub mod sanitize;
/// Aligned-offset periodic scheduler with graceful shutdown.
pub mod scheduler;
/// Peer-mirroring sync engine.
pub mod sync;

pub use error::CollectorError;
