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

//! Concrete [`crate::module::Module`] implementations (§11 supplemented
//! features): one per descriptor family `spec.md` names but specifies
//! only at the contract level.

pub mod bridge_descriptors;
pub mod bridge_pool_assignment;
pub mod common;
pub mod exitlist;
pub mod indexer;
pub mod relay_descriptors;
pub mod webstats;

pub use bridge_descriptors::BridgeDescriptorsModule;
pub use bridge_pool_assignment::BridgePoolAssignmentModule;
pub use exitlist::ExitListModule;
pub use indexer::IndexerModule;
pub use relay_descriptors::RelayDescriptorsModule;
pub use webstats::WebstatsModule;
