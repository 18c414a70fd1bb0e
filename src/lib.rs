// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Fabric control-plane runtime.
//!
//! Two pieces live here:
//!
//! - the [`profile`] store, a versioned, hierarchical configuration namespace kept in a
//!   [`tree::CoordinationTree`] (etcd in production, [`tree::MemoryTree`] locally), and
//! - the [`provision`] orchestrator, which allocates nodes on a [`compute::ComputeService`],
//!   bootstraps them and reports the endpoints they can be reached on.
//!
//! Backends are looked up through an explicitly owned [`compute::BackendRegistry`].

pub use anyhow::{anyhow as error, bail as raise, Context as ErrorContext};

pub mod compute;
pub mod config;
pub mod errors;
pub mod logging;
pub mod profile;
pub mod provision;
pub mod transports;
pub mod tree;

pub use config::FabricConfig;
pub use errors::{FabricError, Result};
