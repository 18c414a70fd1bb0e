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

//! Compute backends.
//!
//! A [ComputeService] is a handle to one provider (a cloud account, a pool of machines) that can
//! allocate nodes, run scripts on them and release them. Handles are registered by provider id in
//! a [BackendRegistry]; providers that are not registered can be built on demand by a
//! [ComputeServiceFactory].

use std::{str::FromStr, sync::Arc};

use async_trait::async_trait;
use derive_builder::Builder;
use derive_getters::Getters;
use serde::{Deserialize, Serialize};

use crate::errors::ComputeError;

pub mod pool;
pub mod registry;

pub use registry::BackendRegistry;

/// Size class requested for new nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceType {
    #[default]
    Smallest,
    Biggest,
    Fastest,
}

impl InstanceType {
    /// Parse `token`, falling back to `default` for anything that is not a known instance type.
    pub fn parse_or(token: &str, default: InstanceType) -> InstanceType {
        token.parse().unwrap_or(default)
    }
}

impl FromStr for InstanceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "smallest" => Ok(InstanceType::Smallest),
            "biggest" => Ok(InstanceType::Biggest),
            "fastest" => Ok(InstanceType::Fastest),
            _ => Err(format!("unknown instance type: {s}")),
        }
    }
}

impl std::fmt::Display for InstanceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            InstanceType::Smallest => "Smallest",
            InstanceType::Biggest => "Biggest",
            InstanceType::Fastest => "Fastest",
        };
        f.write_str(name)
    }
}

/// Node selection constraints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Builder)]
pub struct Template {
    #[builder(default)]
    pub instance_type: InstanceType,

    #[builder(default, setter(into, strip_option))]
    pub location_id: Option<String>,

    #[builder(default, setter(into, strip_option))]
    pub image_id: Option<String>,

    #[builder(default, setter(into, strip_option))]
    pub hardware_id: Option<String>,
}

impl Template {
    pub fn builder() -> TemplateBuilder {
        TemplateBuilder::default()
    }
}

/// A node allocated by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
pub struct NodeMetadata {
    id: String,
    public_addresses: Vec<String>,
}

impl NodeMetadata {
    pub fn new(id: impl Into<String>, public_addresses: Vec<String>) -> Self {
        Self {
            id: id.into(),
            public_addresses,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: Option<String>,
}

impl Credentials {
    pub fn user(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: None,
        }
    }
}

/// How a script is executed on a node. The default runs as root with the provider's own
/// credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunScriptOptions {
    pub credentials: Option<Credentials>,
    pub run_as_root: bool,
}

impl Default for RunScriptOptions {
    fn default() -> Self {
        Self {
            credentials: None,
            run_as_root: true,
        }
    }
}

impl RunScriptOptions {
    pub fn override_credentials_with(credentials: Credentials) -> Self {
        Self {
            credentials: Some(credentials),
            ..Default::default()
        }
    }

    pub fn run_as_root(mut self, run_as_root: bool) -> Self {
        self.run_as_root = run_as_root;
        self
    }
}

/// Parameters used to build a handle for a provider that has not been registered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderProperties {
    pub provider: String,
    pub identity: Option<String>,
    pub credential: Option<String>,

    /// Restricts image lookup to images published by this owner.
    pub owner: Option<String>,
}

#[async_trait]
pub trait ComputeService: Send + Sync {
    /// The provider this handle talks to. Handles without an id cannot be registered.
    fn provider_id(&self) -> Option<&str>;

    /// Allocate `count` nodes matching `template`, tagged with `group`.
    async fn create_nodes_in_group(
        &self,
        group: &str,
        count: usize,
        template: &Template,
    ) -> Result<Vec<NodeMetadata>, ComputeError>;

    async fn run_script_on_node(
        &self,
        node_id: &str,
        script: &str,
        options: &RunScriptOptions,
    ) -> Result<(), ComputeError>;

    async fn destroy_node(&self, node_id: &str) -> Result<(), ComputeError>;
}

#[async_trait]
pub trait ComputeServiceFactory: Send + Sync {
    async fn create(
        &self,
        properties: &ProviderProperties,
    ) -> Result<Arc<dyn ComputeService>, ComputeError>;
}
