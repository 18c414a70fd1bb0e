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

use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;
use tracing as log;

use super::ComputeService;

/// Compute handles keyed by provider id.
///
/// Clones share the same map. All operations are safe to call concurrently.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    services: Arc<RwLock<HashMap<String, Arc<dyn ComputeService>>>>,
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("providers", &self.providers())
            .finish()
    }
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `service` under its provider id, replacing any previous handle.
    /// A handle that reports no id is ignored.
    pub fn bind(&self, service: Arc<dyn ComputeService>) {
        let Some(provider) = service.provider_id().map(str::to_string) else {
            log::debug!("ignoring compute service without a provider id");
            return;
        };
        log::debug!(%provider, "binding compute service");
        self.services.write().insert(provider, service);
    }

    /// Remove whatever is registered under the provider id of `service`.
    pub fn unbind(&self, service: &dyn ComputeService) {
        if let Some(provider) = service.provider_id() {
            log::debug!(provider, "unbinding compute service");
            self.services.write().remove(provider);
        }
    }

    pub fn get(&self, provider: &str) -> Option<Arc<dyn ComputeService>> {
        self.services.read().get(provider).cloned()
    }

    /// Registered provider ids, sorted.
    pub fn providers(&self) -> Vec<String> {
        let mut providers: Vec<String> = self.services.read().keys().cloned().collect();
        providers.sort();
        providers
    }

    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }
}
