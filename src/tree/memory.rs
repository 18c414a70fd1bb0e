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

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use super::{ancestors, check_path, CoordinationTree};
use crate::errors::TreeError;

/// In-process [CoordinationTree].
///
/// Nodes are kept in one ordered map keyed by full path, so the children of a node are the
/// contiguous range of keys under `{path}/`. Clones share the same tree.
#[derive(Debug, Clone, Default)]
pub struct MemoryTree {
    nodes: Arc<RwLock<BTreeMap<String, Option<Bytes>>>>,
}

impl MemoryTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every node path currently in the tree, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.nodes.read().keys().cloned().collect()
    }

    fn ensure_ancestors(nodes: &mut BTreeMap<String, Option<Bytes>>, path: &str) {
        for parent in ancestors(path) {
            nodes.entry(parent.to_string()).or_insert(None);
        }
    }

    fn descendants<'a>(
        nodes: &'a BTreeMap<String, Option<Bytes>>,
        path: &str,
    ) -> impl Iterator<Item = &'a String> {
        let prefix = format!("{path}/");
        nodes
            .range(prefix.clone()..)
            .map(|(k, _)| k)
            .take_while(move |k| k.starts_with(&prefix))
    }
}

#[async_trait]
impl CoordinationTree for MemoryTree {
    async fn exists(&self, path: &str) -> Result<bool, TreeError> {
        check_path(path)?;
        Ok(self.nodes.read().contains_key(path))
    }

    async fn get_data(&self, path: &str) -> Result<Option<Bytes>, TreeError> {
        check_path(path)?;
        self.nodes
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| TreeError::NoNode(path.to_string()))
    }

    async fn get_children(&self, path: &str) -> Result<Vec<String>, TreeError> {
        check_path(path)?;
        let nodes = self.nodes.read();
        if !nodes.contains_key(path) {
            return Err(TreeError::NoNode(path.to_string()));
        }
        let offset = path.len() + 1;
        Ok(Self::descendants(&nodes, path)
            .map(|k| &k[offset..])
            .filter(|rest| !rest.contains('/'))
            .map(str::to_string)
            .collect())
    }

    async fn ensure_node(&self, path: &str) -> Result<(), TreeError> {
        check_path(path)?;
        let mut nodes = self.nodes.write();
        Self::ensure_ancestors(&mut nodes, path);
        nodes.entry(path.to_string()).or_insert(None);
        Ok(())
    }

    async fn set_data(&self, path: &str, data: &[u8]) -> Result<(), TreeError> {
        check_path(path)?;
        let mut nodes = self.nodes.write();
        Self::ensure_ancestors(&mut nodes, path);
        nodes.insert(path.to_string(), Some(Bytes::copy_from_slice(data)));
        Ok(())
    }

    async fn delete_with_children(&self, path: &str) -> Result<(), TreeError> {
        check_path(path)?;
        let mut nodes = self.nodes.write();
        let doomed: Vec<String> = Self::descendants(&nodes, path).cloned().collect();
        for key in doomed {
            nodes.remove(&key);
        }
        nodes.remove(path);
        Ok(())
    }
}
