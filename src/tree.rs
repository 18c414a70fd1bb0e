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

//! The coordination tree is the hierarchical store every fabric member shares.
//!
//! Paths are `/`-separated and absolute. A node may carry a payload, children, both or neither.
//! Writing a node creates any missing ancestors without a payload, the same way a znode tree is
//! populated with `create -p`.
//!
//! The tree is consumed as a capability through [CoordinationTree]; [MemoryTree] keeps it in
//! process and [crate::transports::etcd::EtcdTree] maps it onto etcd keys.

use async_trait::async_trait;
use bytes::Bytes;

use crate::errors::TreeError;

mod memory;

pub use memory::MemoryTree;

#[async_trait]
pub trait CoordinationTree: Send + Sync {
    async fn exists(&self, path: &str) -> Result<bool, TreeError>;

    /// `None` when the node exists without a payload.
    async fn get_data(&self, path: &str) -> Result<Option<Bytes>, TreeError>;

    /// Immediate children, sorted.
    async fn get_children(&self, path: &str) -> Result<Vec<String>, TreeError>;

    /// Create `path` and its ancestors without a payload if it does not exist yet.
    async fn ensure_node(&self, path: &str) -> Result<(), TreeError>;

    /// Create or overwrite the payload of `path`.
    async fn set_data(&self, path: &str, data: &[u8]) -> Result<(), TreeError>;

    /// Remove `path` and every descendant. Removing a missing node is not an error.
    async fn delete_with_children(&self, path: &str) -> Result<(), TreeError>;

    async fn get_string_data(&self, path: &str) -> Result<Option<String>, TreeError> {
        match self.get_data(path).await? {
            Some(data) => String::from_utf8(data.to_vec())
                .map(Some)
                .map_err(|source| TreeError::Utf8 {
                    path: path.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }
}

/// Join a parent path and a child segment.
pub fn join(parent: &str, child: &str) -> String {
    if parent.ends_with('/') {
        format!("{parent}{child}")
    } else {
        format!("{parent}/{child}")
    }
}

/// Every proper ancestor of `path`, outermost first, excluding the root.
pub fn ancestors(path: &str) -> Vec<&str> {
    path.match_indices('/')
        .map(|(idx, _)| &path[..idx])
        .filter(|p| !p.is_empty())
        .collect()
}

pub(crate) fn check_path(path: &str) -> Result<(), TreeError> {
    if !path.starts_with('/') || path.len() < 2 || path.ends_with('/') || path.contains("//") {
        return Err(TreeError::InvalidPath(path.to_string()));
    }
    if path.split('/').any(|segment| segment == "." || segment == "..") {
        return Err(TreeError::InvalidPath(path.to_string()));
    }
    Ok(())
}
