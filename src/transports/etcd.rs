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

//! etcd transport.
//!
//! [Client] is a thin wrapper over [etcd_client::Client] with the handful of key/value helpers the
//! runtime needs. [EtcdTree] layers the [CoordinationTree] contract on top: every tree node is
//! the etcd key equal to its path, and the value is a one byte tag followed by the payload.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use derive_builder::Builder;
use etcd_client::{Compare, CompareOp, DeleteOptions, GetOptions, PutOptions, Txn, TxnOp};
use tracing as log;
use validator::Validate;

pub use etcd_client::{ConnectOptions, KeyValue};

use crate::{
    errors::TreeError,
    tree::{ancestors, check_path, CoordinationTree},
    ErrorContext,
};

const TAG_EMPTY: u8 = 0;
const TAG_DATA: u8 = 1;

#[derive(Debug, Clone, Builder, Validate)]
pub struct ClientOptions {
    #[validate(length(min = 1))]
    #[builder(default = "default_servers()")]
    pub etcd_url: Vec<String>,

    #[builder(default)]
    pub etcd_connect_options: Option<ConnectOptions>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            etcd_url: default_servers(),
            etcd_connect_options: None,
        }
    }
}

impl ClientOptions {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.etcd_connect_options = Some(ConnectOptions::new().with_connect_timeout(timeout));
        self
    }
}

pub(crate) fn default_servers() -> Vec<String> {
    match std::env::var("ETCD_ENDPOINTS") {
        Ok(possible_list_of_urls) => possible_list_of_urls
            .split(',')
            .map(|s| s.to_string())
            .collect(),
        Err(_) => vec!["http://localhost:2379".to_string()],
    }
}

/// ETCD Client
#[derive(Clone)]
pub struct Client {
    client: etcd_client::Client,
}

impl Client {
    pub async fn new(config: ClientOptions) -> anyhow::Result<Self> {
        config.validate()?;
        log::debug!(endpoints = ?config.etcd_url, "connecting to etcd");
        let client = etcd_client::Client::connect(config.etcd_url, config.etcd_connect_options)
            .await
            .context("unable to connect to etcd")?;
        Ok(Client { client })
    }

    /// Get a reference to the underlying [etcd_client::Client] instance.
    pub fn etcd_client(&self) -> &etcd_client::Client {
        &self.client
    }

    pub async fn kv_get(&self, key: impl AsRef<str>) -> Result<Option<KeyValue>, TreeError> {
        let mut response = self
            .client
            .kv_client()
            .get(key.as_ref(), None)
            .await?;
        Ok(response.take_kvs().into_iter().next())
    }

    pub async fn kv_exists(&self, key: impl AsRef<str>) -> Result<bool, TreeError> {
        let response = self
            .client
            .kv_client()
            .get(key.as_ref(), Some(GetOptions::new().with_count_only()))
            .await?;
        Ok(response.count() > 0)
    }

    /// The smallest key in `[from, end)`, if any.
    pub async fn kv_first_key(
        &self,
        from: impl AsRef<str>,
        end: impl AsRef<str>,
    ) -> Result<Option<String>, TreeError> {
        let mut response = self
            .client
            .kv_client()
            .get(
                from.as_ref(),
                Some(
                    GetOptions::new()
                        .with_range(end.as_ref())
                        .with_keys_only()
                        .with_limit(1),
                ),
            )
            .await?;
        Ok(response
            .take_kvs()
            .into_iter()
            .next()
            .and_then(|kv| kv.key_str().ok().map(str::to_string)))
    }

    pub async fn kv_put(&self, key: impl AsRef<str>, value: Vec<u8>) -> Result<(), TreeError> {
        self.client
            .kv_client()
            .put(key.as_ref(), value, None::<PutOptions>)
            .await?;
        Ok(())
    }

    /// Create `key` only if it does not exist. Returns `false` if it was already present.
    pub async fn kv_create(&self, key: impl AsRef<str>, value: Vec<u8>) -> Result<bool, TreeError> {
        let key = key.as_ref();
        let txn = Txn::new()
            .when(vec![Compare::create_revision(key, CompareOp::Equal, 0)])
            .and_then(vec![TxnOp::put(key, value, None)]);

        let result = self.client.kv_client().txn(txn).await?;
        Ok(result.succeeded())
    }

    /// Delete `key` and every key under `{key}/` in a single transaction.
    pub async fn kv_delete_subtree(&self, key: impl AsRef<str>) -> Result<(), TreeError> {
        let key = key.as_ref();
        let children = format!("{key}/");
        let txn = Txn::new().and_then(vec![
            TxnOp::delete(children.as_str(), Some(DeleteOptions::new().with_prefix())),
            TxnOp::delete(key, None),
        ]);
        self.client.kv_client().txn(txn).await?;
        Ok(())
    }
}

/// [CoordinationTree] stored in etcd.
#[derive(Clone)]
pub struct EtcdTree {
    client: Client,
}

impl EtcdTree {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

fn encode(data: Option<&[u8]>) -> Vec<u8> {
    match data {
        Some(data) => {
            let mut value = Vec::with_capacity(data.len() + 1);
            value.push(TAG_DATA);
            value.extend_from_slice(data);
            value
        }
        None => vec![TAG_EMPTY],
    }
}

fn decode(value: &[u8]) -> Option<Bytes> {
    match value.split_first() {
        Some((&TAG_DATA, payload)) => Some(Bytes::copy_from_slice(payload)),
        _ => None,
    }
}

/// Step of the child walk under `prefix`: the child `key` belongs to, and the key to resume from.
///
/// A child's own key is followed by its siblings that extend the name (`a-x`, `a.b`), so the walk
/// resumes just after it. A key inside a child's subtree resumes past the whole subtree, `0`
/// being the byte after `/`.
fn child_step(prefix: &str, key: &str) -> (String, String) {
    let rest = key.strip_prefix(prefix).unwrap_or(key);
    match rest.split_once('/') {
        Some((name, _)) => (name.to_string(), format!("{prefix}{name}0")),
        None => (rest.to_string(), format!("{key}\0")),
    }
}

#[async_trait]
impl CoordinationTree for EtcdTree {
    async fn exists(&self, path: &str) -> Result<bool, TreeError> {
        check_path(path)?;
        self.client.kv_exists(path).await
    }

    async fn get_data(&self, path: &str) -> Result<Option<Bytes>, TreeError> {
        check_path(path)?;
        match self.client.kv_get(path).await? {
            Some(kv) => Ok(decode(kv.value())),
            None => Err(TreeError::NoNode(path.to_string())),
        }
    }

    async fn get_children(&self, path: &str) -> Result<Vec<String>, TreeError> {
        check_path(path)?;
        if !self.client.kv_exists(path).await? {
            return Err(TreeError::NoNode(path.to_string()));
        }
        // seek child by child rather than listing the whole subtree
        let prefix = format!("{path}/");
        let end = format!("{path}0");
        let mut names = Vec::new();
        let mut from = prefix.clone();
        while let Some(key) = self.client.kv_first_key(&from, &end).await? {
            let (name, next) = child_step(&prefix, &key);
            if !name.is_empty() {
                names.push(name);
            }
            from = next;
        }
        names.sort();
        names.dedup();
        Ok(names)
    }

    async fn ensure_node(&self, path: &str) -> Result<(), TreeError> {
        check_path(path)?;
        for node in ancestors(path).into_iter().chain(std::iter::once(path)) {
            if self.client.kv_create(node, encode(None)).await? {
                log::trace!(path = node, "created node");
            }
        }
        Ok(())
    }

    async fn set_data(&self, path: &str, data: &[u8]) -> Result<(), TreeError> {
        check_path(path)?;
        for parent in ancestors(path) {
            if self.client.kv_create(parent, encode(None)).await? {
                log::trace!(path = parent, "created parent node");
            }
        }
        self.client.kv_put(path, encode(Some(data))).await
    }

    async fn delete_with_children(&self, path: &str) -> Result<(), TreeError> {
        check_path(path)?;
        self.client.kv_delete_subtree(path).await
    }
}
