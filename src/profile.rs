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

//! The [ProfileStore] keeps the versioned configuration namespace of the fabric.
//!
//! A [Version] snapshot owns profiles, a profile owns configuration units ("pids"), and both
//! versions and profiles carry free-form attributes. Units exist in one of two layouts:
//!
//! - **legacy**: the unit node has no payload and one child node per key, holding the value;
//! - **structured**: the unit node holds the whole key/value map as a payload.
//!
//! Readers classify a unit into a [UnitRepresentation] and always produce the same view
//! regardless of layout. Writers keep legacy units legacy and write everything else structured.
//!
//! The store takes no locks. Full-replace operations read a snapshot, write and then prune, and
//! the sequence is not atomic: callers must serialize writers of the same profile.
//!
//! [Version]: ConfigPaths::version

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use bytes::Bytes;
use educe::Educe;
use futures::future::try_join_all;
use tracing as log;

use crate::{
    errors::{FabricError, TreeError},
    tree::{join, CoordinationTree},
    Result,
};

pub mod paths;
pub mod properties;

pub use paths::{ConfigPaths, PROPERTIES_SUFFIX};
pub use properties::Properties;

/// Raw configuration units of a profile, keyed by pid.
pub type RawConfigurations = BTreeMap<String, Bytes>;

/// Structured configuration units of a profile, keyed by pid without the suffix.
pub type Configurations = BTreeMap<String, Properties>;

/// Where a set of attributes lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeScope {
    Version(String),
    Profile { version: String, profile: String },
}

impl AttributeScope {
    pub fn version(version: impl Into<String>) -> Self {
        Self::Version(version.into())
    }

    pub fn profile(version: impl Into<String>, profile: impl Into<String>) -> Self {
        Self::Profile {
            version: version.into(),
            profile: profile.into(),
        }
    }
}

/// How a configuration unit is laid out in the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitRepresentation {
    /// No payload; one `(key, value)` child per entry, in listing order.
    Legacy(Vec<(String, String)>),

    /// The node payload, verbatim.
    Structured(Bytes),
}

impl UnitRepresentation {
    /// The raw bytes of the unit. Legacy units are rendered as `key = value` lines.
    pub fn into_bytes(self) -> Bytes {
        match self {
            UnitRepresentation::Structured(payload) => payload,
            UnitRepresentation::Legacy(children) => {
                let mut buf = String::new();
                for (key, value) in children {
                    buf.push_str(&format!("{} = {}\n", key, value));
                }
                Bytes::from(buf)
            }
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, UnitRepresentation::Legacy(_))
    }
}

/// Parse a properties-style text into `(key, value)` entries the way legacy units are updated:
/// blank lines and `#` comments are skipped, the key/value split happens on the first `=`, both
/// sides are trimmed and lines without `=` are ignored.
pub(crate) fn parse_legacy_entries(data: &[u8]) -> Vec<(String, String)> {
    String::from_utf8_lossy(data)
        .split('\n')
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

#[derive(Educe, Clone)]
#[educe(Debug)]
pub struct ProfileStore {
    #[educe(Debug(ignore))]
    tree: Arc<dyn CoordinationTree>,

    paths: ConfigPaths,
}

impl ProfileStore {
    pub fn new(tree: Arc<dyn CoordinationTree>, paths: ConfigPaths) -> Self {
        Self { tree, paths }
    }

    pub fn paths(&self) -> &ConfigPaths {
        &self.paths
    }

    pub fn tree(&self) -> &Arc<dyn CoordinationTree> {
        &self.tree
    }

    // ---- versions and profiles ----

    pub async fn versions(&self) -> Result<Vec<String>> {
        self.children_or_empty(&self.paths.versions()).await
    }

    pub async fn create_version(&self, version: &str) -> Result<()> {
        let path = self.paths.version(version)?;
        log::debug!(version, "creating version");
        Ok(self.tree.ensure_node(&path).await?)
    }

    pub async fn delete_version(&self, version: &str) -> Result<()> {
        let path = self.paths.version(version)?;
        log::debug!(version, "deleting version");
        Ok(self.tree.delete_with_children(&path).await?)
    }

    pub async fn profiles(&self, version: &str) -> Result<Vec<String>> {
        self.children_or_empty(&self.paths.profiles(version)?).await
    }

    pub async fn create_profile(&self, version: &str, profile: &str) -> Result<()> {
        let path = self.paths.profile(version, profile)?;
        log::debug!(version, profile, "creating profile");
        Ok(self.tree.ensure_node(&path).await?)
    }

    pub async fn delete_profile(&self, version: &str, profile: &str) -> Result<()> {
        let path = self.paths.profile(version, profile)?;
        log::debug!(version, profile, "deleting profile");
        Ok(self.tree.delete_with_children(&path).await?)
    }

    // ---- attributes ----

    fn attribute_path(&self, scope: &AttributeScope) -> Result<String> {
        match scope {
            AttributeScope::Version(version) => self.paths.version(version),
            AttributeScope::Profile { version, profile } => self.paths.profile(version, profile),
        }
    }

    /// Attributes stored at `scope`. A node that does not exist or has no payload reads as empty.
    pub async fn get_attributes(&self, scope: &AttributeScope) -> Result<Properties> {
        let path = self.attribute_path(scope)?;
        if !self.tree.exists(&path).await? {
            return Ok(Properties::new());
        }
        Ok(self
            .tree
            .get_data(&path)
            .await?
            .map(|data| properties::from_bytes(&data))
            .unwrap_or_default())
    }

    /// Set `key` to `value` at `scope`, or remove it when `value` is `None`.
    pub async fn set_attribute(
        &self,
        scope: &AttributeScope,
        key: &str,
        value: Option<&str>,
    ) -> Result<()> {
        let mut attributes = self.get_attributes(scope).await?;
        match value {
            Some(value) => {
                attributes.insert(key.to_string(), value.to_string());
            }
            None => {
                attributes.remove(key);
            }
        }
        let path = self.attribute_path(scope)?;
        log::debug!(%path, key, removed = value.is_none(), "writing attribute");
        Ok(self
            .tree
            .set_data(&path, &properties::to_bytes(&attributes))
            .await?)
    }

    pub async fn get_version_attributes(&self, version: &str) -> Result<Properties> {
        self.get_attributes(&AttributeScope::version(version)).await
    }

    pub async fn set_version_attribute(
        &self,
        version: &str,
        key: &str,
        value: Option<&str>,
    ) -> Result<()> {
        self.set_attribute(&AttributeScope::version(version), key, value)
            .await
    }

    pub async fn get_profile_attributes(&self, version: &str, profile: &str) -> Result<Properties> {
        self.get_attributes(&AttributeScope::profile(version, profile))
            .await
    }

    pub async fn set_profile_attribute(
        &self,
        version: &str,
        profile: &str,
        key: &str,
        value: Option<&str>,
    ) -> Result<()> {
        self.set_attribute(&AttributeScope::profile(version, profile), key, value)
            .await
    }

    // ---- raw configuration units ----

    async fn read_unit(&self, path: &str) -> Result<Option<UnitRepresentation>> {
        if !self.tree.exists(path).await? {
            return Ok(None);
        }
        if let Some(payload) = self.tree.get_data(path).await? {
            return Ok(Some(UnitRepresentation::Structured(payload)));
        }

        let mut children = Vec::new();
        for child in self.tree.get_children(path).await? {
            let value = self
                .tree
                .get_string_data(&join(path, &child))
                .await?
                .unwrap_or_default();
            children.push((child, value));
        }
        Ok(Some(UnitRepresentation::Legacy(children)))
    }

    /// Classify the unit `pid` of a profile.
    pub async fn unit_representation(
        &self,
        version: &str,
        profile: &str,
        pid: &str,
    ) -> Result<Option<UnitRepresentation>> {
        let path = self.paths.unit(version, profile, pid)?;
        self.read_unit(&path).await
    }

    /// Raw bytes of a unit, or `None` if it does not exist.
    pub async fn get_raw_configuration(
        &self,
        version: &str,
        profile: &str,
        pid: &str,
    ) -> Result<Option<Bytes>> {
        Ok(self
            .unit_representation(version, profile, pid)
            .await?
            .map(UnitRepresentation::into_bytes))
    }

    /// Every unit of a profile, raw. A profile that does not exist has no units.
    pub async fn get_all_raw_configurations(
        &self,
        version: &str,
        profile: &str,
    ) -> Result<RawConfigurations> {
        let pids = self.unit_names(version, profile).await?;
        let units = try_join_all(
            pids.iter()
                .map(|pid| self.get_raw_configuration(version, profile, pid)),
        )
        .await?;

        Ok(pids
            .into_iter()
            .zip(units)
            .filter_map(|(pid, data)| data.map(|data| (pid, data)))
            .collect())
    }

    /// Replace the full set of units of a profile.
    ///
    /// Units that exist in the legacy layout stay legacy: the new bytes are read as `key=value`
    /// lines, each key is written as a child and children that are no longer present are removed.
    /// Every other unit is written as a payload. Units that are not in `configurations` are
    /// deleted with all their descendants.
    pub async fn set_all_raw_configurations(
        &self,
        version: &str,
        profile: &str,
        configurations: &RawConfigurations,
    ) -> Result<()> {
        let mut stale: BTreeSet<String> = self.unit_names(version, profile).await?.into_iter().collect();

        for (pid, data) in configurations {
            stale.remove(pid);
            let path = self.paths.unit(version, profile, pid)?;

            if self.has_children(&path).await? {
                self.write_legacy(&path, data).await?;
            } else {
                log::debug!(%path, "writing configuration unit");
                self.tree.set_data(&path, data).await?;
            }
        }

        for pid in stale {
            let path = self.paths.unit(version, profile, &pid)?;
            log::debug!(%path, "pruning configuration unit");
            self.tree.delete_with_children(&path).await?;
        }
        Ok(())
    }

    async fn write_legacy(&self, path: &str, data: &[u8]) -> Result<()> {
        log::debug!(%path, "updating legacy configuration unit");
        let entries = parse_legacy_entries(data);
        if let Some((key, _)) = entries
            .iter()
            .find(|(key, _)| key.contains('/') || key == "." || key == "..")
        {
            return Err(FabricError::InvalidName {
                kind: "configuration key",
                name: key.clone(),
            });
        }

        let existing = self.tree.get_children(path).await?;
        let mut saved = BTreeSet::new();

        for (key, value) in entries {
            self.tree.set_data(&join(path, &key), value.as_bytes()).await?;
            saved.insert(key);
        }

        for child in existing.iter().filter(|child| !saved.contains(*child)) {
            self.tree.delete_with_children(&join(path, child)).await?;
        }
        Ok(())
    }

    // ---- structured configuration units ----

    /// Key/value view of the structured unit `{pid}.properties`, or `None` if it does not exist.
    pub async fn get_configuration(
        &self,
        version: &str,
        profile: &str,
        pid: &str,
    ) -> Result<Option<Properties>> {
        let path = self.paths.structured_unit(version, profile, pid)?;
        Ok(self
            .read_unit(&path)
            .await?
            .map(|unit| properties::from_bytes(&unit.into_bytes())))
    }

    /// Every structured unit of a profile, keyed by pid without the suffix.
    pub async fn get_configurations(&self, version: &str, profile: &str) -> Result<Configurations> {
        let pids = self.structured_pids(version, profile).await?;
        let units = try_join_all(
            pids.iter()
                .map(|pid| self.get_configuration(version, profile, pid)),
        )
        .await?;

        Ok(pids
            .into_iter()
            .zip(units)
            .filter_map(|(pid, configuration)| configuration.map(|c| (pid, c)))
            .collect())
    }

    /// Replace the full set of structured units of a profile. Units outside the
    /// `.properties` namespace are left alone.
    pub async fn set_configurations(
        &self,
        version: &str,
        profile: &str,
        configurations: &Configurations,
    ) -> Result<()> {
        let mut stale: BTreeSet<String> = self
            .structured_pids(version, profile)
            .await?
            .into_iter()
            .collect();

        for (pid, configuration) in configurations {
            stale.remove(pid);
            let path = self.paths.structured_unit(version, profile, pid)?;
            log::debug!(%path, "writing structured configuration unit");
            self.tree
                .set_data(&path, &properties::to_bytes(configuration))
                .await?;

            // the payload is authoritative now; drop any legacy children left behind
            for child in self.tree.get_children(&path).await? {
                self.tree.delete_with_children(&join(&path, &child)).await?;
            }
        }

        for pid in stale {
            let path = self.paths.structured_unit(version, profile, &pid)?;
            log::debug!(%path, "pruning structured configuration unit");
            self.tree.delete_with_children(&path).await?;
        }
        Ok(())
    }

    // ---- helpers ----

    async fn unit_names(&self, version: &str, profile: &str) -> Result<Vec<String>> {
        self.children_or_empty(&self.paths.profile(version, profile)?)
            .await
    }

    async fn structured_pids(&self, version: &str, profile: &str) -> Result<Vec<String>> {
        Ok(self
            .unit_names(version, profile)
            .await?
            .into_iter()
            .filter_map(|name| name.strip_suffix(PROPERTIES_SUFFIX).map(str::to_string))
            .filter(|pid| !pid.is_empty())
            .collect())
    }

    async fn has_children(&self, path: &str) -> Result<bool> {
        if !self.tree.exists(path).await? {
            return Ok(false);
        }
        Ok(!self.tree.get_children(path).await?.is_empty())
    }

    async fn children_or_empty(&self, path: &str) -> Result<Vec<String>> {
        match self.tree.get_children(path).await {
            Ok(children) => Ok(children),
            Err(TreeError::NoNode(_)) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}
