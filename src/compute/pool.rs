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

//! A [ComputeService] over a fixed pool of machines that already exist.
//!
//! Allocating a node leases a free host from the pool and destroying it returns the host.
//! Scripts are piped to the stdin of a launcher command, by default an `ssh` session running
//! `sh -s` on the host. Every handle a [ShellPoolFactory] builds for the same provider shares one
//! lease table, so capacity holds across requests within the process.

use std::{collections::HashMap, process::Stdio, sync::Arc};

use async_trait::async_trait;
use educe::Educe;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{io::AsyncWriteExt, process::Command};
use tracing as log;
use validator::Validate;

use super::{
    ComputeService, ComputeServiceFactory, NodeMetadata, ProviderProperties, RunScriptOptions,
    Template,
};
use crate::errors::ComputeError;

const HOST_PLACEHOLDER: &str = "{host}";
const USER_PLACEHOLDER: &str = "{user}";
const IDENTITY_PLACEHOLDER: &str = "{identity}";

/// Environment variable holding the provider credential for the launcher process.
pub const CREDENTIAL_ENV: &str = "FABRIC_POOL_CREDENTIAL";

const ROOT_LOGIN: &str = "root";

// `sh -s` reads its input one line at a time, so the rest of the script goes to the new shell.
const BECOME_ROOT: &str = "[ \"$(id -u)\" -eq 0 ] || exec sudo -n sh -s\n";

type Leases = Arc<Mutex<HashMap<String, Lease>>>;

fn default_launcher() -> Vec<String> {
    ["ssh", "-o", "BatchMode=yes", "{user}@{host}", "sh", "-s"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_user() -> String {
    ROOT_LOGIN.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct PoolHost {
    #[validate(length(min = 1))]
    pub address: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl PoolHost {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            location: None,
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

/// Definition of one shell-pool provider.
#[derive(Educe, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[educe(Debug)]
pub struct ShellPoolConfig {
    /// Substituted for `{identity}` in the launcher, e.g. the path of an ssh key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,

    /// Exported to the launcher as [CREDENTIAL_ENV].
    #[educe(Debug(ignore))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,

    /// Login used when a script does not override the credentials.
    #[serde(default = "default_user")]
    pub user: String,

    /// Command the script is piped into. `{host}`, `{user}` and `{identity}` are substituted in
    /// every argument; `{identity}` becomes empty when no identity is set.
    #[validate(length(min = 1))]
    #[serde(default = "default_launcher")]
    pub launcher: Vec<String>,

    #[validate(nested)]
    #[serde(default)]
    pub hosts: Vec<PoolHost>,
}

impl Default for ShellPoolConfig {
    fn default() -> Self {
        Self {
            identity: None,
            credential: None,
            user: default_user(),
            launcher: default_launcher(),
            hosts: Vec::new(),
        }
    }
}

#[derive(Debug)]
struct Lease {
    address: String,
    group: String,
}

pub struct ShellPoolComputeService {
    provider: String,
    config: ShellPoolConfig,
    leases: Leases,
}

impl std::fmt::Debug for ShellPoolComputeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShellPoolComputeService")
            .field("provider", &self.provider)
            .field("hosts", &self.config.hosts.len())
            .field("leased", &self.leases.lock().len())
            .finish()
    }
}

impl ShellPoolComputeService {
    pub fn new(provider: impl Into<String>, config: ShellPoolConfig) -> Self {
        Self::with_leases(provider, config, Leases::default())
    }

    fn with_leases(provider: impl Into<String>, config: ShellPoolConfig, leases: Leases) -> Self {
        Self {
            provider: provider.into(),
            config,
            leases,
        }
    }

    pub fn config(&self) -> &ShellPoolConfig {
        &self.config
    }

    fn node_id(&self, address: &str) -> String {
        format!("{}/{}", self.provider, address)
    }

    /// Number of hosts that are not leased, optionally restricted to `location`.
    pub fn available(&self, location: Option<&str>) -> usize {
        let leases = self.leases.lock();
        let count = self.free_hosts(&leases, location).count();
        count
    }

    /// Group each leased node belongs to, keyed by node id.
    pub fn leased(&self) -> HashMap<String, String> {
        self.leases
            .lock()
            .iter()
            .map(|(id, lease)| (id.clone(), lease.group.clone()))
            .collect()
    }

    fn free_hosts<'a>(
        &'a self,
        leases: &'a HashMap<String, Lease>,
        location: Option<&'a str>,
    ) -> impl Iterator<Item = &'a PoolHost> + 'a {
        self.config.hosts.iter().filter(move |host| {
            let matches_location = match location {
                Some(location) => host.location.as_deref() == Some(location),
                None => true,
            };
            matches_location && !leases.contains_key(&self.node_id(&host.address))
        })
    }

    fn launcher_argv(&self, address: &str, user: &str) -> Vec<String> {
        self.config
            .launcher
            .iter()
            .map(|arg| {
                arg.replace(HOST_PLACEHOLDER, address)
                    .replace(USER_PLACEHOLDER, user)
                    .replace(
                        IDENTITY_PLACEHOLDER,
                        self.config.identity.as_deref().unwrap_or_default(),
                    )
            })
            .collect()
    }
}

/// The script as piped to the launcher. A root run under another login re-executes through
/// `sudo`.
fn prepare_script(script: &str, user: &str, options: &RunScriptOptions) -> String {
    if options.run_as_root && user != ROOT_LOGIN {
        format!("{BECOME_ROOT}{script}")
    } else {
        script.to_string()
    }
}

#[async_trait]
impl ComputeService for ShellPoolComputeService {
    fn provider_id(&self) -> Option<&str> {
        Some(&self.provider)
    }

    async fn create_nodes_in_group(
        &self,
        group: &str,
        count: usize,
        template: &Template,
    ) -> Result<Vec<NodeMetadata>, ComputeError> {
        if template.image_id.is_some() || template.hardware_id.is_some() {
            log::debug!(
                provider = %self.provider,
                "image and hardware constraints do not apply to a shell pool"
            );
        }

        let mut leases = self.leases.lock();
        let free: Vec<String> = self
            .free_hosts(&leases, template.location_id.as_deref())
            .map(|host| host.address.clone())
            .collect();

        if free.len() < count {
            return Err(ComputeError::InsufficientCapacity {
                requested: count,
                available: free.len(),
            });
        }

        let nodes: Vec<NodeMetadata> = free
            .into_iter()
            .take(count)
            .map(|address| {
                let id = self.node_id(&address);
                leases.insert(
                    id.clone(),
                    Lease {
                        address: address.clone(),
                        group: group.to_string(),
                    },
                );
                NodeMetadata::new(id, vec![address])
            })
            .collect();

        log::debug!(
            provider = %self.provider,
            group,
            count = nodes.len(),
            "leased pool hosts"
        );
        Ok(nodes)
    }

    async fn run_script_on_node(
        &self,
        node_id: &str,
        script: &str,
        options: &RunScriptOptions,
    ) -> Result<(), ComputeError> {
        let address = self
            .leases
            .lock()
            .get(node_id)
            .map(|lease| lease.address.clone())
            .ok_or_else(|| ComputeError::UnknownNode(node_id.to_string()))?;

        let user = match &options.credentials {
            Some(credentials) => credentials.user.as_str(),
            None => self.config.user.as_str(),
        };
        let argv = self.launcher_argv(&address, user);
        let Some((program, args)) = argv.split_first() else {
            return Err(ComputeError::Provider {
                provider: self.provider.clone(),
                reason: "empty launcher command".to_string(),
            });
        };

        let script = prepare_script(script, user, options);

        log::debug!(
            node = node_id,
            user,
            %program,
            run_as_root = options.run_as_root,
            "running script"
        );
        let launch_error = |source| ComputeError::Launch {
            node: node_id.to_string(),
            source,
        };

        let mut command = Command::new(program);
        if let Some(credential) = &self.config.credential {
            command.env(CREDENTIAL_ENV, credential);
        }
        let mut child = command
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(launch_error)?;

        if let Some(mut stdin) = child.stdin.take() {
            // a launcher that exits before reading the whole script is judged by its exit status
            if let Err(e) = stdin.write_all(script.as_bytes()).await {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(launch_error(e));
                }
            }
        }

        let output = child.wait_with_output().await.map_err(launch_error)?;
        log::trace!(
            node = node_id,
            stdout = %String::from_utf8_lossy(&output.stdout),
            "script output"
        );

        if output.status.success() {
            Ok(())
        } else {
            Err(ComputeError::ScriptFailed {
                node: node_id.to_string(),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    async fn destroy_node(&self, node_id: &str) -> Result<(), ComputeError> {
        match self.leases.lock().remove(node_id) {
            Some(lease) => {
                log::debug!(node = node_id, group = %lease.group, "released pool host");
                Ok(())
            }
            None => Err(ComputeError::UnknownNode(node_id.to_string())),
        }
    }
}

/// Builds [ShellPoolComputeService] handles from provider definitions.
#[derive(Debug, Clone, Default)]
pub struct ShellPoolFactory {
    providers: HashMap<String, ShellPoolConfig>,
    leases: Arc<Mutex<HashMap<String, Leases>>>,
}

impl ShellPoolFactory {
    pub fn new(providers: HashMap<String, ShellPoolConfig>) -> Self {
        Self {
            providers,
            leases: Default::default(),
        }
    }

    fn leases_of(&self, provider: &str) -> Leases {
        self.leases
            .lock()
            .entry(provider.to_string())
            .or_default()
            .clone()
    }
}

#[async_trait]
impl ComputeServiceFactory for ShellPoolFactory {
    async fn create(
        &self,
        properties: &ProviderProperties,
    ) -> Result<Arc<dyn ComputeService>, ComputeError> {
        let mut config = self
            .providers
            .get(&properties.provider)
            .cloned()
            .ok_or_else(|| ComputeError::Provider {
                provider: properties.provider.clone(),
                reason: "no shell pool is configured for this provider".to_string(),
            })?;

        if properties.identity.is_some() {
            config.identity = properties.identity.clone();
        }
        if properties.credential.is_some() {
            config.credential = properties.credential.clone();
        }
        if properties.owner.as_deref().is_some_and(|owner| !owner.is_empty()) {
            log::debug!(
                provider = %properties.provider,
                "image owner does not apply to a shell pool"
            );
        }

        config.validate().map_err(|e| ComputeError::Provider {
            provider: properties.provider.clone(),
            reason: e.to_string(),
        })?;

        log::info!(provider = %properties.provider, "created shell pool compute service");
        Ok(Arc::new(ShellPoolComputeService::with_leases(
            properties.provider.clone(),
            config,
            self.leases_of(&properties.provider),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::Credentials;
    use assert_matches::assert_matches;

    fn local_pool(launcher: &[&str], hosts: &[PoolHost]) -> ShellPoolComputeService {
        ShellPoolComputeService::new(
            "local",
            ShellPoolConfig {
                launcher: launcher.iter().map(|s| s.to_string()).collect(),
                hosts: hosts.to_vec(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_default_launcher() {
        let pool = ShellPoolComputeService::new("p", ShellPoolConfig::default());
        assert_eq!(
            pool.launcher_argv("10.0.0.5", "fuse"),
            vec!["ssh", "-o", "BatchMode=yes", "fuse@10.0.0.5", "sh", "-s"]
        );
        assert_eq!(pool.config().user, "root");
    }

    #[tokio::test]
    async fn test_empty_launcher() {
        let pool = local_pool(&[], &[PoolHost::new("10.0.0.1")]);
        let nodes = pool
            .create_nodes_in_group("g", 1, &Template::default())
            .await
            .unwrap();
        assert_matches!(
            pool.run_script_on_node(nodes[0].id(), "true", &RunScriptOptions::default())
                .await,
            Err(ComputeError::Provider { .. })
        );
    }

    #[tokio::test]
    async fn test_allocation_and_release() {
        let pool = local_pool(
            &["sh", "-s"],
            &[
                PoolHost::new("10.0.0.1").with_location("east"),
                PoolHost::new("10.0.0.2").with_location("west"),
                PoolHost::new("10.0.0.3").with_location("east"),
            ],
        );

        let east = Template::builder().location_id("east").build().unwrap();
        let nodes = pool.create_nodes_in_group("web", 2, &east).await.unwrap();
        assert_eq!(
            nodes
                .iter()
                .map(|n| n.public_addresses()[0].as_str())
                .collect::<Vec<_>>(),
            vec!["10.0.0.1", "10.0.0.3"]
        );
        assert_eq!(pool.available(Some("east")), 0);
        assert_eq!(pool.available(None), 1);

        let err = pool
            .create_nodes_in_group("web", 1, &east)
            .await
            .unwrap_err();
        assert_matches!(
            err,
            ComputeError::InsufficientCapacity {
                requested: 1,
                available: 0
            }
        );

        pool.destroy_node(nodes[0].id()).await.unwrap();
        assert_eq!(pool.available(Some("east")), 1);
        assert_matches!(
            pool.destroy_node(nodes[0].id()).await,
            Err(ComputeError::UnknownNode(_))
        );
    }

    #[tokio::test]
    async fn test_run_script() {
        let pool = local_pool(&["sh", "-s"], &[PoolHost::new("127.0.0.1")]);
        let nodes = pool
            .create_nodes_in_group("g", 1, &Template::default())
            .await
            .unwrap();

        pool.run_script_on_node(nodes[0].id(), "true\n", &RunScriptOptions::default())
            .await
            .unwrap();

        let err = pool
            .run_script_on_node(
                nodes[0].id(),
                "echo nope >&2\nexit 3\n",
                &RunScriptOptions::default(),
            )
            .await
            .unwrap_err();
        assert_matches!(err, ComputeError::ScriptFailed { status: 3, ref stderr, .. } if stderr == "nope");
    }

    #[tokio::test]
    async fn test_launcher_substitution() {
        let pool = local_pool(
            &["sh", "-c", "echo {user}@{host} >&2; exit 1"],
            &[PoolHost::new("10.1.1.1")],
        );
        let nodes = pool
            .create_nodes_in_group("g", 1, &Template::default())
            .await
            .unwrap();

        let options =
            RunScriptOptions::override_credentials_with(Credentials::user("fuse")).run_as_root(false);
        let err = pool
            .run_script_on_node(nodes[0].id(), "true\n", &options)
            .await
            .unwrap_err();
        assert_matches!(err, ComputeError::ScriptFailed { ref stderr, .. } if stderr == "fuse@10.1.1.1");

        let err = pool
            .run_script_on_node(nodes[0].id(), "true\n", &RunScriptOptions::default())
            .await
            .unwrap_err();
        assert_matches!(err, ComputeError::ScriptFailed { ref stderr, .. } if stderr == "root@10.1.1.1");
    }

    #[tokio::test]
    async fn test_unknown_node() {
        let pool = local_pool(&["sh", "-s"], &[]);
        assert_matches!(
            pool.run_script_on_node("local/nowhere", "true", &RunScriptOptions::default())
                .await,
            Err(ComputeError::UnknownNode(_))
        );
    }

    #[tokio::test]
    async fn test_factory() {
        let mut providers = HashMap::new();
        providers.insert(
            "lab".to_string(),
            ShellPoolConfig {
                hosts: vec![PoolHost::new("10.0.0.9")],
                ..Default::default()
            },
        );
        let factory = ShellPoolFactory::new(providers);

        let service = factory
            .create(&ProviderProperties {
                provider: "lab".to_string(),
                identity: Some("admin".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(service.provider_id(), Some("lab"));

        let err = factory
            .create(&ProviderProperties {
                provider: "aws-ec2".to_string(),
                ..Default::default()
            })
            .await
            .err()
            .unwrap();
        assert_matches!(err, ComputeError::Provider { ref provider, .. } if provider == "aws-ec2");
    }

    #[tokio::test]
    async fn test_factory_handles_share_leases() {
        let mut providers = HashMap::new();
        providers.insert(
            "lab".to_string(),
            ShellPoolConfig {
                hosts: vec![PoolHost::new("10.0.0.9")],
                ..Default::default()
            },
        );
        providers.insert(
            "other".to_string(),
            ShellPoolConfig {
                hosts: vec![PoolHost::new("10.0.0.9")],
                ..Default::default()
            },
        );
        let factory = ShellPoolFactory::new(providers);
        let lab = ProviderProperties {
            provider: "lab".to_string(),
            ..Default::default()
        };

        let first = factory.create(&lab).await.ok().unwrap();
        let second = factory.create(&lab).await.ok().unwrap();

        let nodes = first
            .create_nodes_in_group("g", 1, &Template::default())
            .await
            .unwrap();
        assert_matches!(
            second
                .create_nodes_in_group("g", 1, &Template::default())
                .await,
            Err(ComputeError::InsufficientCapacity {
                requested: 1,
                available: 0
            })
        );

        // another provider keeps its own hosts
        let other = factory
            .create(&ProviderProperties {
                provider: "other".to_string(),
                ..Default::default()
            })
            .await
            .ok()
            .unwrap();
        assert_eq!(
            other
                .create_nodes_in_group("g", 1, &Template::default())
                .await
                .unwrap()
                .len(),
            1
        );

        second.destroy_node(nodes[0].id()).await.unwrap();
        assert_eq!(
            first
                .create_nodes_in_group("g", 1, &Template::default())
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_prepare_script() {
        let root = RunScriptOptions::default();
        let user = RunScriptOptions::override_credentials_with(Credentials::user("fuse"))
            .run_as_root(false);

        assert_eq!(prepare_script("true\n", "root", &root), "true\n");
        assert_eq!(prepare_script("true\n", "fuse", &user), "true\n");
        assert_eq!(
            prepare_script("true\n", "fuse", &root),
            "[ \"$(id -u)\" -eq 0 ] || exec sudo -n sh -s\ntrue\n"
        );
    }

    #[tokio::test]
    async fn test_identity_and_credential_reach_the_launcher() {
        let pool = ShellPoolComputeService::new(
            "local",
            ShellPoolConfig {
                identity: Some("/keys/lab".to_string()),
                credential: Some("s3cret".to_string()),
                launcher: vec![
                    "sh".into(),
                    "-c".into(),
                    format!("echo {{identity}} ${CREDENTIAL_ENV} >&2; exit 1"),
                ],
                hosts: vec![PoolHost::new("10.1.1.1")],
                ..Default::default()
            },
        );
        let nodes = pool
            .create_nodes_in_group("g", 1, &Template::default())
            .await
            .unwrap();

        let err = pool
            .run_script_on_node(nodes[0].id(), "true\n", &RunScriptOptions::default())
            .await
            .unwrap_err();
        assert_matches!(err, ComputeError::ScriptFailed { ref stderr, .. } if stderr == "/keys/lab s3cret");
        assert!(!format!("{:?}", pool.config()).contains("s3cret"));
    }
}
