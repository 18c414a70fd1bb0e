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

//! Container provisioning.
//!
//! The [ContainerProvider] turns a [CreateContainerRequest] into running containers: it picks the
//! compute backend for the requested provider, allocates the nodes, and runs the bootstrap script
//! on each of them. The result is the list of `address:port` endpoints the new containers answer
//! on.
//!
//! Nodes that were allocated are never rolled back. If a script fails part way through, the error
//! lists the node ids that were left behind.

use std::{collections::HashMap, sync::Arc};

use derive_getters::Getters;
use educe::Educe;
use parking_lot::RwLock;
use tracing as log;

use crate::{
    compute::{
        BackendRegistry, ComputeService, ComputeServiceFactory, Credentials, RunScriptOptions,
    },
    errors::{ComputeError, FabricError},
    Result,
};

mod bootstrap;
pub mod query;
pub mod request;

pub use bootstrap::{shell_quote, BootstrapScript};
pub use query::{parse_query, QueryParameters};
pub use request::{CreateContainerRequest, CreateContainerRequestBuilder};

/// Port the agent listens on, and the port reported for ordinary containers.
pub const DEFAULT_SSH_PORT: u16 = 8101;

/// Port reported for a new ensemble server.
pub const ZOOKEEPER_PORT: u16 = 2181;

pub const DEFAULT_WORKING_DIR: &str = "~/";

/// A container created by a [ContainerProvider].
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
pub struct CreatedContainer {
    name: String,
    provider: String,
    node_id: String,
    public_addresses: Vec<String>,
}

/// Result of a creation request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionOutcome {
    requested: usize,
    endpoints: Vec<String>,
    containers: Vec<CreatedContainer>,
}

impl ProvisionOutcome {
    /// Comma separated `address:port` list, in node order then address order.
    pub fn addresses(&self) -> String {
        self.endpoints.join(",")
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    pub fn containers(&self) -> &[CreatedContainer] {
        &self.containers
    }

    pub fn requested(&self) -> usize {
        self.requested
    }

    /// The backend returned fewer nodes than requested.
    pub fn is_partial(&self) -> bool {
        self.containers.len() < self.requested
    }
}

impl std::fmt::Display for ProvisionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.addresses())
    }
}

struct ContainerRecord {
    container: CreatedContainer,
    service: Arc<dyn ComputeService>,
}

/// Creates containers on compute backends.
///
/// Backends are looked up by provider name in the [BackendRegistry]. When none is registered and
/// a [ComputeServiceFactory] is configured, a handle is built for the request; that handle is
/// kept with the containers it created but is not added to the registry.
#[derive(Educe, Clone)]
#[educe(Debug)]
pub struct ContainerProvider {
    registry: BackendRegistry,

    #[educe(Debug(ignore))]
    factory: Option<Arc<dyn ComputeServiceFactory>>,

    agent_port: u16,
    working_dir: String,

    #[educe(Debug(ignore))]
    containers: Arc<RwLock<HashMap<String, ContainerRecord>>>,
}

impl ContainerProvider {
    pub fn new(registry: BackendRegistry) -> Self {
        Self {
            registry,
            factory: None,
            agent_port: DEFAULT_SSH_PORT,
            working_dir: DEFAULT_WORKING_DIR.to_string(),
            containers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn with_factory(mut self, factory: Arc<dyn ComputeServiceFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn with_agent_port(mut self, port: u16) -> Self {
        self.agent_port = port;
        self
    }

    pub fn with_working_dir(mut self, working_dir: impl Into<String>) -> Self {
        self.working_dir = working_dir.into();
        self
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    pub fn agent_port(&self) -> u16 {
        self.agent_port
    }

    /// Create the containers described by `request`. Each endpoint reports the agent port.
    pub async fn create(&self, request: &CreateContainerRequest) -> Result<ProvisionOutcome> {
        self.provision(request, self.agent_port).await
    }

    /// Create a container that starts a new ensemble. The endpoint reports the ZooKeeper port.
    pub async fn create_cluster_server(
        &self,
        request: &CreateContainerRequest,
        name: &str,
    ) -> Result<ProvisionOutcome> {
        let request = CreateContainerRequest {
            name: name.to_string(),
            ensemble_server: true,
            zookeeper_url: None,
            ..request.clone()
        };
        self.provision(&request, ZOOKEEPER_PORT).await
    }

    /// A container previously created by this provider.
    pub fn container(&self, name: &str) -> Option<CreatedContainer> {
        self.containers
            .read()
            .get(name)
            .map(|record| record.container.clone())
    }

    /// Names of every container created by this provider, sorted.
    pub fn container_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.containers.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Destroy the node backing container `name`.
    pub async fn destroy(&self, name: &str) -> Result<()> {
        let (node_id, service) = match self.containers.read().get(name) {
            Some(record) => (record.container.node_id.clone(), record.service.clone()),
            None => {
                return Err(FabricError::NotFound(format!(
                    "Container {name} does not exist."
                )))
            }
        };

        log::info!(container = name, node = %node_id, "destroying container");
        service.destroy_node(&node_id).await?;
        self.containers.write().remove(name);
        Ok(())
    }

    async fn resolve(&self, request: &CreateContainerRequest) -> Result<Arc<dyn ComputeService>> {
        if request.provider_name.is_empty() {
            return Err(FabricError::InvalidRequest(
                "no provider was given".to_string(),
            ));
        }
        if let Some(service) = self.registry.get(&request.provider_name) {
            return Ok(service);
        }
        match &self.factory {
            Some(factory) => {
                log::debug!(
                    provider = %request.provider_name,
                    "no registered compute service, building one"
                );
                Ok(factory.create(&request.provider_properties()).await?)
            }
            None => Err(FabricError::InvalidRequest(format!(
                "no compute service is available for provider {}",
                request.provider_name
            ))),
        }
    }

    async fn provision(
        &self,
        request: &CreateContainerRequest,
        return_port: u16,
    ) -> Result<ProvisionOutcome> {
        if request.name.is_empty() {
            return Err(FabricError::InvalidRequest(
                "no container name was given".to_string(),
            ));
        }
        let service = self.resolve(request).await?;

        log::info!(
            provider = %request.provider_name,
            group = request.group(),
            number = request.number,
            instance_type = %request.instance_type,
            "allocating nodes"
        );
        let nodes = service
            .create_nodes_in_group(request.group(), request.number, &request.template())
            .await?;

        if nodes.len() < request.number {
            log::warn!(
                requested = request.number,
                allocated = nodes.len(),
                "provider returned fewer nodes than requested"
            );
        }

        let options = match &request.user {
            Some(user) => {
                RunScriptOptions::override_credentials_with(Credentials::user(user.as_str()))
                    .run_as_root(false)
            }
            None => RunScriptOptions::default(),
        };
        let allocated: Vec<String> = nodes.iter().map(|node| node.id().clone()).collect();
        let partial = |source: ComputeError| FabricError::PartialProvisioning {
            requested: request.number,
            allocated: allocated.clone(),
            source,
        };

        let mut outcome = ProvisionOutcome {
            requested: request.number,
            ..Default::default()
        };
        let mut suffix = 1;

        for node in &nodes {
            for address in node.public_addresses() {
                outcome.endpoints.push(format!("{address}:{return_port}"));
            }

            let container_name = if request.number > 1 {
                let name = format!("{}{}", request.name, suffix);
                suffix += 1;
                name
            } else {
                request.name.clone()
            };

            let script = BootstrapScript {
                proxy_uri: &request.proxy_uri,
                name: &container_name,
                working_dir: &self.working_dir,
                zookeeper_url: request.zookeeper_url.as_deref(),
                agent_port: self.agent_port,
                ensemble_server: request.ensemble_server,
                debug: request.debug,
            }
            .render()
            .map_err(|e| partial(e.into()))?;

            log::info!(container = %container_name, node = %node.id(), "running bootstrap script");
            service
                .run_script_on_node(node.id(), &script, &options)
                .await
                .map_err(partial)?;

            let container = CreatedContainer {
                name: container_name.clone(),
                provider: request.provider_name.clone(),
                node_id: node.id().clone(),
                public_addresses: node.public_addresses().clone(),
            };
            self.containers.write().insert(
                container_name,
                ContainerRecord {
                    container: container.clone(),
                    service: service.clone(),
                },
            );
            outcome.containers.push(container);
        }

        log::info!(addresses = %outcome.addresses(), "containers created");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::{NodeMetadata, Template};
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        scripts: Mutex<Vec<(String, String, RunScriptOptions)>>,
        destroyed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ComputeService for Recorder {
        fn provider_id(&self) -> Option<&str> {
            Some("test")
        }

        async fn create_nodes_in_group(
            &self,
            group: &str,
            count: usize,
            _template: &Template,
        ) -> std::result::Result<Vec<NodeMetadata>, ComputeError> {
            Ok((0..count)
                .map(|i| NodeMetadata::new(format!("{group}-{i}"), vec![format!("10.0.0.{i}")]))
                .collect())
        }

        async fn run_script_on_node(
            &self,
            node_id: &str,
            script: &str,
            options: &RunScriptOptions,
        ) -> std::result::Result<(), ComputeError> {
            self.scripts
                .lock()
                .push((node_id.to_string(), script.to_string(), options.clone()));
            Ok(())
        }

        async fn destroy_node(&self, node_id: &str) -> std::result::Result<(), ComputeError> {
            self.destroyed.lock().push(node_id.to_string());
            Ok(())
        }
    }

    fn provider() -> (Arc<Recorder>, ContainerProvider) {
        let recorder = Arc::new(Recorder::default());
        let registry = BackendRegistry::new();
        registry.bind(recorder.clone());
        (recorder, ContainerProvider::new(registry))
    }

    fn request(number: usize) -> CreateContainerRequest {
        CreateContainerRequest::builder()
            .proxy_uri("http://proxy:8040/")
            .provider_name("test")
            .name("agent")
            .number(number)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_single_container_keeps_name() {
        let (recorder, provider) = provider();
        let outcome = provider.create(&request(1)).await.unwrap();

        assert_eq!(outcome.addresses(), "10.0.0.0:8101");
        assert_eq!(outcome.containers()[0].name(), "agent");
        assert_eq!(outcome.containers()[0].node_id(), "agent-0");

        let scripts = recorder.scripts.lock();
        assert_eq!(scripts.len(), 1);
        assert!(scripts[0].1.contains("CONTAINER_NAME='agent'"));
        assert_eq!(scripts[0].2, RunScriptOptions::default());
    }

    #[tokio::test]
    async fn test_user_overrides_credentials() {
        let (recorder, provider) = provider();
        let request = CreateContainerRequest {
            user: Some("fuse".to_string()),
            ..request(1)
        };
        provider.create(&request).await.unwrap();

        let scripts = recorder.scripts.lock();
        let options = &scripts[0].2;
        assert_eq!(options.credentials, Some(Credentials::user("fuse")));
        assert!(!options.run_as_root);
    }

    #[tokio::test]
    async fn test_unknown_provider() {
        let provider = ContainerProvider::new(BackendRegistry::new());
        let err = provider.create(&request(1)).await.unwrap_err();
        assert_matches!(err, FabricError::InvalidRequest(_));
    }

    #[tokio::test]
    async fn test_destroy() {
        let (recorder, provider) = provider();
        provider.create(&request(2)).await.unwrap();
        assert_eq!(provider.container_names(), vec!["agent1", "agent2"]);

        provider.destroy("agent2").await.unwrap();
        assert_eq!(*recorder.destroyed.lock(), vec!["agent-1".to_string()]);
        assert!(provider.container("agent2").is_none());

        let err = provider.destroy("agent2").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Container agent2 does not exist.");
    }
}
