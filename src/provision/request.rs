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

use derive_builder::Builder;
use url::Url;

use super::query::{parse_query, value};
use crate::{
    compute::{InstanceType, ProviderProperties, Template},
    errors::FabricError,
    Result,
};

const IMAGE_ID: &str = "imageId";
const LOCATION_ID: &str = "locationId";
const HARDWARE_ID: &str = "hardwareId";
const GROUP: &str = "group";
const USER: &str = "user";
const INSTANCE_TYPE: &str = "instanceType";

/// Everything needed to create one or more containers on a compute provider.
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
#[builder(default)]
pub struct CreateContainerRequest {
    /// Where new nodes download the agent distribution from.
    #[builder(setter(into))]
    pub proxy_uri: String,

    #[builder(setter(into))]
    pub provider_name: String,

    /// Container name, or the base name when more than one container is created.
    #[builder(setter(into))]
    pub name: String,

    pub number: usize,

    #[builder(setter(into, strip_option))]
    pub zookeeper_url: Option<String>,

    pub ensemble_server: bool,
    pub debug: bool,

    #[builder(setter(into, strip_option))]
    pub image_id: Option<String>,
    #[builder(setter(into, strip_option))]
    pub location_id: Option<String>,
    #[builder(setter(into, strip_option))]
    pub hardware_id: Option<String>,

    /// Node group. Defaults to the container name.
    #[builder(setter(into, strip_option))]
    pub group: Option<String>,

    /// Login used to run the bootstrap script. When unset the provider defaults apply.
    #[builder(setter(into, strip_option))]
    pub user: Option<String>,

    pub instance_type: InstanceType,

    #[builder(setter(into, strip_option))]
    pub identity: Option<String>,
    #[builder(setter(into, strip_option))]
    pub credential: Option<String>,
    #[builder(setter(into, strip_option))]
    pub owner: Option<String>,
}

impl Default for CreateContainerRequest {
    fn default() -> Self {
        Self {
            proxy_uri: String::new(),
            provider_name: String::new(),
            name: String::new(),
            number: 1,
            zookeeper_url: None,
            ensemble_server: false,
            debug: false,
            image_id: None,
            location_id: None,
            hardware_id: None,
            group: None,
            user: None,
            instance_type: InstanceType::Smallest,
            identity: None,
            credential: None,
            owner: None,
        }
    }
}

impl CreateContainerRequest {
    pub fn builder() -> CreateContainerRequestBuilder {
        CreateContainerRequestBuilder::default()
    }

    /// Build a request from a container URI such as
    /// `jclouds://aws-ec2?imageId=ami-123&instanceType=Biggest&user=fuse`.
    ///
    /// The URI host names the provider and the query carries the node selection.
    pub fn from_uri(
        proxy_uri: &str,
        container_uri: &str,
        name: &str,
        zookeeper_url: Option<&str>,
    ) -> Result<Self> {
        let uri = Url::parse(container_uri)
            .map_err(|e| FabricError::InvalidRequest(format!("{container_uri}: {e}")))?;

        let provider_name = uri
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| {
                FabricError::InvalidRequest(format!(
                    "container uri {container_uri} does not name a provider"
                ))
            })?;

        let parameters = parse_query(uri.query());
        let owned = |key: &str| value(&parameters, key).map(str::to_string);

        Ok(Self {
            proxy_uri: proxy_uri.to_string(),
            provider_name: provider_name.to_string(),
            name: name.to_string(),
            zookeeper_url: zookeeper_url.map(str::to_string),
            image_id: owned(IMAGE_ID),
            location_id: owned(LOCATION_ID),
            hardware_id: owned(HARDWARE_ID),
            group: owned(GROUP),
            user: owned(USER),
            instance_type: value(&parameters, INSTANCE_TYPE)
                .map(|token| InstanceType::parse_or(token, InstanceType::Smallest))
                .unwrap_or_default(),
            ..Default::default()
        })
    }

    pub fn template(&self) -> Template {
        Template {
            instance_type: self.instance_type,
            location_id: self.location_id.clone(),
            image_id: self.image_id.clone(),
            hardware_id: self.hardware_id.clone(),
        }
    }

    pub fn provider_properties(&self) -> ProviderProperties {
        ProviderProperties {
            provider: self.provider_name.clone(),
            identity: self.identity.clone(),
            credential: self.credential.clone(),
            owner: self.owner.clone().filter(|owner| !owner.is_empty()),
        }
    }

    pub fn group(&self) -> &str {
        self.group.as_deref().unwrap_or(&self.name)
    }
}
