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

//! Runtime configuration.
//!
//! Settings are layered, later sources win:
//!
//! 1. built-in defaults
//! 2. `/etc/fabric/fabric.toml`
//! 3. the TOML file named by `FABRIC_CONFIG`
//! 4. `FABRIC_*` environment variables, with `__` separating nested keys,
//!    e.g. `FABRIC_STORE__ROOT=/fabric/configs`

use std::{collections::HashMap, time::Duration};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{
    compute::pool::{ShellPoolConfig, ShellPoolFactory},
    profile::{paths::DEFAULT_ROOT, ConfigPaths},
    provision::{DEFAULT_SSH_PORT, DEFAULT_WORKING_DIR},
    raise,
    transports::etcd::{default_servers, ClientOptions},
    ErrorContext,
};

const SYSTEM_CONFIG_PATH: &str = "/etc/fabric/fabric.toml";
const CONFIG_PATH_ENV: &str = "FABRIC_CONFIG";
const ENV_PREFIX: &str = "FABRIC_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct EtcdSettings {
    #[validate(length(min = 1))]
    pub endpoints: Vec<String>,

    #[validate(range(min = 1))]
    pub connect_timeout_secs: u64,
}

impl Default for EtcdSettings {
    fn default() -> Self {
        Self {
            endpoints: default_servers(),
            connect_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct StoreSettings {
    /// Root of the configuration namespace in the coordination tree.
    #[validate(length(min = 1))]
    pub root: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            root: DEFAULT_ROOT.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ProvisioningSettings {
    #[validate(range(min = 1))]
    pub agent_port: u16,

    pub working_dir: String,

    /// Shell-pool providers, keyed by provider name.
    pub providers: HashMap<String, ShellPoolConfig>,
}

impl Default for ProvisioningSettings {
    fn default() -> Self {
        Self {
            agent_port: DEFAULT_SSH_PORT,
            working_dir: DEFAULT_WORKING_DIR.to_string(),
            providers: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct FabricConfig {
    #[validate(nested)]
    pub etcd: EtcdSettings,

    #[validate(nested)]
    pub store: StoreSettings,

    #[validate(nested)]
    pub provisioning: ProvisioningSettings,
}

impl FabricConfig {
    /// The layered sources, before extraction.
    pub fn figment() -> Figment {
        let mut figment = Figment::new()
            .merge(Serialized::defaults(FabricConfig::default()))
            .merge(Toml::file(SYSTEM_CONFIG_PATH));

        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            figment = figment.merge(Toml::file(path));
        }

        figment.merge(
            Env::prefixed(ENV_PREFIX)
                .ignore(&["config", "logging_jsonl"])
                .split("__"),
        )
    }

    /// Load and validate the configuration from every source.
    pub fn from_settings() -> anyhow::Result<FabricConfig> {
        let config: FabricConfig = Self::figment()
            .extract()
            .context("failed to load fabric configuration")?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> anyhow::Result<()> {
        self.validate()?;

        if !self.store.root.starts_with('/') {
            raise!("store root must be an absolute path: {}", self.store.root);
        }
        for (name, provider) in &self.provisioning.providers {
            provider
                .validate()
                .with_context(|| format!("invalid definition for provider {name}"))?;
        }
        Ok(())
    }

    pub fn etcd_client_options(&self) -> ClientOptions {
        ClientOptions {
            etcd_url: self.etcd.endpoints.clone(),
            etcd_connect_options: None,
        }
        .with_connect_timeout(Duration::from_secs(self.etcd.connect_timeout_secs))
    }

    pub fn config_paths(&self) -> ConfigPaths {
        ConfigPaths::new(self.store.root.as_str())
    }

    pub fn compute_factory(&self) -> ShellPoolFactory {
        ShellPoolFactory::new(self.provisioning.providers.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults() {
        let config = FabricConfig::default();
        assert!(config.check().is_ok());
        assert_eq!(config.store.root, "/fabric/configs");
        assert_eq!(config.provisioning.agent_port, 8101);
        assert_eq!(config.provisioning.working_dir, "~/");
        assert!(config.provisioning.providers.is_empty());
    }

    #[test]
    fn test_file_and_env_layers() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "fabric.toml",
                r#"
                [store]
                root = "/from/file"

                [provisioning]
                agent_port = 9101

                [provisioning.providers.lab]
                user = "fuse"
                hosts = [{ address = "10.0.0.1", location = "east" }, { address = "10.0.0.2" }]
                "#,
            )?;
            jail.set_env("FABRIC_CONFIG", "fabric.toml");
            jail.set_env("FABRIC_STORE__ROOT", "/from/env");
            jail.set_env("FABRIC_ETCD__ENDPOINTS", "[\"http://etcd:2379\"]");

            let config = FabricConfig::from_settings().map_err(|e| e.to_string())?;
            assert_eq!(config.store.root, "/from/env");
            assert_eq!(config.provisioning.agent_port, 9101);
            assert_eq!(config.etcd.endpoints, vec!["http://etcd:2379".to_string()]);

            let lab = &config.provisioning.providers["lab"];
            assert_eq!(lab.user, "fuse");
            assert_eq!(lab.hosts.len(), 2);
            assert_eq!(lab.hosts[0].location.as_deref(), Some("east"));
            assert_eq!(lab.launcher[0], "ssh");
            Ok(())
        });
    }

    #[test]
    fn test_relative_root_is_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("FABRIC_STORE__ROOT", "relative");
            assert!(FabricConfig::from_settings().is_err());
            Ok(())
        });
    }

    #[test]
    fn test_zero_port_is_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("FABRIC_PROVISIONING__AGENT_PORT", "0");
            assert!(FabricConfig::from_settings().is_err());
            Ok(())
        });
    }
}
