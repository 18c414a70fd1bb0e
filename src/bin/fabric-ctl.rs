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

//! `fabric-ctl` drives the profile store and the container provider from the command line.

use std::{path::PathBuf, sync::Arc};

use bytes::Bytes;
use clap::{Args, Parser, Subcommand};

use fabric_runtime::{
    compute::BackendRegistry,
    error, logging,
    profile::{AttributeScope, ProfileStore, RawConfigurations},
    provision::{ContainerProvider, CreateContainerRequest},
    transports::etcd::{Client, EtcdTree},
    ErrorContext, FabricConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage versions
    #[command(subcommand)]
    Version(VersionCommand),

    /// Manage profiles of a version
    #[command(subcommand)]
    Profile(ProfileCommand),

    /// Read and write version or profile attributes
    #[command(subcommand)]
    Attr(AttrCommand),

    /// Read and replace the configuration units of a profile
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Create containers on a compute provider
    #[command(subcommand)]
    Container(ContainerCommand),
}

#[derive(Subcommand, Debug)]
enum VersionCommand {
    List,
    Create { version: String },
    Delete { version: String },
}

#[derive(Subcommand, Debug)]
enum ProfileCommand {
    List { version: String },
    Create { version: String, profile: String },
    Delete { version: String, profile: String },
}

#[derive(Args, Debug)]
struct ScopeArgs {
    version: String,

    /// Address the profile attributes instead of the version attributes
    #[arg(long)]
    profile: Option<String>,
}

impl ScopeArgs {
    fn scope(&self) -> AttributeScope {
        match &self.profile {
            Some(profile) => AttributeScope::profile(&self.version, profile),
            None => AttributeScope::version(&self.version),
        }
    }
}

#[derive(Subcommand, Debug)]
enum AttrCommand {
    Get {
        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Set an attribute, or remove it when no value is given
    Set {
        #[command(flatten)]
        scope: ScopeArgs,
        key: String,
        value: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Print the units of a profile
    Show {
        version: String,
        profile: String,

        /// Print the key/value view of the `.properties` units as JSON
        #[arg(long)]
        json: bool,
    },

    /// Replace every unit of a profile with the files of a directory, one unit per file
    Import {
        version: String,
        profile: String,
        dir: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum ContainerCommand {
    Create {
        /// Container uri, e.g. `jclouds://aws-ec2?imageId=ami-123&user=fuse`
        #[arg(long)]
        uri: String,

        /// Where new nodes download the agent from
        #[arg(long, env = "FABRIC_PROXY_URI")]
        proxy: String,

        #[arg(long)]
        name: String,

        #[arg(long, default_value_t = 1)]
        number: usize,

        #[arg(long)]
        zookeeper_url: Option<String>,

        /// Start a new ensemble instead of joining one
        #[arg(long)]
        ensemble_server: bool,

        #[arg(long)]
        debug: bool,
    },
}

async fn store(config: &FabricConfig) -> anyhow::Result<ProfileStore> {
    let client = Client::new(config.etcd_client_options()).await?;
    Ok(ProfileStore::new(
        Arc::new(EtcdTree::new(client)),
        config.config_paths(),
    ))
}

fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{line}");
    }
}

async fn run_version(config: &FabricConfig, command: VersionCommand) -> anyhow::Result<()> {
    let store = store(config).await?;
    match command {
        VersionCommand::List => print_lines(&store.versions().await?),
        VersionCommand::Create { version } => store.create_version(&version).await?,
        VersionCommand::Delete { version } => store.delete_version(&version).await?,
    }
    Ok(())
}

async fn run_profile(config: &FabricConfig, command: ProfileCommand) -> anyhow::Result<()> {
    let store = store(config).await?;
    match command {
        ProfileCommand::List { version } => print_lines(&store.profiles(&version).await?),
        ProfileCommand::Create { version, profile } => {
            store.create_profile(&version, &profile).await?
        }
        ProfileCommand::Delete { version, profile } => {
            store.delete_profile(&version, &profile).await?
        }
    }
    Ok(())
}

async fn run_attr(config: &FabricConfig, command: AttrCommand) -> anyhow::Result<()> {
    let store = store(config).await?;
    match command {
        AttrCommand::Get { scope } => {
            for (key, value) in store.get_attributes(&scope.scope()).await? {
                println!("{key}={value}");
            }
        }
        AttrCommand::Set { scope, key, value } => {
            store
                .set_attribute(&scope.scope(), &key, value.as_deref())
                .await?
        }
    }
    Ok(())
}

async fn run_config(config: &FabricConfig, command: ConfigCommand) -> anyhow::Result<()> {
    let store = store(config).await?;
    match command {
        ConfigCommand::Show {
            version,
            profile,
            json: true,
        } => {
            let configurations = store.get_configurations(&version, &profile).await?;
            println!("{}", serde_json::to_string_pretty(&configurations)?);
        }
        ConfigCommand::Show {
            version, profile, ..
        } => {
            for (pid, data) in store.get_all_raw_configurations(&version, &profile).await? {
                println!("# {pid}");
                println!("{}", String::from_utf8_lossy(&data).trim_end());
            }
        }
        ConfigCommand::Import {
            version,
            profile,
            dir,
        } => {
            let mut configurations = RawConfigurations::new();
            let entries = std::fs::read_dir(&dir)
                .with_context(|| format!("unable to read {}", dir.display()))?;
            for entry in entries {
                let path = entry?.path();
                if !path.is_file() {
                    continue;
                }
                let pid = path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .ok_or_else(|| error!("unsupported file name: {}", path.display()))?
                    .to_string();
                let data = std::fs::read(&path)
                    .with_context(|| format!("unable to read {}", path.display()))?;
                configurations.insert(pid, Bytes::from(data));
            }
            tracing::info!(
                count = configurations.len(),
                %version,
                %profile,
                "importing configuration units"
            );
            store
                .set_all_raw_configurations(&version, &profile, &configurations)
                .await?;
        }
    }
    Ok(())
}

async fn run_container(config: &FabricConfig, command: ContainerCommand) -> anyhow::Result<()> {
    let ContainerCommand::Create {
        uri,
        proxy,
        name,
        number,
        zookeeper_url,
        ensemble_server,
        debug,
    } = command;

    let provider = ContainerProvider::new(BackendRegistry::new())
        .with_factory(Arc::new(config.compute_factory()))
        .with_agent_port(config.provisioning.agent_port)
        .with_working_dir(config.provisioning.working_dir.as_str());

    let request = CreateContainerRequest {
        number,
        debug,
        ..CreateContainerRequest::from_uri(&proxy, &uri, &name, zookeeper_url.as_deref())?
    };

    let outcome = if ensemble_server {
        provider.create_cluster_server(&request, &name).await?
    } else {
        provider.create(&request).await?
    };

    if outcome.is_partial() {
        eprintln!(
            "only {} of {} container(s) were created",
            outcome.containers().len(),
            outcome.requested()
        );
    }
    println!("{outcome}");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let cli = Cli::parse();
    let config = FabricConfig::from_settings()?;

    match cli.command {
        Command::Version(command) => run_version(&config, command).await,
        Command::Profile(command) => run_profile(&config, command).await,
        Command::Attr(command) => run_attr(&config, command).await,
        Command::Config(command) => run_config(&config, command).await,
        Command::Container(command) => run_container(&config, command).await,
    }
}
