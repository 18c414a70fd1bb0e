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

//! Error types shared by the store and the orchestrator.
//!
//! Absence is not an error: read accessors return `Ok(None)` when the addressed version,
//! profile or unit does not exist. Everything that does surface as an error carries its cause.

use thiserror::Error;

pub type Result<T, E = FabricError> = std::result::Result<T, E>;

/// Errors raised by the coordination tree client.
#[derive(Debug, Error)]
pub enum TreeError {
    #[error("node {0} does not exist")]
    NoNode(String),

    #[error("invalid tree path: {0}")]
    InvalidPath(String),

    #[error("payload of {path} is not valid utf-8")]
    Utf8 {
        path: String,
        #[source]
        source: std::string::FromUtf8Error,
    },

    #[error(transparent)]
    Etcd(#[from] etcd_client::Error),
}

/// Errors raised by a compute backend.
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("provider {provider} could not be initialized: {reason}")]
    Provider { provider: String, reason: String },

    #[error("unable to allocate {requested} node(s): only {available} available")]
    InsufficientCapacity { requested: usize, available: usize },

    #[error("node {0} is not known to this backend")]
    UnknownNode(String),

    #[error("script on node {node} exited with {status}: {stderr}")]
    ScriptFailed {
        node: String,
        status: i32,
        stderr: String,
    },

    #[error("failed to launch script on node {node}")]
    Launch {
        node: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to render bootstrap script")]
    Template(#[from] minijinja::Error),
}

/// Domain error for all store and provisioning operations.
#[derive(Debug, Error)]
pub enum FabricError {
    #[error("invalid {kind} name: {name:?}")]
    InvalidName { kind: &'static str, name: String },

    #[error("{0}")]
    NotFound(String),

    #[error("invalid creation request: {0}")]
    InvalidRequest(String),

    #[error("coordination failure")]
    Coordination(#[from] TreeError),

    #[error("provisioning failure")]
    Provisioning(#[from] ComputeError),

    /// A script failed after nodes were allocated. The allocated nodes are left running.
    #[error("provisioning failed after allocating {} of {requested} node(s)", .allocated.len())]
    PartialProvisioning {
        requested: usize,
        allocated: Vec<String>,
        #[source]
        source: ComputeError,
    },
}

impl FabricError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FabricError::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_coordination_keeps_cause() {
        let err: FabricError = TreeError::NoNode("/fabric/configs/versions/1.0".into()).into();
        assert_eq!(err.to_string(), "coordination failure");
        let cause = err.source().unwrap();
        assert_eq!(
            cause.to_string(),
            "node /fabric/configs/versions/1.0 does not exist"
        );
    }

    #[test]
    fn test_partial_provisioning_message() {
        let err = FabricError::PartialProvisioning {
            requested: 3,
            allocated: vec!["n1".into(), "n2".into()],
            source: ComputeError::ScriptFailed {
                node: "n2".into(),
                status: 1,
                stderr: "boom".into(),
            },
        };
        assert_eq!(
            err.to_string(),
            "provisioning failed after allocating 2 of 3 node(s)"
        );
        assert!(!err.is_not_found());
    }
}
