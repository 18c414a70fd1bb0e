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

use once_cell::sync::Lazy;
use regex::Regex;

use crate::{errors::FabricError, tree::join, Result};

/// Suffix of configuration units stored in the structured layout.
pub const PROPERTIES_SUFFIX: &str = ".properties";

pub const DEFAULT_ROOT: &str = "/fabric/configs";

static ALLOWED_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._~@+-]*$").expect("valid regex"));

pub(crate) fn validate_name(kind: &'static str, name: &str) -> Result<()> {
    if ALLOWED_CHARS.is_match(name) {
        Ok(())
    } else {
        Err(FabricError::InvalidName {
            kind,
            name: name.to_string(),
        })
    }
}

/// Layout of the configuration namespace in the coordination tree.
///
/// ```text
/// {root}/versions/{version}                               version attributes
/// {root}/versions/{version}/profiles/{profile}            profile attributes
/// {root}/versions/{version}/profiles/{profile}/{pid}      raw configuration unit
/// {root}/versions/{version}/profiles/{profile}/{pid}.properties
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPaths {
    root: String,
}

impl Default for ConfigPaths {
    fn default() -> Self {
        Self::new(DEFAULT_ROOT)
    }
}

impl ConfigPaths {
    pub fn new(root: impl Into<String>) -> Self {
        let root = root.into();
        let root = match root.trim_end_matches('/') {
            "" => "/".to_string(),
            trimmed => trimmed.to_string(),
        };
        Self { root }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn versions(&self) -> String {
        join(&self.root, "versions")
    }

    pub fn version(&self, version: &str) -> Result<String> {
        validate_name("version", version)?;
        Ok(join(&self.versions(), version))
    }

    pub fn profiles(&self, version: &str) -> Result<String> {
        Ok(join(&self.version(version)?, "profiles"))
    }

    pub fn profile(&self, version: &str, profile: &str) -> Result<String> {
        validate_name("profile", profile)?;
        Ok(join(&self.profiles(version)?, profile))
    }

    pub fn unit(&self, version: &str, profile: &str, pid: &str) -> Result<String> {
        validate_name("pid", pid)?;
        Ok(join(&self.profile(version, profile)?, pid))
    }

    pub fn structured_unit(&self, version: &str, profile: &str, pid: &str) -> Result<String> {
        self.unit(version, profile, &format!("{pid}{PROPERTIES_SUFFIX}"))
    }
}
