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

//! Startup script run on every new node.

use minijinja::Environment;
use serde::Serialize;

const TEMPLATE_NAME: &str = "bootstrap.sh";
const TEMPLATE: &str = include_str!("templates/bootstrap.sh.j2");

/// Quote `value` as a single POSIX shell word.
pub fn shell_quote(value: String) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Quote a path, leaving a leading `~/` to expand to the login's home directory.
pub fn shell_path(value: String) -> String {
    match value.strip_prefix("~/") {
        Some("") => "\"$HOME\"".to_string(),
        Some(rest) => format!("\"$HOME\"/{}", shell_quote(rest.to_string())),
        None if value == "~" => "\"$HOME\"".to_string(),
        None => shell_quote(value),
    }
}

/// Inputs of the bootstrap script.
#[derive(Debug, Clone, Serialize)]
pub struct BootstrapScript<'a> {
    pub proxy_uri: &'a str,
    pub name: &'a str,
    pub working_dir: &'a str,
    pub zookeeper_url: Option<&'a str>,
    pub agent_port: u16,
    pub ensemble_server: bool,
    pub debug: bool,
}

impl BootstrapScript<'_> {
    pub fn render(&self) -> Result<String, minijinja::Error> {
        let mut env = Environment::new();
        env.add_filter("sq", shell_quote);
        env.add_filter("shell_path", shell_path);
        env.add_template(TEMPLATE_NAME, TEMPLATE)?;
        env.get_template(TEMPLATE_NAME)?.render(self)
    }
}
