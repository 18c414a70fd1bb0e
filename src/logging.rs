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

//! Diagnostics go through [tracing]. Nothing is printed until [init] installs a subscriber.
//!
//! - `RUST_LOG` sets the filter, `info` by default.
//! - `FABRIC_LOGGING_JSONL=1` writes one JSON object per line instead of compact text.

use std::sync::Once;

use tracing_subscriber::filter::{Directive, LevelFilter};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Once instance to ensure the logger is only initialized once
static INIT: Once = Once::new();

/// ENV used to set the log level
const FILTER_ENV: &str = "RUST_LOG";

/// ENV used to switch to JSON lines output
const JSONL_ENV: &str = "FABRIC_LOGGING_JSONL";

/// Default log filter, anything RUST_LOG can take
const DEFAULT_DIRECTIVE: &str = "info";

fn jsonl_enabled() -> bool {
    std::env::var(JSONL_ENV)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

fn default_directive() -> Directive {
    DEFAULT_DIRECTIVE
        .parse()
        .unwrap_or_else(|_| LevelFilter::INFO.into())
}

/// Setup logging. You won't see any output unless you run this.
pub fn init() {
    INIT.call_once(|| {
        let filter_layer = || {
            EnvFilter::builder()
                .with_default_directive(default_directive())
                .with_env_var(FILTER_ENV)
                .from_env_lossy()
        };

        if jsonl_enabled() {
            let l = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_filter(filter_layer());
            tracing_subscriber::registry().with(l).init();
        } else {
            let l = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .event_format(tracing_subscriber::fmt::format().compact())
                .with_writer(std::io::stderr)
                .with_filter(filter_layer());
            tracing_subscriber::registry().with(l).init();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jsonl_toggle() {
        temp_env::with_var(JSONL_ENV, Some("1"), || assert!(jsonl_enabled()));
        temp_env::with_var(JSONL_ENV, Some("TRUE"), || assert!(jsonl_enabled()));
        temp_env::with_var(JSONL_ENV, Some("0"), || assert!(!jsonl_enabled()));
        temp_env::with_var_unset(JSONL_ENV, || assert!(!jsonl_enabled()));
    }

    #[test]
    fn test_init_is_idempotent() {
        init();
        init();
        tracing::info!("logging initialized");
    }
}
