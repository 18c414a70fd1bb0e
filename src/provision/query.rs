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

use std::collections::BTreeMap;

use percent_encoding::percent_decode_str;

/// Query parameters. A parameter given without `=` maps to `None`.
pub type QueryParameters = BTreeMap<String, Option<String>>;

/// Form-decode one component: `+` is a space, `%XX` is a byte.
fn decode(component: &str) -> String {
    let spaced = component.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}

/// Split a raw query string into decoded parameters.
///
/// Parameters are separated by `&` and split on the first `=`. A later duplicate replaces an
/// earlier one.
pub fn parse_query(query: Option<&str>) -> QueryParameters {
    let mut parameters = QueryParameters::new();
    let Some(query) = query else {
        return parameters;
    };

    for parameter in query.split('&').filter(|p| !p.is_empty()) {
        match parameter.split_once('=') {
            Some((name, value)) => {
                parameters.insert(decode(name), Some(decode(value)));
            }
            None => {
                parameters.insert(parameter.to_string(), None);
            }
        }
    }
    parameters
}

/// Value of `name`, treating a parameter without a value as absent.
pub(crate) fn value<'a>(parameters: &'a QueryParameters, name: &str) -> Option<&'a str> {
    parameters.get(name).and_then(|v| v.as_deref())
}
