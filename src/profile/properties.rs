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

//! Flat `.properties` codec.
//!
//! Structured configuration units and attribute nodes hold a properties document. Encoding is
//! deterministic: keys are written in sorted order, one `key=value` per line, with no timestamp
//! header. Decoding accepts the full grammar other fabric members may have written: `#`/`!`
//! comments, `=`, `:` or whitespace separators, line continuations and backslash escapes
//! including `\uXXXX`. The legacy `key = value` rendering decodes as well.

use std::collections::BTreeMap;

pub type Properties = BTreeMap<String, String>;

pub fn to_bytes(properties: &Properties) -> Vec<u8> {
    let mut out = String::new();
    for (key, value) in properties {
        escape_into(&mut out, key, true);
        out.push('=');
        escape_into(&mut out, value, false);
        out.push('\n');
    }
    out.into_bytes()
}

pub fn from_bytes(data: &[u8]) -> Properties {
    let text = String::from_utf8_lossy(data);
    let mut properties = Properties::new();
    for line in logical_lines(&text) {
        let (key, value) = split_entry(&line);
        properties.insert(unescape(key), unescape(value));
    }
    properties
}

fn escape_into(out: &mut String, text: &str, is_key: bool) {
    for (idx, c) in text.chars().enumerate() {
        match c {
            ' ' if is_key || idx == 0 => out.push_str("\\ "),
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\x0c' => out.push_str("\\f"),
            '=' | ':' | '#' | '!' => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || (c as u32) > 0x7e => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    out.push_str(&format!("\\u{:04X}", unit));
                }
            }
            c => out.push(c),
        }
    }
}

fn is_blank(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\x0c')
}

/// A natural line continues onto the next one when it ends in an odd number of backslashes.
fn continues(line: &str) -> bool {
    line.chars().rev().take_while(|c| *c == '\\').count() % 2 == 1
}

fn logical_lines(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut natural = text.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));

    while let Some(line) = natural.next() {
        let line = line.trim_start_matches(is_blank);
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }

        let mut logical = String::from(line);
        while continues(&logical) {
            logical.pop();
            match natural.next() {
                Some(next) => logical.push_str(next.trim_start_matches(is_blank)),
                None => break,
            }
        }
        lines.push(logical);
    }
    lines
}

/// Split a logical line into its raw (still escaped) key and value.
fn split_entry(line: &str) -> (&str, &str) {
    let mut escaped = false;
    let mut key_end = line.len();
    let mut separator: Option<char> = None;

    for (idx, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '=' | ':' => {
                key_end = idx;
                separator = Some(c);
                break;
            }
            c if is_blank(c) => {
                key_end = idx;
                separator = Some(c);
                break;
            }
            _ => {}
        }
    }

    let key = &line[..key_end];
    let mut rest = match separator {
        Some(sep) => &line[key_end + sep.len_utf8()..],
        None => "",
    };
    if separator.is_some_and(is_blank) {
        rest = rest.trim_start_matches(is_blank);
        if let Some(stripped) = rest.strip_prefix(['=', ':']) {
            rest = stripped;
        }
    }
    (key, rest.trim_start_matches(is_blank))
}

fn unescape(raw: &str) -> String {
    let mut units: Vec<u16> = Vec::with_capacity(raw.len());
    let mut chars = raw.chars();
    let mut buf = [0u16; 2];

    while let Some(c) = chars.next() {
        let c = if c == '\\' {
            match chars.next() {
                Some('t') => '\t',
                Some('n') => '\n',
                Some('r') => '\r',
                Some('f') => '\x0c',
                Some('u') => {
                    let hex: String = chars.by_ref().take(4).collect();
                    match u16::from_str_radix(&hex, 16) {
                        Ok(unit) if hex.len() == 4 => {
                            units.push(unit);
                            continue;
                        }
                        // malformed escape, keep it literally
                        _ => {
                            units.extend("\\u".encode_utf16());
                            units.extend(hex.encode_utf16());
                            continue;
                        }
                    }
                }
                Some(other) => other,
                None => break,
            }
        } else {
            c
        };
        units.extend_from_slice(c.encode_utf16(&mut buf));
    }

    char::decode_utf16(units)
        .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}
