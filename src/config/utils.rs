// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Configuration utility functions.

use std::path::{Path, PathBuf};

/// Expand a leading `~` or `~/` to the home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Some(path_str) = path.to_str() else {
        return path.to_path_buf();
    };
    let Ok(home) = std::env::var("HOME") else {
        return path.to_path_buf();
    };

    if path_str == "~" {
        PathBuf::from(home)
    } else if let Some(rest) = path_str.strip_prefix("~/") {
        Path::new(&home).join(rest)
    } else {
        path.to_path_buf()
    }
}

/// Expand `${VAR}` and `$VAR` references.
///
/// Unset variables are left as written.
pub fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(dollar) = rest.find('$') {
        result.push_str(&rest[..dollar]);
        let after = &rest[dollar + 1..];

        if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) if is_var_name(&braced[..end]) => {
                    let name = &braced[..end];
                    result.push_str(&lookup(name).unwrap_or_else(|| format!("${{{name}}}")));
                    rest = &braced[end + 1..];
                }
                _ => {
                    result.push_str("${");
                    rest = braced;
                }
            }
            continue;
        }

        let name_len = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(after.len());
        let name = &after[..name_len];
        if name.is_empty() {
            result.push('$');
        } else {
            result.push_str(&lookup(name).unwrap_or_else(|| format!("${name}")));
        }
        rest = &after[name_len..];
    }

    result.push_str(rest);
    result
}

fn is_var_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn lookup(name: &str) -> Option<String> {
    let value = std::env::var(name).ok();
    if value.is_none() {
        tracing::debug!("Environment variable {} not found", name);
    }
    value
}
