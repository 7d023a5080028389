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

//! Configuration loading.

use anyhow::{Context, Result};
use std::path::Path;
use tokio::fs;

use super::types::FleetConfig;
use super::utils::expand_tilde;

impl FleetConfig {
    /// Load a fleet file. A leading `~/` in `path` is expanded.
    pub async fn load(path: &Path) -> Result<Self> {
        let expanded_path = expand_tilde(path);

        let content = fs::read_to_string(&expanded_path).await.with_context(|| {
            format!(
                "Failed to read fleet configuration file at {}",
                expanded_path.display()
            )
        })?;

        Self::from_yaml_str(&content).with_context(|| {
            format!(
                "Failed to parse fleet configuration file at {}",
                expanded_path.display()
            )
        })
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: FleetConfig = serde_yaml::from_str(content).context(
            "Invalid YAML. Common issues:\n  - Incorrect indentation (use spaces, not tabs)\n  - Missing colons after keys",
        )?;
        tracing::debug!(hosts = config.hosts.len(), "loaded fleet configuration");
        Ok(config)
    }
}
