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

//! Configuration type definitions.

use serde::{Deserialize, Serialize};

/// A fleet file: shared defaults and the list of hosts.
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct FleetConfig {
    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub hosts: Vec<HostEntry>,
}

/// Settings applied to every host that does not override them.
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct Defaults {
    pub user: Option<String>,
    pub port: Option<u16>,
    /// Login password. `${VAR}` and `$VAR` are expanded.
    pub password: Option<String>,
    pub ssh_key: Option<String>,
    pub ssh_key_passphrase: Option<String>,
    /// Authenticate with the SSH agent.
    pub agent: Option<bool>,
    /// Dial timeout in seconds.
    pub connect_timeout: Option<u64>,
    pub auto_sudo_password: Option<bool>,
    /// `default` for `~/.ssh/known_hosts`, `none` to accept any key, or a
    /// path to a known_hosts file.
    pub known_hosts: Option<String>,
    #[serde(default)]
    pub commands: Vec<String>,
}

/// One host of the fleet.
///
/// Either a `[user@]host[:port]` string or a map with per-host settings.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(untagged)]
pub enum HostEntry {
    Detailed {
        /// Defaults to the host name.
        #[serde(default)]
        id: Option<String>,
        host: String,
        #[serde(default)]
        port: Option<u16>,
        #[serde(default)]
        user: Option<String>,
        #[serde(default)]
        password: Option<String>,
        #[serde(default)]
        ssh_key: Option<String>,
        #[serde(default)]
        ssh_key_passphrase: Option<String>,
        #[serde(default)]
        agent: Option<bool>,
        #[serde(default)]
        auto_sudo_password: Option<bool>,
        #[serde(default)]
        known_hosts: Option<String>,
        /// Expected server key, OpenSSH base64.
        #[serde(default)]
        host_key: Option<String>,
        #[serde(default)]
        connect_timeout: Option<u64>,
        #[serde(default)]
        commands: Option<Vec<String>>,
    },
    Simple(String),
}
