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

//! Resolution of configuration entries into [`HostConfig`]s.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};

use super::types::{Defaults, FleetConfig, HostEntry};
use super::utils::{expand_env_vars, expand_tilde};
use crate::executor::Engine;
use crate::host::{
    local_username, split_target, Credential, HostConfig, HostKeyCheck, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_SSH_PORT,
};
use crate::security::Secret;

/// Per-host fields before defaults are applied.
#[derive(Default)]
struct Overrides<'a> {
    port: Option<u16>,
    user: Option<&'a str>,
    password: Option<&'a str>,
    ssh_key: Option<&'a str>,
    ssh_key_passphrase: Option<&'a str>,
    agent: Option<bool>,
    auto_sudo_password: Option<bool>,
    known_hosts: Option<&'a str>,
    host_key: Option<&'a str>,
    connect_timeout: Option<u64>,
    commands: Option<&'a [String]>,
}

impl FleetConfig {
    /// Resolve every entry against the defaults.
    ///
    /// Fails on an entry without a credential, an invalid target, or a
    /// duplicate or empty host id.
    pub fn host_configs(&self) -> Result<Vec<HostConfig>> {
        let mut seen = HashSet::new();
        let mut hosts = Vec::with_capacity(self.hosts.len());

        for (index, entry) in self.hosts.iter().enumerate() {
            let host = resolve_entry(entry, &self.defaults)
                .with_context(|| format!("Invalid host entry #{}", index + 1))?;
            if host.id.trim().is_empty() {
                bail!("Host entry #{} has an empty id", index + 1);
            }
            if !seen.insert(host.id.clone()) {
                bail!("Duplicate host id '{}'", host.id);
            }
            hosts.push(host);
        }

        Ok(hosts)
    }

    /// An SSH engine over the resolved hosts.
    pub fn build_engine(&self) -> Result<Engine> {
        Ok(Engine::new(self.host_configs()?))
    }
}

fn resolve_entry(entry: &HostEntry, defaults: &Defaults) -> Result<HostConfig> {
    match entry {
        HostEntry::Simple(target) => {
            let (user, host, port) = split_target(target)?;
            let overrides = Overrides {
                port,
                user,
                ..Default::default()
            };
            build(target, host, &overrides, defaults)
        }
        HostEntry::Detailed {
            id,
            host,
            port,
            user,
            password,
            ssh_key,
            ssh_key_passphrase,
            agent,
            auto_sudo_password,
            known_hosts,
            host_key,
            connect_timeout,
            commands,
        } => {
            let overrides = Overrides {
                port: *port,
                user: user.as_deref(),
                password: password.as_deref(),
                ssh_key: ssh_key.as_deref(),
                ssh_key_passphrase: ssh_key_passphrase.as_deref(),
                agent: *agent,
                auto_sudo_password: *auto_sudo_password,
                known_hosts: known_hosts.as_deref(),
                host_key: host_key.as_deref(),
                connect_timeout: *connect_timeout,
                commands: commands.as_deref(),
            };
            build(id.as_deref().unwrap_or(host), host, &overrides, defaults)
        }
    }
}

fn build(id: &str, host: &str, entry: &Overrides<'_>, defaults: &Defaults) -> Result<HostConfig> {
    if host.trim().is_empty() {
        bail!("Host '{id}' has an empty host name");
    }

    let username = entry
        .user
        .map(str::to_string)
        .or_else(|| defaults.user.clone())
        .unwrap_or_else(local_username);

    let credential = resolve_credential(entry, defaults)
        .with_context(|| format!("No credential configured for host '{id}'"))?;

    let host_key_check = match entry.host_key {
        Some(key) => HostKeyCheck::PublicKey(key.trim().to_string()),
        None => known_hosts_policy(entry.known_hosts.or(defaults.known_hosts.as_deref())),
    };

    let connect_timeout = entry
        .connect_timeout
        .or(defaults.connect_timeout)
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_CONNECT_TIMEOUT);

    let commands = entry
        .commands
        .map(<[String]>::to_vec)
        .unwrap_or_else(|| defaults.commands.clone());

    let auto_sudo_password = entry
        .auto_sudo_password
        .or(defaults.auto_sudo_password)
        .unwrap_or(true);

    Ok(HostConfig::new(id, host, username, credential)
        .with_port(entry.port.or(defaults.port).unwrap_or(DEFAULT_SSH_PORT))
        .with_auto_sudo_password(auto_sudo_password)
        .with_host_key_check(host_key_check)
        .with_connect_timeout(connect_timeout)
        .with_commands(commands))
}

/// Entry settings win over defaults; within each level a password wins over
/// a key, and a key over the agent.
fn resolve_credential(entry: &Overrides<'_>, defaults: &Defaults) -> Option<Credential> {
    let passphrase = entry
        .ssh_key_passphrase
        .or(defaults.ssh_key_passphrase.as_deref());

    credential_from(entry.password, entry.ssh_key, passphrase, entry.agent).or_else(|| {
        credential_from(
            defaults.password.as_deref(),
            defaults.ssh_key.as_deref(),
            passphrase,
            defaults.agent,
        )
    })
}

fn credential_from(
    password: Option<&str>,
    ssh_key: Option<&str>,
    passphrase: Option<&str>,
    agent: Option<bool>,
) -> Option<Credential> {
    if let Some(password) = password {
        return Some(Credential::Password(Secret::new(expand_env_vars(password))));
    }
    if let Some(key) = ssh_key {
        return Some(Credential::KeyFile {
            path: expand_path(key),
            passphrase: passphrase.map(|p| Secret::new(expand_env_vars(p))),
        });
    }
    if agent == Some(true) {
        return Some(Credential::Agent);
    }
    None
}

fn known_hosts_policy(value: Option<&str>) -> HostKeyCheck {
    match value.map(str::trim) {
        None | Some("") | Some("none") | Some("accept-any") => HostKeyCheck::AcceptAny,
        Some("default") => HostKeyCheck::DefaultKnownHosts,
        Some(path) => HostKeyCheck::KnownHostsFile(expand_path(path)),
    }
}

fn expand_path(path: &str) -> PathBuf {
    expand_tilde(Path::new(&expand_env_vars(path)))
}
