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

//! Per-host connection settings.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::security::Secret;

pub const DEFAULT_SSH_PORT: u16 = 22;

/// Dial timeout applied when a host does not set its own.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// How the transport authenticates to a host.
#[derive(Debug, Clone)]
pub enum Credential {
    Password(Secret),
    KeyFile {
        path: PathBuf,
        passphrase: Option<Secret>,
    },
    Agent,
}

/// Server host key verification policy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum HostKeyCheck {
    /// Accept whatever key the server presents.
    #[default]
    AcceptAny,
    /// Check against `~/.ssh/known_hosts`.
    DefaultKnownHosts,
    /// Check against the given known_hosts file.
    KnownHostsFile(PathBuf),
    /// Require this exact key, in OpenSSH base64 form.
    PublicKey(String),
}

/// Connection settings for one host of the fleet.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Unique identifier used for session lookup and exported to remote
    /// commands as `FLEET_HOST_ID`.
    pub id: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub credential: Credential,
    /// Write the login password to stdin of commands that start with `sudo`.
    pub auto_sudo_password: bool,
    pub host_key_check: HostKeyCheck,
    pub connect_timeout: Duration,
    /// Commands run by `Engine::execute_configured`.
    pub commands: Vec<String>,
}

impl HostConfig {
    pub fn new(
        id: impl Into<String>,
        host: impl Into<String>,
        username: impl Into<String>,
        credential: Credential,
    ) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port: DEFAULT_SSH_PORT,
            username: username.into(),
            credential,
            auto_sudo_password: false,
            host_key_check: HostKeyCheck::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            commands: Vec::new(),
        }
    }

    /// Password-authenticated host with sudo password injection enabled.
    pub fn with_password(
        id: impl Into<String>,
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let mut config = Self::new(id, host, username, Credential::Password(Secret::new(password)));
        config.auto_sudo_password = true;
        config
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_auto_sudo_password(mut self, enabled: bool) -> Self {
        self.auto_sudo_password = enabled;
        self
    }

    pub fn with_host_key_check(mut self, check: HostKeyCheck) -> Self {
        self.host_key_check = check;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_commands<I, S>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.commands = commands.into_iter().map(Into::into).collect();
        self
    }

    /// `host:port`, with IPv6 literals bracketed.
    pub fn address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Password to inject into elevated commands, when enabled.
    pub fn sudo_password(&self) -> Option<&Secret> {
        match (&self.credential, self.auto_sudo_password) {
            (Credential::Password(password), true) => Some(password),
            _ => None,
        }
    }

    /// Build a host from a `[user@]host[:port]` target string.
    ///
    /// Without a user part the local login name is used.
    pub fn parse_target(id: impl Into<String>, target: &str, credential: Credential) -> Result<Self> {
        let (user, host, port) = split_target(target)?;
        let username = user.map(str::to_string).unwrap_or_else(local_username);
        Ok(Self::new(id, host, username, credential).with_port(port.unwrap_or(DEFAULT_SSH_PORT)))
    }
}

/// Split `[user@]host[:port]` into its parts. IPv6 literals may be bracketed.
pub(crate) fn split_target(target: &str) -> Result<(Option<&str>, &str, Option<u16>)> {
    let (user, host_part) = match target.find('@') {
        Some(at_pos) => {
            let user = &target[..at_pos];
            if user.is_empty() {
                return Err(Error::config(format!("empty user in target '{target}'")));
            }
            (Some(user), &target[at_pos + 1..])
        }
        None => (None, target),
    };

    let (host, port) = split_host_port(host_part)?;
    if host.is_empty() {
        return Err(Error::config(format!("missing host in target '{target}'")));
    }
    Ok((user, host, port))
}

fn split_host_port(host_part: &str) -> Result<(&str, Option<u16>)> {
    // [v6]:port or [v6]
    if let Some(rest) = host_part.strip_prefix('[') {
        let end = rest
            .find(']')
            .ok_or_else(|| Error::config(format!("unterminated IPv6 literal '{host_part}'")))?;
        let port = match rest[end + 1..].strip_prefix(':') {
            Some(port) => Some(parse_port(port)?),
            None => None,
        };
        return Ok((&rest[..end], port));
    }

    // A bare IPv6 literal has several colons and no port.
    if host_part.matches(':').count() > 1 {
        return Ok((host_part, None));
    }

    match host_part.rfind(':') {
        Some(colon_pos) => Ok((
            &host_part[..colon_pos],
            Some(parse_port(&host_part[colon_pos + 1..])?),
        )),
        None => Ok((host_part, None)),
    }
}

fn parse_port(port: &str) -> Result<u16> {
    port.parse::<u16>()
        .map_err(|_| Error::config(format!("invalid port number '{port}'")))
}

/// Local login name, falling back to `root`.
pub(crate) fn local_username() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_else(|_| "root".to_string())
}

impl fmt::Display for HostConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.username, self.address())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent() -> Credential {
        Credential::Agent
    }

    #[test]
    fn test_parse_host_only() {
        let host = HostConfig::parse_target("a", "example.com", agent()).unwrap();
        assert_eq!(host.host, "example.com");
        assert_eq!(host.port, 22);
        assert_eq!(host.id, "a");
    }

    #[test]
    fn test_parse_full_target() {
        let host = HostConfig::parse_target("a", "admin@example.com:2222", agent()).unwrap();
        assert_eq!(host.username, "admin");
        assert_eq!(host.host, "example.com");
        assert_eq!(host.port, 2222);
        assert_eq!(host.to_string(), "admin@example.com:2222");
    }

    #[test]
    fn test_parse_ipv6_targets() {
        let host = HostConfig::parse_target("a", "root@[fe80::1]:2200", agent()).unwrap();
        assert_eq!(host.host, "fe80::1");
        assert_eq!(host.port, 2200);
        assert_eq!(host.address(), "[fe80::1]:2200");

        let bare = HostConfig::parse_target("b", "root@fe80::2", agent()).unwrap();
        assert_eq!(bare.host, "fe80::2");
        assert_eq!(bare.port, 22);
    }

    #[test]
    fn test_parse_rejects_bad_targets() {
        assert!(HostConfig::parse_target("a", "host:notaport", agent()).is_err());
        assert!(HostConfig::parse_target("a", "user@", agent()).is_err());
        assert!(HostConfig::parse_target("a", "@host", agent()).is_err());
        assert!(HostConfig::parse_target("a", "[::1", agent()).is_err());
    }

    #[test]
    fn test_with_password_enables_sudo_injection() {
        let host = HostConfig::with_password("a", "10.0.0.1", "ops", "pw");
        assert!(host.auto_sudo_password);
        assert_eq!(host.sudo_password().map(Secret::expose), Some("pw"));
        assert_eq!(host.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(host.host_key_check, HostKeyCheck::AcceptAny);

        let disabled = host.with_auto_sudo_password(false);
        assert!(disabled.sudo_password().is_none());
    }

    #[test]
    fn test_key_credential_has_no_sudo_password() {
        let host = HostConfig::new(
            "a",
            "10.0.0.1",
            "ops",
            Credential::KeyFile {
                path: PathBuf::from("/tmp/id_ed25519"),
                passphrase: None,
            },
        )
        .with_auto_sudo_password(true);
        assert!(host.sudo_password().is_none());
    }

    #[test]
    fn test_builder_methods() {
        let host = HostConfig::new("a", "h", "u", agent())
            .with_port(2022)
            .with_connect_timeout(Duration::from_secs(1))
            .with_host_key_check(HostKeyCheck::DefaultKnownHosts)
            .with_commands(["uptime", "df -h"]);
        assert_eq!(host.address(), "h:2022");
        assert_eq!(host.connect_timeout, Duration::from_secs(1));
        assert_eq!(host.commands, vec!["uptime".to_string(), "df -h".to_string()]);
    }
}
