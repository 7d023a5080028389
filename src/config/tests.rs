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

//! Configuration tests.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serial_test::serial;

use super::types::{FleetConfig, HostEntry};
use super::utils::{expand_env_vars, expand_tilde};
use crate::host::{Credential, HostKeyCheck, DEFAULT_CONNECT_TIMEOUT};

#[test]
#[serial]
fn test_expand_env_vars() {
    std::env::set_var("FLEET_TEST_VAR", "test_value");
    std::env::set_var("FLEET_TEST_USER", "testuser");

    assert_eq!(expand_env_vars("Hello ${FLEET_TEST_VAR}!"), "Hello test_value!");
    assert_eq!(expand_env_vars("$FLEET_TEST_USER@host"), "testuser@host");
    assert_eq!(
        expand_env_vars("${FLEET_TEST_USER}:$FLEET_TEST_VAR"),
        "testuser:test_value"
    );

    // Unset variables stay as written
    assert_eq!(expand_env_vars("${FLEET_NONEXISTENT}"), "${FLEET_NONEXISTENT}");
    assert_eq!(expand_env_vars("$FLEET_NONEXISTENT"), "$FLEET_NONEXISTENT");

    assert_eq!(expand_env_vars("cost: 5$ or ${"), "cost: 5$ or ${");
    assert_eq!(expand_env_vars("no variables here"), "no variables here");

    std::env::remove_var("FLEET_TEST_VAR");
    std::env::remove_var("FLEET_TEST_USER");
}

#[test]
#[serial]
fn test_expand_tilde() {
    let original_home = std::env::var("HOME").ok();
    std::env::set_var("HOME", "/home/user");

    assert_eq!(
        expand_tilde(Path::new("~/.ssh/id_ed25519")),
        PathBuf::from("/home/user/.ssh/id_ed25519")
    );
    assert_eq!(expand_tilde(Path::new("~")), PathBuf::from("/home/user"));
    assert_eq!(
        expand_tilde(Path::new("/etc/ssh/known_hosts")),
        PathBuf::from("/etc/ssh/known_hosts")
    );
    assert_eq!(expand_tilde(Path::new("~other/x")), PathBuf::from("~other/x"));

    match original_home {
        Some(home) => std::env::set_var("HOME", home),
        None => std::env::remove_var("HOME"),
    }
}

#[test]
fn test_parse_simple_and_detailed_hosts() {
    let yaml = r#"
defaults:
  user: deploy
  port: 2200
  ssh_key: /keys/fleet
hosts:
  - web-1.example.com
  - admin@db-1.example.com:2222
  - id: cache
    host: 10.0.0.7
    password: secret
    connect_timeout: 2
    commands:
      - uptime
"#;
    let config = FleetConfig::from_yaml_str(yaml).unwrap();
    assert_eq!(config.hosts.len(), 3);
    assert!(matches!(config.hosts[0], HostEntry::Simple(_)));
    assert!(matches!(config.hosts[2], HostEntry::Detailed { .. }));

    let hosts = config.host_configs().unwrap();

    assert_eq!(hosts[0].id, "web-1.example.com");
    assert_eq!(hosts[0].username, "deploy");
    assert_eq!(hosts[0].port, 2200);
    assert!(matches!(
        &hosts[0].credential,
        Credential::KeyFile { path, passphrase: None } if path == Path::new("/keys/fleet")
    ));
    assert_eq!(hosts[0].connect_timeout, DEFAULT_CONNECT_TIMEOUT);

    assert_eq!(hosts[1].id, "admin@db-1.example.com:2222");
    assert_eq!(hosts[1].username, "admin");
    assert_eq!(hosts[1].host, "db-1.example.com");
    assert_eq!(hosts[1].port, 2222);

    assert_eq!(hosts[2].id, "cache");
    assert!(matches!(&hosts[2].credential, Credential::Password(p) if p.expose() == "secret"));
    assert!(hosts[2].sudo_password().is_some());
    assert_eq!(hosts[2].connect_timeout, Duration::from_secs(2));
    assert_eq!(hosts[2].commands, vec!["uptime".to_string()]);
    assert_eq!(hosts[2].host_key_check, HostKeyCheck::AcceptAny);
}

#[test]
fn test_default_commands_and_known_hosts() {
    let yaml = r#"
defaults:
  agent: true
  known_hosts: default
  commands: [hostname]
hosts:
  - id: a
    host: 10.0.0.1
  - id: b
    host: 10.0.0.2
    known_hosts: /etc/fleet/known_hosts
    commands: []
  - id: c
    host: 10.0.0.3
    host_key: AAAAC3NzaC1lZDI1NTE5AAAAIJdD7y3aLq454yWBdwLWbieU1ebz9/cu7/QEXn9OIeZJ
"#;
    let hosts = FleetConfig::from_yaml_str(yaml).unwrap().host_configs().unwrap();

    assert!(matches!(hosts[0].credential, Credential::Agent));
    assert_eq!(hosts[0].commands, vec!["hostname".to_string()]);
    assert_eq!(hosts[0].host_key_check, HostKeyCheck::DefaultKnownHosts);

    assert!(hosts[1].commands.is_empty());
    assert_eq!(
        hosts[1].host_key_check,
        HostKeyCheck::KnownHostsFile(PathBuf::from("/etc/fleet/known_hosts"))
    );

    assert!(matches!(hosts[2].host_key_check, HostKeyCheck::PublicKey(_)));
}

#[test]
fn test_entry_credential_overrides_defaults() {
    let yaml = r#"
defaults:
  password: shared
hosts:
  - id: keyed
    host: 10.0.0.1
    ssh_key: /keys/special
    ssh_key_passphrase: hunter2
    auto_sudo_password: false
  - 10.0.0.2
"#;
    let hosts = FleetConfig::from_yaml_str(yaml).unwrap().host_configs().unwrap();

    match &hosts[0].credential {
        Credential::KeyFile { path, passphrase } => {
            assert_eq!(path, Path::new("/keys/special"));
            assert_eq!(passphrase.as_ref().map(|p| p.expose()), Some("hunter2"));
        }
        other => panic!("unexpected credential {other:?}"),
    }
    assert!(!hosts[0].auto_sudo_password);
    assert!(matches!(&hosts[1].credential, Credential::Password(p) if p.expose() == "shared"));
}

#[test]
#[serial]
fn test_password_env_expansion() {
    std::env::set_var("FLEET_TEST_PASSWORD", "from-env");
    let yaml = r#"
hosts:
  - id: a
    host: 10.0.0.1
    password: ${FLEET_TEST_PASSWORD}
"#;
    let hosts = FleetConfig::from_yaml_str(yaml).unwrap().host_configs().unwrap();
    assert!(matches!(&hosts[0].credential, Credential::Password(p) if p.expose() == "from-env"));
    std::env::remove_var("FLEET_TEST_PASSWORD");
}

#[test]
fn test_missing_credential_is_rejected() {
    let yaml = r#"
hosts:
  - 10.0.0.1
"#;
    let err = FleetConfig::from_yaml_str(yaml)
        .unwrap()
        .host_configs()
        .unwrap_err();
    assert!(format!("{err:#}").contains("No credential configured for host '10.0.0.1'"));
}

#[test]
fn test_duplicate_ids_are_rejected() {
    let yaml = r#"
defaults:
  agent: true
hosts:
  - id: web
    host: 10.0.0.1
  - id: web
    host: 10.0.0.2
"#;
    let err = FleetConfig::from_yaml_str(yaml)
        .unwrap()
        .host_configs()
        .unwrap_err();
    assert!(err.to_string().contains("Duplicate host id 'web'"));
}

#[test]
fn test_invalid_target_is_rejected() {
    let yaml = r#"
defaults:
  agent: true
hosts:
  - web:notaport
"#;
    let err = FleetConfig::from_yaml_str(yaml)
        .unwrap()
        .host_configs()
        .unwrap_err();
    assert!(format!("{err:#}").contains("invalid port number"));
}

#[test]
fn test_invalid_yaml() {
    assert!(FleetConfig::from_yaml_str("hosts: [unclosed").is_err());
}

#[test]
fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fleet.yaml");
    std::fs::write(
        &path,
        "defaults:\n  agent: true\nhosts:\n  - ops@10.1.0.1\n  - ops@10.1.0.2\n",
    )
    .unwrap();

    let config = tokio_test::block_on(FleetConfig::load(&path)).unwrap();
    let engine = config.build_engine().unwrap();
    assert_eq!(engine.hosts().len(), 2);
    assert_eq!(engine.hosts()[1].host, "10.1.0.2");
}

#[test]
fn test_load_missing_file() {
    let err = tokio_test::block_on(FleetConfig::load(Path::new("/nonexistent/fleet.yaml")))
        .unwrap_err();
    assert!(err.to_string().contains("Failed to read fleet configuration file"));
}
