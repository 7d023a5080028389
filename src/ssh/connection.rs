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

//! Connection establishment and server key verification.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{Config, Handle, Handler};
use russh_sftp::client::SftpSession;
use tracing::debug;

use super::authentication::authenticate;
use super::channel::SshExecChannel;
use super::sftp::SftpFs;
use crate::error::TransportError;
use crate::host::{HostConfig, HostKeyCheck};
use crate::transport::{Connection, ExecChannel, RemoteFs};

/// An authenticated SSH connection.
pub struct SshConnection {
    handle: Handle<ClientHandler>,
    username: String,
    address: SocketAddr,
}

impl SshConnection {
    /// Resolve, dial and authenticate `host`.
    ///
    /// Every resolved address is tried in turn until one accepts the
    /// handshake. Authentication runs once, on that connection.
    pub async fn connect(config: Arc<Config>, host: &HostConfig) -> Result<Self, TransportError> {
        let socket_addrs: Vec<SocketAddr> = tokio::net::lookup_host(host.address())
            .await
            .map_err(TransportError::AddressInvalid)?
            .collect();

        let mut connect_res = Err(TransportError::AddressInvalid(io::Error::new(
            io::ErrorKind::InvalidInput,
            "could not resolve to any addresses",
        )));
        for socket_addr in socket_addrs {
            let handler = ClientHandler {
                hostname: host.host.clone(),
                port: host.port,
                check: host.host_key_check.clone(),
            };
            match russh::client::connect(Arc::clone(&config), socket_addr, handler).await {
                Ok(handle) => {
                    connect_res = Ok((socket_addr, handle));
                    break;
                }
                Err(e) => {
                    debug!(address = %socket_addr, error = %e, "SSH handshake failed");
                    connect_res = Err(e);
                }
            }
        }
        let (address, mut handle) = connect_res?;

        authenticate(&mut handle, &host.username, &host.credential).await?;

        Ok(Self {
            handle,
            username: host.username.clone(),
            address,
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }
}

#[async_trait]
impl Connection for SshConnection {
    fn remote_address(&self) -> String {
        self.address.to_string()
    }

    async fn open_exec(&self) -> Result<Box<dyn ExecChannel>, TransportError> {
        let channel = self.handle.channel_open_session().await?;
        Ok(Box::new(SshExecChannel::new(channel)))
    }

    // Requires an sftp subsystem on the server, e.g.
    // `Subsystem sftp internal-sftp` in sshd_config.
    async fn open_fs(&self) -> Result<Box<dyn RemoteFs>, TransportError> {
        let channel = self.handle.channel_open_session().await?;
        channel.request_subsystem(true, "sftp").await?;
        let sftp = SftpSession::new(channel.into_stream()).await?;
        Ok(Box::new(SftpFs::new(sftp)))
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.handle.is_closed() {
            return Ok(());
        }
        self.handle
            .disconnect(russh::Disconnect::ByApplication, "", "")
            .await?;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }
}

impl std::fmt::Debug for SshConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshConnection")
            .field("username", &self.username)
            .field("address", &self.address)
            .finish()
    }
}

/// Verifies the server key according to the host's [`HostKeyCheck`].
pub(super) struct ClientHandler {
    hostname: String,
    port: u16,
    check: HostKeyCheck,
}

impl Handler for ClientHandler {
    type Error = TransportError;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        match &self.check {
            HostKeyCheck::AcceptAny => Ok(true),
            HostKeyCheck::PublicKey(key) => {
                let expected = russh::keys::parse_public_key_base64(key)
                    .map_err(|_| TransportError::ServerCheckFailed)?;
                Ok(expected == *server_public_key)
            }
            HostKeyCheck::KnownHostsFile(path) => russh::keys::check_known_hosts_path(
                &self.hostname,
                self.port,
                server_public_key,
                path,
            )
            .map_err(|_| TransportError::ServerCheckFailed),
            HostKeyCheck::DefaultKnownHosts => {
                russh::keys::check_known_hosts(&self.hostname, self.port, server_public_key)
                    .map_err(|_| TransportError::ServerCheckFailed)
            }
        }
    }
}
