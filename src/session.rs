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

//! One authenticated connection to one host.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::commands::{Command, CommandContext, CommandRegistry};
use crate::error::{Error, Result};
use crate::host::HostConfig;
use crate::security::elevation_payload;
use crate::transport::Connection;
use crate::utils::cancellable::{cleanup, until_cancelled};

/// Environment variable carrying the session id into every command.
pub const HOST_ID_ENV: &str = "FLEET_HOST_ID";

pub struct RemoteSession {
    id: String,
    host: HostConfig,
    connection: Option<Arc<dyn Connection>>,
    registry: Arc<CommandRegistry>,
}

impl RemoteSession {
    pub fn new(
        host: HostConfig,
        connection: Arc<dyn Connection>,
        registry: Arc<CommandRegistry>,
    ) -> Self {
        Self {
            id: host.id.clone(),
            host,
            connection: Some(connection),
            registry,
        }
    }

    /// A session without a connection. Commands fail with
    /// [`Error::NotConnected`] and `close` does nothing.
    pub fn disconnected(host: HostConfig, registry: Arc<CommandRegistry>) -> Self {
        Self {
            id: host.id.clone(),
            host,
            connection: None,
            registry,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn host(&self) -> &HostConfig {
        &self.host
    }

    pub fn remote_address(&self) -> String {
        match &self.connection {
            Some(connection) => connection.remote_address(),
            None => self.host.address(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|connection| !connection.is_closed())
    }

    /// Run one command line on this host.
    ///
    /// Lines in the `fleet.` namespace go to the command registry; anything
    /// else runs in the remote shell. Returns the combined output.
    pub async fn execute_command(&self, token: &CancellationToken, text: &str) -> Result<String> {
        let connection = self
            .connection
            .as_deref()
            .ok_or_else(|| Error::NotConnected(self.id.clone()))?;

        match Command::parse(text) {
            Command::Inband(command) => {
                let ctx = CommandContext {
                    token,
                    connection,
                    host: &self.host,
                };
                self.registry.dispatch(&ctx, &command).await
            }
            Command::Remote(line) => self.run_remote(connection, token, &line).await,
        }
    }

    async fn run_remote(
        &self,
        connection: &dyn Connection,
        token: &CancellationToken,
        line: &str,
    ) -> Result<String> {
        debug!(host = %self.id, command = %line, "running remote command");
        let mut channel = until_cancelled(token, async {
            Ok::<_, Error>(connection.open_exec().await?)
        })
        .await?;

        let started = until_cancelled(token, async {
            channel.set_env(HOST_ID_ENV, &self.id).await?;
            channel.exec(line).await?;

            // Written without waiting for a prompt.
            if let Some(payload) = elevation_payload(line, self.host.sudo_password()) {
                trace!(host = %self.id, "writing elevation password to stdin");
                channel.write_stdin(&payload).await?;
            }
            channel.close_stdin().await?;
            Ok::<_, Error>(())
        })
        .await;

        let outcome = match started {
            Ok(()) => {
                until_cancelled(token, async { Ok::<_, Error>(channel.wait().await?) }).await
            }
            Err(e) => Err(e),
        };
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                if e.is_cancelled() {
                    debug!(host = %self.id, command = %line, "cancelled, killing remote command");
                    cleanup("signal remote command", channel.kill()).await;
                }
                return Err(e);
            }
        };

        let output = String::from_utf8_lossy(&outcome.output).into_owned();
        match outcome.exit_status {
            Some(0) => Ok(output),
            Some(status) => Err(Error::RemoteExecution { status, output }),
            None => Err(Error::MissingExitStatus { output }),
        }
    }

    /// Close the connection. Does nothing for a disconnected session.
    pub async fn close(&self) -> Result<()> {
        match &self.connection {
            Some(connection) if !connection.is_closed() => {
                debug!(host = %self.id, "closing session");
                connection.close().await?;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

impl std::fmt::Debug for RemoteSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSession")
            .field("id", &self.id)
            .field("address", &self.remote_address())
            .field("connected", &self.is_connected())
            .finish()
    }
}
