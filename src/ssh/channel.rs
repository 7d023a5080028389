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

use async_trait::async_trait;
use russh::client::Msg;
use russh::{Channel, ChannelMsg};

use crate::error::TransportError;
use crate::transport::{ExecChannel, ExecOutcome};

/// Initial capacity of the output buffer.
const SSH_CMD_BUFFER_SIZE: usize = 8192;

/// One `exec` request on an SSH session channel.
pub(super) struct SshExecChannel {
    channel: Channel<Msg>,
}

impl SshExecChannel {
    pub(super) fn new(channel: Channel<Msg>) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl ExecChannel for SshExecChannel {
    async fn set_env(&mut self, name: &str, value: &str) -> Result<(), TransportError> {
        // Servers drop variables not listed in AcceptEnv; no reply is awaited.
        self.channel.set_env(false, name, value).await?;
        Ok(())
    }

    async fn exec(&mut self, command: &str) -> Result<(), TransportError> {
        self.channel.exec(true, command).await?;
        Ok(())
    }

    async fn write_stdin(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.channel.data(data).await?;
        Ok(())
    }

    async fn close_stdin(&mut self) -> Result<(), TransportError> {
        self.channel.eof().await?;
        Ok(())
    }

    async fn wait(&mut self) -> Result<ExecOutcome, TransportError> {
        let mut output = Vec::with_capacity(SSH_CMD_BUFFER_SIZE);
        let mut exit_status = None;

        while let Some(msg) = self.channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => output.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext } if ext == 1 => {
                    output.extend_from_slice(data)
                }
                // Data may still follow the exit status; keep reading until close.
                ChannelMsg::ExitStatus {
                    exit_status: status,
                } => exit_status = Some(status),
                _ => {}
            }
        }

        Ok(ExecOutcome {
            output,
            exit_status,
        })
    }

    async fn kill(&mut self) -> Result<(), TransportError> {
        self.channel.signal(russh::Sig::KILL).await?;
        Ok(())
    }
}
