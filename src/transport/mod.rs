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

//! Seams between the engine and the remote transport.
//!
//! The engine only talks to hosts through these traits. [`crate::ssh`]
//! provides the SSH/SFTP implementation and, with the `test-util` feature,
//! `memory` an in-process one.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::TransportError;
use crate::host::HostConfig;

#[cfg(any(test, feature = "test-util"))]
pub mod memory;

/// Dials and authenticates a host.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, host: &HostConfig) -> Result<Arc<dyn Connection>, TransportError>;
}

/// An authenticated connection to one host.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Address of the peer, for reporting.
    fn remote_address(&self) -> String;

    /// Open a fresh channel for a single command.
    async fn open_exec(&self) -> Result<Box<dyn ExecChannel>, TransportError>;

    /// Open a fresh remote file-system handle.
    async fn open_fs(&self) -> Result<Box<dyn RemoteFs>, TransportError>;

    async fn close(&self) -> Result<(), TransportError>;

    fn is_closed(&self) -> bool;
}

/// Result of a finished remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutcome {
    /// Stdout and stderr interleaved in arrival order.
    pub output: Vec<u8>,
    /// `None` when the channel closed without reporting a status.
    pub exit_status: Option<u32>,
}

/// A channel that runs exactly one command.
#[async_trait]
pub trait ExecChannel: Send {
    async fn set_env(&mut self, name: &str, value: &str) -> Result<(), TransportError>;

    async fn exec(&mut self, command: &str) -> Result<(), TransportError>;

    async fn write_stdin(&mut self, data: &[u8]) -> Result<(), TransportError>;

    async fn close_stdin(&mut self) -> Result<(), TransportError>;

    /// Collect output until the command exits or the channel closes.
    async fn wait(&mut self) -> Result<ExecOutcome, TransportError>;

    /// Send `KILL` to the running command.
    async fn kill(&mut self) -> Result<(), TransportError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoteMetadata {
    pub len: Option<u64>,
    pub is_dir: bool,
    pub is_file: bool,
}

pub type RemoteReader = Box<dyn AsyncRead + Send + Unpin>;
pub type RemoteWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// File operations on the remote host.
#[async_trait]
pub trait RemoteFs: Send + Sync {
    async fn metadata(&self, path: &str) -> Result<RemoteMetadata, TransportError>;

    async fn open(&self, path: &str) -> Result<RemoteReader, TransportError>;

    /// Create or truncate a file for writing.
    async fn create(&self, path: &str) -> Result<RemoteWriter, TransportError>;

    async fn remove_file(&self, path: &str) -> Result<(), TransportError>;

    /// Create `path` and any missing parents. Succeeds if it already exists.
    async fn create_dir_all(&self, path: &str) -> Result<(), TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}
