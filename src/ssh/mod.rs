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

//! SSH transport built on `russh` and `russh-sftp`.

mod authentication;
mod channel;
mod connection;
mod sftp;

use std::sync::Arc;

use async_trait::async_trait;
use russh::client::Config;

use crate::error::TransportError;
use crate::host::HostConfig;
use crate::transport::{Connection, Connector};

pub use connection::SshConnection;

/// Dials hosts over SSH.
#[derive(Clone)]
pub struct SshConnector {
    config: Arc<Config>,
}

impl Default for SshConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl SshConnector {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Use a non-default [`russh::client::Config`], e.g. for keepalives.
    pub fn with_config(config: Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, host: &HostConfig) -> Result<Arc<dyn Connection>, TransportError> {
        let connection = SshConnection::connect(Arc::clone(&self.config), host).await?;
        Ok(Arc::new(connection))
    }
}
