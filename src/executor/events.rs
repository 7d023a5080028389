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

//! Lifecycle events emitted while connecting and executing.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Local};

use crate::error::Error;

/// Point in a host's lifecycle an event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// A dial attempt finished, successfully or not.
    Connected,
    /// A command is about to run.
    Started,
    /// A command finished, successfully or not.
    Finished,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Connected => "connected",
            Stage::Started => "started",
            Stage::Finished => "finished",
        };
        f.write_str(name)
    }
}

/// Notification delivered to registered handlers.
#[derive(Debug, Clone)]
pub struct ExecutionEvent {
    /// Command text; empty for `Connected` events.
    pub command: String,
    pub host_id: String,
    pub remote_addr: String,
    pub stage: Stage,
    pub error: Option<Arc<Error>>,
    /// Output of a finished command, including output captured before a
    /// failure.
    pub output: String,
    pub timestamp: DateTime<Local>,
}

impl ExecutionEvent {
    pub(crate) fn connected(host_id: &str, remote_addr: String, error: Option<Arc<Error>>) -> Self {
        Self {
            command: String::new(),
            host_id: host_id.to_string(),
            remote_addr,
            stage: Stage::Connected,
            error,
            output: String::new(),
            timestamp: Local::now(),
        }
    }

    pub(crate) fn started(host_id: &str, remote_addr: &str, command: &str) -> Self {
        Self {
            command: command.to_string(),
            host_id: host_id.to_string(),
            remote_addr: remote_addr.to_string(),
            stage: Stage::Started,
            error: None,
            output: String::new(),
            timestamp: Local::now(),
        }
    }

    pub(crate) fn finished(
        host_id: &str,
        remote_addr: &str,
        command: &str,
        output: String,
        error: Option<Arc<Error>>,
    ) -> Self {
        Self {
            command: command.to_string(),
            host_id: host_id.to_string(),
            remote_addr: remote_addr.to_string(),
            stage: Stage::Finished,
            error,
            output,
            timestamp: Local::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

impl fmt::Display for ExecutionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({}) {}",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.host_id,
            self.remote_addr,
            self.stage
        )?;
        if !self.command.is_empty() {
            write!(f, ": {}", self.command)?;
        }
        if let Some(error) = &self.error {
            write!(f, " - error: {error}")?;
        }
        Ok(())
    }
}
