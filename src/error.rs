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

//! Error types for connection, dispatch and transfer failures.
//!
//! [`TransportError`] covers failures reported by the remote transport and
//! file-transfer collaborators. [`Error`] is the crate-wide taxonomy the
//! engine, sessions and command handlers return.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures raised by a transport or remote file layer.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    #[error("invalid address: {0}")]
    AddressInvalid(#[source] io::Error),

    #[error("password authentication failed")]
    PasswordWrong,

    #[error("the private key was rejected by the server")]
    KeyAuthFailed,

    #[error("failed to load SSH key: {0}")]
    KeyInvalid(#[source] russh::keys::Error),

    #[error("failed to connect to the SSH agent")]
    AgentConnectionFailed,

    #[error("the SSH agent has no identities")]
    AgentNoIdentities,

    #[error("SSH agent authentication failed")]
    AgentAuthenticationFailed,

    #[error("host key verification failed")]
    ServerCheckFailed,

    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    #[error("SFTP error: {0}")]
    Sftp(#[from] russh_sftp::client::error::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("connection closed")]
    Closed,

    #[error("{0}")]
    Unsupported(String),
}

impl TransportError {
    /// Whether the failure means the addressed remote path does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            TransportError::Io(e) => e.kind() == io::ErrorKind::NotFound,
            TransportError::Sftp(russh_sftp::client::error::Error::Status(status)) => matches!(
                status.status_code,
                russh_sftp::protocol::StatusCode::NoSuchFile
            ),
            _ => false,
        }
    }
}

/// Crate-wide error type.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Invalid name, argument count, path or configuration value.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A single host could not be dialed or authenticated.
    #[error("failed to connect to {host}: {source}")]
    Connection {
        host: String,
        #[source]
        source: TransportError,
    },

    /// Dialing a host did not finish within its connect timeout.
    #[error("connection to {host} timed out after {timeout:?}")]
    ConnectTimeout { host: String, timeout: Duration },

    /// Every configured host failed to connect.
    #[error("no successful connections: {}", join_errors(.0))]
    NoConnections(Vec<Arc<Error>>),

    /// The session has no live connection.
    #[error("session '{0}' is not connected")]
    NotConnected(String),

    /// No handler is registered under the in-band command name.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// An in-band command handler failed.
    #[error("command '{name}' failed: {source}")]
    CommandFailed {
        name: String,
        #[source]
        source: Box<Error>,
    },

    /// The remote command exited with a non-zero status.
    #[error("command execution failed with exit status {status}")]
    RemoteExecution { status: u32, output: String },

    /// The remote channel closed without reporting an exit status.
    #[error("remote command ended without an exit status")]
    MissingExitStatus { output: String },

    /// Stat, open or copy failure during a file transfer.
    #[error("{message}: {source}")]
    Transfer {
        message: String,
        #[source]
        source: TransportError,
    },

    /// The local script runner reported a failure.
    #[error("local script failed: {message}")]
    LocalScript { message: String, output: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The governing cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,

    /// One or more sessions failed to close.
    #[error("errors closing sessions: {}", join_errors(.0))]
    Close(Vec<Error>),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Error::Configuration(message.into())
    }

    /// Wrap a free-form failure, typically from a user command handler.
    pub fn other(error: impl Into<anyhow::Error>) -> Self {
        Error::Other(error.into())
    }

    pub(crate) fn transfer(message: impl Into<String>, source: impl Into<TransportError>) -> Self {
        Error::Transfer {
            message: message.into(),
            source: source.into(),
        }
    }

    /// Whether this error is, or wraps, a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Cancelled => true,
            Error::CommandFailed { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Output captured before the failure, if the failure carries any.
    pub fn output(&self) -> Option<&str> {
        match self {
            Error::RemoteExecution { output, .. }
            | Error::MissingExitStatus { output }
            | Error::LocalScript { output, .. } => Some(output),
            Error::CommandFailed { source, .. } => source.output(),
            _ => None,
        }
    }
}

fn join_errors<E: std::fmt::Display>(errors: &[E]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_connections_joins_every_error() {
        let err = Error::NoConnections(vec![
            Arc::new(Error::ConnectTimeout {
                host: "10.0.0.1:22".to_string(),
                timeout: Duration::from_secs(5),
            }),
            Arc::new(Error::Connection {
                host: "10.0.0.2:22".to_string(),
                source: TransportError::PasswordWrong,
            }),
        ]);

        let message = err.to_string();
        assert!(message.starts_with("no successful connections"));
        assert!(message.contains("10.0.0.1:22 timed out after 5s"));
        assert!(message.contains("10.0.0.2:22"));
        assert!(message.contains("password authentication failed"));
    }

    #[test]
    fn test_cancellation_is_visible_through_wrapping() {
        let wrapped = Error::CommandFailed {
            name: "fleet.upload".to_string(),
            source: Box::new(Error::Cancelled),
        };
        assert!(wrapped.is_cancelled());
        assert!(!Error::UnknownCommand("fleet.nope".to_string()).is_cancelled());
    }

    #[test]
    fn test_output_is_carried_by_execution_failures() {
        let err = Error::RemoteExecution {
            status: 2,
            output: "partial\n".to_string(),
        };
        assert_eq!(err.output(), Some("partial\n"));
        assert!(err.to_string().contains("exit status 2"));

        let wrapped = Error::CommandFailed {
            name: "fleet.sh".to_string(),
            source: Box::new(Error::LocalScript {
                message: "exit status 1".to_string(),
                output: "oops\n".to_string(),
            }),
        };
        assert_eq!(wrapped.output(), Some("oops\n"));
        assert_eq!(Error::Cancelled.output(), None);
    }

    #[test]
    fn test_not_found_detection() {
        let err = TransportError::Io(io::Error::new(io::ErrorKind::NotFound, "missing"));
        assert!(err.is_not_found());
        assert!(!TransportError::Closed.is_not_found());
    }
}
