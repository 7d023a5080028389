//! Concurrent command execution and file transfer across fleets of SSH hosts.
//!
//! An [`Engine`] owns one [`RemoteSession`] per connected host. Commands are
//! either plain shell lines run on the remote host or in-band commands in
//! the `fleet.` namespace, dispatched through a [`CommandRegistry`].
//! Progress is reported to handlers registered on the engine's
//! [`ResultPipeline`](executor::ResultPipeline).

pub mod commands;
pub mod config;
pub mod error;
pub mod executor;
pub mod host;
pub mod security;
pub mod session;
pub mod ssh;
pub mod transport;
pub mod utils;

pub use commands::{Command, CommandContext, CommandHandler, CommandRegistry};
pub use config::FleetConfig;
pub use error::{Error, Result, TransportError};
pub use executor::{Engine, ExecutionEvent, ExecutionReport, HostOutcome, Stage};
pub use host::{Credential, HostConfig, HostKeyCheck};
pub use security::Secret;
pub use session::{RemoteSession, HOST_ID_ENV};
pub use ssh::SshConnector;
