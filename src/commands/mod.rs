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

//! In-band command protocol.
//!
//! A command line starting with [`NAMESPACE`] is not sent to the remote
//! shell. It is split on whitespace into a name and arguments and dispatched
//! to the handler registered under that name. Built-ins:
//!
//! - `fleet.upload <local> <remote>`
//! - `fleet.download <remote> <local>`
//! - `fleet.mkdir <path>`
//! - `fleet.sh <words...>` (runs locally)

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};
use crate::host::HostConfig;
use crate::transport::Connection;

mod mkdir;
mod script;
mod transfer;

pub use mkdir::Mkdir;
pub use script::{LocalShell, ScriptOutput, ScriptRunner, Shell};
pub use transfer::{upload_from_reader, Download, Upload, UploadBytes};

/// Prefix shared by every in-band command name.
pub const NAMESPACE: &str = "fleet.";

pub const UPLOAD: &str = "fleet.upload";
pub const DOWNLOAD: &str = "fleet.download";
pub const MKDIR: &str = "fleet.mkdir";
pub const SHELL: &str = "fleet.sh";

/// Canonical form of a command name: namespaced, no surrounding whitespace.
pub fn normalize_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    let bare = trimmed.strip_prefix(NAMESPACE).unwrap_or(trimmed);
    if bare.is_empty() {
        return Err(Error::config("command name must not be empty"));
    }
    if bare.chars().any(char::is_whitespace) {
        return Err(Error::config(format!(
            "command name '{trimmed}' must not contain whitespace"
        )));
    }
    Ok(format!("{NAMESPACE}{bare}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Upload,
    Download,
    Mkdir,
    Shell,
    /// A registered extension or an unregistered name.
    Unknown,
}

impl CommandKind {
    pub fn from_name(name: &str) -> Self {
        match name {
            UPLOAD => CommandKind::Upload,
            DOWNLOAD => CommandKind::Download,
            MKDIR => CommandKind::Mkdir,
            SHELL => CommandKind::Shell,
            _ => CommandKind::Unknown,
        }
    }
}

/// A parsed in-band command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InbandCommand {
    pub kind: CommandKind,
    pub name: String,
    pub args: Vec<String>,
}

/// A command line, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Sent verbatim to the remote shell.
    Remote(String),
    Inband(InbandCommand),
}

impl Command {
    pub fn parse(text: &str) -> Self {
        if !text.starts_with(NAMESPACE) {
            return Command::Remote(text.to_string());
        }

        let mut words = text.split_whitespace().map(str::to_string);
        let name = words.next().unwrap_or_default();
        Command::Inband(InbandCommand {
            kind: CommandKind::from_name(&name),
            name,
            args: words.collect(),
        })
    }
}

/// What a handler gets to work with.
pub struct CommandContext<'a> {
    pub token: &'a CancellationToken,
    pub connection: &'a dyn Connection,
    pub host: &'a HostConfig,
}

/// An in-band command implementation.
///
/// Handlers return the text reported as the command's output. They should
/// return [`Error::Cancelled`] unchanged when the token fires.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn run(&self, ctx: &CommandContext<'_>, args: &[String]) -> Result<String>;
}

/// Thread-safe map from namespaced command name to handler.
pub struct CommandRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn CommandHandler>>>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl CommandRegistry {
    /// A registry with no handlers.
    pub fn empty() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// A registry with the built-in commands, running `fleet.sh` through the
    /// system shell.
    pub fn with_builtins() -> Self {
        Self::with_script_runner(Arc::new(LocalShell::new()))
    }

    /// Built-in commands with a custom local script runner.
    pub fn with_script_runner(runner: Arc<dyn ScriptRunner>) -> Self {
        let mut handlers: HashMap<String, Arc<dyn CommandHandler>> = HashMap::new();
        handlers.insert(UPLOAD.to_string(), Arc::new(Upload));
        handlers.insert(DOWNLOAD.to_string(), Arc::new(Download));
        handlers.insert(MKDIR.to_string(), Arc::new(Mkdir));
        handlers.insert(SHELL.to_string(), Arc::new(Shell::new(runner)));
        Self {
            handlers: RwLock::new(handlers),
        }
    }

    /// Register `handler` under `name`, replacing any previous handler.
    ///
    /// The namespace prefix is added when missing.
    pub fn register(&self, name: &str, handler: Arc<dyn CommandHandler>) -> Result<()> {
        let name = normalize_name(name)?;
        debug!(command = %name, "registering command handler");
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, handler);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CommandHandler>> {
        let name = normalize_name(name).ok()?;
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&name)
            .cloned()
    }

    /// Names of all registered commands, in no particular order.
    pub fn list(&self) -> Vec<String> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `command` with the handler registered under its name.
    pub async fn dispatch(&self, ctx: &CommandContext<'_>, command: &InbandCommand) -> Result<String> {
        let handler = self
            .get(&command.name)
            .ok_or_else(|| Error::UnknownCommand(command.name.clone()))?;

        debug!(host = %ctx.host.id, command = %command.name, args = ?command.args, "dispatching in-band command");
        handler.run(ctx, &command.args).await.map_err(|e| {
            if e.is_cancelled() {
                e
            } else {
                Error::CommandFailed {
                    name: command.name.clone(),
                    source: Box::new(e),
                }
            }
        })
    }
}

/// Check the argument count and hand back the arguments as an array.
pub fn expect_args<'a, const N: usize>(name: &str, args: &'a [String]) -> Result<&'a [String; N]> {
    args.try_into().map_err(|_| {
        Error::config(format!(
            "{name} expects {N} argument(s), got {}",
            args.len()
        ))
    })
}

/// Reject blank path arguments.
pub fn non_blank<'a>(value: &'a str, what: &str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(Error::config(format!("{what} must not be empty")))
    } else {
        Ok(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::{MemoryConnector, MemoryHost};
    use crate::transport::Connector;

    struct Fixed(&'static str);

    #[async_trait]
    impl CommandHandler for Fixed {
        async fn run(&self, _ctx: &CommandContext<'_>, args: &[String]) -> Result<String> {
            Ok(format!("{}:{}", self.0, args.join(",")))
        }
    }

    struct Failing;

    #[async_trait]
    impl CommandHandler for Failing {
        async fn run(&self, _ctx: &CommandContext<'_>, _args: &[String]) -> Result<String> {
            Err(Error::config("boom"))
        }
    }

    struct Cancelling;

    #[async_trait]
    impl CommandHandler for Cancelling {
        async fn run(&self, _ctx: &CommandContext<'_>, _args: &[String]) -> Result<String> {
            Err(Error::Cancelled)
        }
    }

    async fn connection() -> (HostConfig, Arc<dyn Connection>) {
        let connector = MemoryConnector::new();
        connector.add_host("10.0.0.1:22", MemoryHost::new());
        let host = HostConfig::with_password("h1", "10.0.0.1", "ops", "pw");
        let conn = connector.connect(&host).await.unwrap();
        (host, conn)
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("deploy").unwrap(), "fleet.deploy");
        assert_eq!(normalize_name("fleet.deploy").unwrap(), "fleet.deploy");
        assert_eq!(normalize_name("  deploy ").unwrap(), "fleet.deploy");
        assert!(normalize_name("").is_err());
        assert!(normalize_name("fleet.").is_err());
        assert!(normalize_name("two words").is_err());
    }

    #[test]
    fn test_parse_remote_and_inband() {
        assert_eq!(Command::parse("ls -la"), Command::Remote("ls -la".to_string()));
        assert_eq!(
            Command::parse("fleet.upload  ./a.txt   /tmp/a.txt"),
            Command::Inband(InbandCommand {
                kind: CommandKind::Upload,
                name: "fleet.upload".to_string(),
                args: vec!["./a.txt".to_string(), "/tmp/a.txt".to_string()],
            })
        );
        match Command::parse("fleet.deploy v2") {
            Command::Inband(cmd) => {
                assert_eq!(cmd.kind, CommandKind::Unknown);
                assert_eq!(cmd.name, "fleet.deploy");
                assert_eq!(cmd.args, vec!["v2".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(Command::parse("echo fleet.upload"), Command::Remote(_)));
    }

    #[test]
    fn test_leading_whitespace_is_remote() {
        assert_eq!(
            Command::parse("  fleet.mkdir /x"),
            Command::Remote("  fleet.mkdir /x".to_string())
        );
    }

    #[test]
    fn test_builtins_registered() {
        let registry = CommandRegistry::with_builtins();
        let mut names = registry.list();
        names.sort();
        assert_eq!(names, vec![DOWNLOAD, MKDIR, SHELL, UPLOAD]);
        assert!(registry.get("upload").is_some());
        assert!(CommandRegistry::empty().is_empty());
    }

    #[test]
    fn test_register_rejects_empty_name() {
        let registry = CommandRegistry::empty();
        let err = registry.register("", Arc::new(Fixed("x"))).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_register_overwrites() {
        let (host, conn) = connection().await;
        let token = CancellationToken::new();
        let ctx = CommandContext {
            token: &token,
            connection: conn.as_ref(),
            host: &host,
        };
        let registry = CommandRegistry::empty();
        registry.register("greet", Arc::new(Fixed("first"))).unwrap();
        registry.register("fleet.greet", Arc::new(Fixed("second"))).unwrap();
        assert_eq!(registry.len(), 1);

        let Command::Inband(cmd) = Command::parse("fleet.greet a b") else {
            panic!("expected in-band command");
        };
        assert_eq!(registry.dispatch(&ctx, &cmd).await.unwrap(), "second:a,b");
    }

    #[tokio::test]
    async fn test_dispatch_errors() {
        let (host, conn) = connection().await;
        let token = CancellationToken::new();
        let ctx = CommandContext {
            token: &token,
            connection: conn.as_ref(),
            host: &host,
        };
        let registry = CommandRegistry::empty();
        registry.register("fail", Arc::new(Failing)).unwrap();
        registry.register("cancel", Arc::new(Cancelling)).unwrap();

        let Command::Inband(unknown) = Command::parse("fleet.nope") else {
            panic!("expected in-band command");
        };
        assert!(matches!(
            registry.dispatch(&ctx, &unknown).await,
            Err(Error::UnknownCommand(name)) if name == "fleet.nope"
        ));

        let Command::Inband(fail) = Command::parse("fleet.fail") else {
            panic!("expected in-band command");
        };
        match registry.dispatch(&ctx, &fail).await {
            Err(Error::CommandFailed { name, source }) => {
                assert_eq!(name, "fleet.fail");
                assert!(matches!(*source, Error::Configuration(_)));
            }
            other => panic!("unexpected {other:?}"),
        }

        let Command::Inband(cancel) = Command::parse("fleet.cancel") else {
            panic!("expected in-band command");
        };
        assert!(matches!(registry.dispatch(&ctx, &cancel).await, Err(Error::Cancelled)));
    }

    #[test]
    fn test_expect_args() {
        let args = vec!["a".to_string(), "b".to_string()];
        let [first, second] = expect_args::<2>(UPLOAD, &args).unwrap();
        assert_eq!((first.as_str(), second.as_str()), ("a", "b"));
        let err = expect_args::<1>(MKDIR, &args).unwrap_err();
        assert!(err.to_string().contains("expects 1 argument(s), got 2"));
        assert!(non_blank("  ", "path").is_err());
    }
}
