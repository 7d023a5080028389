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

//! The `fleet.sh` built-in and local script execution.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{CommandContext, CommandHandler, SHELL};
use crate::error::{Error, Result};
use crate::session::HOST_ID_ENV;

/// Captured result of a local script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptOutput {
    /// Stdout and stderr interleaved.
    pub output: Vec<u8>,
    /// Exit code, `None` if the process was terminated by a signal.
    pub status: Option<i32>,
}

impl ScriptOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Runs scripts on the local machine.
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    /// Run `script` with the ambient environment plus `env`.
    ///
    /// Must stop the script and return [`Error::Cancelled`] when `token`
    /// fires.
    async fn run(
        &self,
        script: &str,
        env: &[(String, String)],
        token: &CancellationToken,
    ) -> Result<ScriptOutput>;
}

/// Runs scripts with `sh -c`, merging stderr into stdout.
#[derive(Debug, Clone)]
pub struct LocalShell {
    program: PathBuf,
}

impl Default for LocalShell {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalShell {
    pub fn new() -> Self {
        Self::with_program("sh")
    }

    /// Use a different POSIX shell.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl ScriptRunner for LocalShell {
    async fn run(
        &self,
        script: &str,
        env: &[(String, String)],
        token: &CancellationToken,
    ) -> Result<ScriptOutput> {
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let child = tokio::process::Command::new(&self.program)
            .arg("-c")
            .arg(format!("exec 2>&1\n{script}"))
            .envs(env.iter().map(|(key, value)| (key.as_str(), value.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::LocalScript {
                message: format!("failed to start {}: {e}", self.program.display()),
                output: String::new(),
            })?;

        // Dropping the child on cancellation kills it.
        tokio::select! {
            _ = token.cancelled() => {
                debug!("local script cancelled");
                Err(Error::Cancelled)
            }
            result = child.wait_with_output() => {
                let finished = result.map_err(|e| Error::LocalScript {
                    message: format!("failed to wait for script: {e}"),
                    output: String::new(),
                })?;
                Ok(ScriptOutput {
                    output: finished.stdout,
                    status: finished.status.code(),
                })
            }
        }
    }
}

/// `fleet.sh <words...>`: join the words into a script and run it locally.
pub struct Shell {
    runner: Arc<dyn ScriptRunner>,
}

impl Shell {
    pub fn new(runner: Arc<dyn ScriptRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl CommandHandler for Shell {
    async fn run(&self, ctx: &CommandContext<'_>, args: &[String]) -> Result<String> {
        if args.is_empty() {
            return Err(Error::config(format!("{SHELL} requires a script")));
        }
        let script = args.join(" ");
        let env = [(HOST_ID_ENV.to_string(), ctx.host.id.clone())];

        let finished = self.runner.run(&script, &env, ctx.token).await?;
        let output = String::from_utf8_lossy(&finished.output).into_owned();
        if finished.success() {
            return Ok(output);
        }

        let message = match finished.status {
            Some(code) => format!("exit status {code}"),
            None => "terminated by signal".to_string(),
        };
        Err(Error::LocalScript { message, output })
    }
}
