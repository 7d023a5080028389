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

//! Connection lifecycle and concurrent dispatch across hosts.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::events::ExecutionEvent;
use super::pipeline::{notify_all, ResultPipeline};
use super::result_types::{CommandRecord, ExecutionReport, HostOutcome};
use crate::commands::CommandRegistry;
use crate::error::{Error, Result};
use crate::host::HostConfig;
use crate::session::RemoteSession;
use crate::ssh::SshConnector;
use crate::transport::{Connection, Connector};

/// State shared with per-host tasks. Never held across an await.
#[derive(Default)]
struct Shared {
    sessions: HashMap<String, Arc<RemoteSession>>,
    pipeline: ResultPipeline,
}

fn notify(shared: &RwLock<Shared>, event: &ExecutionEvent) {
    let handlers = shared
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .pipeline
        .handlers();
    notify_all(&handlers, event);
}

/// Runs command lists on a fleet of hosts.
///
/// One session is kept per host id. [`Engine::execute`] runs the same list
/// on every connected host concurrently; each host stops at its first
/// failing command without affecting the others.
///
/// ```no_run
/// # async fn demo() -> fleetexec::Result<()> {
/// use fleetexec::{Engine, HostConfig};
///
/// let engine = Engine::new(vec![
///     HostConfig::with_password("web-1", "10.0.0.11", "ops", "secret"),
///     HostConfig::with_password("web-2", "10.0.0.12", "ops", "secret"),
/// ]);
/// engine.register_handler(|event| println!("{event}"));
/// engine.connect().await?;
///
/// let report = engine.execute(&["uptime", "fleet.mkdir /opt/app"]).await?;
/// for outcome in report.failures() {
///     eprintln!("{} failed: {:?}", outcome.host_id, outcome.error);
/// }
/// engine.close().await
/// # }
/// ```
pub struct Engine {
    hosts: Vec<HostConfig>,
    connector: Arc<dyn Connector>,
    registry: Arc<CommandRegistry>,
    shared: Arc<RwLock<Shared>>,
    token: CancellationToken,
    tracker: TaskTracker,
    connect_lock: Mutex<()>,
}

impl Engine {
    /// Engine over SSH with the built-in commands.
    pub fn new(hosts: Vec<HostConfig>) -> Self {
        Self {
            hosts,
            connector: Arc::new(SshConnector::new()),
            registry: Arc::new(CommandRegistry::with_builtins()),
            shared: Arc::new(RwLock::new(Shared::default())),
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
            connect_lock: Mutex::new(()),
        }
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_registry(mut self, registry: Arc<CommandRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Tie the engine's lifetime to `parent`: cancelling it cancels
    /// everything the engine does.
    pub fn with_parent_token(mut self, parent: &CancellationToken) -> Self {
        self.token = parent.child_token();
        self
    }

    pub fn hosts(&self) -> &[HostConfig] {
        &self.hosts
    }

    pub fn registry(&self) -> &Arc<CommandRegistry> {
        &self.registry
    }

    /// The engine's lifecycle token. Cancelling it stops all work.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Add an observer for lifecycle events.
    pub fn register_handler<F>(&self, handler: F)
    where
        F: Fn(&ExecutionEvent) + Send + Sync + 'static,
    {
        self.write_shared().pipeline.register(Arc::new(handler));
    }

    fn read_shared(&self) -> RwLockReadGuard<'_, Shared> {
        self.shared.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_shared(&self) -> RwLockWriteGuard<'_, Shared> {
        self.shared.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Dial every configured host in order.
    ///
    /// A host that fails is reported through a `Connected` event carrying the
    /// error and skipped. Fails only when no host is connected afterwards.
    /// Reconnecting a host replaces and closes its previous session.
    pub async fn connect(&self) -> Result<()> {
        let _connecting = self.connect_lock.lock().await;
        self.connect_all().await
    }

    /// Caller holds `connect_lock`.
    async fn connect_all(&self) -> Result<()> {
        let mut failures = Vec::new();

        for host in &self.hosts {
            if self.token.is_cancelled() {
                return Err(Error::Cancelled);
            }

            match self.dial(host).await {
                Ok(connection) => {
                    let remote_addr = connection.remote_address();
                    let session = Arc::new(RemoteSession::new(
                        host.clone(),
                        connection,
                        Arc::clone(&self.registry),
                    ));
                    let previous = self.write_shared().sessions.insert(host.id.clone(), session);
                    if let Some(previous) = previous {
                        self.close_replaced(&previous).await;
                    }

                    info!(host = %host.id, address = %remote_addr, "SSH connection established");
                    notify(&self.shared, &ExecutionEvent::connected(&host.id, remote_addr, None));
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    error!(host = %host.id, address = %host.address(), error = %e, "failed to establish SSH connection");
                    let stale = self.write_shared().sessions.remove(&host.id);
                    if let Some(stale) = stale {
                        self.close_replaced(&stale).await;
                    }

                    let e = Arc::new(e);
                    notify(
                        &self.shared,
                        &ExecutionEvent::connected(&host.id, host.address(), Some(Arc::clone(&e))),
                    );
                    failures.push(e);
                }
            }
        }

        let connected = self.read_shared().sessions.len();
        if connected == 0 {
            return Err(Error::NoConnections(failures));
        }

        info!(successful = connected, total = self.hosts.len(), "connections established");
        Ok(())
    }

    async fn dial(&self, host: &HostConfig) -> Result<Arc<dyn Connection>> {
        let address = host.address();
        debug!(host = %host.id, %address, timeout = ?host.connect_timeout, "dialing");

        tokio::select! {
            _ = self.token.cancelled() => Err(Error::Cancelled),
            result = tokio::time::timeout(host.connect_timeout, self.connector.connect(host)) => {
                match result {
                    Ok(Ok(connection)) => Ok(connection),
                    Ok(Err(source)) => Err(Error::Connection { host: address, source }),
                    Err(_) => Err(Error::ConnectTimeout {
                        host: address,
                        timeout: host.connect_timeout,
                    }),
                }
            }
        }
    }

    async fn close_replaced(&self, session: &RemoteSession) {
        if let Err(e) = session.close().await {
            warn!(host = %session.id(), error = %e, "failed to close replaced session");
        }
    }

    /// Run `commands` on every connected host, connecting first if nothing
    /// is connected yet.
    pub async fn execute<S: AsRef<str>>(&self, commands: &[S]) -> Result<ExecutionReport> {
        let commands: Arc<Vec<String>> =
            Arc::new(commands.iter().map(|c| c.as_ref().to_string()).collect());
        self.run_all(self.token.clone(), |_| Arc::clone(&commands))
            .await
    }

    /// Run each host's own configured command list.
    pub async fn execute_configured(&self) -> Result<ExecutionReport> {
        self.run_all(self.token.clone(), |session| {
            Arc::new(session.host().commands.clone())
        })
        .await
    }

    /// Like [`Engine::execute`], but `cancel` also stops this run.
    ///
    /// Cancelling `cancel` aborts only this run; the engine and its sessions
    /// remain usable.
    pub async fn execute_with_cancel<S: AsRef<str>>(
        &self,
        commands: &[S],
        cancel: &CancellationToken,
    ) -> Result<ExecutionReport> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let run_token = self.token.child_token();
        // Ends the forwarder once this run is over.
        let _run_guard = run_token.clone().drop_guard();
        {
            let run_token = run_token.clone();
            let cancel = cancel.clone();
            self.tracker.spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => run_token.cancel(),
                    _ = run_token.cancelled() => {}
                }
            });
        }

        let commands: Arc<Vec<String>> =
            Arc::new(commands.iter().map(|c| c.as_ref().to_string()).collect());
        self.run_all(run_token, |_| Arc::clone(&commands)).await
    }

    async fn run_all<F>(&self, token: CancellationToken, plan: F) -> Result<ExecutionReport>
    where
        F: Fn(&RemoteSession) -> Arc<Vec<String>>,
    {
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let no_sessions = self.read_shared().sessions.is_empty();
        if no_sessions {
            let _connecting = self.connect_lock.lock().await;
            // Another run may have connected while this one waited.
            let still_empty = self.read_shared().sessions.is_empty();
            if still_empty {
                self.connect_all().await?;
            }
        }

        let mut sessions: Vec<Arc<RemoteSession>> =
            self.read_shared().sessions.values().cloned().collect();
        sessions.sort_by(|a, b| a.id().cmp(b.id()));

        let mut tasks = FuturesUnordered::new();
        for session in sessions {
            let host_id = session.id().to_string();
            let remote_addr = session.remote_address();
            let commands = plan(session.as_ref());
            let handle = self.tracker.spawn(run_host(
                session,
                commands,
                token.clone(),
                Arc::clone(&self.shared),
            ));
            tasks.push(async move { (host_id, remote_addr, handle.await) });
        }

        let mut outcomes = Vec::with_capacity(tasks.len());
        while let Some((host_id, remote_addr, joined)) = tasks.next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    error!(host = %host_id, error = %e, "host task did not complete");
                    outcomes.push(HostOutcome {
                        host_id,
                        remote_addr,
                        completed: Vec::new(),
                        failed_command: None,
                        error: Some(Arc::new(Error::other(anyhow::anyhow!(
                            "host task did not complete: {e}"
                        )))),
                    });
                }
            }
        }

        Ok(ExecutionReport { outcomes })
    }

    /// Connected host ids mapped to their remote addresses.
    pub fn connected_hosts(&self) -> BTreeMap<String, String> {
        self.read_shared()
            .sessions
            .iter()
            .map(|(id, session)| (id.clone(), session.remote_address()))
            .collect()
    }

    pub fn session(&self, id: &str) -> Option<Arc<RemoteSession>> {
        self.read_shared().sessions.get(id).cloned()
    }

    /// Cancel all work, wait for in-flight tasks and close every session.
    ///
    /// Close failures are collected into one [`Error::Close`]. Calling this
    /// again is harmless.
    pub async fn close(&self) -> Result<()> {
        self.token.cancel();
        self.tracker.close();
        self.tracker.wait().await;

        let sessions: Vec<Arc<RemoteSession>> = self
            .write_shared()
            .sessions
            .drain()
            .map(|(_, session)| session)
            .collect();

        let mut failures = Vec::new();
        for session in sessions {
            if let Err(e) = session.close().await {
                warn!(host = %session.id(), error = %e, "failed to close session");
                failures.push(e);
            }
        }

        if !failures.is_empty() {
            return Err(Error::Close(failures));
        }
        info!("all connections closed");
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn run_host(
    session: Arc<RemoteSession>,
    commands: Arc<Vec<String>>,
    token: CancellationToken,
    shared: Arc<RwLock<Shared>>,
) -> HostOutcome {
    let host_id = session.id().to_string();
    let remote_addr = session.remote_address();
    let mut outcome = HostOutcome {
        host_id: host_id.clone(),
        remote_addr: remote_addr.clone(),
        completed: Vec::new(),
        failed_command: None,
        error: None,
    };

    for command in commands.iter() {
        if token.is_cancelled() {
            info!(host = %host_id, "execution cancelled");
            outcome.failed_command = Some(command.clone());
            outcome.error = Some(Arc::new(Error::Cancelled));
            return outcome;
        }

        notify(&shared, &ExecutionEvent::started(&host_id, &remote_addr, command));
        match session.execute_command(&token, command).await {
            Ok(output) => {
                debug!(host = %host_id, command = %command, output = %output, "command finished");
                notify(
                    &shared,
                    &ExecutionEvent::finished(&host_id, &remote_addr, command, output.clone(), None),
                );
                outcome.completed.push(CommandRecord {
                    command: command.clone(),
                    output,
                });
            }
            Err(e) => {
                warn!(host = %host_id, command = %command, error = %e, "command failed");
                let output = e.output().unwrap_or_default().to_string();
                let e = Arc::new(e);
                notify(
                    &shared,
                    &ExecutionEvent::finished(&host_id, &remote_addr, command, output, Some(Arc::clone(&e))),
                );
                outcome.failed_command = Some(command.clone());
                outcome.error = Some(e);
                return outcome;
            }
        }
    }

    info!(host = %host_id, "command execution completed successfully");
    outcome
}
