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

//! In-process transport.
//!
//! [`MemoryConnector`] serves a set of simulated hosts, each with its own
//! file tree, credential and command responder. It implements the same
//! traits as the SSH transport, so an [`Engine`](crate::executor::Engine)
//! can be driven without a network.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::io;
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::task::{ready, Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::Sleep;

use super::{
    Connection, Connector, ExecChannel, ExecOutcome, RemoteFs, RemoteMetadata, RemoteReader,
    RemoteWriter,
};
use crate::error::TransportError;
use crate::host::{Credential, HostConfig};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A command as seen by a simulated host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecRequest {
    pub command: String,
    pub env: Vec<(String, String)>,
    pub stdin: Vec<u8>,
    pub killed: bool,
}

impl ExecRequest {
    pub fn env_var(&self, name: &str) -> Option<&str> {
        self.env
            .iter()
            .rev()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// How a simulated host answers a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecReply {
    Exit { output: Vec<u8>, status: u32 },
    /// Channel closes without an exit status.
    NoStatus { output: Vec<u8> },
    /// Never finishes; only cancellation ends it.
    Hang,
}

impl ExecReply {
    pub fn success(output: impl Into<Vec<u8>>) -> Self {
        ExecReply::Exit {
            output: output.into(),
            status: 0,
        }
    }

    pub fn failure(status: u32, output: impl Into<Vec<u8>>) -> Self {
        ExecReply::Exit {
            output: output.into(),
            status,
        }
    }
}

type Responder = Arc<dyn Fn(&ExecRequest) -> ExecReply + Send + Sync>;

/// Built-in command behaviour of a simulated host.
///
/// Understands `echo`, `true`, `false`, `exit N`, `sleep` (hangs), `cat`
/// (echoes stdin), `printenv NAME` and a leading `sudo`. Anything else exits
/// with status 127.
pub fn default_reply(request: &ExecRequest) -> ExecReply {
    reply_for(request, request.command.trim())
}

fn reply_for(request: &ExecRequest, line: &str) -> ExecReply {
    let (program, rest) = match line.split_once(char::is_whitespace) {
        Some((program, rest)) => (program, rest.trim()),
        None => (line, ""),
    };

    match program {
        "sudo" => reply_for(request, rest),
        "echo" => ExecReply::success(format!("{rest}\n")),
        "true" => ExecReply::success(Vec::<u8>::new()),
        "false" => ExecReply::failure(1, Vec::<u8>::new()),
        "exit" => ExecReply::failure(rest.parse().unwrap_or(0), Vec::<u8>::new()),
        "sleep" => ExecReply::Hang,
        "cat" if rest.is_empty() => ExecReply::success(request.stdin.clone()),
        "printenv" => match request.env_var(rest) {
            Some(value) => ExecReply::success(format!("{value}\n")),
            None => ExecReply::failure(1, Vec::<u8>::new()),
        },
        _ => ExecReply::failure(127, format!("sh: {program}: command not found\n")),
    }
}

#[derive(Default)]
struct HostState {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    executions: Vec<ExecRequest>,
}

/// A simulated remote host.
pub struct MemoryHost {
    password: Option<String>,
    responder: RwLock<Responder>,
    state: Mutex<HostState>,
    dial_delay: Mutex<Option<Duration>>,
    transfer_limit: Mutex<Option<usize>>,
    pacing: Mutex<Option<Duration>>,
    dials: AtomicUsize,
    open_connections: AtomicUsize,
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHost {
    /// A host that accepts any credential.
    pub fn new() -> Self {
        let mut state = HostState::default();
        state.dirs.insert("/".to_string());
        let responder: Responder = Arc::new(default_reply);
        Self {
            password: None,
            responder: RwLock::new(responder),
            state: Mutex::new(state),
            dial_delay: Mutex::new(None),
            transfer_limit: Mutex::new(None),
            pacing: Mutex::new(None),
            dials: AtomicUsize::new(0),
            open_connections: AtomicUsize::new(0),
        }
    }

    /// Require password authentication with exactly this password.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_responder<F>(self, responder: F) -> Self
    where
        F: Fn(&ExecRequest) -> ExecReply + Send + Sync + 'static,
    {
        self.set_responder(responder);
        self
    }

    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&ExecRequest) -> ExecReply + Send + Sync + 'static,
    {
        let mut guard = self.responder.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(responder);
    }

    /// Delay every dial by `delay`.
    pub fn set_dial_delay(&self, delay: Option<Duration>) {
        *lock(&self.dial_delay) = delay;
    }

    /// Fail file reads and writes once `limit` bytes have moved.
    pub fn set_transfer_limit(&self, limit: Option<usize>) {
        *lock(&self.transfer_limit) = limit;
    }

    /// Move file data in chunks of at most [`PACED_CHUNK`] bytes, waiting
    /// `delay` before each one.
    pub fn set_transfer_pacing(&self, delay: Option<Duration>) {
        *lock(&self.pacing) = delay;
    }

    /// Store a file, creating its parent directories.
    pub fn write_file(&self, path: &str, contents: impl Into<Vec<u8>>) {
        let path = normalize(path);
        let mut state = lock(&self.state);
        if let Some(parent) = parent_of(&path) {
            insert_dir_all(&mut state, &parent);
        }
        state.files.insert(path, contents.into());
    }

    pub fn read_file(&self, path: &str) -> Option<Vec<u8>> {
        lock(&self.state).files.get(&normalize(path)).cloned()
    }

    pub fn has_file(&self, path: &str) -> bool {
        lock(&self.state).files.contains_key(&normalize(path))
    }

    pub fn has_dir(&self, path: &str) -> bool {
        lock(&self.state).dirs.contains(&normalize(path))
    }

    /// Every command this host has run, in order.
    pub fn executions(&self) -> Vec<ExecRequest> {
        lock(&self.state).executions.clone()
    }

    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    pub fn open_connections(&self) -> usize {
        self.open_connections.load(Ordering::SeqCst)
    }

    fn authenticate(&self, credential: &Credential) -> Result<(), TransportError> {
        let Some(expected) = &self.password else {
            return Ok(());
        };
        match credential {
            Credential::Password(given) if given.expose() == expected => Ok(()),
            Credential::Password(_) => Err(TransportError::PasswordWrong),
            Credential::KeyFile { .. } => Err(TransportError::KeyAuthFailed),
            Credential::Agent => Err(TransportError::AgentAuthenticationFailed),
        }
    }

    fn respond(&self, request: &ExecRequest) -> ExecReply {
        let responder = self
            .responder
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        responder(request)
    }

    fn transfer_limit(&self) -> Option<usize> {
        *lock(&self.transfer_limit)
    }

    fn pacer(&self) -> Pacer {
        Pacer {
            delay: *lock(&self.pacing),
            sleep: None,
        }
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() && path.starts_with('/') {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Parent directory, or `None` for paths relative to the working directory.
fn parent_of(path: &str) -> Option<String> {
    match Path::new(path).parent()?.to_str()? {
        "" => None,
        parent => Some(parent.to_string()),
    }
}

fn insert_dir_all(state: &mut HostState, path: &str) {
    let mut current = Some(normalize(path));
    while let Some(dir) = current {
        current = parent_of(&dir);
        state.dirs.insert(dir);
    }
}

/// Connector serving simulated hosts keyed by `host:port` address.
#[derive(Default)]
pub struct MemoryConnector {
    hosts: Mutex<HashMap<String, Arc<MemoryHost>>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `host` at `address` (as produced by [`HostConfig::address`]).
    pub fn add_host(&self, address: impl Into<String>, host: MemoryHost) -> Arc<MemoryHost> {
        let host = Arc::new(host);
        lock(&self.hosts).insert(address.into(), Arc::clone(&host));
        host
    }

    /// Stop serving `address`; later dials fail.
    pub fn remove_host(&self, address: &str) -> Option<Arc<MemoryHost>> {
        lock(&self.hosts).remove(address)
    }

    pub fn host(&self, address: &str) -> Option<Arc<MemoryHost>> {
        lock(&self.hosts).get(address).cloned()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, config: &HostConfig) -> Result<Arc<dyn Connection>, TransportError> {
        let address = config.address();
        let host = self.host(&address).ok_or_else(|| {
            TransportError::AddressInvalid(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("no host listening at {address}"),
            ))
        })?;

        host.dials.fetch_add(1, Ordering::SeqCst);
        let delay = *lock(&host.dial_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        host.authenticate(&config.credential)?;
        host.open_connections.fetch_add(1, Ordering::SeqCst);

        Ok(Arc::new(MemoryConnection {
            host,
            address,
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemoryConnection {
    host: Arc<MemoryHost>,
    address: String,
    closed: AtomicBool,
}

impl MemoryConnection {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.is_closed() {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn remote_address(&self) -> String {
        self.address.clone()
    }

    async fn open_exec(&self) -> Result<Box<dyn ExecChannel>, TransportError> {
        self.ensure_open()?;
        Ok(Box::new(MemoryExecChannel {
            host: Arc::clone(&self.host),
            request: ExecRequest::default(),
            started: false,
            recorded: None,
        }))
    }

    async fn open_fs(&self) -> Result<Box<dyn RemoteFs>, TransportError> {
        self.ensure_open()?;
        Ok(Box::new(MemoryFs {
            host: Arc::clone(&self.host),
        }))
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.host.open_connections.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct MemoryExecChannel {
    host: Arc<MemoryHost>,
    request: ExecRequest,
    started: bool,
    recorded: Option<usize>,
}

impl MemoryExecChannel {
    fn record(&mut self) -> usize {
        if let Some(index) = self.recorded {
            return index;
        }
        let mut state = lock(&self.host.state);
        state.executions.push(self.request.clone());
        let index = state.executions.len() - 1;
        self.recorded = Some(index);
        index
    }
}

#[async_trait]
impl ExecChannel for MemoryExecChannel {
    async fn set_env(&mut self, name: &str, value: &str) -> Result<(), TransportError> {
        self.request.env.push((name.to_string(), value.to_string()));
        Ok(())
    }

    async fn exec(&mut self, command: &str) -> Result<(), TransportError> {
        if self.started {
            return Err(TransportError::Unsupported(
                "channel already runs a command".to_string(),
            ));
        }
        self.request.command = command.to_string();
        self.started = true;
        Ok(())
    }

    async fn write_stdin(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.request.stdin.extend_from_slice(data);
        Ok(())
    }

    async fn close_stdin(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn wait(&mut self) -> Result<ExecOutcome, TransportError> {
        if !self.started {
            return Err(TransportError::Unsupported("no command started".to_string()));
        }
        self.record();
        match self.host.respond(&self.request) {
            ExecReply::Exit { output, status } => Ok(ExecOutcome {
                output,
                exit_status: Some(status),
            }),
            ExecReply::NoStatus { output } => Ok(ExecOutcome {
                output,
                exit_status: None,
            }),
            ExecReply::Hang => std::future::pending().await,
        }
    }

    async fn kill(&mut self) -> Result<(), TransportError> {
        let index = self.record();
        if let Some(request) = lock(&self.host.state).executions.get_mut(index) {
            request.killed = true;
        }
        Ok(())
    }
}

struct MemoryFs {
    host: Arc<MemoryHost>,
}

fn not_found(path: &str) -> TransportError {
    TransportError::Io(io::Error::new(
        io::ErrorKind::NotFound,
        format!("no such file: {path}"),
    ))
}

#[async_trait]
impl RemoteFs for MemoryFs {
    async fn metadata(&self, path: &str) -> Result<RemoteMetadata, TransportError> {
        let path = normalize(path);
        let state = lock(&self.host.state);
        if state.dirs.contains(&path) {
            return Ok(RemoteMetadata {
                len: None,
                is_dir: true,
                is_file: false,
            });
        }
        match state.files.get(&path) {
            Some(contents) => Ok(RemoteMetadata {
                len: Some(contents.len() as u64),
                is_dir: false,
                is_file: true,
            }),
            None => Err(not_found(&path)),
        }
    }

    async fn open(&self, path: &str) -> Result<RemoteReader, TransportError> {
        let path = normalize(path);
        let data = lock(&self.host.state)
            .files
            .get(&path)
            .cloned()
            .ok_or_else(|| not_found(&path))?;
        Ok(Box::new(MemoryReader {
            data,
            pos: 0,
            limit: self.host.transfer_limit(),
            pacer: self.host.pacer(),
        }))
    }

    async fn create(&self, path: &str) -> Result<RemoteWriter, TransportError> {
        let path = normalize(path);
        {
            let mut state = lock(&self.host.state);
            if state.dirs.contains(&path) {
                return Err(TransportError::Io(io::Error::other(format!(
                    "is a directory: {path}"
                ))));
            }
            if let Some(parent) = parent_of(&path) {
                if !state.dirs.contains(&parent) {
                    return Err(not_found(&parent));
                }
            }
            state.files.insert(path.clone(), Vec::new());
        }
        Ok(Box::new(MemoryWriter {
            host: Arc::clone(&self.host),
            path,
            written: 0,
            limit: self.host.transfer_limit(),
            pacer: self.host.pacer(),
        }))
    }

    async fn remove_file(&self, path: &str) -> Result<(), TransportError> {
        let path = normalize(path);
        match lock(&self.host.state).files.remove(&path) {
            Some(_) => Ok(()),
            None => Err(not_found(&path)),
        }
    }

    async fn create_dir_all(&self, path: &str) -> Result<(), TransportError> {
        let path = normalize(path);
        let mut state = lock(&self.host.state);
        let mut ancestor = Some(path.clone());
        while let Some(dir) = ancestor {
            if state.files.contains_key(&dir) {
                return Err(TransportError::Io(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("not a directory: {dir}"),
                )));
            }
            ancestor = parent_of(&dir);
        }
        insert_dir_all(&mut state, &path);
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Largest chunk a paced reader or writer moves per call.
pub const PACED_CHUNK: usize = 1024;

struct Pacer {
    delay: Option<Duration>,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl Pacer {
    /// Ready with the largest chunk allowed once the next chunk may move.
    fn poll_chunk(&mut self, cx: &mut Context<'_>) -> Poll<usize> {
        let Some(delay) = self.delay else {
            return Poll::Ready(usize::MAX);
        };
        let sleep = self
            .sleep
            .get_or_insert_with(|| Box::pin(tokio::time::sleep(delay)));
        if sleep.as_mut().poll(cx).is_pending() {
            return Poll::Pending;
        }
        self.sleep = None;
        Poll::Ready(PACED_CHUNK)
    }
}

struct MemoryReader {
    data: Vec<u8>,
    pos: usize,
    limit: Option<usize>,
    pacer: Pacer,
}

impl AsyncRead for MemoryReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let chunk = ready!(this.pacer.poll_chunk(cx));
        let end = match this.limit {
            Some(limit) if this.pos >= limit && this.pos < this.data.len() => {
                return Poll::Ready(Err(io::Error::other("simulated read failure")));
            }
            Some(limit) => limit.min(this.data.len()),
            None => this.data.len(),
        };
        let n = (end - this.pos).min(buf.remaining()).min(chunk);
        buf.put_slice(&this.data[this.pos..this.pos + n]);
        this.pos += n;
        Poll::Ready(Ok(()))
    }
}

struct MemoryWriter {
    host: Arc<MemoryHost>,
    path: String,
    written: usize,
    limit: Option<usize>,
    pacer: Pacer,
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let chunk = ready!(this.pacer.poll_chunk(cx));
        let accepted = match this.limit {
            Some(limit) if this.written >= limit && !buf.is_empty() => {
                return Poll::Ready(Err(io::Error::other("simulated write failure")));
            }
            Some(limit) => buf.len().min(limit - this.written),
            None => buf.len(),
        }
        .min(chunk);
        lock(&this.host.state)
            .files
            .entry(this.path.clone())
            .or_default()
            .extend_from_slice(&buf[..accepted]);
        this.written += accepted;
        Poll::Ready(Ok(accepted))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
