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

//! Byte copying that stops when a cancellation token fires.
//!
//! [`CancellableReader`] checks its token before every read of the wrapped
//! source, so a transfer stops at the next read boundary after cancellation.
//! A read that is already pending is not interrupted.
//!
//! Other remote operations are raced against the token with
//! [`until_cancelled`]; cleanup after a cancellation is bounded by
//! [`CLEANUP_TIMEOUT`].

use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{Error, Result};

/// Longest wait for a kill, close or partial-file removal.
pub const CLEANUP_TIMEOUT: Duration = Duration::from_secs(2);

/// Run `operation` unless `token` fires first, in which case the operation
/// is dropped and [`Error::Cancelled`] returned.
pub async fn until_cancelled<F, T>(token: &CancellationToken, operation: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if token.is_cancelled() {
        return Err(Error::Cancelled);
    }
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(Error::Cancelled),
        result = operation => result,
    }
}

/// Run a best-effort cleanup step, logging failures and giving up after
/// [`CLEANUP_TIMEOUT`].
pub(crate) async fn cleanup<F, T, E>(what: &str, step: F)
where
    F: Future<Output = std::result::Result<T, E>>,
    E: fmt::Display,
{
    match tokio::time::timeout(CLEANUP_TIMEOUT, step).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => warn!(error = %e, "failed to {what}"),
        Err(_) => warn!(timeout = ?CLEANUP_TIMEOUT, "gave up trying to {what}"),
    }
}

/// Marker carried inside the I/O error produced by a cancelled read.
#[derive(Debug)]
struct CancelledRead;

impl fmt::Display for CancelledRead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("read cancelled")
    }
}

impl std::error::Error for CancelledRead {}

fn is_cancelled_read(err: &io::Error) -> bool {
    err.get_ref()
        .is_some_and(|inner| inner.is::<CancelledRead>())
}

/// Async reader that fails with a cancellation error once its token fires.
pub struct CancellableReader<R> {
    inner: R,
    token: CancellationToken,
}

impl<R> CancellableReader<R> {
    pub fn new(inner: R, token: CancellationToken) -> Self {
        Self { inner, token }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for CancellableReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.token.is_cancelled() {
            return Poll::Ready(Err(io::Error::other(CancelledRead)));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

/// Copy `reader` into `writer` until EOF or cancellation, then flush and
/// shut the writer down.
///
/// Returns the number of bytes copied. A cancelled copy yields
/// [`Error::Cancelled`]; any other I/O failure is an [`Error::Transfer`].
pub async fn copy_cancellable<R, W>(
    token: &CancellationToken,
    reader: R,
    writer: &mut W,
) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut reader = CancellableReader::new(reader, token.clone());
    let copied = match tokio::io::copy(&mut reader, writer).await {
        Ok(copied) => copied,
        Err(e) if is_cancelled_read(&e) => return Err(Error::Cancelled),
        Err(e) => return Err(Error::transfer("failed to copy file content", e)),
    };

    writer
        .shutdown()
        .await
        .map_err(|e| Error::transfer("failed to finish writing file", e))?;

    Ok(copied)
}
