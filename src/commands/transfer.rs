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

//! File transfer built-ins.

use std::path::Path;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{expect_args, non_blank, CommandContext, CommandHandler, DOWNLOAD, UPLOAD};
use crate::error::{Error, Result};
use crate::transport::RemoteFs;
use crate::utils::cancellable::{cleanup, until_cancelled};
use crate::utils::copy_cancellable;

/// `fleet.upload <local> <remote>`
pub struct Upload;

#[async_trait]
impl CommandHandler for Upload {
    async fn run(&self, ctx: &CommandContext<'_>, args: &[String]) -> Result<String> {
        let [local, remote] = expect_args::<2>(UPLOAD, args)?;
        let local = non_blank(local, "local path")?;
        let remote = non_blank(remote, "remote path")?;

        let metadata = tokio::fs::metadata(local)
            .await
            .map_err(|e| Error::transfer(format!("failed to stat local file {local}"), e))?;
        if !metadata.is_file() {
            return Err(Error::config(format!("{local} is not a regular file")));
        }

        let file = tokio::fs::File::open(local)
            .await
            .map_err(|e| Error::transfer(format!("failed to open local file {local}"), e))?;
        let copied = upload_from_reader(ctx, file, remote).await?;

        Ok(format!("uploaded {copied} bytes from {local} to {remote}\n"))
    }
}

/// `fleet.download <remote> <local>`
pub struct Download;

#[async_trait]
impl CommandHandler for Download {
    async fn run(&self, ctx: &CommandContext<'_>, args: &[String]) -> Result<String> {
        let [remote, local] = expect_args::<2>(DOWNLOAD, args)?;
        let remote = non_blank(remote, "remote path")?;
        let local = non_blank(local, "local path")?;

        let fs = open_fs(ctx).await?;
        let result = download_with(fs.as_ref(), ctx.token, remote, Path::new(local)).await;
        close_fs(fs.as_ref()).await;
        let copied = result?;

        Ok(format!("downloaded {copied} bytes from {remote} to {local}\n"))
    }
}

/// Uploads a fixed in-memory payload to a fixed remote path.
///
/// Register it under any name; the command takes no arguments.
pub struct UploadBytes {
    contents: Vec<u8>,
    remote_path: String,
}

impl UploadBytes {
    pub fn new(contents: impl Into<Vec<u8>>, remote_path: impl Into<String>) -> Self {
        Self {
            contents: contents.into(),
            remote_path: remote_path.into(),
        }
    }
}

#[async_trait]
impl CommandHandler for UploadBytes {
    async fn run(&self, ctx: &CommandContext<'_>, args: &[String]) -> Result<String> {
        expect_args::<0>("in-memory upload", args)?;
        let remote = non_blank(&self.remote_path, "remote path")?;
        let copied = upload_from_reader(ctx, &self.contents[..], remote).await?;
        Ok(format!("uploaded {copied} bytes to {remote}\n"))
    }
}

/// Stream `reader` into `remote` on the context's host.
///
/// Missing parent directories are created. If the copy fails or is
/// cancelled the partial remote file is removed.
pub async fn upload_from_reader<R>(ctx: &CommandContext<'_>, reader: R, remote: &str) -> Result<u64>
where
    R: AsyncRead + Unpin + Send,
{
    let fs = open_fs(ctx).await?;
    let result = upload_with(fs.as_ref(), ctx.token, reader, remote).await;
    close_fs(fs.as_ref()).await;
    result
}

async fn upload_with<R>(
    fs: &dyn RemoteFs,
    token: &CancellationToken,
    reader: R,
    remote: &str,
) -> Result<u64>
where
    R: AsyncRead + Unpin + Send,
{
    if let Some(parent) = remote_parent(remote) {
        until_cancelled(token, async {
            fs.create_dir_all(parent)
                .await
                .map_err(|e| Error::transfer(format!("failed to create remote directory {parent}"), e))
        })
        .await?;
    }

    let mut writer = until_cancelled(token, async {
        fs.create(remote)
            .await
            .map_err(|e| Error::transfer(format!("failed to create remote file {remote}"), e))
    })
    .await?;

    match copy_cancellable(token, reader, &mut writer).await {
        Ok(copied) => {
            debug!(remote, copied, "upload finished");
            Ok(copied)
        }
        Err(e) => {
            drop(writer);
            cleanup("remove partial remote file", fs.remove_file(remote)).await;
            Err(e)
        }
    }
}

async fn download_with(
    fs: &dyn RemoteFs,
    token: &CancellationToken,
    remote: &str,
    local: &Path,
) -> Result<u64> {
    let metadata = until_cancelled(token, async {
        fs.metadata(remote)
            .await
            .map_err(|e| Error::transfer(format!("failed to stat remote file {remote}"), e))
    })
    .await?;
    if metadata.is_dir {
        return Err(Error::config(format!("{remote} is a directory")));
    }

    let reader = until_cancelled(token, async {
        fs.open(remote)
            .await
            .map_err(|e| Error::transfer(format!("failed to open remote file {remote}"), e))
    })
    .await?;

    if let Some(parent) = local.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            Error::transfer(format!("failed to create local directory {}", parent.display()), e)
        })?;
    }

    let mut file = tokio::fs::File::create(local).await.map_err(|e| {
        Error::transfer(format!("failed to create local file {}", local.display()), e)
    })?;

    match copy_cancellable(token, reader, &mut file).await {
        Ok(copied) => {
            debug!(remote, local = %local.display(), copied, "download finished");
            Ok(copied)
        }
        Err(e) => {
            drop(file);
            if let Err(remove_err) = tokio::fs::remove_file(local).await {
                warn!(local = %local.display(), error = %remove_err, "failed to remove partial local file");
            }
            Err(e)
        }
    }
}

pub(super) async fn open_fs(ctx: &CommandContext<'_>) -> Result<Box<dyn RemoteFs>> {
    until_cancelled(ctx.token, async { Ok::<_, Error>(ctx.connection.open_fs().await?) }).await
}

async fn close_fs(fs: &dyn RemoteFs) {
    cleanup("close remote file handle", fs.close()).await;
}

/// Parent of a POSIX remote path, or `None` when it is the root or the
/// working directory.
fn remote_parent(path: &str) -> Option<&str> {
    let (parent, _) = path.trim_end_matches('/').rsplit_once('/')?;
    if parent.is_empty() {
        None
    } else {
        Some(parent)
    }
}
