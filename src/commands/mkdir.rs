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

use async_trait::async_trait;
use tracing::debug;

use super::transfer::open_fs;
use super::{expect_args, non_blank, CommandContext, CommandHandler, MKDIR};
use crate::error::{Error, Result};
use crate::utils::cancellable::{cleanup, until_cancelled};

/// `fleet.mkdir <path>`: create a remote directory and its parents.
/// Succeeds when the directory already exists.
pub struct Mkdir;

#[async_trait]
impl CommandHandler for Mkdir {
    async fn run(&self, ctx: &CommandContext<'_>, args: &[String]) -> Result<String> {
        let [path] = expect_args::<1>(MKDIR, args)?;
        let path = non_blank(path, "directory path")?;

        let fs = open_fs(ctx).await?;
        let result = until_cancelled(ctx.token, async {
            fs.create_dir_all(path)
                .await
                .map_err(|e| Error::transfer(format!("failed to create remote directory {path}"), e))
        })
        .await;
        cleanup("close remote file handle", fs.close()).await;
        result?;

        debug!(host = %ctx.host.id, path, "remote directory ready");
        Ok(format!("created directory {path}\n"))
    }
}
