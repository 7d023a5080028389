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

use std::io;

use async_trait::async_trait;
use russh_sftp::client::SftpSession;

use crate::error::TransportError;
use crate::transport::{RemoteFs, RemoteMetadata, RemoteReader, RemoteWriter};

/// Remote file operations over an SFTP session.
pub(super) struct SftpFs {
    sftp: SftpSession,
}

impl SftpFs {
    pub(super) fn new(sftp: SftpSession) -> Self {
        Self { sftp }
    }

    async fn is_dir(&self, path: &str) -> Result<Option<bool>, TransportError> {
        match self.sftp.metadata(path).await {
            Ok(attrs) => Ok(Some(attrs.file_type().is_dir())),
            Err(e) => {
                let e = TransportError::from(e);
                if e.is_not_found() {
                    Ok(None)
                } else {
                    Err(e)
                }
            }
        }
    }
}

#[async_trait]
impl RemoteFs for SftpFs {
    async fn metadata(&self, path: &str) -> Result<RemoteMetadata, TransportError> {
        let attrs = self.sftp.metadata(path).await?;
        let file_type = attrs.file_type();
        Ok(RemoteMetadata {
            len: attrs.size,
            is_dir: file_type.is_dir(),
            is_file: file_type.is_file(),
        })
    }

    async fn open(&self, path: &str) -> Result<RemoteReader, TransportError> {
        let file = self.sftp.open(path).await?;
        Ok(Box::new(file))
    }

    async fn create(&self, path: &str) -> Result<RemoteWriter, TransportError> {
        let file = self.sftp.create(path).await?;
        Ok(Box::new(file))
    }

    async fn remove_file(&self, path: &str) -> Result<(), TransportError> {
        self.sftp.remove_file(path).await?;
        Ok(())
    }

    async fn create_dir_all(&self, path: &str) -> Result<(), TransportError> {
        let mut current = String::new();
        if path.starts_with('/') {
            current.push('/');
        }

        for component in path.split('/').filter(|c| !c.is_empty()) {
            if !current.is_empty() && !current.ends_with('/') {
                current.push('/');
            }
            current.push_str(component);

            match self.is_dir(&current).await? {
                Some(true) => continue,
                Some(false) => {
                    return Err(TransportError::Io(io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        format!("not a directory: {current}"),
                    )));
                }
                None => {
                    if let Err(e) = self.sftp.create_dir(current.as_str()).await {
                        // Lost a race with another writer.
                        if self.is_dir(&current).await? != Some(true) {
                            return Err(e.into());
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.sftp.close().await?;
        Ok(())
    }
}
