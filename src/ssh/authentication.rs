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

//! Credential-based SSH authentication.

use std::sync::Arc;

use russh::client::{Handle, Handler};
use tracing::debug;

use crate::error::TransportError;
use crate::host::Credential;
use crate::security::Secret;

/// Authenticate `handle` as `username` with `credential`.
pub(super) async fn authenticate<H: Handler>(
    handle: &mut Handle<H>,
    username: &str,
    credential: &Credential,
) -> Result<(), TransportError> {
    match credential {
        Credential::Password(password) => {
            let result = handle
                .authenticate_password(username, password.expose())
                .await?;
            if !result.success() {
                return Err(TransportError::PasswordWrong);
            }
        }
        Credential::KeyFile { path, passphrase } => {
            let key = russh::keys::load_secret_key(path, passphrase.as_ref().map(Secret::expose))
                .map_err(TransportError::KeyInvalid)?;
            let result = handle
                .authenticate_publickey(
                    username,
                    russh::keys::PrivateKeyWithHashAlg::new(
                        Arc::new(key),
                        handle.best_supported_rsa_hash().await?.flatten(),
                    ),
                )
                .await?;
            if !result.success() {
                return Err(TransportError::KeyAuthFailed);
            }
        }
        Credential::Agent => authenticate_with_agent(handle, username).await?,
    }
    Ok(())
}

#[cfg(not(target_os = "windows"))]
async fn authenticate_with_agent<H: Handler>(
    handle: &mut Handle<H>,
    username: &str,
) -> Result<(), TransportError> {
    let mut agent = russh::keys::agent::client::AgentClient::connect_env()
        .await
        .map_err(|_| TransportError::AgentConnectionFailed)?;

    let identities = agent
        .request_identities()
        .await
        .map_err(|_| TransportError::AgentConnectionFailed)?;
    if identities.is_empty() {
        return Err(TransportError::AgentNoIdentities);
    }

    for identity in identities {
        let result = handle
            .authenticate_publickey_with(
                username,
                identity.clone(),
                handle.best_supported_rsa_hash().await?.flatten(),
                &mut agent,
            )
            .await;

        match result {
            Ok(auth) if auth.success() => return Ok(()),
            Ok(_) => debug!("agent identity rejected"),
            Err(e) => debug!(error = %e, "agent identity failed"),
        }
    }

    Err(TransportError::AgentAuthenticationFailed)
}

#[cfg(target_os = "windows")]
async fn authenticate_with_agent<H: Handler>(
    _handle: &mut Handle<H>,
    _username: &str,
) -> Result<(), TransportError> {
    Err(TransportError::Unsupported(
        "SSH agent authentication is not supported on this platform".to_string(),
    ))
}
