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

//! Secret values with automatic memory clearing.
//!
//! Passwords and key passphrases are held in a [`SecretString`] so they are
//! zeroized on drop and never appear in `Debug` output.

use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use zeroize::Zeroizing;

/// A password or passphrase that is cleared from memory when dropped.
///
/// Clones are independent copies and are zeroized independently.
#[derive(Clone)]
pub struct Secret {
    inner: SecretString,
}

impl Secret {
    /// Wrap a secret value. Empty values are allowed; callers decide what an
    /// empty password means.
    pub fn new(value: impl Into<String>) -> Self {
        let value: String = value.into();
        Self {
            inner: SecretString::new(value.into_boxed_str()),
        }
    }

    /// Borrow the plaintext. Use immediately and do not store the result.
    pub fn expose(&self) -> &str {
        self.inner.expose_secret()
    }

    /// The secret followed by a newline, as written to a password prompt.
    pub fn with_newline(&self) -> Zeroizing<Vec<u8>> {
        let mut bytes = self.inner.expose_secret().as_bytes().to_vec();
        bytes.push(b'\n');
        Zeroizing::new(bytes)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.expose_secret().is_empty()
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("value", &"[REDACTED]")
            .finish()
    }
}
