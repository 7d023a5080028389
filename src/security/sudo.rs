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

//! Automatic password injection for privilege-elevated commands.
//!
//! When a host is configured with `auto_sudo_password`, commands whose first
//! word is the elevation verb get the login password written to their stdin
//! right after they start. The command is not inspected for a prompt; if the
//! elevation tool does not read stdin the password is simply discarded.

use zeroize::Zeroizing;

use super::Secret;

/// Command word that triggers password injection.
pub const ELEVATION_VERB: &str = "sudo";

/// Whether `command` invokes the elevation verb.
///
/// Leading whitespace is ignored and the verb must be a whole word, so
/// `sudo ls` matches but `sudoedit /etc/hosts` does not.
pub fn is_elevated_command(command: &str) -> bool {
    command.split_whitespace().next() == Some(ELEVATION_VERB)
}

/// Bytes to write to the stdin of `command`, if any.
pub fn elevation_payload(command: &str, password: Option<&Secret>) -> Option<Zeroizing<Vec<u8>>> {
    match password {
        Some(password) if is_elevated_command(command) => Some(password.with_newline()),
        _ => None,
    }
}
