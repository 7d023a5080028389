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

//! Fleet configuration files.
//!
//! ```yaml
//! defaults:
//!   user: deploy
//!   ssh_key: ~/.ssh/id_ed25519
//!   connect_timeout: 10
//!
//! hosts:
//!   - web-1.example.com
//!   - admin@db-1.example.com:2222
//!   - id: cache
//!     host: 10.0.0.7
//!     password: ${CACHE_PASSWORD}
//!     known_hosts: default
//!     commands:
//!       - sudo systemctl restart redis
//! ```

mod loader;
mod resolver;
#[cfg(test)]
mod tests;
mod types;
mod utils;

pub use types::{Defaults, FleetConfig, HostEntry};
pub use utils::{expand_env_vars, expand_tilde};
