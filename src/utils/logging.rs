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

use tracing_subscriber::EnvFilter;

/// Create an environment filter based on verbosity level
pub fn create_env_filter(verbosity: u8) -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        // RUST_LOG wins so transport internals can be debugged
        EnvFilter::from_default_env()
    } else {
        match verbosity {
            0 => EnvFilter::new("fleetexec=warn"),
            1 => EnvFilter::new("fleetexec=info"),
            2 => EnvFilter::new("fleetexec=debug,russh=debug"),
            _ => EnvFilter::new("fleetexec=trace,russh=trace,russh_sftp=debug"),
        }
    }
}

/// Install a console subscriber for the given verbosity.
///
/// Fails if a global subscriber is already set.
pub fn init_logging(verbosity: u8) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(create_env_filter(verbosity))
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_create_env_filter() {
        for verbosity in 0..=3 {
            let _ = create_env_filter(verbosity);
        }
    }

    #[test]
    #[serial]
    fn test_init_logging_twice_reports_error() {
        let _ = init_logging(0);
        assert!(init_logging(0).is_err());
    }
}
