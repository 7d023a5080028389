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

//! Per-host results of an execution run.

use std::sync::Arc;

use crate::error::{Error, Result};

/// A command that completed successfully and its output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRecord {
    pub command: String,
    pub output: String,
}

/// What happened on one host during a run.
#[derive(Debug, Clone)]
pub struct HostOutcome {
    pub host_id: String,
    pub remote_addr: String,
    /// Commands that finished successfully, in execution order.
    pub completed: Vec<CommandRecord>,
    /// The command that stopped this host, if any.
    pub failed_command: Option<String>,
    pub error: Option<Arc<Error>>,
}

impl HostOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn is_cancelled(&self) -> bool {
        self.error.as_deref().is_some_and(Error::is_cancelled)
    }

    /// Output of the completed commands, concatenated.
    pub fn combined_output(&self) -> String {
        self.completed
            .iter()
            .map(|record| record.output.as_str())
            .collect()
    }
}

/// Results of one `execute` call, one entry per participating host in
/// completion order.
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    pub outcomes: Vec<HostOutcome>,
}

impl ExecutionReport {
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(HostOutcome::is_success)
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn outcome(&self, host_id: &str) -> Option<&HostOutcome> {
        self.outcomes
            .iter()
            .find(|outcome| outcome.host_id == host_id)
    }

    pub fn failures(&self) -> impl Iterator<Item = &HostOutcome> {
        self.outcomes.iter().filter(|outcome| !outcome.is_success())
    }

    /// The first host error observed, in completion order.
    pub fn first_error(&self) -> Option<&Arc<Error>> {
        self.outcomes.iter().find_map(|outcome| outcome.error.as_ref())
    }

    /// Collapse into the first error, if any.
    pub fn into_result(self) -> Result<Self, Arc<Error>> {
        if let Some(error) = self.first_error().cloned() {
            return Err(error);
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(id: &str, error: Option<Error>) -> HostOutcome {
        HostOutcome {
            host_id: id.to_string(),
            remote_addr: format!("{id}:22"),
            completed: vec![CommandRecord {
                command: "echo hi".to_string(),
                output: "hi\n".to_string(),
            }],
            failed_command: error.as_ref().map(|_| "false".to_string()),
            error: error.map(Arc::new),
        }
    }

    #[test]
    fn test_report_success() {
        let report = ExecutionReport {
            outcomes: vec![outcome("a", None), outcome("b", None)],
        };
        assert!(report.is_success());
        assert!(report.first_error().is_none());
        assert_eq!(report.outcome("b").unwrap().combined_output(), "hi\n");
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn test_report_first_error() {
        let report = ExecutionReport {
            outcomes: vec![
                outcome("a", None),
                outcome("b", Some(Error::Cancelled)),
                outcome("c", Some(Error::UnknownCommand("fleet.x".to_string()))),
            ],
        };
        assert!(!report.is_success());
        assert_eq!(report.failures().count(), 2);
        assert!(report.outcome("b").unwrap().is_cancelled());
        assert!(matches!(
            report.first_error().map(|e| e.as_ref()),
            Some(Error::Cancelled)
        ));
        assert!(report.into_result().is_err());
    }
}
