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

//! Fan-out of lifecycle events to observer callbacks.

use std::sync::Arc;

use super::events::ExecutionEvent;

/// Observer callback. Invoked synchronously on the task that produced the
/// event, so it should return quickly.
pub type EventHandler = Arc<dyn Fn(&ExecutionEvent) + Send + Sync>;

/// Ordered, append-only list of handlers.
///
/// Not synchronised itself; the engine keeps it behind the same lock as its
/// session map and calls [`ResultPipeline::handlers`] to notify outside the
/// lock.
#[derive(Default, Clone)]
pub struct ResultPipeline {
    handlers: Vec<EventHandler>,
}

impl ResultPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: EventHandler) {
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Snapshot of the handlers in registration order.
    pub fn handlers(&self) -> Vec<EventHandler> {
        self.handlers.clone()
    }

    /// Deliver `event` to every handler in registration order.
    pub fn notify(&self, event: &ExecutionEvent) {
        notify_all(&self.handlers, event);
    }
}

pub(crate) fn notify_all(handlers: &[EventHandler], event: &ExecutionEvent) {
    for handler in handlers {
        handler(event);
    }
}

impl std::fmt::Debug for ResultPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultPipeline")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}
