use std::collections::{HashSet, VecDeque};
use tracing::{debug, warn};

use crate::bus::{NotificationBus, Subscription, Topic};
use crate::workflow::{WorkflowId, WorkflowState};

/// Yields each workflow once, when it first becomes complete.
///
/// Listens on `workflow_progress` only. Completion is seen at most once per
/// workflow as long as it stays within the remembered window.
pub struct CompletionWatcher {
    subscription: Subscription,
    seen: HashSet<WorkflowId>,
    order: VecDeque<WorkflowId>,
    memory: usize,
}

impl CompletionWatcher {
    /// Default number of completed workflows remembered for deduplication.
    pub const DEFAULT_MEMORY: usize = 1024;

    pub fn new(bus: &NotificationBus) -> Self {
        Self {
            subscription: bus.subscribe(&[Topic::WorkflowProgress]),
            seen: HashSet::new(),
            order: VecDeque::new(),
            memory: Self::DEFAULT_MEMORY,
        }
    }

    pub fn with_memory(mut self, memory: usize) -> Self {
        self.memory = memory.max(1);
        self
    }

    /// Wait for the next newly completed workflow. Returns `None` once the
    /// bus closes.
    pub async fn next_complete(&mut self) -> Option<WorkflowState> {
        while let Some(notification) = self.subscription.recv().await {
            let state: WorkflowState = match notification.decode() {
                Ok(state) => state,
                Err(e) => {
                    warn!(error = %e, "Undecodable progress notification");
                    continue;
                }
            };

            if !state.is_complete() || self.seen.contains(&state.workflow_id) {
                continue;
            }

            debug!(workflow_id = %state.workflow_id, "Workflow complete");
            self.remember(state.workflow_id);
            return Some(state);
        }
        None
    }

    fn remember(&mut self, workflow_id: WorkflowId) {
        self.seen.insert(workflow_id);
        self.order.push_back(workflow_id);
        while self.order.len() > self.memory {
            if let Some(old) = self.order.pop_front() {
                self.seen.remove(&old);
            }
        }
    }
}
