use std::collections::VecDeque;
use std::time::Duration;

/// One postponed cache preparation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrepareRequest {
    pub selected_index: usize,
    /// Session size when the request was made
    pub total_count: usize,
}

/// Cache preparations waiting to run after a selection change.
///
/// Requests are neither merged nor cancelled: every queued request runs, in
/// order, so the last selection decides the final resident set.
#[derive(Debug)]
pub struct DeferredPrepare {
    delay: Duration,
    pending: VecDeque<PrepareRequest>,
}

impl DeferredPrepare {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: VecDeque::new(),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn push(&mut self, request: PrepareRequest) {
        self.pending.push_back(request);
    }

    pub fn pop(&mut self) -> Option<PrepareRequest> {
        self.pending.pop_front()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
