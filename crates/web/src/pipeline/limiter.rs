//! Per-requester admission control

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::error::PipelineError;

/// Caps in-flight runs per requester. A limit of zero disables the cap.
///
/// Requesters are keyed by id, so every anonymous caller shares the
/// [`ANONYMOUS_USER`](autoqa_common::ANONYMOUS_USER) pool. A requester's
/// entry lives only while one of its permits is outstanding.
#[derive(Clone)]
pub struct RunLimiter {
    limit: usize,
    slots: Arc<DashMap<String, Arc<Semaphore>>>,
}

/// One admitted run. Dropping it frees the slot.
pub struct RunPermit {
    _permit: OwnedSemaphorePermit,
    requester: String,
    slots: Arc<DashMap<String, Arc<Semaphore>>>,
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        // Map entry plus this permit's handle: nobody else holds the pool.
        self.slots
            .remove_if(&self.requester, |_, sem| Arc::strong_count(sem) == 2);
    }
}

impl RunLimiter {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            slots: Arc::new(DashMap::new()),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of requesters currently holding a pool
    pub fn tracked(&self) -> usize {
        self.slots.len()
    }

    /// Take a slot for `requester`. The slot is released when the returned
    /// permit is dropped. Never waits.
    pub fn try_acquire(&self, requester: &str) -> Result<Option<RunPermit>, PipelineError> {
        if self.limit == 0 {
            return Ok(None);
        }
        let sem = self
            .slots
            .entry(requester.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.limit)))
            .clone();
        let permit = sem
            .try_acquire_owned()
            .map_err(|_| PipelineError::Busy { limit: self.limit })?;
        Ok(Some(RunPermit {
            _permit: permit,
            requester: requester.to_string(),
            slots: self.slots.clone(),
        }))
    }
}
