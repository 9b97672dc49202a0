use serde::Serialize;
use std::collections::VecDeque;

use crate::models::{JobId, Stage};

#[derive(Debug, Clone)]
struct Entry {
    job_id: JobId,
    admitted: bool,
}

/// Admission-controlled FIFO for one pipeline stage.
///
/// Jobs stay in the queue from arrival until their terminal event for the
/// stage; `active` counts the entries that have been admitted.
#[derive(Debug, Clone)]
pub struct StageQueue {
    stage: Stage,
    capacity: usize,
    active: usize,
    entries: VecDeque<Entry>,
}

/// Point-in-time counters for one stage queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub stage: Stage,
    pub capacity: usize,
    pub active: usize,
    pub queued: usize,
}

impl StageQueue {
    pub fn new(stage: Stage, capacity: usize) -> Self {
        Self {
            stage,
            capacity,
            active: 0,
            entries: VecDeque::new(),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Append a job to the tail. Returns false if it is already queued.
    pub fn push_back(&mut self, job_id: JobId) -> bool {
        if self.contains(&job_id) {
            return false;
        }
        self.entries.push_back(Entry {
            job_id,
            admitted: false,
        });
        true
    }

    /// Remove a job from any position.
    ///
    /// Returns `Some(true)` if it held an admission slot (which is released),
    /// `Some(false)` if it was still waiting, `None` if it was not queued.
    pub fn remove(&mut self, job_id: &JobId) -> Option<bool> {
        let index = self.entries.iter().position(|e| &e.job_id == job_id)?;
        let entry = self.entries.remove(index)?;
        if entry.admitted {
            self.active -= 1;
        }
        Some(entry.admitted)
    }

    /// Admit the head-most waiting job if a slot is free.
    pub fn promote_next(&mut self) -> Option<JobId> {
        if self.active >= self.capacity {
            return None;
        }
        let entry = self.entries.iter_mut().find(|e| !e.admitted)?;
        entry.admitted = true;
        self.active += 1;
        Some(entry.job_id.clone())
    }

    /// Fill every free slot in FIFO order. Safe to call repeatedly.
    pub fn admit(&mut self) -> Vec<JobId> {
        let mut promoted = Vec::new();
        while let Some(job_id) = self.promote_next() {
            promoted.push(job_id);
        }
        promoted
    }

    pub fn contains(&self, job_id: &JobId) -> bool {
        self.entries.iter().any(|e| &e.job_id == job_id)
    }

    pub fn is_admitted(&self, job_id: &JobId) -> bool {
        self.entries
            .iter()
            .any(|e| &e.job_id == job_id && e.admitted)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn active(&self) -> usize {
        self.active
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Jobs waiting for a slot.
    pub fn queued(&self) -> usize {
        self.entries.len() - self.active
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            stage: self.stage,
            capacity: self.capacity,
            active: self.active,
            queued: self.queued(),
        }
    }
}
