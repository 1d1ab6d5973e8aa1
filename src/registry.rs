//! Bounded history of job records
//!
//! Records are keyed by id. Ids are handed out in admission order under the
//! same lock that stamps `created_at`, so the smallest key is always the
//! oldest record and eviction is a `pop_first`.

use crate::job::{JobId, JobRecord, JobSnapshot};
use crate::queue::WaitQueue;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug)]
pub struct JobRegistry {
    jobs: BTreeMap<JobId, JobRecord>,
    max_size: usize,
}

impl JobRegistry {
    pub fn new(max_size: usize) -> Self {
        Self {
            jobs: BTreeMap::new(),
            max_size: max_size.max(1),
        }
    }

    /// Insert a record, evicting the oldest ones while over the bound.
    ///
    /// Eviction ignores status: a record for a job that is still running may
    /// be dropped, which only affects later status queries for it.
    pub fn record(&mut self, record: JobRecord) -> Vec<JobId> {
        self.jobs.insert(record.id, record);

        let mut evicted = Vec::new();
        while self.jobs.len() > self.max_size {
            match self.jobs.pop_first() {
                Some((id, old)) => {
                    debug!("Evicted job {} ({}) from history", id, old.status);
                    evicted.push(id);
                }
                None => break,
            }
        }
        evicted
    }

    /// Apply `f` to the record for `id`; returns false when it was evicted.
    pub fn update<F>(&mut self, id: JobId, f: F) -> bool
    where
        F: FnOnce(&mut JobRecord),
    {
        match self.jobs.get_mut(&id) {
            Some(record) => {
                f(record);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: JobId) -> Option<&JobRecord> {
        self.jobs.get(&id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub(crate) fn snapshot(&self, id: JobId, queue: &WaitQueue) -> Option<JobSnapshot> {
        self.jobs
            .get(&id)
            .map(|record| record.snapshot(queue.position(id)))
    }

    /// Every retained record, newest first.
    pub(crate) fn list(&self, queue: &WaitQueue) -> Vec<JobSnapshot> {
        let mut records: Vec<&JobRecord> = self.jobs.values().collect();
        records.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        records
            .into_iter()
            .map(|record| record.snapshot(queue.position(record.id)))
            .collect()
    }
}
