//! FIFO holding area for admitted jobs that found no free execution slot

use crate::job::{JobId, PendingJob};
use std::collections::VecDeque;

#[derive(Debug, Default)]
pub(crate) struct WaitQueue {
    jobs: VecDeque<PendingJob>,
}

impl WaitQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_back(&mut self, job: PendingJob) {
        self.jobs.push_back(job);
    }

    pub(crate) fn pop_front(&mut self) -> Option<PendingJob> {
        self.jobs.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.jobs.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// 1-based position of `id`, computed at query time.
    pub(crate) fn position(&self, id: JobId) -> Option<usize> {
        self.jobs
            .iter()
            .position(|job| job.spec.id == id)
            .map(|index| index + 1)
    }

    /// Remove every waiting job, oldest first.
    pub(crate) fn drain(&mut self) -> Vec<PendingJob> {
        self.jobs.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobOutcome, JobSpec};
    use crate::{Config, JobOptions};

    fn pending(id: JobId) -> PendingJob {
        let (responder, _outcome) = JobOutcome::channel();
        PendingJob {
            spec: JobSpec {
                id,
                url: format!("https://example.com/{id}"),
                options: JobOptions::default().resolve(&Config::default()),
            },
            responder,
        }
    }

    #[test]
    fn test_fifo_order_and_positions() {
        let mut queue = WaitQueue::new();
        for id in [7, 8, 9] {
            queue.push_back(pending(id));
        }

        assert_eq!(queue.position(7), Some(1));
        assert_eq!(queue.position(9), Some(3));
        assert_eq!(queue.position(42), None);

        assert_eq!(queue.pop_front().map(|job| job.spec.id), Some(7));
        assert_eq!(queue.position(8), Some(1));
        assert_eq!(queue.position(9), Some(2));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_drain_empties_in_order() {
        let mut queue = WaitQueue::new();
        queue.push_back(pending(1));
        queue.push_back(pending(2));

        let ids: Vec<JobId> = queue.drain().into_iter().map(|job| job.spec.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(queue.is_empty());
        assert!(queue.pop_front().is_none());
    }
}
