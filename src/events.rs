//! Lifecycle notifications
//!
//! Publishing never blocks the scheduler. Subscribers that lag behind the
//! channel capacity see `RecvError::Lagged` and skip ahead.

use crate::job::JobId;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    /// A job found every slot busy and is waiting
    Queued {
        job_id: JobId,
        queue_length: usize,
        active_jobs: usize,
    },
    Started {
        job_id: JobId,
        url: String,
    },
    Completed {
        job_id: JobId,
        duration: Duration,
    },
    Failed {
        job_id: JobId,
        error: String,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            JobEvent::Queued { job_id, .. }
            | JobEvent::Started { job_id, .. }
            | JobEvent::Completed { job_id, .. }
            | JobEvent::Failed { job_id, .. } => *job_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<JobEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: JobEvent) {
        if self.sender.send(event).is_err() {
            trace!("No subscribers for job event");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(4);
        bus.publish(JobEvent::Failed {
            job_id: 1,
            error: "boom".to_string(),
        });
    }

    #[tokio::test]
    async fn test_subscribers_see_events_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.publish(JobEvent::Started {
            job_id: 3,
            url: "https://example.com".to_string(),
        });
        bus.publish(JobEvent::Completed {
            job_id: 3,
            duration: Duration::from_millis(10),
        });

        assert!(matches!(rx.recv().await.unwrap(), JobEvent::Started { job_id: 3, .. }));
        assert_eq!(rx.recv().await.unwrap().job_id(), 3);
    }

    #[tokio::test]
    async fn test_slow_subscriber_lags_instead_of_blocking() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();

        for job_id in 1..=5 {
            bus.publish(JobEvent::Failed {
                job_id,
                error: "x".to_string(),
            });
        }

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
        assert_eq!(rx.recv().await.unwrap().job_id(), 4);
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_value(JobEvent::Queued {
            job_id: 2,
            queue_length: 1,
            active_jobs: 2,
        })
        .unwrap();
        assert_eq!(json["event"], "queued");
        assert_eq!(json["queue_length"], 1);
    }
}
