//! Serialized transmission of lifecycle events to the persister.
//!
//! Events are enqueued without blocking and sent one at a time by a single
//! worker, preserving publication order. Transmission failures are logged
//! and dropped; event delivery never fails a synchronization run.
//! `wait_until_idle` resolves once every enqueued event has been handled.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::events::{EventPublisher, PublishedEvent};
use crate::synchronization::client::SynchronizationApiClient;

pub struct SynchronizationEventQueue {
    tx: mpsc::UnboundedSender<PublishedEvent>,
    outstanding: Arc<AtomicUsize>,
    idle_notify: Arc<Notify>,
}

impl SynchronizationEventQueue {
    /// Start the queue worker for one synchronization job.
    pub fn new(client: Arc<SynchronizationApiClient>, job_id: impl Into<String>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<PublishedEvent>();
        let outstanding = Arc::new(AtomicUsize::new(0));
        let idle_notify = Arc::new(Notify::new());

        let job_id = job_id.into();
        let worker_outstanding = outstanding.clone();
        let worker_notify = idle_notify.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(error) = client
                    .publish_events(&job_id, std::slice::from_ref(&event))
                    .await
                {
                    warn!(
                        job_id = %job_id,
                        event = %event.name,
                        error = %error,
                        "Failed to publish synchronization event"
                    );
                } else {
                    debug!(job_id = %job_id, event = %event.name, "Published synchronization event");
                }
                worker_outstanding.fetch_sub(1, Ordering::AcqRel);
                worker_notify.notify_waiters();
            }
        });

        Self {
            tx,
            outstanding,
            idle_notify,
        }
    }

    /// Enqueue an event for transmission. Never blocks.
    pub fn enqueue(&self, event: PublishedEvent) {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(event).is_err() {
            // Worker is gone; nothing will drain this entry.
            self.outstanding.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Resolve once the queue has fully drained.
    pub async fn wait_until_idle(&self) {
        loop {
            let notified = self.idle_notify.notified();
            if self.outstanding.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Forward every event from a broadcast publisher into the queue. The task
/// ends when the publisher is dropped.
pub fn forward_events(
    publisher: &EventPublisher,
    queue: Arc<SynchronizationEventQueue>,
) -> JoinHandle<()> {
    let mut receiver = publisher.subscribe();
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => queue.enqueue(event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event forwarding lagged; events dropped");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
