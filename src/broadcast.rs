//! Fan-out of job events to live subscribers.
//!
//! Each subscriber owns a bounded queue. Publishing never waits: a subscriber
//! whose queue is full or whose receiver has been dropped is removed.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::analyzer::Finding;
use crate::engine::decode::ScanOutcome;
use crate::types::JobId;

pub const DEFAULT_SUBSCRIBER_QUEUE: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Started { job_id: JobId },
    Progress { job_id: JobId, percent: u8 },
    Result { job_id: JobId, result: ScanOutcome },
    Findings { job_id: JobId, findings: Vec<Finding> },
    Complete { job_id: JobId, duration_seconds: f64 },
    Error { job_id: JobId, message: String },
    Stopped { job_id: JobId },
}

impl Event {
    pub fn job_id(&self) -> JobId {
        match self {
            Event::Started { job_id }
            | Event::Progress { job_id, .. }
            | Event::Result { job_id, .. }
            | Event::Findings { job_id, .. }
            | Event::Complete { job_id, .. }
            | Event::Error { job_id, .. }
            | Event::Stopped { job_id } => *job_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Event::Started { .. } => "started",
            Event::Progress { .. } => "progress",
            Event::Result { .. } => "result",
            Event::Findings { .. } => "findings",
            Event::Complete { .. } => "complete",
            Event::Error { .. } => "error",
            Event::Stopped { .. } => "stopped",
        }
    }

    /// The last event a job publishes.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::Complete { .. } | Event::Error { .. } | Event::Stopped { .. })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// Receiving end held by a subscriber. Dropping it unsubscribes lazily.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::Receiver<Event>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// `None` once the broadcaster has dropped this subscriber.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }
}

#[derive(Debug)]
pub struct Broadcaster {
    subscribers: Mutex<HashMap<SubscriberId, mpsc::Sender<Event>>>,
    next_id: AtomicU64,
    queue_depth: usize,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_QUEUE)
    }
}

impl Broadcaster {
    pub fn new(queue_depth: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            queue_depth: queue_depth.max(1),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.queue_depth);
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        subscribers.insert(id, tx);
        log::debug!("[broadcast] subscribe: id={} subscribers={}", id.0, subscribers.len());
        Subscription { id, rx }
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        let removed = subscribers.remove(&id).is_some();
        log::debug!("[broadcast] unsubscribe: id={} removed={} subscribers={}", id.0, removed, subscribers.len());
        removed
    }

    /// Deliver to every subscriber; returns how many received the event.
    pub fn publish(&self, event: &Event) -> usize {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        let mut delivered = 0;

        subscribers.retain(|id, tx| match tx.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                log::warn!("[broadcast] subscriber_dropped: id={} reason=queue_full", id.0);
                false
            }
            Err(TrySendError::Closed(_)) => {
                log::debug!("[broadcast] subscriber_dropped: id={} reason=closed", id.0);
                false
            }
        });

        log::trace!(
            "[broadcast] publish: job={} kind={} delivered={}",
            event.job_id(),
            event.kind(),
            delivered
        );
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
