//! Bounded refresh queue.
//!
//! Refresh requests are processed one at a time by a single worker. When the
//! queue is full a request is dropped with a warning instead of waiting.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::service::{ConfigService, RefreshOutcome};

/// Default number of pending refresh requests.
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

/// Why a refresh request was not queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EnqueueError {
    /// Too many requests are already pending.
    #[error("refresh queue is full")]
    Full,
    /// The worker has stopped.
    #[error("refresh worker is not running")]
    Closed,
}

/// Sending half of the refresh queue.
#[derive(Debug, Clone)]
pub struct RefreshQueue {
    tx: mpsc::Sender<i64>,
}

impl RefreshQueue {
    /// Starts the worker on the current runtime.
    pub fn start(service: Arc<ConfigService>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<i64>(capacity.max(1));
        let worker = tokio::spawn(async move {
            while let Some(id) = rx.recv().await {
                match service.refresh_subscription(id).await {
                    Ok(RefreshOutcome::Updated { nodes }) => {
                        info!(subscription = id, nodes, "subscription refreshed")
                    }
                    Ok(RefreshOutcome::Unchanged) => {
                        info!(subscription = id, "subscription unchanged")
                    }
                    Err(e) => warn!(subscription = id, error = %e, "subscription refresh failed"),
                }
            }
        });
        (Self { tx }, worker)
    }

    /// Queues a refresh without waiting.
    pub fn enqueue(&self, subscription_id: i64) -> Result<(), EnqueueError> {
        self.tx.try_send(subscription_id).map_err(|e| match e {
            mpsc::error::TrySendError::Full(id) => {
                warn!(subscription = id, "refresh queue full, dropping request");
                EnqueueError::Full
            }
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }
}
