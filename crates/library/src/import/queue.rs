//! Import scheduling.
//!
//! Two serial task queues, each with concurrency one. A fair async mutex
//! is exactly that: submissions line up FIFO and execute one at a time,
//! and low-priority work never contends with the normal queue.

use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Which queue an import is submitted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    /// User-initiated imports.
    #[default]
    Normal,
    /// Background/bulk imports that should not delay interactive ones.
    Low,
}

#[derive(Clone)]
pub(crate) struct ImportQueues {
    normal: Arc<Mutex<()>>,
    low: Arc<Mutex<()>>,
}

impl ImportQueues {
    pub(crate) fn new() -> Self {
        Self { normal: Arc::new(Mutex::new(())), low: Arc::new(Mutex::new(())) }
    }

    /// Wait for the queue's single execution slot.
    pub(crate) async fn acquire(&self, priority: Priority) -> OwnedMutexGuard<()> {
        match priority {
            Priority::Normal => self.normal.clone().lock_owned().await,
            Priority::Low => self.low.clone().lock_owned().await,
        }
    }
}
