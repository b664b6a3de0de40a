//! Lifetime extension for work issued outside the response path.
//!
//! Background cache writes and revalidations must be registered here so the
//! process does not exit before they land. [`Lifetime::settle`] waits for
//! everything registered so far, including work registered while settling.

use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::task::JoinSet;

/// Registry of in-flight background work.
#[derive(Clone, Default)]
pub struct Lifetime {
    tasks: Arc<Mutex<JoinSet<()>>>,
}

impl Lifetime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` in the background and keep the process alive until it settles.
    pub fn extend<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        while let Some(finished) = tasks.try_join_next() {
            if let Err(e) = finished {
                tracing::warn!("background task failed: {e}");
            }
        }
        tasks.spawn(work);
    }

    /// Number of registered tasks that have not been reaped yet.
    pub fn in_flight(&self) -> usize {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    /// Wait until every registered task has finished.
    pub async fn settle(&self) {
        loop {
            let mut drained = {
                let mut tasks = self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                std::mem::take(&mut *tasks)
            };
            if drained.is_empty() {
                return;
            }
            while let Some(finished) = drained.join_next().await {
                if let Err(e) = finished {
                    tracing::warn!("background task failed: {e}");
                }
            }
        }
    }
}
