/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::trace;

use crate::common::MasConfig;

/// Fixed-size pool shared by every agent of a runtime.
///
/// Units of work are spawned as tokio tasks but only `size` of them execute
/// at a time; the rest wait for a permit in submission order. Cloning the pool
/// shares it.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    handle: Handle,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    size: usize,
}

impl WorkerPool {
    /// Creates a pool on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails when called outside a tokio runtime.
    pub fn new(size: usize) -> anyhow::Result<Self> {
        let handle = Handle::try_current().context("worker pool must be created inside a tokio runtime")?;
        Ok(Self::with_handle(handle, size))
    }

    /// Creates a pool sized from configuration on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails when called outside a tokio runtime.
    pub fn from_config(config: &MasConfig) -> anyhow::Result<Self> {
        Self::new(config.worker_pool_size())
    }

    /// Creates a pool that spawns onto the given runtime handle.
    pub fn with_handle(handle: Handle, size: usize) -> Self {
        let size = size.max(1);
        Self {
            handle,
            permits: Arc::new(Semaphore::new(size)),
            tracker: TaskTracker::new(),
            size,
        }
    }

    /// Queues a unit of work.
    pub fn submit<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        self.tracker.spawn_on(
            async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    trace!("Worker pool closed, dropping unit of work");
                    return;
                };
                work.await;
            },
            &self.handle,
        );
    }

    /// Maximum number of units executing at once.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Number of units currently holding a worker.
    #[must_use]
    pub fn busy(&self) -> usize {
        self.size - self.permits.available_permits()
    }

    /// Number of submitted units that have not completed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Waits until every submitted unit has completed.
    ///
    /// Units submitted while waiting are waited for as well.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn never_exceeds_its_size() {
        let pool = WorkerPool::new(2).unwrap();
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            pool.submit(async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                current.fetch_sub(1, Ordering::SeqCst);
            });
        }

        pool.drain().await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.pending(), 0);
    }

    #[test]
    fn creation_outside_runtime_fails() {
        assert!(WorkerPool::new(1).is_err());
    }
}
