//! Concurrency-bounded orchestration of bundle transfers
//!
//! The scheduler owns the task table and is the deduplication point: at
//! most one [`DownloadTask`] exists per bundle content hash at any time,
//! and concurrent requesters share it through its reference count. All
//! table mutation happens in `request`/`release`/`tick` on the owner's
//! polling thread.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use bale_manifest::BundleDescriptor;
use bale_task::TaskStatus;
use tracing::{debug, info};

use crate::{CopyLocalFileService, DownloadSource, DownloadTask, FetchClient, FetchConfig};

/// Reference-counted, FIFO-started download scheduler.
pub struct DownloadScheduler {
    client: FetchClient,
    store: Arc<bale_cache::CacheStore>,
    config: FetchConfig,
    copy_service: Option<Arc<dyn CopyLocalFileService>>,
    /// Bundle content hash -> the one task for that bundle
    tasks: HashMap<String, Arc<DownloadTask>>,
    /// Creation order of not-yet-started tasks
    queue: VecDeque<String>,
    sequence: u64,
}

impl std::fmt::Debug for DownloadScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadScheduler")
            .field("tasks", &self.tasks.len())
            .field("queued", &self.queue.len())
            .field("config", &self.config)
            .finish()
    }
}

impl DownloadScheduler {
    /// Create a scheduler committing transfers into `store`.
    pub fn new(client: FetchClient, store: Arc<bale_cache::CacheStore>, config: FetchConfig) -> Self {
        Self {
            client,
            store,
            config,
            copy_service: None,
            tasks: HashMap::new(),
            queue: VecDeque::new(),
            sequence: 0,
        }
    }

    /// Attach the injected local-file copy collaborator.
    #[must_use]
    pub fn with_copy_service(mut self, service: Arc<dyn CopyLocalFileService>) -> Self {
        self.copy_service = Some(service);
        self
    }

    /// Request a transfer for `bundle`, sharing any task already in
    /// flight for the same content hash.
    ///
    /// The returned task carries one additional reference owned by the
    /// caller; pass it to [`DownloadScheduler::release`] when no longer
    /// needed. A previously failed or aborted task is replaced by a fresh
    /// one, which is the explicit try-again path.
    pub fn request(
        &mut self,
        bundle: &BundleDescriptor,
        source: DownloadSource,
    ) -> Arc<DownloadTask> {
        let guid = &bundle.content_hash;
        if let Some(existing) = self.tasks.get(guid) {
            match existing.status() {
                TaskStatus::Failed | TaskStatus::Aborted => {
                    debug!(guid, "replacing terminal task for new request");
                    self.tasks.remove(guid);
                }
                _ => {
                    existing.retain();
                    debug!(guid, refs = existing.ref_count(), "joined existing task");
                    return Arc::clone(existing);
                }
            }
        }

        self.sequence += 1;
        let task = Arc::new(DownloadTask::new(
            bundle.clone(),
            source,
            self.sequence,
            self.config.resume_min_size,
            self.config.watchdog_interval,
            self.config.resume_invalidating_codes.clone(),
            self.client.clone(),
            Arc::clone(&self.store),
            self.copy_service.clone(),
        ));
        task.retain();
        debug!(guid, sequence = task.sequence(), "task created");
        self.tasks.insert(guid.clone(), Arc::clone(&task));
        self.queue.push_back(guid.clone());
        task
    }

    /// Drop one reference to a task. Zero-reference tasks are reaped on
    /// the next tick; reaping, not releasing, is what cancels them.
    pub fn release(&mut self, task: &DownloadTask) {
        task.release();
    }

    /// The task currently registered for a bundle content hash, if any.
    pub fn task(&self, guid: &str) -> Option<Arc<DownloadTask>> {
        self.tasks.get(guid).cloned()
    }

    /// Number of tasks in the table, pending and running.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Number of tasks currently transferring.
    pub fn active_count(&self) -> usize {
        self.tasks
            .values()
            .filter(|t| t.status() == TaskStatus::Running)
            .count()
    }

    /// Drive all tasks forward. Must be called on a regular cadence.
    ///
    /// One tick: poll running tasks (completion and stall watchdog), drop
    /// finished tasks from the table, reap zero-reference tasks — pending
    /// ones are removed without ever transferring a byte, mid-flight ones
    /// are aborted — then start queued tasks in creation order up to the
    /// concurrency ceiling and the per-tick start bound.
    pub fn tick(&mut self) {
        for task in self.tasks.values() {
            task.update();
        }

        self.tasks.retain(|guid, task| {
            let status = task.status();
            if status.is_terminal() {
                debug!(guid, ?status, "task finished, removing from table");
                return false;
            }
            if task.ref_count() > 0 {
                return true;
            }
            match status {
                TaskStatus::Idle => {
                    debug!(guid, "dropping never-started task with no references");
                    false
                }
                _ => {
                    // Nobody needs these bytes anymore; stop transferring.
                    debug!(guid, "aborting unreferenced mid-flight task");
                    task.abort();
                    false
                }
            }
        });

        let mut active = self.active_count();
        let mut started = 0usize;
        while started < self.config.max_starts_per_tick && active < self.config.max_concurrent {
            let Some(guid) = self.queue.pop_front() else {
                break;
            };
            // Reaped or already-started entries just fall out of the queue.
            let Some(task) = self.tasks.get(&guid) else {
                continue;
            };
            if task.status() != TaskStatus::Idle {
                continue;
            }
            task.start();
            active += 1;
            started += 1;
        }
    }

    /// Abort every task and clear the table. For teardown.
    pub fn abort_all(&mut self) {
        info!(tasks = self.tasks.len(), "aborting all downloads");
        for task in self.tasks.values() {
            task.abort();
        }
        self.tasks.clear();
        self.queue.clear();
    }
}
