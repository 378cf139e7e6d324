//! Two-priority job queue with a bounded worker budget.
//!
//! `submit()` enqueues and returns immediately; a dispatcher task drains
//! the priority queue ahead of the normal one, never reorders within a
//! queue, and keeps at most [`MAX_ACTIVE_JOBS`] jobs running across both.
//! Finished jobs land on the [`ResultPump`], which the embedding shell
//! drains on its main context — callbacks are the only place shared state
//! is mutated, so workers never race the tree or the store.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use super::job::{execute, JobHandle, OwnerId, ResultCallback, UpdateJob};
use super::{UpdateFlags, UpdateRequest, UpdateResult};

/// Maximum jobs running concurrently, shared across both priorities.
pub const MAX_ACTIVE_JOBS: usize = 5;

// ============================================================================
// Finished jobs / result pump
// ============================================================================

/// A completed job waiting for main-context dispatch.
pub struct FinishedJob {
    handle: Arc<JobHandle>,
    callback: Option<ResultCallback>,
    result: UpdateResult,
}

/// Receiver side of the main-context dispatch channel.
///
/// Whoever drains this *is* the main context: every result callback runs
/// here, one at a time. A cancelled job's callback is never invoked and
/// its result is dropped.
pub struct ResultPump {
    rx: mpsc::UnboundedReceiver<FinishedJob>,
}

impl ResultPump {
    /// Dispatch the next finished job, if any arrives.
    ///
    /// Returns false once the queue side has shut down.
    pub async fn dispatch_one(&mut self) -> bool {
        match self.rx.recv().await {
            Some(done) => {
                Self::deliver(done).await;
                true
            }
            None => false,
        }
    }

    /// Drain finished jobs until the queue shuts down.
    pub async fn run(mut self) {
        while self.dispatch_one().await {}
    }

    /// Dispatch whatever has already completed without waiting.
    pub async fn drain_ready(&mut self) {
        while let Ok(done) = self.rx.try_recv() {
            Self::deliver(done).await;
        }
    }

    async fn deliver(done: FinishedJob) {
        if done.handle.is_cancelled() {
            tracing::debug!(job = done.handle.id, "dropping result of cancelled job");
            return;
        }
        if let Some(cb) = done.callback {
            cb(done.result).await;
        }
    }
}

// ============================================================================
// Queue
// ============================================================================

struct QueueInner {
    submit_tx: mpsc::UnboundedSender<UpdateJob>,
    /// Registry of live handles, for owner-keyed cancellation.
    registry: Mutex<Vec<Arc<JobHandle>>>,
    next_id: AtomicU64,
    feed_jobs: AtomicUsize,
    peak_feed_jobs: AtomicUsize,
}

/// Handle to the fetch job queue. Cheap to clone.
#[derive(Clone)]
pub struct UpdateQueue {
    inner: Arc<QueueInner>,
}

impl UpdateQueue {
    /// Build the queue, its dispatcher task, and the result pump.
    ///
    /// `network_timeout` bounds each HTTP fetch; command jobs have their
    /// own wall-clock timeout (see the command runner).
    pub fn new(network_timeout: Duration) -> (Self, ResultPump) {
        let client = reqwest::Client::builder()
            .user_agent(concat!("eddy/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::limited(10))
            .timeout(network_timeout)
            .build()
            .unwrap_or_default();

        let (submit_tx, submit_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(QueueInner {
            submit_tx,
            registry: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            feed_jobs: AtomicUsize::new(0),
            peak_feed_jobs: AtomicUsize::new(0),
        });

        tokio::spawn(dispatcher(submit_rx, done_tx, client, Arc::clone(&inner)));

        (Self { inner }, ResultPump { rx: done_rx })
    }

    /// Enqueue a fetch attempt. Returns immediately with the job's handle.
    ///
    /// The callback runs exactly once on the main context when the job
    /// completes, unless the job is cancelled first.
    pub fn submit(
        &self,
        request: UpdateRequest,
        owner: OwnerId,
        flags: UpdateFlags,
        callback: ResultCallback,
    ) -> Arc<JobHandle> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = Arc::new(JobHandle::new(id, owner));

        let counted = !flags.no_feed;
        if counted {
            let count = self.inner.feed_jobs.fetch_add(1, Ordering::Relaxed) + 1;
            self.inner
                .peak_feed_jobs
                .fetch_max(count, Ordering::Relaxed);
        }

        {
            let mut registry = self.inner.registry.lock().expect("job registry poisoned");
            registry.retain(|h| !h.is_done());
            registry.push(Arc::clone(&handle));
        }

        tracing::debug!(job = id, source = %request.source, priority = flags.priority_high, "queueing request");

        let _ = self.inner.submit_tx.send(UpdateJob {
            request,
            handle: Arc::clone(&handle),
            callback: Some(callback),
            counted,
            priority: flags.priority_high,
        });

        handle
    }

    /// Detach the callbacks of every pending or running job of `owner`.
    ///
    /// Running jobs may still finish internally, but their results are
    /// dropped; spawned child processes are killed. After this returns no
    /// callback registered with `owner` will ever be invoked.
    pub fn cancel_by_owner(&self, owner: &OwnerId) {
        let registry = self.inner.registry.lock().expect("job registry poisoned");
        for handle in registry.iter() {
            if &handle.owner == owner && !handle.is_done() {
                tracing::debug!(job = handle.id, owner = %owner.0, "cancelling job");
                handle.cancel();
            }
        }
    }

    /// Subscription jobs in flight and the peak since the last idle point.
    ///
    /// Favicon/enclosure downloads (`no_feed`) are excluded.
    pub fn count(&self) -> (usize, usize) {
        let count = self.inner.feed_jobs.load(Ordering::Relaxed);
        if count == 0 {
            self.inner.peak_feed_jobs.store(0, Ordering::Relaxed);
        }
        (count, self.inner.peak_feed_jobs.load(Ordering::Relaxed))
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

async fn dispatcher(
    mut submit_rx: mpsc::UnboundedReceiver<UpdateJob>,
    done_tx: mpsc::UnboundedSender<FinishedJob>,
    client: reqwest::Client,
    inner: Arc<QueueInner>,
) {
    let mut priority: VecDeque<UpdateJob> = VecDeque::new();
    let mut normal: VecDeque<UpdateJob> = VecDeque::new();
    let mut running = 0usize;
    let (slot_tx, mut slot_rx) = mpsc::unbounded_channel::<()>();
    let mut open = true;

    while open || running > 0 || !priority.is_empty() || !normal.is_empty() {
        // Start as many jobs as the shared budget allows, priority first,
        // FIFO within each queue.
        while running < MAX_ACTIVE_JOBS {
            let job = match priority.pop_front().or_else(|| normal.pop_front()) {
                Some(job) => job,
                None => break,
            };

            if job.handle.is_cancelled() {
                // Pending jobs cancelled before execution are dropped.
                job.handle.mark_done();
                job_done(&inner, job.counted);
                continue;
            }

            running += 1;
            let client = client.clone();
            let done_tx = done_tx.clone();
            let slot_tx = slot_tx.clone();
            let inner = Arc::clone(&inner);
            tokio::spawn(async move {
                tracing::debug!(job = job.handle.id, source = %job.request.source, "processing request");
                let result = execute(&client, &job.request, &job.handle).await;
                job.handle.mark_done();
                job_done(&inner, job.counted);
                let _ = done_tx.send(FinishedJob {
                    handle: job.handle,
                    callback: job.callback,
                    result,
                });
                let _ = slot_tx.send(());
            });
        }

        tokio::select! {
            job = submit_rx.recv(), if open => match job {
                Some(job) => {
                    if job.priority {
                        priority.push_back(job);
                    } else {
                        normal.push_back(job);
                    }
                }
                None => open = false,
            },
            slot = slot_rx.recv() => {
                if slot.is_some() {
                    running -= 1;
                }
            }
        }
    }
}

fn job_done(inner: &Arc<QueueInner>, counted: bool) {
    if counted {
        inner.feed_jobs.fetch_sub(1, Ordering::Relaxed);
    }
}
