//! Job identity, cancellation handles, and source-kind execution driver.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::util::SourceKind;

use super::{command, file, filter, gopher, network, UpdateRequest, UpdateResult};

/// Future returned by a result callback.
pub type ResultFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Continuation invoked on the main context with the finished result.
///
/// The callback owns the result; the queue never touches it afterwards.
pub type ResultCallback = Box<dyn FnOnce(UpdateResult) -> ResultFuture + Send + 'static>;

/// Cancellation group key.
///
/// Jobs are cancelled by the thing that owns them (usually a node id), not
/// individually; [`super::UpdateQueue::cancel_by_owner`] detaches every
/// matching callback in one sweep.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OwnerId(pub String);

impl From<&str> for OwnerId {
    fn from(s: &str) -> Self {
        OwnerId(s.to_string())
    }
}

/// Typed handle for one submitted job.
///
/// Exists from submit until the callback (or its cancellation) has been
/// dealt with. Cancelling flips the flag and wakes any worker blocked on
/// I/O so spawned children can be killed promptly.
#[derive(Debug)]
pub struct JobHandle {
    pub id: u64,
    pub owner: OwnerId,
    cancelled: AtomicBool,
    done: AtomicBool,
    pub(crate) kill: Notify,
}

impl JobHandle {
    pub(crate) fn new(id: u64, owner: OwnerId) -> Self {
        Self {
            id,
            owner,
            cancelled: AtomicBool::new(false),
            done: AtomicBool::new(false),
            kill: Notify::new(),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.kill.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_done(&self) {
        self.done.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }
}

/// One queued fetch attempt together with its continuation.
pub(crate) struct UpdateJob {
    pub request: UpdateRequest,
    pub handle: Arc<JobHandle>,
    pub callback: Option<ResultCallback>,
    /// Counts toward the subscription-job statistics.
    pub counted: bool,
    /// Drains from the priority queue instead of the normal one.
    pub priority: bool,
}

/// Executes a job according to its source kind, then applies the
/// post-filter. Runs on a worker; must not touch shared state.
pub(crate) async fn execute(
    client: &reqwest::Client,
    request: &UpdateRequest,
    handle: &JobHandle,
) -> UpdateResult {
    let mut result = match SourceKind::of(&request.source) {
        SourceKind::Command => {
            if request.allow_commands {
                tracing::debug!(source = %request.source, "recognized local command");
                command::process(request, handle).await
            } else {
                tracing::debug!(source = %request.source, "refusing to run local command from unexpected source");
                UpdateResult {
                    source: request.source.clone(),
                    http_status: 403,
                    update_state: request.update_state.clone(),
                    ..Default::default()
                }
            }
        }
        SourceKind::LocalFile => file::process(request).await,
        SourceKind::Uri => {
            if request.source.starts_with("file://") {
                file::process(request).await
            } else if request.source.starts_with("gopher://") {
                gopher::process(request, handle).await
            } else {
                network::process(client, request, handle).await
            }
        }
    };

    if !result.data.is_empty() {
        if let Some(cmd) = request.filter_cmd.as_deref() {
            filter::apply(cmd, &mut result).await;
        }
    }

    result
}
