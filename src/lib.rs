//! Feed synchronization and item-store core for a desktop aggregator.
//!
//! This crate owns everything between "the user has a feed list" and "the
//! item store holds current, state-preserving rows for it": the typed node
//! tree, the two-priority fetch job queue, the merge algorithm, the rule
//! engine behind search folders, the auto-update scheduler, favicon
//! discovery, and the Google-Reader-family remote sync layer.
//!
//! The desktop shell is an external consumer: it drains [`CoreEvent`]s,
//! drives the [`update::ResultPump`] on its main context, and renders
//! whatever the store says. Nothing in here draws pixels.

pub mod events;
pub mod favicon;
pub mod feedlist;
pub mod itemstate;
pub mod parser;
pub mod remote;
pub mod rules;
pub mod scheduler;
pub mod settings;
pub mod storage;
pub mod subscription;
pub mod update;
pub mod util;

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

pub use events::CoreEvent;
pub use settings::Settings;

/// Shared collaborators handed to everything that acts on core state.
///
/// Passed by value (cheap clones of handles) instead of living in process
/// globals, so test suites can substitute an in-memory store and a private
/// event channel per test.
#[derive(Clone)]
pub struct CoreCtx {
    /// The persistent item store.
    pub db: storage::Database,
    /// The fetch job queue.
    pub queue: update::UpdateQueue,
    /// The node tree. Only ever locked from the main context.
    pub feedlist: Arc<Mutex<feedlist::FeedList>>,
    /// Typed configuration values.
    pub settings: Arc<Settings>,
    /// Signals for the embedding shell.
    pub events: mpsc::UnboundedSender<CoreEvent>,
    /// When true the scheduler enqueues no network sources.
    pub offline: Arc<std::sync::atomic::AtomicBool>,
}

impl CoreCtx {
    /// Assemble a context from its collaborators.
    ///
    /// Returns the event receiver the shell should drain alongside the
    /// context itself.
    pub fn new(
        db: storage::Database,
        queue: update::UpdateQueue,
        settings: Settings,
    ) -> (Self, mpsc::UnboundedReceiver<CoreEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let ctx = Self {
            db,
            queue,
            feedlist: Arc::new(Mutex::new(feedlist::FeedList::new())),
            settings: Arc::new(settings),
            events,
            offline: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        };
        (ctx, events_rx)
    }

    /// Emit a shell signal, ignoring a hung-up receiver.
    pub fn emit(&self, event: CoreEvent) {
        let _ = self.events.send(event);
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline
            .store(offline, std::sync::atomic::Ordering::Relaxed);
    }
}
