// src/gps/mod.rs
//! Position sources: the contract the walk session depends on, and the
//! receivers that implement it

pub mod fix;
pub mod gpsd;
pub mod nmea;
pub mod simulated;
pub mod stream;

pub use fix::GpsFix;
pub use simulated::{SimulatedFeed, SimulatedSource};
pub use stream::{SampleFilter, StreamKind, StreamSource, SubscriptionOptions};

use crate::{geo::Coordinate, walk::PositionSample};
use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use thiserror::Error;
use tokio::task::JoinHandle;

/// Failures reported by a position source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("no position fix within {0:?}")]
    Timeout(Duration),
    #[error("position source unavailable: {0}")]
    Unavailable(String),
    #[error("position source read failed: {0}")]
    Io(String),
    #[error("position stream closed")]
    Closed,
}

/// Called for every sample a subscription delivers, in delivery order.
pub type SampleCallback = Arc<dyn Fn(PositionSample) + Send + Sync>;

/// Called at most once per subscription when it fails; no samples follow.
pub type ErrorCallback = Arc<dyn Fn(SourceError) + Send + Sync>;

/// Identifies one continuous subscription on a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

impl SubscriptionHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Platform location provider as seen by the walk session.
///
/// Callbacks are invoked from the source's own tasks and must not block.
pub trait PositionSource: Send + Sync + 'static {
    /// Ask for (or verify) access to location data.
    fn request_permission(&self) -> impl Future<Output = bool> + Send;

    /// One-shot fetch bounded by `timeout`.
    fn current_position(
        &self,
        timeout: Duration,
    ) -> impl Future<Output = std::result::Result<Coordinate, SourceError>> + Send;

    /// Start continuous delivery. Must be called from within a Tokio runtime.
    fn subscribe(
        &self,
        on_sample: SampleCallback,
        on_error: ErrorCallback,
    ) -> std::result::Result<SubscriptionHandle, SourceError>;

    /// Stop delivery. Unknown or already-cancelled handles are ignored.
    fn unsubscribe(&self, handle: SubscriptionHandle);
}

/// Book-keeping for subscription tasks spawned by a source.
#[derive(Default)]
pub(crate) struct TaskRegistry {
    next_id: AtomicU64,
    tasks: Mutex<HashMap<u64, JoinHandle<()>>>,
}

impl TaskRegistry {
    pub(crate) fn next_handle(&self) -> SubscriptionHandle {
        SubscriptionHandle(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub(crate) fn insert(&self, handle: SubscriptionHandle, task: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.retain(|_, t| !t.is_finished());
        tasks.insert(handle.0, task);
    }

    pub(crate) fn cancel(&self, handle: SubscriptionHandle) {
        let task = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&handle.0);
        if let Some(task) = task {
            task.abort();
        }
    }

    pub(crate) fn cancel_all(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        for (_, task) in tasks.drain() {
            task.abort();
        }
    }
}

impl Drop for TaskRegistry {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
