// src/session.rs
//! Walk session state machine
//!
//! A [`WalkSession`] owns the walk being recorded. It subscribes to a
//! [`PositionSource`] while recording, appends every delivered sample to the
//! route and keeps the running distance up to date in O(1) per sample. The
//! active walk is re-persisted in the background after each sample; finishing
//! a walk moves it to the front of the archive held by the [`WalkStore`].
//!
//! Samples that are still being delivered while `stop` runs are dropped: once
//! `stop` has taken the walk, late callbacks find no matching recording.

use crate::{
    clock::Clock,
    error::{Result, WalkError},
    geo::MapRegion,
    gps::{ErrorCallback, PositionSource, SampleCallback, SourceError, SubscriptionHandle},
    store::WalkStore,
    walk::{PositionSample, Walk, WalkStats},
};
use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, Weak},
    time::Duration,
};
use tokio::{
    sync::{broadcast, Notify},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

/// Default bound on a one-shot position fetch.
pub const DEFAULT_FIX_TIMEOUT: Duration = Duration::from_secs(5);

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Recording,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            SessionState::Idle => "Idle",
            SessionState::Recording => "Recording",
        })
    }
}

/// Point-in-time copy of the session for presentation.
#[derive(Debug, Clone, PartialEq)]
pub struct WalkSnapshot {
    pub state: SessionState,
    pub walk_id: Option<String>,
    pub route: Vec<PositionSample>,
    pub distance_meters: f64,
    pub elapsed_seconds: u64,
}

impl WalkSnapshot {
    fn idle() -> Self {
        Self {
            state: SessionState::Idle,
            walk_id: None,
            route: Vec::new(),
            distance_meters: 0.0,
            elapsed_seconds: 0,
        }
    }

    pub fn last_position(&self) -> Option<&PositionSample> {
        self.route.last()
    }
}

/// Summary of the session for a live view: counts and the latest sample
/// without copying the route.
#[derive(Debug, Clone, PartialEq)]
pub struct WalkStatus {
    pub state: SessionState,
    pub walk_id: Option<String>,
    pub points: usize,
    pub last_position: Option<PositionSample>,
    pub distance_meters: f64,
    pub elapsed_seconds: u64,
}

impl WalkStatus {
    fn idle() -> Self {
        Self {
            state: SessionState::Idle,
            walk_id: None,
            points: 0,
            last_position: None,
            distance_meters: 0.0,
            elapsed_seconds: 0,
        }
    }
}

/// Notifications published while the session runs.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Started {
        id: String,
    },
    Sample {
        id: String,
        points: usize,
        distance_meters: f64,
    },
    Stopped {
        walk: Walk,
    },
    /// The subscription failed mid-walk; the partial walk was finalized.
    Interrupted {
        walk: Walk,
        error: SourceError,
        saved: bool,
    },
    /// A background write of the active walk failed.
    PersistFailed {
        id: String,
        reason: String,
    },
}

struct Recording {
    walk: Walk,
    generation: u64,
    subscription: Option<SubscriptionHandle>,
}

#[derive(Default)]
struct Machine {
    recording: Option<Recording>,
    next_generation: u64,
    archive: Vec<Walk>,
    recoverable: Option<Walk>,
}

impl Machine {
    /// Time-based id, bumped until it collides with nothing we know about.
    fn unique_id(&self, now: chrono::DateTime<chrono::Utc>) -> String {
        let mut candidate = now.timestamp_millis();
        loop {
            let id = candidate.to_string();
            let taken = self.archive.iter().any(|w| w.id == id)
                || self.recoverable.as_ref().is_some_and(|w| w.id == id)
                || self.recording.as_ref().is_some_and(|r| r.walk.id == id);
            if !taken {
                return id;
            }
            candidate += 1;
        }
    }

    fn take_recording(&mut self, generation: u64) -> Option<Recording> {
        if self.recording.as_ref()?.generation != generation {
            return None;
        }
        self.recording.take()
    }
}

struct Shared<S> {
    machine: Mutex<Machine>,
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    /// Serializes start, stop, recovery and delete.
    control: tokio::sync::Mutex<()>,
    /// Orders writes so a stale active-walk snapshot never lands after a clear.
    store_lock: tokio::sync::Mutex<()>,
    dirty: Notify,
    events: broadcast::Sender<SessionEvent>,
}

impl<S: WalkStore> Shared<S> {
    fn lock(&self) -> MutexGuard<'_, Machine> {
        self.machine.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: SessionEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    async fn with_store<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&S) -> Result<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(&store)).await?
    }

    fn record_sample(&self, generation: u64, sample: PositionSample) {
        let event = {
            let mut machine = self.lock();
            let Some(recording) = machine
                .recording
                .as_mut()
                .filter(|r| r.generation == generation)
            else {
                debug!("Dropping sample for a finished recording");
                return;
            };
            recording.walk.push_sample(sample);
            SessionEvent::Sample {
                id: recording.walk.id.clone(),
                points: recording.walk.route.len(),
                distance_meters: recording.walk.distance_meters,
            }
        };
        self.dirty.notify_one();
        self.emit(event);
    }

    /// Write the current active walk, if there still is one.
    async fn flush_active(&self) {
        let _store = self.store_lock.lock().await;
        let Some(walk) = self.lock().recording.as_ref().map(|r| r.walk.clone()) else {
            return;
        };

        let id = walk.id.clone();
        if let Err(e) = self.with_store(move |s| s.save_active_walk(&walk)).await {
            warn!("Failed to persist active walk {}: {}", id, e);
            self.emit(SessionEvent::PersistFailed {
                id,
                reason: e.to_string(),
            });
        }
    }

    /// Put a finalized walk at the front of the archive and persist it.
    ///
    /// The active slot is cleared only once the archive write succeeded, so a
    /// failed write still leaves the walk recoverable after a restart.
    async fn archive(&self, walk: Walk) -> std::result::Result<(), String> {
        let _store = self.store_lock.lock().await;
        let (archive, current) = {
            let mut machine = self.lock();
            machine.archive.insert(0, walk);
            (
                machine.archive.clone(),
                machine.recording.as_ref().map(|r| r.walk.clone()),
            )
        };

        self.with_store(move |s| {
            s.save_archive(&archive)?;
            match current {
                Some(active) => s.save_active_walk(&active),
                None => s.clear_active_walk(),
            }
        })
        .await
        .map_err(|e| e.to_string())
    }

    async fn on_interrupted<P: PositionSource>(
        self: Arc<Self>,
        source: Weak<P>,
        generation: u64,
        error: SourceError,
    ) {
        let _control = self.control.lock().await;
        let Some(recording) = self.lock().take_recording(generation) else {
            return;
        };
        if let (Some(handle), Some(source)) = (recording.subscription, source.upgrade()) {
            source.unsubscribe(handle);
        }

        let mut walk = recording.walk;
        walk.finalize(self.clock.now());
        warn!(
            "Tracking interrupted for walk {} after {} points: {}",
            walk.id,
            walk.route.len(),
            error
        );

        let saved = match self.archive(walk.clone()).await {
            Ok(()) => true,
            Err(reason) => {
                error!("Failed to archive interrupted walk {}: {}", walk.id, reason);
                false
            }
        };
        self.emit(SessionEvent::Interrupted { walk, error, saved });
    }
}

/// Owner of the walk lifecycle: `Idle -> Recording -> Idle`.
pub struct WalkSession<P: PositionSource, S: WalkStore> {
    shared: Arc<Shared<S>>,
    source: Arc<P>,
    fix_timeout: Duration,
    persister: JoinHandle<()>,
}

impl<P: PositionSource, S: WalkStore> WalkSession<P, S> {
    /// Load the archive and any interrupted walk, and start the background
    /// writer. An interrupted walk is not resumed; see [`Self::recoverable`].
    pub async fn open(source: P, store: S, clock: Arc<dyn Clock>) -> Self {
        let store = Arc::new(store);
        let loader = Arc::clone(&store);
        let (archive, active) =
            tokio::task::spawn_blocking(move || (loader.load_archive(), loader.load_active_walk()))
                .await
                .unwrap_or_else(|e| {
                    warn!("Failed to load walks: {}", e);
                    (Vec::new(), None)
                });

        let recoverable = match active {
            Some(walk) if archive.iter().any(|w| w.id == walk.id) => {
                // Archived already; only the slot clear was lost
                if let Err(e) = store.clear_active_walk() {
                    warn!("Failed to clear stale active walk {}: {}", walk.id, e);
                }
                None
            }
            Some(walk) => {
                info!(
                    "Found interrupted walk {} with {} points",
                    walk.id,
                    walk.route.len()
                );
                Some(walk)
            }
            None => None,
        };
        info!("Loaded {} archived walks", archive.len());

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shared = Arc::new(Shared {
            machine: Mutex::new(Machine {
                archive,
                recoverable,
                ..Machine::default()
            }),
            store,
            clock,
            control: tokio::sync::Mutex::new(()),
            store_lock: tokio::sync::Mutex::new(()),
            dirty: Notify::new(),
            events,
        });

        let writer = Arc::clone(&shared);
        let persister = tokio::spawn(async move {
            loop {
                writer.dirty.notified().await;
                writer.flush_active().await;
            }
        });

        Self {
            shared,
            source: Arc::new(source),
            fix_timeout: DEFAULT_FIX_TIMEOUT,
            persister,
        }
    }

    pub fn with_fix_timeout(mut self, timeout: Duration) -> Self {
        self.fix_timeout = timeout;
        self
    }

    pub fn source(&self) -> &P {
        &self.source
    }

    pub fn store(&self) -> &S {
        &self.shared.store
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Begin recording a new walk.
    ///
    /// An interrupted walk still waiting for a decision is archived first.
    pub async fn start(&self) -> Result<Walk> {
        let _control = self.shared.control.lock().await;
        if self.shared.lock().recording.is_some() {
            return Err(WalkError::AlreadyRecording);
        }

        if !self.source.request_permission().await {
            warn!("Location permission denied");
            return Err(WalkError::PermissionDenied);
        }

        if self.shared.lock().recoverable.is_some() {
            if let Err(e) = self.finalize_recovered_locked().await {
                warn!("Archiving the interrupted walk failed: {}", e);
            }
        }

        let walk = {
            let machine = self.shared.lock();
            let now = self.shared.clock.now();
            Walk::new(machine.unique_id(now), now)
        };
        self.begin_recording(walk).await
    }

    /// Finish the current walk and archive it. `Ok(None)` when idle.
    ///
    /// If the walk cannot be written, it is still archived in memory and
    /// returned inside [`WalkError::Unpersisted`].
    pub async fn stop(&self) -> Result<Option<Walk>> {
        let _control = self.shared.control.lock().await;
        let Some(recording) = self.shared.lock().recording.take() else {
            return Ok(None);
        };
        if let Some(handle) = recording.subscription {
            self.source.unsubscribe(handle);
        }

        let mut walk = recording.walk;
        walk.finalize(self.shared.clock.now());
        info!(
            "Finished walk {}: {} points, {:.1} m in {}",
            walk.id,
            walk.route.len(),
            walk.distance_meters,
            walk.formatted_duration()
        );

        let saved = self.shared.archive(walk.clone()).await;
        self.shared.emit(SessionEvent::Stopped { walk: walk.clone() });
        match saved {
            Ok(()) => Ok(Some(walk)),
            Err(reason) => Err(WalkError::Unpersisted {
                walk: Box::new(walk),
                reason,
            }),
        }
    }

    /// Walk left behind by a crash or restart, awaiting a decision.
    pub fn recoverable(&self) -> Option<Walk> {
        self.shared.lock().recoverable.clone()
    }

    /// Continue recording the interrupted walk. `Ok(None)` if there is none.
    pub async fn resume_recovered(&self) -> Result<Option<Walk>> {
        let _control = self.shared.control.lock().await;
        if self.shared.lock().recording.is_some() {
            return Err(WalkError::AlreadyRecording);
        }
        if self.shared.lock().recoverable.is_none() {
            return Ok(None);
        }
        if !self.source.request_permission().await {
            warn!("Location permission denied");
            return Err(WalkError::PermissionDenied);
        }

        let Some(walk) = self.shared.lock().recoverable.take() else {
            return Ok(None);
        };
        info!("Resuming walk {} at {} points", walk.id, walk.route.len());
        match self.begin_recording(walk.clone()).await {
            Ok(walk) => Ok(Some(walk)),
            Err(e) => {
                self.shared.lock().recoverable = Some(walk);
                Err(e)
            }
        }
    }

    /// Archive the interrupted walk, ending it at its last recorded sample.
    pub async fn finalize_recovered(&self) -> Result<Option<Walk>> {
        let _control = self.shared.control.lock().await;
        self.finalize_recovered_locked().await
    }

    /// Drop the interrupted walk without archiving it.
    pub async fn discard_recovered(&self) -> Result<Option<Walk>> {
        let _control = self.shared.control.lock().await;
        let Some(walk) = self.shared.lock().recoverable.take() else {
            return Ok(None);
        };

        let _store = self.shared.store_lock.lock().await;
        if let Err(e) = self.shared.with_store(|s| s.clear_active_walk()).await {
            self.shared.lock().recoverable = Some(walk);
            return Err(e);
        }
        info!("Discarded interrupted walk {}", walk.id);
        Ok(Some(walk))
    }

    /// Remove a finished walk. Unknown ids are a no-op.
    pub async fn delete_walk(&self, id: &str) -> Result<()> {
        let _control = self.shared.control.lock().await;
        if !self.shared.lock().archive.iter().any(|w| w.id == id) {
            debug!("No archived walk {} to delete", id);
            return Ok(());
        }

        let _store = self.shared.store_lock.lock().await;
        let target = id.to_string();
        self.shared
            .with_store(move |s| s.delete_walk(&target))
            .await?;
        self.shared.lock().archive.retain(|w| w.id != id);
        info!("Deleted walk {}", id);
        Ok(())
    }

    /// One-shot fetch of the current position, as a region to center a map on.
    ///
    /// Independent of any recording in progress.
    pub async fn locate(&self) -> Result<MapRegion> {
        self.source
            .current_position(self.fix_timeout)
            .await
            .map(MapRegion::centered_on)
            .map_err(|e| WalkError::LocationUnavailable(e.to_string()))
    }

    /// Write the active walk now instead of waiting for the background writer.
    pub async fn flush(&self) {
        self.shared.flush_active().await;
    }

    pub fn state(&self) -> SessionState {
        if self.shared.lock().recording.is_some() {
            SessionState::Recording
        } else {
            SessionState::Idle
        }
    }

    pub fn is_recording(&self) -> bool {
        self.state() == SessionState::Recording
    }

    pub fn snapshot(&self) -> WalkSnapshot {
        let now = self.shared.clock.now();
        let machine = self.shared.lock();
        match &machine.recording {
            None => WalkSnapshot::idle(),
            Some(recording) => WalkSnapshot {
                state: SessionState::Recording,
                walk_id: Some(recording.walk.id.clone()),
                route: recording.walk.route.clone(),
                distance_meters: recording.walk.distance_meters,
                elapsed_seconds: recording.walk.elapsed_seconds(now),
            },
        }
    }

    /// Like [`snapshot`](Self::snapshot) without the route; constant cost
    /// regardless of walk length.
    pub fn status(&self) -> WalkStatus {
        let now = self.shared.clock.now();
        let machine = self.shared.lock();
        match &machine.recording {
            None => WalkStatus::idle(),
            Some(recording) => WalkStatus {
                state: SessionState::Recording,
                walk_id: Some(recording.walk.id.clone()),
                points: recording.walk.route.len(),
                last_position: recording.walk.route.last().copied(),
                distance_meters: recording.walk.distance_meters,
                elapsed_seconds: recording.walk.elapsed_seconds(now),
            },
        }
    }

    /// Finished walks, most recent first.
    pub fn archive(&self) -> Vec<Walk> {
        self.shared.lock().archive.clone()
    }

    pub fn walk(&self, id: &str) -> Option<Walk> {
        self.shared
            .lock()
            .archive
            .iter()
            .find(|w| w.id == id)
            .cloned()
    }

    pub fn stats(&self) -> WalkStats {
        WalkStats::from_walks(&self.shared.lock().archive)
    }

    async fn finalize_recovered_locked(&self) -> Result<Option<Walk>> {
        let Some(mut walk) = self.shared.lock().recoverable.take() else {
            return Ok(None);
        };
        walk.finalize(walk.last_activity());
        info!(
            "Archiving interrupted walk {}: {} points, {:.1} m",
            walk.id,
            walk.route.len(),
            walk.distance_meters
        );

        match self.shared.archive(walk.clone()).await {
            Ok(()) => Ok(Some(walk)),
            Err(reason) => Err(WalkError::Unpersisted {
                walk: Box::new(walk),
                reason,
            }),
        }
    }

    /// Persist `walk` as active, enter `Recording` and subscribe.
    async fn begin_recording(&self, walk: Walk) -> Result<Walk> {
        {
            let _store = self.shared.store_lock.lock().await;
            let initial = walk.clone();
            self.shared
                .with_store(move |s| s.save_active_walk(&initial))
                .await
                .map_err(|e| WalkError::Storage(format!("Failed to save new walk: {}", e)))?;
        }

        let generation = {
            let mut machine = self.shared.lock();
            machine.next_generation += 1;
            let generation = machine.next_generation;
            machine.recording = Some(Recording {
                walk: walk.clone(),
                generation,
                subscription: None,
            });
            generation
        };

        let on_sample: SampleCallback = {
            let shared = Arc::clone(&self.shared);
            Arc::new(move |sample| shared.record_sample(generation, sample))
        };
        let on_error: ErrorCallback = {
            let shared = Arc::clone(&self.shared);
            let source = Arc::downgrade(&self.source);
            let runtime = tokio::runtime::Handle::current();
            Arc::new(move |error| {
                runtime.spawn(Arc::clone(&shared).on_interrupted(source.clone(), generation, error));
            })
        };

        match self.source.subscribe(on_sample, on_error) {
            Ok(handle) => {
                let attached = match self
                    .shared
                    .lock()
                    .recording
                    .as_mut()
                    .filter(|r| r.generation == generation)
                {
                    Some(recording) => {
                        recording.subscription = Some(handle);
                        true
                    }
                    None => false,
                };
                if !attached {
                    // Failed before we could record the handle
                    self.source.unsubscribe(handle);
                }
            }
            Err(e) => {
                self.shared.lock().take_recording(generation);
                let _store = self.shared.store_lock.lock().await;
                if let Err(clear) = self.shared.with_store(|s| s.clear_active_walk()).await {
                    warn!("Failed to clear walk {} after subscribe error: {}", walk.id, clear);
                }
                return Err(WalkError::LocationUnavailable(e.to_string()));
            }
        }

        info!("Recording walk {}", walk.id);
        self.shared.emit(SessionEvent::Started {
            id: walk.id.clone(),
        });
        Ok(walk)
    }
}

impl<P: PositionSource, S: WalkStore> Drop for WalkSession<P, S> {
    fn drop(&mut self) {
        self.persister.abort();
        let handle = self
            .shared
            .lock()
            .recording
            .as_ref()
            .and_then(|r| r.subscription);
        if let Some(handle) = handle {
            self.source.unsubscribe(handle);
        }
    }
}
