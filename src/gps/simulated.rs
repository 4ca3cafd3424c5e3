// src/gps/simulated.rs
//! In-process position source driven by hand: demos, replays from code, tests

use super::{ErrorCallback, PositionSource, SampleCallback, SourceError, SubscriptionHandle};
use crate::{geo::Coordinate, walk::PositionSample};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

#[derive(Default)]
struct Shared {
    denied: AtomicBool,
    current: Mutex<Option<Coordinate>>,
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<u64, (SampleCallback, ErrorCallback)>>,
}

/// Source whose samples and failures are pushed through a [`SimulatedFeed`].
///
/// Delivery is synchronous: `SimulatedFeed::send` returns after every
/// subscriber's callback has run.
#[derive(Default)]
pub struct SimulatedSource {
    shared: Arc<Shared>,
}

/// Control handle for a [`SimulatedSource`]. Clones drive the same source.
#[derive(Clone)]
pub struct SimulatedFeed {
    shared: Arc<Shared>,
}

impl SimulatedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&self) -> SimulatedFeed {
        SimulatedFeed {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl SimulatedFeed {
    pub fn set_permission(&self, granted: bool) {
        self.shared.denied.store(!granted, Ordering::SeqCst);
    }

    /// Position returned by one-shot fetches; `None` makes them time out.
    pub fn set_current(&self, position: Option<Coordinate>) {
        *self.shared.current.lock().unwrap_or_else(|e| e.into_inner()) = position;
    }

    /// Deliver a sample to every live subscription. Returns how many received it.
    pub fn send(&self, sample: PositionSample) -> usize {
        let callbacks: Vec<SampleCallback> = self
            .subscribers()
            .values()
            .map(|(on_sample, _)| Arc::clone(on_sample))
            .collect();
        for on_sample in &callbacks {
            on_sample(sample);
        }
        callbacks.len()
    }

    /// Fail every live subscription; each is dropped after its error callback.
    pub fn fail(&self, error: SourceError) -> usize {
        let failed: Vec<ErrorCallback> = self
            .subscribers()
            .drain()
            .map(|(_, (_, on_error))| on_error)
            .collect();
        for on_error in &failed {
            on_error(error.clone());
        }
        failed.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers().len()
    }

    fn subscribers(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<u64, (SampleCallback, ErrorCallback)>> {
        self.shared
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }
}

impl PositionSource for SimulatedSource {
    async fn request_permission(&self) -> bool {
        !self.shared.denied.load(Ordering::SeqCst)
    }

    async fn current_position(&self, timeout: Duration) -> Result<Coordinate, SourceError> {
        let current = *self
            .shared
            .current
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        match current {
            Some(position) => Ok(position),
            None => {
                tokio::time::sleep(timeout).await;
                Err(SourceError::Timeout(timeout))
            }
        }
    }

    fn subscribe(
        &self,
        on_sample: SampleCallback,
        on_error: ErrorCallback,
    ) -> Result<SubscriptionHandle, SourceError> {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.shared
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, (on_sample, on_error));
        Ok(SubscriptionHandle(id))
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.shared
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&handle.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_feed_reaches_subscribers_until_unsubscribed() {
        let source = SimulatedSource::new();
        let feed = source.feed();
        let received = Arc::new(AtomicU64::new(0));

        let counter = Arc::clone(&received);
        let handle = source
            .subscribe(
                Arc::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
                Arc::new(|_| {}),
            )
            .unwrap();

        let sample = PositionSample::new(Coordinate::new(1.0, 2.0), Utc::now());
        assert_eq!(feed.send(sample), 1);
        source.unsubscribe(handle);
        assert_eq!(feed.send(sample), 0);
        assert_eq!(received.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fail_drops_subscription() {
        let source = SimulatedSource::new();
        let feed = source.feed();
        let errors = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&errors);
        source
            .subscribe(
                Arc::new(|_| {}),
                Arc::new(move |e| sink.lock().unwrap().push(e)),
            )
            .unwrap();

        assert_eq!(feed.fail(SourceError::Closed), 1);
        assert_eq!(feed.subscriber_count(), 0);
        assert_eq!(*errors.lock().unwrap(), vec![SourceError::Closed]);
    }

    #[tokio::test]
    async fn test_permission_and_one_shot() {
        let source = SimulatedSource::new();
        let feed = source.feed();
        assert!(source.request_permission().await);

        feed.set_permission(false);
        assert!(!source.request_permission().await);

        let timeout = Duration::from_millis(20);
        assert_eq!(
            source.current_position(timeout).await,
            Err(SourceError::Timeout(timeout))
        );

        feed.set_current(Some(Coordinate::new(48.1, 11.5)));
        assert_eq!(
            source.current_position(timeout).await,
            Ok(Coordinate::new(48.1, 11.5))
        );
    }
}
