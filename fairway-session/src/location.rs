//! Player location tracking.
//!
//! [`LocationTracker`] owns one subscription to a [`LocationSource`] and fans
//! accepted fixes out to its listeners. Without a source, or when the source
//! cannot be used, it falls back to a simulated walk around a reference
//! coordinate.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use fairway_core::{Coordinate, PlayerLocation};
use rand::Rng;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::LocationConfig;
use crate::observer::{Listeners, Subscription};

const UPDATE_BUFFER: usize = 32;

/// Accuracy reported for simulated fixes, in meters.
const SIMULATED_ACCURACY_M: f64 = 5.0;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocationError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("location source failed: {0}")]
    Source(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationOptions {
    pub min_interval: Duration,
    pub min_displacement_m: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceHandle(pub u64);

/// Platform location capability.
#[async_trait]
pub trait LocationSource: Send + Sync {
    /// Whether a refused permission is final on this platform. When false the
    /// tracker simulates instead of failing.
    fn requires_permission(&self) -> bool;

    async fn request_permission(&self) -> Result<bool, LocationError>;

    async fn subscribe(
        &self,
        options: LocationOptions,
        updates: mpsc::Sender<PlayerLocation>,
    ) -> Result<SourceHandle, LocationError>;

    async fn unsubscribe(&self, handle: SourceHandle);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationMode {
    Stopped,
    Live,
    Simulated,
}

#[derive(Clone)]
pub struct LocationTracker {
    inner: Arc<TrackerInner>,
}

struct TrackerInner {
    source: Option<Arc<dyn LocationSource>>,
    config: LocationConfig,
    state: Mutex<TrackerState>,
    listeners: Listeners<PlayerLocation>,
}

struct TrackerState {
    mode: LocationMode,
    current: Option<PlayerLocation>,
    run: Option<CancellationToken>,
    handle: Option<SourceHandle>,
    last_error: Option<LocationError>,
}

impl LocationTracker {
    pub fn new(source: Option<Arc<dyn LocationSource>>, config: LocationConfig) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                source,
                config,
                state: Mutex::new(TrackerState {
                    mode: LocationMode::Stopped,
                    current: None,
                    run: None,
                    handle: None,
                    last_error: None,
                }),
                listeners: Listeners::new(),
            }),
        }
    }

    /// Tracker that always simulates.
    pub fn simulated(config: LocationConfig) -> Self {
        Self::new(None, config)
    }

    fn state(&self) -> MutexGuard<'_, TrackerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn current(&self) -> Option<PlayerLocation> {
        self.state().current
    }

    pub fn mode(&self) -> LocationMode {
        self.state().mode
    }

    pub fn on_update<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&PlayerLocation) + Send + Sync + 'static,
    {
        self.inner.listeners.subscribe(callback)
    }

    /// Reason for the most recent fallback to simulation, cleared on read.
    pub fn take_error(&self) -> Option<LocationError> {
        self.state().last_error.take()
    }

    /// Starts tracking. Calling it while already started is a no-op.
    ///
    /// Every call into the source is bounded by the configured request
    /// timeout. Returns the mode the tracker ended up in; `Stopped` means
    /// [`stop`] was called before start completed.
    ///
    /// [`stop`]: LocationTracker::stop
    pub async fn start(&self) -> Result<LocationMode, LocationError> {
        let run = {
            let mut state = self.state();
            if let Some(run) = &state.run
                && !run.is_cancelled()
            {
                return Ok(state.mode);
            }
            let run = CancellationToken::new();
            state.run = Some(run.clone());
            run
        };

        let Some(source) = self.inner.source.clone() else {
            info!("No location source, using simulated location");
            self.start_simulation(run);
            return Ok(LocationMode::Simulated);
        };

        let timeout = self.inner.config.request_timeout();

        match tokio::time::timeout(timeout, source.request_permission()).await {
            Ok(Ok(true)) => {}
            Ok(Ok(false) | Err(LocationError::PermissionDenied)) => {
                return self.refuse(source.as_ref(), run);
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Location permission request failed, using simulated location");
                return Ok(self.fall_back(run, e));
            }
            Err(_) => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Location permission request timed out"
                );
                return self.refuse(source.as_ref(), run);
            }
        }

        if run.is_cancelled() {
            return Ok(LocationMode::Stopped);
        }

        let options = LocationOptions {
            min_interval: self.inner.config.min_update_interval(),
            min_displacement_m: self.inner.config.min_displacement_m,
        };
        let (tx, rx) = mpsc::channel(UPDATE_BUFFER);

        match tokio::time::timeout(timeout, source.subscribe(options, tx)).await {
            Ok(Ok(handle)) => {
                {
                    let mut state = self.state();
                    if !run.is_cancelled() {
                        state.handle = Some(handle);
                        state.mode = LocationMode::Live;
                    }
                }
                if run.is_cancelled() {
                    self.unsubscribe(source.as_ref(), handle).await;
                    return Ok(LocationMode::Stopped);
                }
                info!(handle = handle.0, "Subscribed to location source");
                self.spawn_pump(rx, run);
                Ok(LocationMode::Live)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Location subscription failed, using simulated location");
                Ok(self.fall_back(run, e))
            }
            Err(_) => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Location subscription timed out, using simulated location"
                );
                let reason = LocationError::Source("subscription timed out".into());
                Ok(self.fall_back(run, reason))
            }
        }
    }

    /// Cancels the active subscription or simulation. Safe to call repeatedly.
    pub async fn stop(&self) {
        let (run, handle) = {
            let mut state = self.state();
            state.mode = LocationMode::Stopped;
            (state.run.take(), state.handle.take())
        };

        if let Some(run) = run {
            run.cancel();
            debug!("Location tracking stopped");
        }

        if let (Some(source), Some(handle)) = (&self.inner.source, handle) {
            self.unsubscribe(source.as_ref(), handle).await;
        }
    }

    async fn unsubscribe(&self, source: &dyn LocationSource, handle: SourceHandle) {
        let timeout = self.inner.config.request_timeout();
        if tokio::time::timeout(timeout, source.unsubscribe(handle))
            .await
            .is_err()
        {
            warn!(handle = handle.0, "Location unsubscribe timed out");
        }
    }

    /// Permission was refused or never answered. Fails when the source
    /// insists on permission, simulates otherwise.
    fn refuse(
        &self,
        source: &dyn LocationSource,
        run: CancellationToken,
    ) -> Result<LocationMode, LocationError> {
        if source.requires_permission() {
            warn!("Location permission denied");
            run.cancel();
            self.release();
            return Err(LocationError::PermissionDenied);
        }

        info!("Location permission not granted, using simulated location");
        Ok(self.fall_back(run, LocationError::PermissionDenied))
    }

    fn fall_back(&self, run: CancellationToken, reason: LocationError) -> LocationMode {
        if !run.is_cancelled() {
            self.state().last_error = Some(reason);
        }
        self.start_simulation(run);
        self.mode()
    }

    /// Forgets a run cancelled by a refused start, unless a newer run took
    /// its place in the meantime.
    fn release(&self) {
        let mut state = self.state();
        if state.run.as_ref().is_some_and(|run| !run.is_cancelled()) {
            return;
        }
        state.run = None;
        state.mode = LocationMode::Stopped;
    }

    /// The live stream ended on the source side: drop its handle and keep
    /// the player located by simulating.
    async fn stream_closed(&self, run: CancellationToken) {
        let handle = {
            let mut state = self.state();
            if run.is_cancelled() {
                return;
            }
            state.handle.take()
        };

        if let (Some(source), Some(handle)) = (self.inner.source.clone(), handle) {
            self.unsubscribe(source.as_ref(), handle).await;
        }

        let reason = LocationError::Source("location stream closed".into());
        self.fall_back(run, reason);
    }

    /// Records `location` unless the run was cancelled or the fix is not newer
    /// than the current one, then notifies listeners.
    fn accept(&self, run: &CancellationToken, location: PlayerLocation) -> bool {
        {
            let mut state = self.state();
            if run.is_cancelled() {
                return false;
            }
            if let Some(prev) = &state.current
                && location.timestamp <= prev.timestamp
            {
                debug!("Dropping out-of-order location fix");
                return false;
            }
            state.current = Some(location);
        }

        self.inner.listeners.notify(&location);
        true
    }

    fn spawn_pump(&self, mut rx: mpsc::Receiver<PlayerLocation>, run: CancellationToken) {
        let tracker = self.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = run.cancelled() => break,
                    next = rx.recv() => match next {
                        Some(location) => {
                            tracker.accept(&run, location);
                        }
                        None => {
                            warn!("Location source closed its stream, using simulated location");
                            tracker.stream_closed(run.clone()).await;
                            break;
                        }
                    }
                }
            }
        });
    }

    fn start_simulation(&self, run: CancellationToken) {
        if run.is_cancelled() {
            return;
        }
        self.state().mode = LocationMode::Simulated;

        let reference = self.inner.config.reference;
        let jitter = self.inner.config.simulation_jitter_deg;
        let interval = self.inner.config.simulation_interval();

        self.accept(
            &run,
            PlayerLocation {
                coordinate: reference,
                accuracy: Some(SIMULATED_ACCURACY_M),
                timestamp: next_timestamp(self.current()),
            },
        );

        let tracker = self.clone();
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);

            loop {
                tokio::select! {
                    biased;
                    _ = run.cancelled() => break,
                    _ = ticker.tick() => {
                        let previous = tracker.current();
                        let anchor = previous.map(|l| l.coordinate).unwrap_or(reference);
                        tracker.accept(&run, PlayerLocation {
                            coordinate: jitter_coordinate(anchor, jitter),
                            accuracy: Some(SIMULATED_ACCURACY_M),
                            timestamp: next_timestamp(previous),
                        });
                    }
                }
            }
        });
    }
}

/// Current time, bumped past `previous` so accepted fixes strictly increase.
fn next_timestamp(previous: Option<PlayerLocation>) -> jiff::Timestamp {
    let now = jiff::Timestamp::now();
    match previous {
        Some(prev) if now <= prev.timestamp => prev
            .timestamp
            .checked_add(jiff::SignedDuration::from_millis(1))
            .unwrap_or(now),
        _ => now,
    }
}

/// Offsets each axis by a uniform value in `[-max_deg, max_deg]`.
pub(crate) fn jitter_coordinate(coordinate: Coordinate, max_deg: f64) -> Coordinate {
    let mut rng = rand::rng();
    coordinate.offset(
        rng.random_range(-max_deg..=max_deg),
        rng.random_range(-max_deg..=max_deg),
    )
}
