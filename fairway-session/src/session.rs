//! Session coordinator.
//!
//! Owns the location tracker, the ball registry and a round store, mirrors
//! their pushed updates into one snapshot and derives distance measurements
//! from it on demand.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use fairway_core::{
    BallId, CourseId, DiscoveredDevice, DistanceMeasurement, GolfCourse, HoleScore,
    MeasurementTarget, PlayerLocation, Round, RoundId, TrackedBall,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ble::{BleAdapter, link_for};
use crate::config::Config;
use crate::error::SessionError;
use crate::location::{LocationSource, LocationTracker};
use crate::observer::Subscription;
use crate::registry::BallRegistry;
use crate::storage::RoundStore;

#[derive(Debug, Clone, Default)]
struct SessionState {
    location: Option<PlayerLocation>,
    balls: Vec<TrackedBall>,
    active_round: Option<Round>,
    courses: Vec<GolfCourse>,
    last_error: Option<SessionError>,
}

pub struct SessionCoordinator<S: RoundStore> {
    store: S,
    location: LocationTracker,
    registry: BallRegistry,
    state: Arc<Mutex<SessionState>>,
    subscriptions: Mutex<Vec<Subscription>>,
    shutdown: CancellationToken,
}

impl<S: RoundStore> SessionCoordinator<S> {
    pub fn new(store: S, location: LocationTracker, registry: BallRegistry) -> Self {
        Self {
            store,
            location,
            registry,
            state: Arc::new(Mutex::new(SessionState::default())),
            subscriptions: Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Builds the tracker and registry from `config`. Missing capabilities
    /// are replaced by their simulated counterparts.
    pub fn from_config(
        store: S,
        config: &Config,
        source: Option<Arc<dyn LocationSource>>,
        adapter: Option<Arc<dyn BleAdapter>>,
    ) -> Self {
        let location = LocationTracker::new(source, config.location.clone());
        let link = link_for(adapter, &config.ble);
        let registry = BallRegistry::new(link, config.ble.clone());
        Self::new(store, location, registry)
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_error(&self, error: SessionError) {
        self.state().last_error = Some(error);
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn location_tracker(&self) -> &LocationTracker {
        &self.location
    }

    pub fn registry(&self) -> &BallRegistry {
        &self.registry
    }

    /// Initializes storage, location and the registry. Storage and location
    /// start concurrently, so a slow permission prompt does not hold up the
    /// courses. A failure in one of them is recorded as the last error and
    /// does not stop the others.
    pub async fn start(&self) {
        if !self.subscribe() {
            return;
        }

        self.registry.start();
        tokio::join!(self.start_location(), self.load_store());

        // shutdown may have run while the subsystems were starting
        if self.shutdown.is_cancelled() {
            self.location.stop().await;
            return;
        }

        let location = self.location.current();
        let balls = self.registry.balls();

        let mut state = self.state();
        if state.location.is_none() {
            state.location = location;
        }
        if state.balls.is_empty() {
            state.balls = balls;
        }
    }

    async fn start_location(&self) {
        match self.location.start().await {
            Ok(mode) => info!(?mode, "Location tracking started"),
            Err(e) => {
                warn!(error = %e, "Location tracking unavailable");
                self.record_error(e.into());
            }
        }

        if let Some(reason) = self.location.take_error() {
            self.record_error(reason.into());
        }
    }

    async fn load_store(&self) {
        if let Err(e) = self.store.init().await {
            warn!(error = %e, "Round store initialization failed");
            self.record_error(e.into());
        }

        let courses = match self.store.list_courses().await {
            Ok(courses) => courses,
            Err(e) => {
                warn!(error = %e, "Failed to load courses");
                self.record_error(e.into());
                Vec::new()
            }
        };

        let active_round = match self.store.get_active_round().await {
            Ok(round) => round,
            Err(e) => {
                warn!(error = %e, "Failed to load active round");
                self.record_error(e.into());
                None
            }
        };

        info!(
            courses = courses.len(),
            active_round = ?active_round.as_ref().map(|r| r.id),
            "Round store ready"
        );

        let mut state = self.state();
        state.courses = courses;
        state.active_round = active_round;
    }

    /// Registers the snapshot listeners. Returns false once shut down.
    fn subscribe(&self) -> bool {
        let mut subscriptions = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.shutdown.is_cancelled() {
            return false;
        }
        if !subscriptions.is_empty() {
            debug!("Session already subscribed");
            return true;
        }

        let state = self.state.clone();
        subscriptions.push(self.location.on_update(move |location| {
            state.lock().unwrap_or_else(PoisonError::into_inner).location = Some(*location);
        }));

        let state = self.state.clone();
        subscriptions.push(self.registry.on_update(move |balls| {
            state.lock().unwrap_or_else(PoisonError::into_inner).balls = balls.clone();
        }));

        true
    }

    pub fn location(&self) -> Option<PlayerLocation> {
        self.state().location
    }

    pub fn balls(&self) -> Vec<TrackedBall> {
        self.state().balls.clone()
    }

    pub fn active_round(&self) -> Option<Round> {
        self.state().active_round.clone()
    }

    pub fn courses(&self) -> Vec<GolfCourse> {
        self.state().courses.clone()
    }

    /// Most recent error. Includes the reason the tracker fell back to
    /// simulation after start, such as a closed location stream.
    pub fn last_error(&self) -> Option<SessionError> {
        if let Some(reason) = self.location.take_error() {
            self.record_error(reason.into());
        }
        self.state().last_error.clone()
    }

    pub fn clear_error(&self) {
        self.state().last_error = None;
    }

    pub fn discovered_devices(&self) -> Vec<DiscoveredDevice> {
        self.registry.discovered()
    }

    pub fn is_scanning(&self) -> bool {
        self.registry.is_scanning()
    }

    pub async fn start_scan(&self) {
        self.registry.start_scan().await;
        self.take_registry_error();
    }

    pub async fn stop_scan(&self) {
        self.registry.stop_scan().await;
    }

    /// Pairs a ball under `name`. Reports `false` when the connection
    /// failed. Whatever the adapter reported on the way, including a fallback
    /// to simulated discovery that still paired a ball, becomes the last
    /// error.
    pub async fn pair_ball(&self, name: &str) -> bool {
        let paired = self.registry.pair(name).await;
        self.take_registry_error();
        paired
    }

    fn take_registry_error(&self) {
        if let Some(e) = self.registry.take_error() {
            self.record_error(e.into());
        }
    }

    pub fn remove_ball(&self, id: &BallId) {
        self.registry.remove(id);
    }

    /// Starts a round on `course_id`. The store decides whether another round
    /// is already active; if so nothing changes apart from the last error.
    pub async fn start_round(
        &self,
        course_id: CourseId,
        course_name: &str,
    ) -> Result<RoundId, SessionError> {
        let id = match self.store.create_round(course_id, course_name).await {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, %course_id, "Failed to start round");
                let error = SessionError::from(e);
                self.record_error(error.clone());
                return Err(error);
            }
        };

        info!(round_id = %id, course = course_name, "Round started");
        self.refresh_round(id).await?;
        Ok(id)
    }

    /// Closes the active round. Does nothing when no round is active.
    pub async fn end_round(&self) -> Result<(), SessionError> {
        let Some(id) = self.active_round_id() else {
            return Ok(());
        };

        if let Err(e) = self.store.close_round(id).await {
            warn!(error = %e, round_id = %id, "Failed to close round");
            let error = SessionError::from(e);
            self.record_error(error.clone());
            return Err(error);
        }

        info!(round_id = %id, "Round ended");
        self.state().active_round = None;
        Ok(())
    }

    /// Records (or replaces) the score for `hole_number` on the active round
    /// and reloads the round. Does nothing when no round is active.
    pub async fn record_score(
        &self,
        hole_number: u8,
        par: u8,
        strokes: u8,
        putts: Option<u8>,
    ) -> Result<(), SessionError> {
        let Some(id) = self.active_round_id() else {
            return Ok(());
        };

        if hole_number == 0 {
            return Err(SessionError::InvalidScore("hole numbers start at 1".into()));
        }
        if strokes == 0 {
            return Err(SessionError::InvalidScore(format!(
                "hole {hole_number}: strokes must be at least 1"
            )));
        }

        let score = HoleScore {
            hole_number,
            par,
            strokes,
            putts,
        };

        if let Err(e) = self.store.upsert_score(id, score).await {
            warn!(error = %e, round_id = %id, hole_number, "Failed to record score");
            let error = SessionError::from(e);
            self.record_error(error.clone());
            return Err(error);
        }

        debug!(round_id = %id, hole_number, strokes, "Score recorded");
        self.refresh_round(id).await
    }

    fn active_round_id(&self) -> Option<RoundId> {
        self.state().active_round.as_ref().map(|r| r.id)
    }

    async fn refresh_round(&self, id: RoundId) -> Result<(), SessionError> {
        match self.store.get_round(id).await {
            Ok(round) => {
                self.state().active_round = round.filter(|r| r.active);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, round_id = %id, "Failed to reload round");
                let error = SessionError::from(e);
                self.record_error(error.clone());
                Err(error)
            }
        }
    }

    /// Most recently started completed rounds, newest first. Empty if the
    /// store cannot be read.
    pub async fn completed_rounds(&self, limit: usize) -> Vec<Round> {
        match self.store.list_completed_rounds(limit).await {
            Ok(rounds) => rounds,
            Err(e) => {
                warn!(error = %e, "Failed to list completed rounds");
                self.record_error(e.into());
                Vec::new()
            }
        }
    }

    /// Distances from the player to every tracked ball, in registry order,
    /// followed by the current hole when a round is active and that hole
    /// exists on its course. Empty until a location is known.
    pub async fn measurements(&self) -> Vec<DistanceMeasurement> {
        let (location, balls, round) = {
            let state = self.state();
            (state.location, state.balls.clone(), state.active_round.clone())
        };

        let Some(player) = location else {
            return Vec::new();
        };
        let from = player.coordinate;

        let mut measurements: Vec<DistanceMeasurement> = balls
            .into_iter()
            .map(|ball| {
                DistanceMeasurement::between(
                    MeasurementTarget::Ball(ball.id),
                    ball.name,
                    from,
                    ball.location,
                )
            })
            .collect();

        if let Some(round) = round
            && let Ok(number) = u8::try_from(round.current_hole_number())
            && let Some(course) = self.resolve_course(round.course_id).await
            && let Some(hole) = course.hole(number)
        {
            measurements.push(DistanceMeasurement::between(
                MeasurementTarget::Hole(hole.number),
                format!("Hole {}", hole.number),
                from,
                hole.location,
            ));
        }

        measurements
    }

    async fn resolve_course(&self, id: CourseId) -> Option<GolfCourse> {
        let cached = self.state().courses.iter().find(|c| c.id == id).cloned();
        if cached.is_some() {
            return cached;
        }

        match self.store.get_course(id).await {
            Ok(course) => course,
            Err(e) => {
                warn!(error = %e, course_id = %id, "Failed to load course");
                None
            }
        }
    }

    /// Stops location tracking and tears down the registry. Safe to call more
    /// than once, and before or while [`start`](Self::start) runs.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let subscriptions = std::mem::take(
            &mut *self
                .subscriptions
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for subscription in subscriptions {
            subscription.unsubscribe();
        }

        self.location.stop().await;
        self.registry.shutdown().await;
        debug!("Session shut down");
    }
}
