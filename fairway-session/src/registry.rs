//! Live registry of tracked balls.
//!
//! The registry runs discovery through a [`DeviceLink`], turns a discovered
//! device (or, failing that, a synthesized one) into a [`TrackedBall`] on
//! [`BallRegistry::pair`], and keeps balls reporting through a periodic
//! telemetry tick. Every mutation of the ball set is published to listeners
//! as a full snapshot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use fairway_core::{
    BallId, ConnectionState, DeviceId, DiscoveredDevice, Percentage, TrackedBall,
};
use rand::Rng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ble::{AdapterError, DeviceLink, LinkKind, PowerState, ScanEvent, SimulatedLink};
use crate::config::BleConfig;
use crate::location::jitter_coordinate;
use crate::observer::{Listeners, Subscription};

const SCAN_BUFFER: usize = 64;

#[derive(Clone)]
pub struct BallRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    link: Arc<dyn DeviceLink>,
    fallback: SimulatedLink,
    config: BleConfig,
    state: Mutex<RegistryState>,
    listeners: Listeners<Vec<TrackedBall>>,
    shutdown: CancellationToken,
}

#[derive(Default)]
struct RegistryState {
    started: bool,
    scan: Option<ActiveScan>,
    next_scan: u64,
    discovered: Vec<DiscoveredDevice>,
    /// Link that produced the current discovered set.
    discovered_via: Option<LinkKind>,
    connections: HashMap<DeviceId, ConnectionState>,
    balls: Vec<TrackedBall>,
    /// Most recent adapter failure, including ones recovered by simulation.
    last_error: Option<AdapterError>,
}

struct ActiveScan {
    seq: u64,
    token: CancellationToken,
    via: LinkKind,
}

impl BallRegistry {
    pub fn new(link: Arc<dyn DeviceLink>, config: BleConfig) -> Self {
        let fallback = SimulatedLink::new(config.simulated_discovery_delay());
        Self {
            inner: Arc::new(RegistryInner {
                link,
                fallback,
                config,
                state: Mutex::new(RegistryState::default()),
                listeners: Listeners::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn link_kind(&self) -> LinkKind {
        self.inner.link.kind()
    }

    pub fn balls(&self) -> Vec<TrackedBall> {
        self.state().balls.clone()
    }

    pub fn discovered(&self) -> Vec<DiscoveredDevice> {
        self.state().discovered.clone()
    }

    pub fn is_scanning(&self) -> bool {
        self.state().scan.is_some()
    }

    pub fn connection_state(&self, id: &DeviceId) -> Option<ConnectionState> {
        self.state().connections.get(id).copied()
    }

    /// Takes the most recent adapter failure. Scan fallbacks and failed
    /// connections land here even though the registry keeps working.
    pub fn take_error(&self) -> Option<AdapterError> {
        self.state().last_error.take()
    }

    pub fn on_update<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Vec<TrackedBall>) + Send + Sync + 'static,
    {
        self.inner.listeners.subscribe(callback)
    }

    /// Starts background telemetry and adapter power watching. Idempotent.
    pub fn start(&self) {
        {
            let mut state = self.state();
            if state.started || self.inner.shutdown.is_cancelled() {
                return;
            }
            state.started = true;
        }

        self.spawn_telemetry();
        if let Some(power) = self.inner.link.power_states() {
            self.spawn_power_watch(power);
        }
        info!(link = ?self.inner.link.kind(), "Ball registry started");
    }

    /// Starts discovery unless a scan is already running. Clears previously
    /// discovered devices. Falls back to simulated discovery when the link
    /// cannot scan.
    pub async fn start_scan(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }

        let (seq, token) = {
            let mut state = self.state();
            if state.scan.is_some() {
                return;
            }
            let seq = state.next_scan;
            state.next_scan += 1;
            let token = self.inner.shutdown.child_token();
            state.discovered.clear();
            state.discovered_via = Some(self.inner.link.kind());
            state.scan = Some(ActiveScan {
                seq,
                token: token.clone(),
                via: self.inner.link.kind(),
            });
            (seq, token)
        };

        let (tx, rx) = mpsc::channel(SCAN_BUFFER);
        self.spawn_scan_consumer(seq, rx, token.clone());
        self.spawn_scan_timeout(seq, token.clone());

        info!(scan = seq, link = ?self.inner.link.kind(), "Scan started");

        if let Err(e) = self.inner.link.start_scan(tx.clone(), token.clone()).await {
            if token.is_cancelled() {
                return;
            }
            warn!(error = %e, "Scan unavailable, falling back to simulated discovery");
            {
                let mut state = self.state();
                if let Some(scan) = state.scan.as_mut()
                    && scan.seq == seq
                {
                    scan.via = LinkKind::Simulated;
                    state.discovered_via = Some(LinkKind::Simulated);
                }
                state.last_error = Some(e);
            }
            if let Err(e) = self.inner.fallback.start_scan(tx, token).await {
                warn!(error = %e, "Simulated discovery failed to start");
            }
        }
    }

    /// Stops the active scan, if any. Idempotent.
    pub async fn stop_scan(&self) {
        self.end_scan(None).await;
    }

    async fn end_scan(&self, only: Option<u64>) {
        let scan = {
            let mut state = self.state();
            match &state.scan {
                Some(scan) if only.is_none_or(|seq| seq == scan.seq) => state.scan.take(),
                _ => None,
            }
        };

        let Some(scan) = scan else {
            return;
        };

        scan.token.cancel();
        if scan.via == LinkKind::Adapter {
            self.inner.link.stop_scan().await;
        }
        info!(scan = scan.seq, "Scan stopped");
    }

    fn record_discovered(&self, seq: u64, device: DiscoveredDevice) {
        let mut state = self.state();
        if !state.scan.as_ref().is_some_and(|s| s.seq == seq) {
            return;
        }

        state
            .connections
            .entry(device.id.clone())
            .or_insert(ConnectionState::Discovered);

        match state.discovered.iter_mut().find(|d| d.id == device.id) {
            Some(existing) => *existing = device,
            None => {
                debug!(device_id = %device.id, rssi = ?device.rssi, "Discovered device");
                state.discovered.push(device);
            }
        }
    }

    /// Connects to a discovered device. Without an adapter, any previously
    /// discovered id connects and unknown ids fail.
    pub async fn connect(&self, id: &DeviceId) -> bool {
        if self.inner.shutdown.is_cancelled() {
            return false;
        }

        let via = {
            let mut state = self.state();
            let known = state.discovered.iter().any(|d| &d.id == id);
            let via = state.discovered_via.unwrap_or(self.inner.link.kind());
            if via == LinkKind::Simulated && !known {
                warn!(device_id = %id, "Cannot connect to unknown device");
                state.last_error = Some(AdapterError::ConnectionFailed {
                    id: id.clone(),
                    reason: "device was not discovered".into(),
                });
                return false;
            }
            state
                .connections
                .insert(id.clone(), ConnectionState::Connecting);
            via
        };

        let result = match via {
            LinkKind::Adapter => self.inner.link.connect(id).await,
            LinkKind::Simulated => self.inner.fallback.connect(id).await,
        };

        let mut state = self.state();
        match result {
            Ok(()) => {
                info!(device_id = %id, "Connected to device");
                state.connections.insert(id.clone(), ConnectionState::Connected);
                true
            }
            Err(e) => {
                warn!(device_id = %id, error = %e, "Connection failed");
                state.connections.insert(id.clone(), ConnectionState::Failed);
                state.last_error = Some(e);
                false
            }
        }
    }

    /// Pairs a ball under `name`.
    ///
    /// Starts a scan and waits for it to settle unless one is already running,
    /// then connects to the first discovered device that is not already
    /// tracked. If nothing suitable was discovered a ball without a backing
    /// device is synthesized. Returns false only when a connection attempt
    /// failed.
    pub async fn pair(&self, name: &str) -> bool {
        if self.inner.shutdown.is_cancelled() {
            return false;
        }

        if !self.is_scanning() {
            self.start_scan().await;
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => return false,
                _ = tokio::time::sleep(self.inner.config.settle_delay()) => {}
            }
        }

        let candidate = {
            let state = self.state();
            state
                .discovered
                .iter()
                .find(|d| {
                    !state
                        .balls
                        .iter()
                        .any(|b| b.device_id.as_ref() == Some(&d.id))
                })
                .cloned()
        };

        let ball = match candidate {
            Some(device) => {
                if !self.connect(&device.id).await {
                    return false;
                }
                TrackedBall {
                    id: BallId::from(&device.id),
                    name: name.into(),
                    device_id: Some(device.id),
                    location: jitter_coordinate(
                        self.inner.config.reference,
                        self.inner.config.pairing_jitter_deg,
                    ),
                    battery: Some(random_battery()),
                    rssi: device.rssi,
                    connected: true,
                    last_seen: jiff::Timestamp::now(),
                }
            }
            None => {
                debug!("No devices discovered, synthesizing ball");
                TrackedBall {
                    id: BallId::generate(),
                    name: name.into(),
                    device_id: None,
                    location: jitter_coordinate(
                        self.inner.config.reference,
                        self.inner.config.pairing_jitter_deg,
                    ),
                    battery: Some(random_battery()),
                    rssi: Some(rand::rng().random_range(-90..-40)),
                    connected: true,
                    last_seen: jiff::Timestamp::now(),
                }
            }
        };

        if self.inner.shutdown.is_cancelled() {
            return false;
        }

        info!(ball_id = %ball.id, name, backed = ball.device_id.is_some(), "Paired ball");
        self.upsert(ball);
        true
    }

    fn upsert(&self, ball: TrackedBall) {
        let snapshot = {
            let mut state = self.state();
            match state.balls.iter_mut().find(|b| b.id == ball.id) {
                Some(existing) => *existing = ball,
                None => state.balls.push(ball),
            }
            state.balls.clone()
        };
        self.inner.listeners.notify(&snapshot);
    }

    /// Forgets a ball and its connection record. Listeners are notified even
    /// when the id was unknown.
    pub fn remove(&self, id: &BallId) {
        let snapshot = {
            let mut state = self.state();
            if let Some(pos) = state.balls.iter().position(|b| &b.id == id) {
                let ball = state.balls.remove(pos);
                if let Some(device_id) = ball.device_id {
                    state.connections.remove(&device_id);
                }
                info!(ball_id = %id, "Removed ball");
            }
            state.balls.clone()
        };
        self.inner.listeners.notify(&snapshot);
    }

    /// Perturbs every ball's position and refreshes its last-seen time.
    fn telemetry_tick(&self) {
        let snapshot = {
            let mut state = self.state();
            if state.balls.is_empty() {
                return;
            }
            let now = jiff::Timestamp::now();
            let jitter = self.inner.config.telemetry_jitter_deg;
            for ball in state.balls.iter_mut() {
                ball.location = jitter_coordinate(ball.location, jitter);
                ball.last_seen = ball.last_seen.max(now);
            }
            state.balls.clone()
        };
        self.inner.listeners.notify(&snapshot);
    }

    fn spawn_telemetry(&self) {
        let registry = self.clone();
        let cancel = self.inner.shutdown.clone();
        let period = self.inner.config.telemetry_interval();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!("Telemetry shutting down");
                        break;
                    }
                    _ = interval.tick() => registry.telemetry_tick(),
                }
            }
        });
    }

    fn spawn_power_watch(&self, mut power: tokio::sync::watch::Receiver<PowerState>) {
        let registry = self.clone();
        let cancel = self.inner.shutdown.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    changed = power.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let state = *power.borrow_and_update();
                        info!(?state, "Adapter power state changed");
                        if state != PowerState::PoweredOn && registry.scanning_via() == Some(LinkKind::Adapter) {
                            registry.stop_scan().await;
                        }
                    }
                }
            }
        });
    }

    fn scanning_via(&self) -> Option<LinkKind> {
        self.state().scan.as_ref().map(|s| s.via)
    }

    fn spawn_scan_consumer(&self, seq: u64, mut rx: mpsc::Receiver<ScanEvent>, token: CancellationToken) {
        let registry = self.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    event = rx.recv() => match event {
                        Some(ScanEvent::Device(device)) => registry.record_discovered(seq, device),
                        Some(ScanEvent::Error(e)) => {
                            warn!(scan = seq, error = %e, "Scan reported an error");
                            registry.state().last_error = Some(e);
                            registry.end_scan(Some(seq)).await;
                            break;
                        }
                        None => break,
                    }
                }
            }
        });
    }

    fn spawn_scan_timeout(&self, seq: u64, token: CancellationToken) {
        let registry = self.clone();
        let timeout = self.inner.config.scan_timeout();

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    info!(scan = seq, "Scan timed out");
                    registry.end_scan(Some(seq)).await;
                }
            }
        });
    }

    /// Stops scanning and every background task, and forgets all devices and
    /// balls. Listeners are not notified.
    pub async fn shutdown(&self) {
        self.stop_scan().await;
        self.inner.shutdown.cancel();

        let mut state = self.state();
        state.discovered.clear();
        state.discovered_via = None;
        state.connections.clear();
        state.balls.clear();
        state.last_error = None;
        debug!("Ball registry shut down");
    }
}

fn random_battery() -> Percentage {
    Percentage(rand::rng().random_range(0..100))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::{AdapterError, AdapterLink, BleAdapter, ScanOptions, link_for};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::watch;

    struct FakeAdapter {
        power: watch::Sender<PowerState>,
        devices: Vec<DiscoveredDevice>,
        fail_connect: bool,
        hang_connect: bool,
        hang_scan: bool,
        events: Mutex<Option<mpsc::Sender<ScanEvent>>>,
        stops: AtomicUsize,
    }

    impl FakeAdapter {
        fn new(power: PowerState, devices: Vec<DiscoveredDevice>) -> Self {
            Self {
                power: watch::Sender::new(power),
                devices,
                fail_connect: false,
                hang_connect: false,
                hang_scan: false,
                events: Mutex::new(None),
                stops: AtomicUsize::new(0),
            }
        }

        fn sender(&self) -> mpsc::Sender<ScanEvent> {
            self.events.lock().unwrap().clone().expect("scan not started")
        }
    }

    #[async_trait]
    impl BleAdapter for FakeAdapter {
        async fn power_state(&self) -> PowerState {
            *self.power.borrow()
        }

        fn power_states(&self) -> watch::Receiver<PowerState> {
            self.power.subscribe()
        }

        async fn scan(
            &self,
            options: ScanOptions,
            events: mpsc::Sender<ScanEvent>,
        ) -> Result<(), AdapterError> {
            assert!(options.allow_duplicates);
            if self.hang_scan {
                std::future::pending::<()>().await;
            }
            for device in &self.devices {
                events
                    .send(ScanEvent::Device(device.clone()))
                    .await
                    .map_err(|e| AdapterError::Scan(e.to_string()))?;
            }
            *self.events.lock().unwrap() = Some(events);
            Ok(())
        }

        async fn stop_scan(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }

        async fn connect(&self, id: &DeviceId) -> Result<(), AdapterError> {
            if self.hang_connect {
                std::future::pending::<()>().await;
            }
            if self.fail_connect {
                return Err(AdapterError::ConnectionFailed {
                    id: id.clone(),
                    reason: "out of range".into(),
                });
            }
            Ok(())
        }

        async fn discover_services(&self, _id: &DeviceId) -> Result<(), AdapterError> {
            Ok(())
        }
    }

    fn device(id: &str, rssi: i16) -> DiscoveredDevice {
        DiscoveredDevice {
            id: DeviceId(id.into()),
            name: Some(format!("Ball {id}").into()),
            rssi: Some(rssi),
        }
    }

    fn simulated_registry() -> BallRegistry {
        let config = BleConfig::default();
        BallRegistry::new(link_for(None, &config), config)
    }

    fn adapter_registry(adapter: Arc<FakeAdapter>) -> BallRegistry {
        let config = BleConfig::default();
        BallRegistry::new(Arc::new(AdapterLink::new(adapter, &config)), config)
    }

    fn snapshots(registry: &BallRegistry) -> (Arc<Mutex<Vec<Vec<TrackedBall>>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = registry.on_update(move |balls| sink.lock().unwrap().push(balls.clone()));
        (seen, sub)
    }

    #[tokio::test(start_paused = true)]
    async fn simulated_scan_discovers_then_times_out() {
        let registry = simulated_registry();

        registry.start_scan().await;
        assert!(registry.is_scanning());
        assert!(registry.discovered().is_empty());

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(registry.discovered(), SimulatedLink::devices());
        assert_eq!(
            registry.connection_state(&DeviceId("SIM-BALL-0001".into())),
            Some(ConnectionState::Discovered)
        );

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(!registry.is_scanning());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_scan_is_idempotent_and_blocks_late_results() {
        let registry = simulated_registry();

        registry.stop_scan().await;
        registry.start_scan().await;
        registry.stop_scan().await;
        registry.stop_scan().await;

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!registry.is_scanning());
        assert!(registry.discovered().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn pair_uses_first_discovered_device() {
        let registry = simulated_registry();
        let (seen, _sub) = snapshots(&registry);

        registry.start_scan().await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(registry.pair("X").await);

        let balls = registry.balls();
        assert_eq!(balls.len(), 1);
        let ball = &balls[0];
        assert_eq!(ball.name.as_ref(), "X");
        assert_eq!(ball.id.0.as_ref(), "SIM-BALL-0001");
        assert_eq!(ball.device_id, Some(DeviceId("SIM-BALL-0001".into())));
        assert_eq!(ball.rssi, Some(-58));
        assert!(ball.connected);
        assert!(ball.battery.is_some_and(|b| b.0 < 100));

        let reference = BleConfig::default().reference;
        assert!((ball.location.latitude - reference.latitude).abs() <= 0.005);
        assert!((ball.location.longitude - reference.longitude).abs() <= 0.005);

        assert_eq!(
            registry.connection_state(&DeviceId("SIM-BALL-0001".into())),
            Some(ConnectionState::Connected)
        );
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pair_without_scan_waits_for_settle() {
        let registry = simulated_registry();

        assert!(registry.pair("First").await);
        assert!(registry.pair("Second").await);

        let ids: Vec<String> = registry.balls().iter().map(|b| b.id.0.to_string()).collect();
        assert_eq!(ids, vec!["SIM-BALL-0001", "SIM-BALL-0002"]);
    }

    #[tokio::test(start_paused = true)]
    async fn pair_synthesizes_ball_when_nothing_discovered() {
        let adapter = Arc::new(FakeAdapter::new(PowerState::PoweredOn, Vec::new()));
        let registry = adapter_registry(adapter);

        assert!(registry.pair("Lonely").await);

        let balls = registry.balls();
        assert_eq!(balls.len(), 1);
        assert_eq!(balls[0].name.as_ref(), "Lonely");
        assert!(balls[0].device_id.is_none());
        assert!(balls[0].rssi.is_some());
        assert!(balls[0].connected);
    }

    #[tokio::test(start_paused = true)]
    async fn pair_reports_failed_connection() {
        let adapter = Arc::new(FakeAdapter {
            fail_connect: true,
            ..FakeAdapter::new(PowerState::PoweredOn, vec![device("AA:01", -50)])
        });
        let registry = adapter_registry(adapter);
        let (seen, _sub) = snapshots(&registry);

        assert!(!registry.pair("X").await);
        assert!(registry.balls().is_empty());
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(
            registry.connection_state(&DeviceId("AA:01".into())),
            Some(ConnectionState::Failed)
        );
        assert!(matches!(
            registry.take_error(),
            Some(AdapterError::ConnectionFailed { id, .. }) if id.0.as_ref() == "AA:01"
        ));
        assert_eq!(registry.take_error(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn unresponsive_connect_times_out() {
        let adapter = Arc::new(FakeAdapter {
            hang_connect: true,
            ..FakeAdapter::new(PowerState::PoweredOn, vec![device("AA:01", -50)])
        });
        let registry = adapter_registry(adapter);

        let started = tokio::time::Instant::now();
        assert!(!registry.pair("X").await);
        assert!(started.elapsed() >= BleConfig::default().connect_timeout());
        assert_eq!(
            registry.connection_state(&DeviceId("AA:01".into())),
            Some(ConnectionState::Failed)
        );
        assert!(matches!(
            registry.take_error(),
            Some(AdapterError::ConnectionFailed { reason, .. }) if reason.contains("timed out")
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn unresponsive_scan_falls_back_to_simulation() {
        let adapter = Arc::new(FakeAdapter {
            hang_scan: true,
            ..FakeAdapter::new(PowerState::PoweredOn, vec![device("AA:01", -50)])
        });
        let registry = adapter_registry(adapter);

        assert!(registry.pair("X").await);
        assert_eq!(registry.balls()[0].id.0.as_ref(), "SIM-BALL-0001");
        assert!(matches!(registry.take_error(), Some(AdapterError::Scan(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn pair_connects_through_adapter() {
        let adapter = Arc::new(FakeAdapter::new(
            PowerState::PoweredOn,
            vec![device("AA:01", -50), device("AA:02", -70)],
        ));
        let registry = adapter_registry(adapter);

        registry.start_scan().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(registry.discovered().len(), 2);

        assert!(registry.pair("X").await);
        assert_eq!(registry.balls()[0].id.0.as_ref(), "AA:01");
    }

    #[tokio::test(start_paused = true)]
    async fn powered_off_adapter_falls_back_to_simulation() {
        let adapter = Arc::new(FakeAdapter::new(
            PowerState::PoweredOff,
            vec![device("AA:01", -50)],
        ));
        let registry = adapter_registry(adapter);

        assert!(registry.pair("X").await);
        assert_eq!(registry.balls()[0].id.0.as_ref(), "SIM-BALL-0001");
        assert_eq!(
            registry.take_error(),
            Some(AdapterError::Unavailable(PowerState::PoweredOff))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn connect_unknown_device_fails_without_adapter() {
        let registry = simulated_registry();
        assert!(!registry.connect(&DeviceId("nope".into())).await);
        assert!(matches!(
            registry.take_error(),
            Some(AdapterError::ConnectionFailed { id, .. }) if id.0.as_ref() == "nope"
        ));

        registry.start_scan().await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(registry.connect(&DeviceId("SIM-BALL-0002".into())).await);
    }

    #[tokio::test(start_paused = true)]
    async fn remove_unknown_id_keeps_registry_and_notifies() {
        let registry = simulated_registry();
        assert!(registry.pair("X").await);
        let (seen, _sub) = snapshots(&registry);

        registry.remove(&BallId("missing".into()));
        assert_eq!(registry.balls().len(), 1);
        assert_eq!(seen.lock().unwrap().len(), 1);

        let id = registry.balls()[0].id.clone();
        registry.remove(&id);
        assert!(registry.balls().is_empty());
        assert_eq!(registry.connection_state(&DeviceId(id.0.clone())), None);
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn telemetry_moves_balls_and_refreshes_last_seen() {
        let registry = simulated_registry();
        registry.start();
        assert!(registry.pair("X").await);
        let before = registry.balls()[0].clone();
        let (seen, _sub) = snapshots(&registry);

        tokio::time::sleep(Duration::from_millis(5_100)).await;

        let after = registry.balls()[0].clone();
        assert!(after.last_seen >= before.last_seen);
        assert!((after.location.latitude - before.location.latitude).abs() <= 0.000_5 * 2.0);
        assert!(!seen.lock().unwrap().is_empty());

        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_clears_state_and_silences_timers() {
        let registry = simulated_registry();
        registry.start();
        assert!(registry.pair("X").await);
        let (seen, _sub) = snapshots(&registry);

        registry.shutdown().await;
        registry.shutdown().await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert!(registry.balls().is_empty());
        assert!(registry.discovered().is_empty());
        assert!(!registry.is_scanning());
        assert!(seen.lock().unwrap().is_empty());
        assert!(!registry.pair("Y").await);
    }

    #[tokio::test(start_paused = true)]
    async fn scan_error_ends_scan() {
        let adapter = Arc::new(FakeAdapter::new(PowerState::PoweredOn, Vec::new()));
        let registry = adapter_registry(adapter.clone());

        registry.start_scan().await;
        adapter
            .sender()
            .send(ScanEvent::Error(AdapterError::Scan("radio reset".into())))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(!registry.is_scanning());
        assert_eq!(adapter.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn power_loss_stops_adapter_scan() {
        let adapter = Arc::new(FakeAdapter::new(PowerState::PoweredOn, Vec::new()));
        let registry = adapter_registry(adapter.clone());
        registry.start();

        registry.start_scan().await;
        assert!(registry.is_scanning());

        adapter.power.send_replace(PowerState::PoweredOff);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(!registry.is_scanning());
        registry.shutdown().await;
    }
}
