//! Bluetooth capability seams.
//!
//! [`BleAdapter`] is the platform radio. The registry never talks to it
//! directly; it goes through a [`DeviceLink`], of which there are two:
//! [`AdapterLink`] forwards to a real adapter, [`SimulatedLink`] reports a
//! fixed set of plausible devices. [`link_for`] picks one at startup.

pub mod adapter;
pub mod simulated;

use std::sync::Arc;

use async_trait::async_trait;
use fairway_core::{DeviceId, DiscoveredDevice};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::config::BleConfig;

pub use adapter::AdapterLink;
pub use simulated::SimulatedLink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PowerState {
    PoweredOn,
    PoweredOff,
    Unauthorized,
    Unsupported,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    LowPower,
    Balanced,
    LowLatency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptions {
    /// Report every advertisement, not only the first per device.
    pub allow_duplicates: bool,
    pub mode: ScanMode,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            allow_duplicates: true,
            mode: ScanMode::Balanced,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    Device(DiscoveredDevice),
    Error(AdapterError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    #[error("adapter not ready: {0:?}")]
    Unavailable(PowerState),
    #[error("scan failed: {0}")]
    Scan(String),
    #[error("connection to {id} failed: {reason}")]
    ConnectionFailed { id: DeviceId, reason: String },
}

/// Platform Bluetooth LE radio.
#[async_trait]
pub trait BleAdapter: Send + Sync {
    async fn power_state(&self) -> PowerState;

    /// Receiver that observes every power state change.
    fn power_states(&self) -> watch::Receiver<PowerState>;

    /// Starts scanning. Results and asynchronous failures arrive on `events`
    /// until [`BleAdapter::stop_scan`] is called.
    async fn scan(
        &self,
        options: ScanOptions,
        events: mpsc::Sender<ScanEvent>,
    ) -> Result<(), AdapterError>;

    async fn stop_scan(&self);

    async fn connect(&self, id: &DeviceId) -> Result<(), AdapterError>;

    async fn discover_services(&self, id: &DeviceId) -> Result<(), AdapterError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkKind {
    Adapter,
    Simulated,
}

/// Discovery and connection provider used by the ball registry.
#[async_trait]
pub trait DeviceLink: Send + Sync {
    fn kind(&self) -> LinkKind;

    /// Begins discovery. Devices are sent on `events` until `cancel` fires or
    /// [`DeviceLink::stop_scan`] is called.
    async fn start_scan(
        &self,
        events: mpsc::Sender<ScanEvent>,
        cancel: CancellationToken,
    ) -> Result<(), AdapterError>;

    async fn stop_scan(&self);

    async fn connect(&self, id: &DeviceId) -> Result<(), AdapterError>;

    fn power_states(&self) -> Option<watch::Receiver<PowerState>>;
}

/// Adapter-backed link when an adapter is present, simulated otherwise.
pub fn link_for(adapter: Option<Arc<dyn BleAdapter>>, config: &BleConfig) -> Arc<dyn DeviceLink> {
    match adapter {
        Some(adapter) => Arc::new(AdapterLink::new(adapter, config)),
        None => Arc::new(SimulatedLink::new(config.simulated_discovery_delay())),
    }
}
