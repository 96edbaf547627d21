use std::time::Duration;

use async_trait::async_trait;
use fairway_core::{DeviceId, DiscoveredDevice};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{AdapterError, DeviceLink, LinkKind, PowerState, ScanEvent};

/// Devices reported by simulated discovery.
const SIMULATED_DEVICES: [(&str, &str, i16); 3] = [
    ("SIM-BALL-0001", "TrackBall A1", -58),
    ("SIM-BALL-0002", "TrackBall B2", -67),
    ("SIM-BALL-0003", "TrackBall C3", -74),
];

/// Link used when no adapter can be driven. Reports a fixed device list after
/// a short delay and accepts every connection.
pub struct SimulatedLink {
    discovery_delay: Duration,
}

impl SimulatedLink {
    pub fn new(discovery_delay: Duration) -> Self {
        Self { discovery_delay }
    }

    pub fn devices() -> Vec<DiscoveredDevice> {
        SIMULATED_DEVICES
            .iter()
            .map(|&(id, name, rssi)| DiscoveredDevice {
                id: DeviceId(id.into()),
                name: Some(name.into()),
                rssi: Some(rssi),
            })
            .collect()
    }
}

#[async_trait]
impl DeviceLink for SimulatedLink {
    fn kind(&self) -> LinkKind {
        LinkKind::Simulated
    }

    async fn start_scan(
        &self,
        events: mpsc::Sender<ScanEvent>,
        cancel: CancellationToken,
    ) -> Result<(), AdapterError> {
        let delay = self.discovery_delay;
        info!(delay_ms = delay.as_millis() as u64, "Starting simulated discovery");

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Simulated discovery cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    for device in SimulatedLink::devices() {
                        if cancel.is_cancelled() || events.send(ScanEvent::Device(device)).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });

        Ok(())
    }

    async fn stop_scan(&self) {}

    async fn connect(&self, _id: &DeviceId) -> Result<(), AdapterError> {
        Ok(())
    }

    fn power_states(&self) -> Option<watch::Receiver<PowerState>> {
        None
    }
}
