use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fairway_core::DeviceId;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{AdapterError, BleAdapter, DeviceLink, LinkKind, PowerState, ScanEvent, ScanOptions};
use crate::config::BleConfig;

/// Link that drives a platform [`BleAdapter`]. Every adapter call is bounded
/// by a timeout from [`BleConfig`].
pub struct AdapterLink {
    adapter: Arc<dyn BleAdapter>,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl AdapterLink {
    pub fn new(adapter: Arc<dyn BleAdapter>, config: &BleConfig) -> Self {
        Self {
            adapter,
            connect_timeout: config.connect_timeout(),
            request_timeout: config.scan_request_timeout(),
        }
    }

    async fn bounded<T>(
        &self,
        what: &str,
        call: impl Future<Output = T>,
    ) -> Result<T, AdapterError> {
        tokio::time::timeout(self.request_timeout, call)
            .await
            .map_err(|_| AdapterError::Scan(format!("{what} timed out")))
    }
}

#[async_trait]
impl DeviceLink for AdapterLink {
    fn kind(&self) -> LinkKind {
        LinkKind::Adapter
    }

    async fn start_scan(
        &self,
        events: mpsc::Sender<ScanEvent>,
        cancel: CancellationToken,
    ) -> Result<(), AdapterError> {
        let state = self
            .bounded("power state query", self.adapter.power_state())
            .await?;
        if state != PowerState::PoweredOn {
            return Err(AdapterError::Unavailable(state));
        }

        let scan = self.adapter.scan(ScanOptions::default(), events);
        if let Err(e) = self.bounded("scan start", scan).await? {
            return Err(e);
        }

        if cancel.is_cancelled() {
            // stopped while the adapter was still starting up
            self.stop_scan().await;
            return Ok(());
        }

        info!("Adapter scan started");
        Ok(())
    }

    async fn stop_scan(&self) {
        match self.bounded("scan stop", self.adapter.stop_scan()).await {
            Ok(()) => debug!("Adapter scan stopped"),
            Err(e) => warn!(error = %e, "Adapter did not confirm scan stop"),
        }
    }

    async fn connect(&self, id: &DeviceId) -> Result<(), AdapterError> {
        let failed = |e: AdapterError| match e {
            AdapterError::ConnectionFailed { .. } => e,
            other => AdapterError::ConnectionFailed {
                id: id.clone(),
                reason: other.to_string(),
            },
        };

        let handshake = async {
            self.adapter.connect(id).await?;
            self.adapter.discover_services(id).await
        };

        match tokio::time::timeout(self.connect_timeout, handshake).await {
            Ok(result) => result.map_err(failed),
            Err(_) => Err(AdapterError::ConnectionFailed {
                id: id.clone(),
                reason: format!("timed out after {:?}", self.connect_timeout),
            }),
        }
    }

    fn power_states(&self) -> Option<watch::Receiver<PowerState>> {
        Some(self.adapter.power_states())
    }
}
